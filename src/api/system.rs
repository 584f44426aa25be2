//! 系统信息 API
//!
//! GET /system/stats

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::state::AppState;

/// 创建系统信息路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/system/stats", get(get_system_stats))
}

/// 获取系统负载统计
///
/// GET /system/stats
/// 无需认证
async fn get_system_stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let stats = state.host.system_stats().await?;
    Ok(Json(stats))
}
