//! 自愈 API
//!
//! POST /heal

use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use std::sync::Arc;

use super::extract::OptionalJson;
use crate::domain::heal::HealRequest;
use crate::middleware::RequireApiKey;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/heal", post(run_healing))
}

/// 执行自愈任务
///
/// POST /heal
/// 需要 API Key。请求体可省略，省略时执行全部默认任务；无法解析时返回 400
async fn run_healing(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    OptionalJson(request): OptionalJson<HealRequest>,
) -> impl IntoResponse {
    let cancel = state.request_token();
    Json(state.healer.run(request, &cancel).await)
}
