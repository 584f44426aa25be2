//! 健康检查 API
//!
//! GET /health

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    started_at: String,
    uptime_seconds: i64,
    audit_enabled: bool,
    /// 实际使用的 compose 命令
    compose_command: Option<String>,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// 健康检查
///
/// GET /health
/// 无需认证
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let compose_command = state.config.tools.compose.as_ref().map(|c| {
        std::iter::once(c.program.as_str())
            .chain(c.prefix_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    });

    Json(HealthResponse {
        status: "ok",
        service: "devops-agent",
        version: VERSION,
        timestamp: chrono::Utc::now().to_rfc3339(),
        started_at: state.started_at.to_rfc3339(),
        uptime_seconds: state.uptime_seconds(),
        audit_enabled: state.audit.is_some(),
        compose_command,
    })
}
