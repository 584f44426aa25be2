//! 部署 API
//!
//! 包含 /deploy/:app, /deployments, /apps/:app/status 端点

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use super::extract::OptionalJson;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::env::constants::{DEFAULT_HISTORY_LIMIT, MAX_AUDIT_HISTORY};
use crate::domain::deploy::DeployRequest;
use crate::domain::runtime::LifecycleAction;
use crate::error::ApiResult;
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 触发部署请求体（可选）
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub action: LifecycleAction,
    #[serde(default)]
    pub requester_id: String,
    #[serde(default)]
    pub channel_id: String,
}

/// 历史查询参数
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// 创建部署路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deploy/:app", post(trigger_deploy))
        .route("/deployments", get(list_deployments))
        .route("/apps/:app/status", get(app_status))
}

/// 触发部署/重启
///
/// POST /deploy/:app
/// 需要 API Key。请求体可省略；无法解析时返回 400。
/// 执行失败同样返回 200，`outcome.succeeded = false`
async fn trigger_deploy(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(app): Path<String>,
    OptionalJson(body): OptionalJson<TriggerRequest>,
) -> impl IntoResponse {
    let request = DeployRequest::new(app, body.action).with_requester(body.requester_id, body.channel_id);

    let cancel = state.request_token();
    let result = state.orchestrator.deploy(request, &cancel).await;
    Json(result)
}

/// 部署历史（最新的在前）
///
/// GET /deployments?limit=10
async fn list_deployments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_AUDIT_HISTORY);
    let entries = state.orchestrator.history(limit).await?;
    Ok(Json(entries))
}

/// 应用当前状态
///
/// GET /apps/:app/status
async fn app_status(State(state): State<Arc<AppState>>, Path(app): Path<String>) -> ApiResult<impl IntoResponse> {
    let cancel = state.request_token();
    let status = state.orchestrator.status(&app, &cancel).await?;
    Ok(Json(status))
}
