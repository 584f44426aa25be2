//! API Key 认证
//!
//! 部署、自愈等会修改主机状态的接口需要 `x-api-key`

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HeaderMap, request::Parts},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

/// 请求头名称
pub const API_KEY_HEADER: &str = "x-api-key";

/// API Key 认证 Extractor
///
/// ```ignore
/// async fn trigger(_auth: RequireApiKey, State(state): State<Arc<AppState>>) -> impl IntoResponse {
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireApiKey;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        verify_api_key(&parts.headers, &state.api_key).map_err(|e| {
            tracing::warn!(path = %parts.uri.path(), "Rejected unauthenticated request");
            e
        })
    }
}

/// 检查 `x-api-key` 是否与配置一致
pub fn verify_api_key(headers: &HeaderMap, expected_key: &str) -> Result<RequireApiKey, ApiError> {
    let provided_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());

    match provided_key {
        Some(key) if !expected_key.is_empty() && key == expected_key => Ok(RequireApiKey),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(ApiError::unauthorized())
        }
        None => {
            tracing::warn!("Missing x-api-key header");
            Err(ApiError::unauthorized())
        }
    }
}
