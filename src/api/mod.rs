//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod deploy;
pub mod extract;
pub mod heal;
pub mod health;
pub mod system;

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .merge(health::router())
        // Deploy & status
        .merge(deploy::router())
        // Healing
        .merge(heal::router())
        // System
        .merge(system::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::{AuditBackend, AuditConfig, ComposeCommand, EnvConfig, HealConfig, LogFormat, ToolsConfig};
    use crate::infra::audit::MemoryAuditSink;
    use crate::testing::{FakeExecutor, FakeHost};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    const KEY: &str = "secret";

    fn app(executor: FakeExecutor, dir: &std::path::Path) -> Router {
        app_with(Arc::new(executor), dir)
    }

    fn app_with(executor: Arc<FakeExecutor>, dir: &std::path::Path) -> Router {
        let config = EnvConfig {
            api_key: KEY.to_string(),
            port: 0,
            tools: ToolsConfig {
                command_timeout: Duration::from_secs(5),
                probe_timeout: Duration::from_secs(1),
                compose: Some(ComposeCommand::plugin()),
                use_sudo: true,
            },
            heal: HealConfig {
                services: vec!["nginx".to_string()],
                clean_dirs: vec![dir.to_path_buf()],
                package_cache_dirs: Vec::new(),
                ..HealConfig::default()
            },
            audit: AuditConfig {
                backend: AuditBackend::Memory,
                data_dir: dir.to_path_buf(),
                callback_url: None,
            },
            log_format: LogFormat::Text,
        };
        let state = AppState::from_parts(
            config,
            executor,
            Arc::new(FakeHost::new(40, 30)),
            Some(Arc::new(MemoryAuditSink::new())),
        );
        router(Arc::new(state))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, key: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(FakeExecutor::new(), dir.path())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["compose_command"], "docker compose");
    }

    #[tokio::test]
    async fn test_deploy_requires_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new();
        let response = app(executor, dir.path())
            .oneshot(post("/deploy/web1", None, "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_deploy_then_history() {
        let dir = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new()
            .ok("docker ps", "web1\n")
            .ok("docker restart web1", "web1\n");
        let app = app(executor, dir.path());

        let response = app
            .clone()
            .oneshot(post(
                "/deploy/web1",
                Some(KEY),
                r#"{"action":"restart","requester_id":"U1","channel_id":"C1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["backend"], "container_runtime");
        assert_eq!(body["outcome"]["succeeded"], true);
        assert_eq!(body["worst_case_seconds"], 5);

        let response = app
            .oneshot(Request::get("/deployments?limit=5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let history = json_body(response).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["status"], "success");
        assert_eq!(history[0]["requester_id"], "U1");
    }

    #[tokio::test]
    async fn test_failed_deploy_is_still_200() {
        let dir = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new().fail("sudo systemctl restart", 5, "Unit not found");
        let response = app(executor, dir.path())
            .oneshot(post("/deploy/ghost", Some(KEY), ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["outcome"]["succeeded"], false);
        assert_eq!(body["fallback_used"], true);
    }

    #[tokio::test]
    async fn test_unknown_action_is_rejected_without_running_anything() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(
            FakeExecutor::new()
                .ok("docker ps", "web1\n")
                .ok("docker restart web1", "web1\n"),
        );
        let response = app_with(executor.clone(), dir.path())
            .oneshot(post("/deploy/web1", Some(KEY), r#"{"action":"rollback"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "bad_request");
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_heal_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::new().ok("systemctl is-active", "failed\n"));
        let response = app_with(executor.clone(), dir.path())
            .oneshot(post("/heal", Some(KEY), r#"{"tasks":"x"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_status_rejects_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(FakeExecutor::new(), dir.path())
            .oneshot(Request::get("/apps/%24%24/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_heal_with_selected_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(FakeExecutor::new(), dir.path())
            .oneshot(post("/heal", Some(KEY), r#"{"tasks":["check-memory-usage"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["overall_succeeded"], true);
        assert_eq!(body["tasks"][0]["task"], "check_memory_usage");
        assert_eq!(body["tasks"][0]["summary"]["action"], "no_action_needed");
    }

    #[tokio::test]
    async fn test_system_stats() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(FakeExecutor::new(), dir.path())
            .oneshot(Request::get("/system/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["hostname"], "fake-host");
    }
}
