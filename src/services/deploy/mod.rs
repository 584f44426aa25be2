//! 部署服务模块
//!
//! 解析运行时后端、执行生命周期命令并记录审计日志

pub mod lifecycle;
pub mod probe;
pub mod resolver;
pub mod status;

use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::env::constants::AUDIT_WRITE_TIMEOUT_SECS;
use crate::config::env::{ComposeCommand, ToolsConfig};
use crate::domain::deploy::{DeployRequest, DeployStatus, DeploymentResult};
use crate::domain::heal::elapsed_seconds;
use crate::domain::runtime::{ApplicationName, ExecutionOutcome, NameError, RuntimeBackend};
use crate::infra::audit::{AuditEntry, AuditError, AuditKind, AuditRecord, AuditSink, AuditUpdate};
use crate::infra::command::CommandExecutor;

use super::panic_message;

pub use lifecycle::LifecycleExecutor;
pub use probe::{detect_compose_command, RuntimeProbe};
pub use resolver::{Resolution, RuntimeResolver};
pub use status::{ApplicationStatus, RunState};

/// 部署内部故障
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid application name: {0}")]
    InvalidName(#[from] NameError),

    #[error("internal fault during {stage}: {message}")]
    Panicked { stage: &'static str, message: String },
}

/// 部署编排器
///
/// 对调用方永远返回 [`DeploymentResult`]：名称非法、工具缺失、内部 panic
/// 都会被转换为失败结果
pub struct DeploymentOrchestrator {
    resolver: RuntimeResolver,
    lifecycle: LifecycleExecutor,
    executor: Arc<dyn CommandExecutor>,
    compose: ComposeCommand,
    probe_timeout: Duration,
    audit: Option<Arc<dyn AuditSink>>,
    /// 审计写入的等待上限
    audit_timeout: Duration,
}

impl DeploymentOrchestrator {
    pub fn new(executor: Arc<dyn CommandExecutor>, tools: &ToolsConfig, audit: Option<Arc<dyn AuditSink>>) -> Self {
        Self {
            resolver: RuntimeResolver::standard(executor.clone(), tools.compose(), tools.probe_timeout),
            lifecycle: LifecycleExecutor::new(executor.clone(), tools),
            executor,
            compose: tools.compose(),
            probe_timeout: tools.probe_timeout,
            audit,
            audit_timeout: Duration::from_secs(AUDIT_WRITE_TIMEOUT_SECS),
        }
    }

    pub fn with_audit_timeout(mut self, timeout: Duration) -> Self {
        self.audit_timeout = timeout;
        self
    }

    /// 替换解析器（自定义探针集合）
    pub fn with_resolver(mut self, resolver: RuntimeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn lifecycle(&self) -> &LifecycleExecutor {
        &self.lifecycle
    }

    /// 执行一次部署/重启
    pub async fn deploy(&self, request: DeployRequest, cancel: &CancellationToken) -> DeploymentResult {
        let started_at = Utc::now();

        let name = match ApplicationName::parse(&request.name) {
            Ok(name) => name,
            Err(e) => {
                warn!(raw = %request.name, "Rejected deployment request: {}", e);
                let err = DeployError::from(e);
                let mut result = finish(
                    &self.lifecycle,
                    &request,
                    request.name.clone(),
                    Resolution {
                        backend: RuntimeBackend::fallback(),
                        fallback_used: true,
                    },
                    ExecutionOutcome::fault(err.to_string()),
                    Vec::new(),
                    started_at,
                );
                let record = deployment_record(&request, &result.application, DeployStatus::Failed);
                result.record_id = self.audit_insert(record).await;
                return result;
            }
        };

        info!(app = %name, action = %request.action, requester = %request.requester_id, "Deployment started");

        let record_id = self
            .audit_insert(deployment_record(&request, name.as_str(), DeployStatus::InProgress))
            .await;

        let resolution = match guarded("resolution", self.resolver.detect(&name, cancel)).await {
            Ok(resolution) => resolution,
            Err(err) => {
                let mut result = finish(
                    &self.lifecycle,
                    &request,
                    name.to_string(),
                    Resolution {
                        backend: RuntimeBackend::fallback(),
                        fallback_used: true,
                    },
                    ExecutionOutcome::fault(err.to_string()),
                    Vec::new(),
                    started_at,
                );
                result.record_id = record_id;
                self.audit_finish(&result).await;
                return result;
            }
        };

        let worst_case = self.lifecycle.worst_case_duration(resolution.backend, request.action);
        info!(app = %name, backend = %resolution.backend, worst_case = ?worst_case, "Executing lifecycle");

        let execution = guarded(
            "execution",
            self.lifecycle
                .execute_traced(resolution.backend, request.action, &name, cancel),
        )
        .await;
        let (outcome, stages) = match execution {
            Ok(traced) => traced,
            Err(err) => (ExecutionOutcome::fault(err.to_string()), Vec::new()),
        };

        let mut result = finish(
            &self.lifecycle,
            &request,
            name.to_string(),
            resolution,
            outcome,
            stages,
            started_at,
        );
        result.record_id = record_id;

        if result.succeeded() {
            info!(
                app = %name,
                backend = %result.backend,
                duration = result.duration_seconds,
                "Deployment succeeded"
            );
        } else {
            warn!(
                app = %name,
                backend = %result.backend,
                exit_code = ?result.outcome.exit_code,
                "Deployment failed"
            );
        }

        self.audit_finish(&result).await;
        result
    }

    /// 最近的部署记录（最新的在前）
    pub async fn history(&self, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        match &self.audit {
            Some(sink) => sink.recent(Some(AuditKind::Deployment), limit).await,
            None => Ok(Vec::new()),
        }
    }

    async fn audit_insert(&self, record: AuditRecord) -> Option<String> {
        let sink = self.audit.as_ref()?;
        match tokio::time::timeout(self.audit_timeout, sink.insert(record)).await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to record deployment audit entry");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.audit_timeout, "Audit insert timed out, continuing without record");
                None
            }
        }
    }

    /// 在后台更新审计记录，最多等待 `audit_timeout`，超时后不再等待结果
    async fn audit_finish(&self, result: &DeploymentResult) {
        let (Some(sink), Some(id)) = (self.audit.clone(), result.record_id.clone()) else {
            return;
        };

        let update = AuditUpdate {
            status: result.status().as_str().to_string(),
            execution_time: Some(result.duration_seconds),
            details: serde_json::json!({
                "strategy": result.strategy(),
                "backend": result.backend,
                "fallback_used": result.fallback_used,
                "exit_code": result.outcome.exit_code,
                "termination": result.outcome.termination,
                "stdout": result.outcome.stdout,
                "stderr": result.outcome.stderr,
                "stages": result.stages,
            }),
        };

        let handle = tokio::spawn(async move {
            if let Err(e) = sink.update(&id, update).await {
                warn!(record_id = %id, error = %e, "Failed to update deployment audit entry");
            }
        });
        if tokio::time::timeout(self.audit_timeout, handle).await.is_err() {
            warn!(timeout = ?self.audit_timeout, "Audit update still pending, leaving it in the background");
        }
    }
}

fn deployment_record(request: &DeployRequest, application: &str, status: DeployStatus) -> AuditRecord {
    AuditRecord {
        kind: AuditKind::Deployment,
        application: Some(application.to_string()),
        action: Some(request.action.to_string()),
        requester_id: request.requester_id.clone(),
        channel_id: request.channel_id.clone(),
        status: status.as_str().to_string(),
        execution_time: None,
        details: serde_json::Value::Null,
    }
}

fn finish(
    lifecycle: &LifecycleExecutor,
    request: &DeployRequest,
    application: String,
    resolution: Resolution,
    outcome: ExecutionOutcome,
    stages: Vec<crate::domain::deploy::DeployStage>,
    started_at: chrono::DateTime<Utc>,
) -> DeploymentResult {
    let completed_at = Utc::now();
    DeploymentResult {
        application,
        backend: resolution.backend,
        fallback_used: resolution.fallback_used,
        action: request.action,
        outcome,
        stages,
        requester_id: request.requester_id.clone(),
        channel_id: request.channel_id.clone(),
        record_id: None,
        worst_case_seconds: lifecycle
            .worst_case_duration(resolution.backend, request.action)
            .as_secs(),
        started_at,
        completed_at,
        duration_seconds: elapsed_seconds(started_at, completed_at),
    }
}

/// 捕获 future 中的 panic 并转换为 [`DeployError`]
async fn guarded<T>(stage: &'static str, fut: impl Future<Output = T>) -> Result<T, DeployError> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(|panic| {
        let message = panic_message(panic.as_ref());
        error!(stage, "Deployment panicked: {}", message);
        DeployError::Panicked { stage, message }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::runtime::LifecycleAction;
    use crate::infra::audit::MemoryAuditSink;
    use crate::testing::FakeExecutor;
    use async_trait::async_trait;

    fn tools() -> ToolsConfig {
        ToolsConfig {
            command_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            compose: Some(ComposeCommand::standalone()),
            use_sudo: true,
        }
    }

    fn web1_container() -> FakeExecutor {
        FakeExecutor::new()
            .ok("docker ps", "web1\n")
            .ok("docker restart web1", "web1\n")
    }

    #[tokio::test]
    async fn test_restart_container_without_audit() {
        let orchestrator = DeploymentOrchestrator::new(Arc::new(web1_container()), &tools(), None);

        let result = orchestrator
            .deploy(DeployRequest::new("web1", LifecycleAction::Restart), &CancellationToken::new())
            .await;

        assert!(result.succeeded());
        assert_eq!(result.backend, RuntimeBackend::ContainerRuntime);
        assert_eq!(result.strategy(), "container_runtime");
        assert!(result.record_id.is_none());
        assert_eq!(result.worst_case_seconds, 30);
        assert!(result.duration_seconds >= 0.0);
        assert!(result.completed_at >= result.started_at);
    }

    #[tokio::test]
    async fn test_audit_entry_moves_from_in_progress_to_final_status() {
        let sink = Arc::new(MemoryAuditSink::new());
        let orchestrator = DeploymentOrchestrator::new(Arc::new(web1_container()), &tools(), Some(sink.clone()));

        let result = orchestrator
            .deploy(
                DeployRequest::new("web1", LifecycleAction::Restart).with_requester("U42", "C7"),
                &CancellationToken::new(),
            )
            .await;

        let id = result.record_id.clone().unwrap();
        let entry = sink.get(&id).await.unwrap();
        assert_eq!(entry.record.status, "success");
        assert_eq!(entry.record.requester_id, "U42");
        assert_eq!(entry.record.application.as_deref(), Some("web1"));
        assert_eq!(entry.record.details["strategy"], "container_runtime");
        assert_eq!(sink.len().await, 1);

        let history = orchestrator.history(10).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_app_uses_system_service_fallback() {
        let fake = Arc::new(FakeExecutor::new().fail("sudo systemctl restart", 5, "Unit ghost.service not found."));
        let orchestrator = DeploymentOrchestrator::new(fake, &tools(), None);

        let result = orchestrator
            .deploy(DeployRequest::new("ghost", LifecycleAction::Deploy), &CancellationToken::new())
            .await;

        assert!(!result.succeeded());
        assert_eq!(result.backend, RuntimeBackend::SystemService);
        assert_eq!(result.strategy(), "system_service_fallback");
        assert_eq!(result.outcome.exit_code, Some(5));
        assert!(result.outcome.stderr.contains("not found"));
    }

    #[tokio::test]
    async fn test_invalid_name_is_a_failed_result() {
        let fake = Arc::new(FakeExecutor::new());
        let sink = Arc::new(MemoryAuditSink::new());
        let orchestrator = DeploymentOrchestrator::new(fake.clone(), &tools(), Some(sink.clone()));

        let result = orchestrator
            .deploy(DeployRequest::new(";|&&", LifecycleAction::Restart), &CancellationToken::new())
            .await;

        assert!(!result.succeeded());
        assert!(result.outcome.exit_code.is_none());
        assert!(result.outcome.stderr.contains("invalid application name"));
        // 没有执行任何外部命令
        assert!(fake.calls().is_empty());
        assert_eq!(sink.get(&result.record_id.unwrap()).await.unwrap().record.status, "failed");
    }

    #[tokio::test]
    async fn test_sanitized_name_reaches_commands() {
        let fake = Arc::new(FakeExecutor::new().ok("docker ps", "web1rm-rf\n").ok("docker restart", ""));
        let orchestrator = DeploymentOrchestrator::new(fake.clone(), &tools(), None);

        let result = orchestrator
            .deploy(DeployRequest::new("web1; rm -rf /", LifecycleAction::Restart), &CancellationToken::new())
            .await;

        assert_eq!(result.application, "web1rm-rf");
        assert_eq!(fake.calls_starting_with("docker restart"), vec!["docker restart web1rm-rf"]);
    }

    struct PanickingProbe;

    #[async_trait]
    impl RuntimeProbe for PanickingProbe {
        fn backend(&self) -> RuntimeBackend {
            RuntimeBackend::ContainerRuntime
        }

        async fn probe(&self, _name: &ApplicationName, _cancel: &CancellationToken) -> bool {
            panic!("probe exploded")
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let sink = Arc::new(MemoryAuditSink::new());
        let orchestrator = DeploymentOrchestrator::new(Arc::new(FakeExecutor::new()), &tools(), Some(sink.clone()))
            .with_resolver(RuntimeResolver::with_probes(vec![Arc::new(PanickingProbe)]));

        let result = orchestrator
            .deploy(DeployRequest::new("web1", LifecycleAction::Restart), &CancellationToken::new())
            .await;

        assert!(!result.succeeded());
        assert!(result.outcome.stderr.contains("probe exploded"));
        assert!(result.outcome.exit_code.is_none());
        let entry = sink.get(&result.record_id.unwrap()).await.unwrap();
        assert_eq!(entry.record.status, "failed");
    }

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn insert(&self, _record: AuditRecord) -> Result<String, AuditError> {
            Err(AuditError::Status(503))
        }

        async fn update(&self, _id: &str, _update: AuditUpdate) -> Result<(), AuditError> {
            Err(AuditError::Status(503))
        }

        async fn recent(&self, _kind: Option<AuditKind>, _limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
            Err(AuditError::Status(503))
        }
    }

    /// insert 可选地挂起，update/recent 总是挂起
    struct HangingSink {
        hang_insert: bool,
    }

    #[async_trait]
    impl AuditSink for HangingSink {
        async fn insert(&self, _record: AuditRecord) -> Result<String, AuditError> {
            if self.hang_insert {
                std::future::pending::<()>().await;
            }
            Ok("rec-1".to_string())
        }

        async fn update(&self, _id: &str, _update: AuditUpdate) -> Result<(), AuditError> {
            std::future::pending().await
        }

        async fn recent(&self, _kind: Option<AuditKind>, _limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hanging_audit_is_bounded() {
        for hang_insert in [true, false] {
            let fake = Arc::new(web1_container());
            let sink = Arc::new(HangingSink { hang_insert });
            let orchestrator = DeploymentOrchestrator::new(fake.clone(), &tools(), Some(sink))
                .with_audit_timeout(Duration::from_millis(50));

            let started = std::time::Instant::now();
            let result = orchestrator
                .deploy(DeployRequest::new("web1", LifecycleAction::Restart), &CancellationToken::new())
                .await;

            assert!(result.succeeded());
            assert_eq!(result.record_id.is_none(), hang_insert);
            assert!(started.elapsed() < Duration::from_secs(2));
            assert_eq!(fake.calls_starting_with("docker restart"), vec!["docker restart web1"]);
        }
    }

    #[tokio::test]
    async fn test_unreachable_audit_does_not_block_deploy() {
        let orchestrator =
            DeploymentOrchestrator::new(Arc::new(web1_container()), &tools(), Some(Arc::new(BrokenSink)));

        let result = orchestrator
            .deploy(DeployRequest::new("web1", LifecycleAction::Restart), &CancellationToken::new())
            .await;

        assert!(result.succeeded());
        assert!(result.record_id.is_none());
    }
}
