//! 自愈任务
//!
//! 任务之间相互独立，以有界并发执行，结果按请求顺序汇总

pub mod disk;
pub mod hanging;
pub mod memory;
pub mod services;

use chrono::Utc;
use futures::{stream, FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::env::constants::AUDIT_WRITE_TIMEOUT_SECS;
use crate::config::env::{HealConfig, ToolsConfig};
use crate::domain::heal::{HealRequest, HealingReport, HealingTask, HealingTaskResult};
use crate::infra::audit::{AuditEntry, AuditError, AuditKind, AuditRecord, AuditSink};
use crate::infra::command::CommandExecutor;
use crate::infra::host::{HostError, HostInspector};

use super::panic_message;

/// 自愈任务内部故障
#[derive(Debug, Error)]
pub enum HealError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("healing task was cancelled")]
    Cancelled,
}

pub struct HealingRunner {
    executor: Arc<dyn CommandExecutor>,
    host: Arc<dyn HostInspector>,
    config: HealConfig,
    tools: ToolsConfig,
    audit: Option<Arc<dyn AuditSink>>,
}

impl HealingRunner {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        host: Arc<dyn HostInspector>,
        config: HealConfig,
        tools: ToolsConfig,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        Self {
            executor,
            host,
            config,
            tools,
            audit,
        }
    }

    /// 执行自愈任务；未指定任务时按默认顺序执行全部
    pub async fn run(&self, request: HealRequest, cancel: &CancellationToken) -> HealingReport {
        let started_at = Utc::now();

        let names: Vec<String> = match request.tasks.as_deref() {
            Some(tasks) if !tasks.is_empty() => tasks.to_vec(),
            _ => HealingTask::DEFAULT_ORDER.iter().map(|t| t.as_str().to_string()).collect(),
        };
        info!(tasks = ?names, requester = %request.requester_id, "Healing started");

        let concurrency = self.config.max_concurrency.max(1);
        let tasks: Vec<HealingTaskResult> = stream::iter(names)
            .map(|name| async move {
                match name.parse::<HealingTask>() {
                    Ok(task) => self.run_task(task, cancel).await,
                    Err(()) => {
                        warn!(task = %name, "Unknown healing task requested");
                        HealingTaskResult::failure(name, "unknown healing task")
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut report = HealingReport::from_tasks(tasks, request.requester_id, request.channel_id, started_at);
        info!(
            success = report.overall_succeeded,
            tasks = report.tasks.len(),
            duration = report.duration_seconds,
            "Healing finished"
        );

        report.record_id = self.store(&report).await;
        report
    }

    /// 执行单个任务，故障和 panic 都转换为失败结果
    pub async fn run_task(&self, task: HealingTask, cancel: &CancellationToken) -> HealingTaskResult {
        let outcome = AssertUnwindSafe(self.dispatch(task, cancel)).catch_unwind().await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(task = %task, error = %e, "Healing task failed");
                HealingTaskResult::failure(task.as_str(), e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(task = %task, "Healing task panicked: {}", message);
                HealingTaskResult::failure(task.as_str(), format!("internal fault: {}", message))
            }
        }
    }

    async fn dispatch(&self, task: HealingTask, cancel: &CancellationToken) -> Result<HealingTaskResult, HealError> {
        if cancel.is_cancelled() {
            return Err(HealError::Cancelled);
        }
        match task {
            HealingTask::RestartFailedServices => {
                services::restart_failed_services(self.executor.as_ref(), &self.config.services, &self.tools, cancel)
                    .await
            }
            HealingTask::CleanDiskSpace => {
                disk::clean_disk_space(
                    self.executor.as_ref(),
                    self.host.as_ref(),
                    &self.config,
                    &self.tools,
                    cancel,
                )
                .await
            }
            HealingTask::CheckMemoryUsage => memory::check_memory_usage(self.host.as_ref(), &self.config).await,
            HealingTask::RestartHangingProcesses => hanging::find_hanging_processes(self.host.as_ref()).await,
        }
    }

    /// 最近的自愈记录
    pub async fn history(&self, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        match &self.audit {
            Some(sink) => sink.recent(Some(AuditKind::Healing), limit).await,
            None => Ok(Vec::new()),
        }
    }

    async fn store(&self, report: &HealingReport) -> Option<String> {
        let sink = self.audit.as_ref()?;
        let record = AuditRecord {
            kind: AuditKind::Healing,
            application: None,
            action: Some("heal".to_string()),
            requester_id: report.requester_id.clone(),
            channel_id: report.channel_id.clone(),
            status: if report.overall_succeeded { "success" } else { "failed" }.to_string(),
            execution_time: Some(report.duration_seconds),
            details: serde_json::json!({
                "tasks_run": report.tasks.len(),
                "results": report.tasks,
            }),
        };

        let timeout = Duration::from_secs(AUDIT_WRITE_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, sink.insert(record)).await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to store healing log");
                None
            }
            Err(_) => {
                warn!(?timeout, "Storing healing log timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::system::{DiskUsage, ProcessSnapshot, ProcessState};
    use crate::infra::audit::MemoryAuditSink;
    use crate::testing::{FakeExecutor, FakeHost};
    use serde_json::json;

    fn runner(host: FakeHost, config: HealConfig, audit: Option<Arc<dyn AuditSink>>) -> HealingRunner {
        let executor = FakeExecutor::new().ok("systemctl is-active", "active\n");
        HealingRunner::new(Arc::new(executor), Arc::new(host), config, ToolsConfig::default(), audit)
    }

    fn config_for(dir: &std::path::Path) -> HealConfig {
        HealConfig {
            services: vec!["nginx".to_string()],
            clean_dirs: vec![dir.to_path_buf()],
            package_cache_dirs: vec![dir.to_path_buf()],
            ..HealConfig::default()
        }
    }

    #[tokio::test]
    async fn test_default_tasks_in_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(FakeHost::new(50, 40), config_for(dir.path()), None);

        let report = runner.run(HealRequest::default(), &CancellationToken::new()).await;

        let names: Vec<&str> = report.tasks.iter().map(|t| t.task.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "restart_failed_services",
                "clean_disk_space",
                "check_memory_usage",
                "restart_hanging_processes",
            ]
        );
        assert!(report.overall_succeeded);
        assert!(report.record_id.is_none());
    }

    #[tokio::test]
    async fn test_default_run_at_95_percent_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tmp-cache.bin"), vec![0u8; 3 * 1024 * 1024]).unwrap();

        let host = FakeHost::new(95, 40).with_disk_sequence(vec![
            DiskUsage { total_bytes: 100, used_bytes: 95 },
            DiskUsage { total_bytes: 100, used_bytes: 70 },
        ]);
        let runner = runner(host, config_for(dir.path()), None);

        let report = runner.run(HealRequest::default(), &CancellationToken::new()).await;

        let names: Vec<&str> = report.tasks.iter().map(|t| t.task.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "restart_failed_services",
                "clean_disk_space",
                "check_memory_usage",
                "restart_hanging_processes",
            ]
        );
        assert!(report.overall_succeeded);

        let disk = report.task("clean_disk_space").unwrap();
        assert_eq!(disk.field("action"), Some(&json!("cleaned")));
        assert_eq!(disk.field("initial_usage_percent"), Some(&json!(95.0)));
        assert_eq!(disk.field("final_usage_percent"), Some(&json!(70.0)));
        assert!(disk.field("cleaned_mb").unwrap().as_f64().unwrap() > 0.0);

        let services = report.task("restart_failed_services").unwrap();
        assert_eq!(services.field("total_services_checked"), Some(&json!(1)));
        let memory = report.task("check_memory_usage").unwrap();
        assert_eq!(memory.field("action"), Some(&json!("no_action_needed")));
    }

    #[tokio::test]
    async fn test_disk_cleanup_is_idempotent_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(FakeHost::new(50, 40), config_for(dir.path()), None);
        let request = || HealRequest {
            tasks: Some(vec!["clean_disk_space".to_string()]),
            ..HealRequest::default()
        };

        for _ in 0..2 {
            let report = runner.run(request(), &CancellationToken::new()).await;
            let disk = report.task("clean_disk_space").unwrap();
            assert_eq!(disk.field("action"), Some(&json!("no_cleanup_needed")));
            assert_eq!(disk.field("cleaned_mb"), Some(&json!(0.0)));
        }
    }

    #[tokio::test]
    async fn test_unknown_task_fails_report_but_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::new(50, 40).with_processes(vec![ProcessSnapshot {
            pid: 9,
            name: "defunct".to_string(),
            memory_bytes: 0,
            state: ProcessState::Zombie,
        }]);
        let runner = runner(host, config_for(dir.path()), None);

        let request = HealRequest {
            tasks: Some(vec!["restart_hanging_processes".to_string(), "defrag".to_string()]),
            ..HealRequest::default()
        };
        let report = runner.run(request, &CancellationToken::new()).await;

        assert!(!report.overall_succeeded);
        assert_eq!(report.tasks.len(), 2);
        assert!(report.tasks[0].succeeded);
        assert_eq!(report.tasks[0].field("hanging_processes_found"), Some(&json!(1)));
        assert_eq!(report.tasks[1].error.as_deref(), Some("unknown healing task"));
    }

    #[tokio::test]
    async fn test_cancelled_run_marks_tasks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(FakeHost::new(50, 40), config_for(dir.path()), None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = runner.run(HealRequest::default(), &cancel).await;
        assert!(!report.overall_succeeded);
        assert!(report.tasks.iter().all(|t| !t.succeeded));
    }

    #[tokio::test]
    async fn test_report_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemoryAuditSink::new());
        let runner = runner(FakeHost::new(50, 40), config_for(dir.path()), Some(sink.clone()));

        let request = HealRequest {
            tasks: None,
            requester_id: "U1".to_string(),
            channel_id: "C1".to_string(),
        };
        let report = runner.run(request, &CancellationToken::new()).await;

        let entry = sink.get(&report.record_id.unwrap()).await.unwrap();
        assert_eq!(entry.record.kind, AuditKind::Healing);
        assert_eq!(entry.record.status, "success");
        assert_eq!(entry.record.requester_id, "U1");
        assert_eq!(entry.record.details["tasks_run"], 4);

        assert_eq!(runner.history(5).await.unwrap().len(), 1);
    }
}
