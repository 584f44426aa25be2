//! 应用状态查询

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::runtime::{ApplicationName, CommandSpec, RuntimeBackend};

use super::probe::parse_pm2_list;
use super::{DeployError, DeploymentOrchestrator};

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Stopped,
    Unknown,
}

/// 应用状态
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationStatus {
    pub application: String,
    pub backend: RuntimeBackend,
    pub fallback_used: bool,
    pub state: RunState,
    /// 后端返回的原始状态 (e.g., "Up 3 hours", "active", "online")
    pub detail: String,
    pub checked_at: DateTime<Utc>,
}

impl DeploymentOrchestrator {
    /// 查询应用当前状态（只读）
    pub async fn status(&self, raw_name: &str, cancel: &CancellationToken) -> Result<ApplicationStatus, DeployError> {
        let name = ApplicationName::parse(raw_name)?;
        let resolution = self.resolver.detect(&name, cancel).await;

        let (state, detail) = match resolution.backend {
            RuntimeBackend::ContainerRuntime => self.container_state(&name, cancel).await,
            RuntimeBackend::ComposeService => self.compose_state(&name, cancel).await,
            RuntimeBackend::SystemService => self.unit_state(&name, cancel).await,
            RuntimeBackend::ProcessManager => self.pm2_state(&name, cancel).await,
        };
        debug!(app = %name, backend = %resolution.backend, ?state, "Queried application status");

        Ok(ApplicationStatus {
            application: name.to_string(),
            backend: resolution.backend,
            fallback_used: resolution.fallback_used,
            state,
            detail,
            checked_at: Utc::now(),
        })
    }

    async fn container_state(&self, name: &ApplicationName, cancel: &CancellationToken) -> (RunState, String) {
        let filter = format!("name=^{}$", name);
        let spec = CommandSpec::new(
            "docker",
            ["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Status}}"],
            self.probe_timeout,
        );
        let outcome = self.executor.run(&spec, cancel).await;
        if !outcome.succeeded {
            return (RunState::Unknown, outcome.stderr.trim().to_string());
        }

        let detail = outcome.stdout_trimmed().lines().next().unwrap_or("").to_string();
        let state = if detail.starts_with("Up") {
            RunState::Running
        } else if detail.is_empty() {
            RunState::Unknown
        } else {
            RunState::Stopped
        };
        (state, detail)
    }

    async fn compose_state(&self, name: &ApplicationName, cancel: &CancellationToken) -> (RunState, String) {
        let spec = CommandSpec::new(
            self.compose.program.as_str(),
            self.compose.args(["ps", "-q", name.as_str()]),
            self.probe_timeout,
        );
        let outcome = self.executor.run(&spec, cancel).await;
        if !outcome.succeeded {
            return (RunState::Unknown, outcome.stderr.trim().to_string());
        }

        let containers = outcome.stdout_trimmed().lines().count();
        if containers > 0 {
            (RunState::Running, format!("{} container(s)", containers))
        } else {
            (RunState::Stopped, "no running containers".to_string())
        }
    }

    async fn unit_state(&self, name: &ApplicationName, cancel: &CancellationToken) -> (RunState, String) {
        let unit = name.unit_name();
        let spec = CommandSpec::new("systemctl", ["is-active", unit.as_str()], self.probe_timeout);
        let outcome = self.executor.run(&spec, cancel).await;

        // is-active 对非 active 状态返回非 0，但仍然输出状态
        let detail = outcome.stdout_trimmed().to_string();
        let state = match detail.as_str() {
            "active" | "reloading" | "activating" => RunState::Running,
            "inactive" | "failed" | "deactivating" => RunState::Stopped,
            _ => RunState::Unknown,
        };
        (state, detail)
    }

    async fn pm2_state(&self, name: &ApplicationName, cancel: &CancellationToken) -> (RunState, String) {
        let spec = CommandSpec::new("pm2", ["jlist"], self.probe_timeout);
        let outcome = self.executor.run(&spec, cancel).await;
        if !outcome.succeeded {
            return (RunState::Unknown, outcome.stderr.trim().to_string());
        }

        let status = parse_pm2_list(&outcome.stdout).and_then(|processes| {
            processes
                .into_iter()
                .find(|p| p.name == name.as_str())
                .and_then(|p| p.pm2_env)
                .and_then(|env| env.status)
        });

        match status {
            Some(status) if status == "online" => (RunState::Running, status),
            Some(status) => (RunState::Stopped, status),
            None => (RunState::Unknown, String::new()),
        }
    }
}
