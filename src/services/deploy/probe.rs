//! 运行时探测
//!
//! 每个探测器询问一种后端是否管理指定应用
//! 探测只读，任何工具失败都视为 `false`

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::env::ComposeCommand;
use crate::domain::runtime::{ApplicationName, CommandSpec, RuntimeBackend};
use crate::infra::command::CommandExecutor;

/// 判断某后端是否管理该应用
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    fn backend(&self) -> RuntimeBackend;

    async fn probe(&self, name: &ApplicationName, cancel: &CancellationToken) -> bool;
}

/// `docker ps -a --filter name=^<name>$`
pub struct ContainerProbe {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl ContainerProbe {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

#[async_trait]
impl RuntimeProbe for ContainerProbe {
    fn backend(&self) -> RuntimeBackend {
        RuntimeBackend::ContainerRuntime
    }

    async fn probe(&self, name: &ApplicationName, cancel: &CancellationToken) -> bool {
        let filter = format!("name=^{}$", name);
        let spec = CommandSpec::new(
            "docker",
            ["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"],
            self.timeout,
        );
        let outcome = self.executor.run(&spec, cancel).await;
        // docker 的 name 过滤是正则，仍需逐行精确比对
        outcome.succeeded && outcome.stdout.lines().any(|line| line.trim() == name.as_str())
    }
}

/// `<compose> ps -q <name>`
pub struct ComposeProbe {
    executor: Arc<dyn CommandExecutor>,
    compose: ComposeCommand,
    timeout: Duration,
}

impl ComposeProbe {
    pub fn new(executor: Arc<dyn CommandExecutor>, compose: ComposeCommand, timeout: Duration) -> Self {
        Self {
            executor,
            compose,
            timeout,
        }
    }
}

#[async_trait]
impl RuntimeProbe for ComposeProbe {
    fn backend(&self) -> RuntimeBackend {
        RuntimeBackend::ComposeService
    }

    async fn probe(&self, name: &ApplicationName, cancel: &CancellationToken) -> bool {
        let spec = CommandSpec::new(
            self.compose.program.as_str(),
            self.compose.args(["ps", "-q", name.as_str()]),
            self.timeout,
        );
        let outcome = self.executor.run(&spec, cancel).await;
        outcome.succeeded && !outcome.stdout_trimmed().is_empty()
    }
}

/// `systemctl list-units --type=service --all <name>.service`
pub struct SystemServiceProbe {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl SystemServiceProbe {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

#[async_trait]
impl RuntimeProbe for SystemServiceProbe {
    fn backend(&self) -> RuntimeBackend {
        RuntimeBackend::SystemService
    }

    async fn probe(&self, name: &ApplicationName, cancel: &CancellationToken) -> bool {
        let unit = name.unit_name();
        let spec = CommandSpec::new(
            "systemctl",
            ["list-units", "--type=service", "--all", unit.as_str()],
            self.timeout,
        );
        let outcome = self.executor.run(&spec, cancel).await;
        outcome.succeeded && lists_unit(&outcome.stdout, &unit)
    }
}

/// `systemctl list-units` 输出中是否有以 `unit` 开头的行
///
/// 首列可能带 `●` / `*` 标记；表头和 "0 loaded units listed." 这类汇总行不会匹配
pub(crate) fn lists_unit(stdout: &str, unit: &str) -> bool {
    stdout.lines().any(|line| {
        line.trim_start()
            .trim_start_matches(['●', '*'])
            .split_whitespace()
            .next()
            .is_some_and(|first| first == unit)
    })
}

/// `pm2 jlist` 中的一项
#[derive(Debug, Deserialize)]
pub(crate) struct Pm2Process {
    pub name: String,
    #[serde(default)]
    pub pm2_env: Option<Pm2Env>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Pm2Env {
    #[serde(default)]
    pub status: Option<String>,
}

/// 解析 `pm2 jlist` 输出；不是 JSON 时返回 None
pub(crate) fn parse_pm2_list(stdout: &str) -> Option<Vec<Pm2Process>> {
    serde_json::from_str(stdout.trim()).ok()
}

/// `pm2 jlist`
pub struct ProcessManagerProbe {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl ProcessManagerProbe {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

#[async_trait]
impl RuntimeProbe for ProcessManagerProbe {
    fn backend(&self) -> RuntimeBackend {
        RuntimeBackend::ProcessManager
    }

    async fn probe(&self, name: &ApplicationName, cancel: &CancellationToken) -> bool {
        let spec = CommandSpec::new("pm2", ["jlist"], self.timeout);
        let outcome = self.executor.run(&spec, cancel).await;
        if !outcome.succeeded {
            return false;
        }

        match parse_pm2_list(&outcome.stdout) {
            Some(processes) => processes.iter().any(|p| p.name == name.as_str()),
            None => {
                debug!(app = %name, "pm2 jlist output is not JSON, falling back to substring match");
                outcome.stdout.contains(name.as_str())
            }
        }
    }
}

/// 检测可用的 compose 命令
///
/// 优先独立的 `docker-compose`，其次 `docker compose` 插件；
/// 都不可用时默认 `docker-compose`
pub async fn detect_compose_command(
    executor: &dyn CommandExecutor,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ComposeCommand {
    for candidate in [ComposeCommand::standalone(), ComposeCommand::plugin()] {
        let spec = CommandSpec::new(candidate.program.as_str(), candidate.args(["version"]), timeout);
        if executor.run(&spec, cancel).await.succeeded {
            debug!(program = %spec.display(), "Detected compose command");
            return candidate;
        }
    }
    ComposeCommand::standalone()
}

/// 按优先级排列的标准探测器
pub fn standard_probes(
    executor: Arc<dyn CommandExecutor>,
    compose: ComposeCommand,
    timeout: Duration,
) -> Vec<Arc<dyn RuntimeProbe>> {
    vec![
        Arc::new(ContainerProbe::new(executor.clone(), timeout)),
        Arc::new(ComposeProbe::new(executor.clone(), compose, timeout)),
        Arc::new(SystemServiceProbe::new(executor.clone(), timeout)),
        Arc::new(ProcessManagerProbe::new(executor, timeout)),
    ]
}
