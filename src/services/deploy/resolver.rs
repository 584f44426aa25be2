//! 运行时解析
//!
//! 按优先级依次询问探测器，确定应用由哪种后端管理

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::env::ComposeCommand;
use crate::domain::runtime::{ApplicationName, RuntimeBackend};
use crate::infra::command::CommandExecutor;

use super::probe::{standard_probes, RuntimeProbe};

/// 解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub backend: RuntimeBackend,
    /// 没有探针命中，使用了兜底后端
    pub fallback_used: bool,
}

pub struct RuntimeResolver {
    probes: Vec<Arc<dyn RuntimeProbe>>,
}

impl RuntimeResolver {
    /// 使用标准的四个探针
    pub fn standard(executor: Arc<dyn CommandExecutor>, compose: ComposeCommand, probe_timeout: Duration) -> Self {
        Self::with_probes(standard_probes(executor, compose, probe_timeout))
    }

    /// 自定义探针集合，按后端优先级稳定排序
    pub fn with_probes(mut probes: Vec<Arc<dyn RuntimeProbe>>) -> Self {
        probes.sort_by_key(|p| p.backend().priority());
        Self { probes }
    }

    /// 探测顺序
    pub fn order(&self) -> Vec<RuntimeBackend> {
        self.probes.iter().map(|p| p.backend()).collect()
    }

    /// 找到第一个命中的后端，否则回落到 systemd
    pub async fn detect(&self, name: &ApplicationName, cancel: &CancellationToken) -> Resolution {
        for probe in &self.probes {
            if cancel.is_cancelled() {
                break;
            }
            if probe.probe(name, cancel).await {
                info!(app = %name, backend = %probe.backend(), "Resolved runtime backend");
                return Resolution {
                    backend: probe.backend(),
                    fallback_used: false,
                };
            }
            debug!(app = %name, backend = %probe.backend(), "Probe did not match");
        }

        let backend = RuntimeBackend::fallback();
        info!(app = %name, backend = %backend, "No probe matched, using fallback backend");
        Resolution {
            backend,
            fallback_used: true,
        }
    }

    pub async fn resolve(&self, name: &ApplicationName, cancel: &CancellationToken) -> RuntimeBackend {
        self.detect(name, cancel).await.backend
    }
}
