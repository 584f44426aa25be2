//! 应用状态

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 全局 shutdown token，用于取消所有进行中的外部命令
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN.get_or_init(CancellationToken::new).clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

use crate::config::env::{AuditBackend, AuditConfig, EnvConfig};
use crate::infra::audit::{AuditSink, FileAuditSink, HttpAuditSink, MemoryAuditSink};
use crate::infra::command::{CommandExecutor, CommandRunner};
use crate::infra::host::{HostInspector, SysinfoHost};
use crate::services::deploy::{detect_compose_command, DeploymentOrchestrator};
use crate::services::heal::HealingRunner;

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// API 密钥（用于验证请求）
    pub api_key: String,
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 服务 ==========
    pub orchestrator: DeploymentOrchestrator,
    pub healer: HealingRunner,
    pub host: Arc<dyn HostInspector>,
    /// 审计后端（可选）
    pub audit: Option<Arc<dyn AuditSink>>,

    /// 请求级 token 的父 token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// 根据配置创建应用状态
    ///
    /// 未配置 compose 命令时在这里探测一次
    pub async fn build(mut config: EnvConfig) -> anyhow::Result<Self> {
        let executor: Arc<dyn CommandExecutor> = Arc::new(CommandRunner::new());
        let host: Arc<dyn HostInspector> = Arc::new(SysinfoHost::new());

        if config.tools.compose.is_none() {
            let detected =
                detect_compose_command(executor.as_ref(), config.tools.probe_timeout, &get_shutdown_token()).await;
            config.tools.compose = Some(detected);
        }

        let audit = open_audit(&config.audit).await?;

        tracing::info!(
            api_key_len = config.api_key.len(),
            port = config.port,
            compose = ?config.tools.compose,
            use_sudo = config.tools.use_sudo,
            audit = ?config.audit.backend,
            heal_services = config.heal.services.len(),
            "Loaded configuration"
        );

        Ok(Self::from_parts(config, executor, host, audit))
    }

    /// 用现成的组件组装（测试中注入假实现）
    pub fn from_parts(
        config: EnvConfig,
        executor: Arc<dyn CommandExecutor>,
        host: Arc<dyn HostInspector>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        let orchestrator = DeploymentOrchestrator::new(executor.clone(), &config.tools, audit.clone());
        let healer = HealingRunner::new(
            executor,
            host.clone(),
            config.heal.clone(),
            config.tools.clone(),
            audit.clone(),
        );

        Self {
            api_key: config.api_key.clone(),
            config,
            started_at: Utc::now(),
            orchestrator,
            healer,
            host,
            audit,
            shutdown: get_shutdown_token(),
        }
    }

    /// 单个请求的取消 token，随全局 shutdown 一起取消
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// 运行时长（秒）
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

async fn open_audit(config: &AuditConfig) -> anyhow::Result<Option<Arc<dyn AuditSink>>> {
    let sink: Arc<dyn AuditSink> = match config.backend {
        AuditBackend::None => return Ok(None),
        AuditBackend::Memory => Arc::new(MemoryAuditSink::new()),
        AuditBackend::File => Arc::new(
            FileAuditSink::open(&config.data_dir)
                .await
                .with_context(|| format!("failed to open audit store in {}", config.data_dir.display()))?,
        ),
        AuditBackend::Http => {
            let url = config
                .callback_url
                .as_deref()
                .context("AUDIT_BACKEND=http requires AUDIT_CALLBACK_URL")?;
            Arc::new(HttpAuditSink::new(url).context("failed to build audit HTTP client")?)
        }
    };
    Ok(Some(sink))
}
