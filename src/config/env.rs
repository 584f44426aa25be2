//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// API 密钥
    pub api_key: String,
    /// 服务监听端口
    pub port: u16,
    /// 外部工具调用配置
    pub tools: ToolsConfig,
    /// 自愈任务配置
    pub heal: HealConfig,
    /// 审计存储配置
    pub audit: AuditConfig,
    /// 日志输出格式
    pub log_format: LogFormat,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // API Key - 支持旧名称兼容
        let api_key = load_with_fallback("DEVOPS_AGENT_API_KEY", "API_KEY")
            .unwrap_or_else(|| "change-me-in-production".to_string());
        if env::var("API_KEY").is_ok() {
            warn!("Deprecated environment variable API_KEY detected. Please use DEVOPS_AGENT_API_KEY");
        }

        let port = parse_env("PORT").unwrap_or(constants::DEFAULT_PORT);

        Self {
            api_key,
            port,
            tools: ToolsConfig::from_env(),
            heal: HealConfig::from_env(),
            audit: AuditConfig::from_env(),
            log_format: LogFormat::from_env(),
        }
    }
}

/// 日志格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// `LOG_FORMAT=json` 输出 JSON 日志
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// compose 命令（`docker-compose` 或 `docker compose`）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposeCommand {
    pub program: String,
    pub prefix_args: Vec<String>,
}

impl ComposeCommand {
    /// 独立的 docker-compose 二进制
    pub fn standalone() -> Self {
        Self {
            program: "docker-compose".to_string(),
            prefix_args: Vec::new(),
        }
    }

    /// docker compose 插件
    pub fn plugin() -> Self {
        Self {
            program: "docker".to_string(),
            prefix_args: vec!["compose".to_string()],
        }
    }

    /// 解析 "docker compose" / "docker-compose" 这类以空格分隔的命令
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            prefix_args: parts.collect(),
        })
    }

    /// 拼接 compose 子命令参数
    pub fn args<'a>(&self, rest: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        self.prefix_args
            .iter()
            .cloned()
            .chain(rest.into_iter().map(str::to_string))
            .collect()
    }
}

/// 外部工具调用配置
#[derive(Clone, Debug)]
pub struct ToolsConfig {
    /// 生命周期命令单步超时
    pub command_timeout: Duration,
    /// 探针命令超时
    pub probe_timeout: Duration,
    /// 未配置时启动阶段自动探测
    pub compose: Option<ComposeCommand>,
    /// systemctl restart 是否加 sudo
    pub use_sudo: bool,
}

impl ToolsConfig {
    pub fn from_env() -> Self {
        Self {
            command_timeout: Duration::from_secs(
                parse_env("COMMAND_TIMEOUT_SECS").unwrap_or(constants::COMMAND_TIMEOUT_SECS),
            ),
            probe_timeout: Duration::from_secs(
                parse_env("PROBE_TIMEOUT_SECS").unwrap_or(constants::PROBE_TIMEOUT_SECS),
            ),
            compose: env::var("COMPOSE_COMMAND")
                .ok()
                .and_then(|v| ComposeCommand::parse(&v)),
            use_sudo: parse_bool("USE_SUDO").unwrap_or(true),
        }
    }

    /// compose 命令，未探测时使用独立二进制
    pub fn compose(&self) -> ComposeCommand {
        self.compose.clone().unwrap_or_else(ComposeCommand::standalone)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(constants::COMMAND_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(constants::PROBE_TIMEOUT_SECS),
            compose: None,
            use_sudo: true,
        }
    }
}

/// 自愈任务配置
#[derive(Clone, Debug)]
pub struct HealConfig {
    /// 检查并在失败时重启的服务
    pub services: Vec<String>,
    /// 清理临时文件/旧日志的目录
    pub clean_dirs: Vec<PathBuf>,
    /// 包管理器缓存目录（用于统计清理量）
    pub package_cache_dirs: Vec<PathBuf>,
    /// 计算磁盘使用率的路径
    pub disk_path: PathBuf,
    pub disk_threshold_percent: f64,
    pub memory_threshold_percent: f64,
    /// 单个进程内存占比超过该值才会被列出
    pub process_memory_threshold_percent: f64,
    /// 同时执行的任务数
    pub max_concurrency: usize,
}

impl HealConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            services: parse_list("HEAL_SERVICES").unwrap_or(defaults.services),
            clean_dirs: parse_list("HEAL_CLEAN_DIRS")
                .map(|dirs| dirs.into_iter().map(PathBuf::from).collect())
                .unwrap_or(defaults.clean_dirs),
            package_cache_dirs: defaults.package_cache_dirs,
            disk_path: env::var("HEAL_DISK_PATH").map(PathBuf::from).unwrap_or(defaults.disk_path),
            disk_threshold_percent: parse_env("DISK_THRESHOLD_PERCENT").unwrap_or(defaults.disk_threshold_percent),
            memory_threshold_percent: parse_env("MEMORY_THRESHOLD_PERCENT")
                .unwrap_or(defaults.memory_threshold_percent),
            process_memory_threshold_percent: defaults.process_memory_threshold_percent,
            max_concurrency: parse_env::<usize>("HEAL_MAX_CONCURRENCY")
                .unwrap_or(defaults.max_concurrency)
                .max(1),
        }
    }
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            services: ["nginx", "apache2", "mysql", "postgresql", "redis-server", "mongodb"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            clean_dirs: ["/tmp", "/var/tmp", "/var/log"].iter().map(PathBuf::from).collect(),
            package_cache_dirs: ["/var/cache/apt/archives", "/var/cache/yum"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            disk_path: PathBuf::from("/"),
            disk_threshold_percent: 85.0,
            memory_threshold_percent: 90.0,
            process_memory_threshold_percent: 10.0,
            max_concurrency: 2,
        }
    }
}

/// 审计后端类型
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuditBackend {
    None,
    Memory,
    File,
    Http,
}

/// 审计存储配置
#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub backend: AuditBackend,
    /// File 模式的数据目录
    pub data_dir: PathBuf,
    /// Http 模式的审计服务地址
    pub callback_url: Option<String>,
}

impl AuditConfig {
    pub fn from_env() -> Self {
        let callback_url = load_with_fallback("AUDIT_CALLBACK_URL", "CALLBACK_URL");

        let backend = match env::var("AUDIT_BACKEND").map(|v| v.to_ascii_lowercase()) {
            Ok(v) if v == "none" => AuditBackend::None,
            Ok(v) if v == "file" => AuditBackend::File,
            Ok(v) if v == "http" => AuditBackend::Http,
            Ok(v) if v == "memory" => AuditBackend::Memory,
            Ok(other) => {
                warn!(backend = %other, "Unknown AUDIT_BACKEND, using memory");
                AuditBackend::Memory
            }
            // 配置了回调地址时默认转发
            Err(_) if callback_url.is_some() => AuditBackend::Http,
            Err(_) => AuditBackend::Memory,
        };

        let data_dir = env::var("AUDIT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/devops-agent"));

        Self {
            backend,
            data_dir,
            callback_url,
        }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// 逗号分隔列表，空列表视为未配置
fn parse_list(name: &str) -> Option<Vec<String>> {
    let items: Vec<String> = env::var(name)
        .ok()?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

/// 常量
pub mod constants {
    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 8000;

    /// 生命周期命令单步超时（秒）
    pub const COMMAND_TIMEOUT_SECS: u64 = 60;

    /// 探针命令超时（秒）
    pub const PROBE_TIMEOUT_SECS: u64 = 10;

    /// 单次审计写入的等待上限（秒），超过后不再阻塞部署
    pub const AUDIT_WRITE_TIMEOUT_SECS: u64 = 3;

    /// 审计记录最大保存数量
    pub const MAX_AUDIT_HISTORY: usize = 200;

    /// 部署历史默认返回条数
    pub const DEFAULT_HISTORY_LIMIT: usize = 10;

    /// 旧日志保留天数
    pub const LOG_RETENTION_DAYS: u64 = 7;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
