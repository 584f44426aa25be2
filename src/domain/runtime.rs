//! 运行时与命令执行领域模型

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 应用名最大长度
pub const MAX_APP_NAME_LEN: usize = 50;

/// 单次命令捕获输出的最大字节数
pub const MAX_CAPTURE_BYTES: usize = 8 * 1024;

/// 应用名错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("application name is empty after sanitization")]
    Empty,
}

/// 经过清洗的应用名
///
/// 只保留 `[A-Za-z0-9._-]`，去掉开头的 `-` / `.`（避免被当作命令行参数），
/// 最长 [`MAX_APP_NAME_LEN`] 个字符
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ApplicationName(String);

impl ApplicationName {
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();
        let cleaned = cleaned.trim_start_matches(&['-', '.'][..]);
        let bounded: String = cleaned.chars().take(MAX_APP_NAME_LEN).collect();

        if bounded.is_empty() {
            return Err(NameError::Empty);
        }
        Ok(Self(bounded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// systemd unit 名称
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.0)
    }
}

impl fmt::Display for ApplicationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 管理应用生命周期的后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeBackend {
    ContainerRuntime,
    ComposeService,
    SystemService,
    ProcessManager,
}

impl RuntimeBackend {
    /// 探测顺序，数值越小越先探测
    pub fn priority(&self) -> u8 {
        match self {
            RuntimeBackend::ContainerRuntime => 0,
            RuntimeBackend::ComposeService => 1,
            RuntimeBackend::SystemService => 2,
            RuntimeBackend::ProcessManager => 3,
        }
    }

    /// 没有任何探针命中时使用的后端
    pub fn fallback() -> Self {
        RuntimeBackend::SystemService
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeBackend::ContainerRuntime => "container_runtime",
            RuntimeBackend::ComposeService => "compose_service",
            RuntimeBackend::SystemService => "system_service",
            RuntimeBackend::ProcessManager => "process_manager",
        }
    }
}

impl fmt::Display for RuntimeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生命周期动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    #[default]
    Restart,
    Deploy,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Restart => "restart",
            LifecycleAction::Deploy => "deploy",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" => Ok(LifecycleAction::Restart),
            "deploy" => Ok(LifecycleAction::Deploy),
            other => Err(format!("unknown lifecycle action: {}", other)),
        }
    }
}

/// 待执行的外部命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    /// 用于日志和执行轨迹的命令行
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// 命令结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// 进程正常退出（退出码可能非 0）
    Exited,
    /// 超时后被强制终止，不应重试
    TimedOut,
    /// 调用方取消
    Cancelled,
    /// 程序无法启动（通常是工具不存在）
    SpawnFailed,
}

/// 一次命令执行的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub termination: Termination,
}

impl ExecutionOutcome {
    /// 根据退出码构建结果
    pub fn exited(exit_code: Option<i32>, stdout: &str, stderr: &str) -> Self {
        Self {
            succeeded: exit_code == Some(0),
            stdout: truncate_capture(stdout),
            stderr: truncate_capture(stderr),
            exit_code,
            termination: Termination::Exited,
        }
    }

    pub fn timed_out(timeout: Duration, stdout: &str, stderr: &str) -> Self {
        let mut stderr = stderr.to_string();
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!("command timed out after {:?}", timeout));
        Self {
            succeeded: false,
            stdout: truncate_capture(stdout),
            stderr: truncate_capture(&stderr),
            exit_code: None,
            termination: Termination::TimedOut,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: "command was cancelled".to_string(),
            exit_code: None,
            termination: Termination::Cancelled,
        }
    }

    pub fn spawn_failed(program: &str, error: &std::io::Error) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: format!("failed to start {}: {}", program, error),
            exit_code: None,
            termination: Termination::SpawnFailed,
        }
    }

    /// 编排层内部故障
    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: None,
            termination: Termination::Exited,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.termination == Termination::TimedOut
    }

    pub fn is_cancelled(&self) -> bool {
        self.termination == Termination::Cancelled
    }

    /// 输出去掉首尾空白后的文本
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// 截断输出，保证落在 UTF-8 字符边界上
pub fn truncate_capture(text: &str) -> String {
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.to_string();
    }
    let mut end = MAX_CAPTURE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... [truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_name_strips_metacharacters() {
        let name = ApplicationName::parse("web1; rm -rf /").unwrap();
        assert_eq!(name.as_str(), "web1rm-rf");

        let name = ApplicationName::parse("  $(whoami)`api`  ").unwrap();
        assert_eq!(name.as_str(), "whoamiapi");
    }

    #[test]
    fn test_application_name_rejects_flags_and_empty() {
        assert_eq!(ApplicationName::parse("--privileged").unwrap().as_str(), "privileged");
        assert_eq!(ApplicationName::parse("&&|;"), Err(NameError::Empty));
        assert_eq!(ApplicationName::parse(""), Err(NameError::Empty));
    }

    #[test]
    fn test_application_name_is_length_bounded() {
        let long = "a".repeat(200);
        let name = ApplicationName::parse(&long).unwrap();
        assert_eq!(name.as_str().len(), MAX_APP_NAME_LEN);
        assert_eq!(ApplicationName::parse("worker-api").unwrap().unit_name(), "worker-api.service");
    }

    #[test]
    fn test_backend_priority_order() {
        let mut backends = vec![
            RuntimeBackend::ProcessManager,
            RuntimeBackend::SystemService,
            RuntimeBackend::ContainerRuntime,
            RuntimeBackend::ComposeService,
        ];
        backends.sort_by_key(|b| b.priority());
        assert_eq!(
            backends,
            vec![
                RuntimeBackend::ContainerRuntime,
                RuntimeBackend::ComposeService,
                RuntimeBackend::SystemService,
                RuntimeBackend::ProcessManager,
            ]
        );
        assert_eq!(RuntimeBackend::fallback(), RuntimeBackend::SystemService);
    }

    #[test]
    fn test_lifecycle_action_parse() {
        assert_eq!("Restart".parse::<LifecycleAction>(), Ok(LifecycleAction::Restart));
        assert_eq!(" deploy ".parse::<LifecycleAction>(), Ok(LifecycleAction::Deploy));
        assert!("rollback".parse::<LifecycleAction>().is_err());
    }

    #[test]
    fn test_truncate_capture_respects_char_boundary() {
        let text = "é".repeat(MAX_CAPTURE_BYTES);
        let truncated = truncate_capture(&text);
        assert!(truncated.ends_with("[truncated]"));
        assert!(truncated.len() <= MAX_CAPTURE_BYTES + 20);
    }

    #[test]
    fn test_outcome_markers() {
        let ok = ExecutionOutcome::exited(Some(0), "done", "");
        assert!(ok.succeeded);

        let failed = ExecutionOutcome::exited(Some(1), "", "boom");
        assert!(!failed.succeeded);
        assert_eq!(failed.termination, Termination::Exited);

        let timeout = ExecutionOutcome::timed_out(Duration::from_secs(3), "", "");
        assert!(timeout.is_timeout());
        assert!(timeout.exit_code.is_none());
        assert!(timeout.stderr.contains("timed out"));

        assert!(ExecutionOutcome::cancelled().is_cancelled());
    }
}
