//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::runtime::{ExecutionOutcome, LifecycleAction, RuntimeBackend};

/// 部署记录状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    InProgress,
    Success,
    Failed,
}

impl DeployStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::InProgress => "in_progress",
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployStatus::Success | DeployStatus::Failed)
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            DeployStatus::Success
        } else {
            DeployStatus::Failed
        }
    }
}

/// 阶段状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// 生命周期命令序列中的一步
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStage {
    /// 实际执行的命令行 (e.g., "docker stop web1")
    pub command: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    pub exit_code: Option<i32>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            exit_code: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, success: bool, exit_code: Option<i32>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.exit_code = exit_code;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 前序步骤失败，跳过
    pub fn skip(&mut self) {
        self.status = StageStatus::Skipped;
    }
}

/// 部署请求
#[derive(Clone, Debug, Deserialize)]
pub struct DeployRequest {
    /// 原始应用名（未清洗）
    pub name: String,
    #[serde(default)]
    pub action: LifecycleAction,
    #[serde(default)]
    pub requester_id: String,
    #[serde(default)]
    pub channel_id: String,
}

impl DeployRequest {
    pub fn new(name: impl Into<String>, action: LifecycleAction) -> Self {
        Self {
            name: name.into(),
            action,
            requester_id: String::new(),
            channel_id: String::new(),
        }
    }

    pub fn with_requester(mut self, requester_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        self.requester_id = requester_id.into();
        self.channel_id = channel_id.into();
        self
    }
}

/// 部署结果，创建后不再修改
#[derive(Clone, Debug, Serialize)]
pub struct DeploymentResult {
    pub application: String,
    pub backend: RuntimeBackend,
    /// 是否因为没有任何探针命中而使用了兜底后端
    pub fallback_used: bool,
    pub action: LifecycleAction,
    pub outcome: ExecutionOutcome,
    /// 生命周期命令的逐步记录
    pub stages: Vec<DeployStage>,
    pub requester_id: String,
    pub channel_id: String,
    /// 审计记录 ID（没有审计后端或写入失败时为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// 生命周期命令各步超时之和，即本次执行的最长耗时
    pub worst_case_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl DeploymentResult {
    pub fn succeeded(&self) -> bool {
        self.outcome.succeeded
    }

    pub fn status(&self) -> DeployStatus {
        DeployStatus::from_success(self.succeeded())
    }

    /// 记录到审计日志中的策略名
    pub fn strategy(&self) -> String {
        if self.fallback_used {
            format!("{}_fallback", self.backend)
        } else {
            self.backend.to_string()
        }
    }
}
