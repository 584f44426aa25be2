//! 审计日志
//!
//! 编排层只依赖 [`AuditSink`] 的 insert/update 契约；持久化是尽力而为的，
//! 没有审计后端（`None`）也是合法状态。

pub mod file;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use file::FileAuditSink;
pub use http::HttpAuditSink;
pub use memory::MemoryAuditSink;

/// 审计记录 ID
pub type RecordId = String;

/// 审计错误
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit record not found: {0}")]
    NotFound(RecordId),

    #[error("audit storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit callback request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("audit callback returned status {0}")]
    Status(u16),
}

/// 审计记录类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Deployment,
    Healing,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Deployment => "deployment",
            AuditKind::Healing => "healing",
        }
    }
}

/// 新建审计记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub requester_id: String,
    pub channel_id: String,
    /// in_progress | success | failed
    pub status: String,
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// 对已有记录的更新
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditUpdate {
    pub status: String,
    pub execution_time: Option<f64>,
    pub details: serde_json::Value,
}

/// 已存储的审计记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: AuditRecord,
}

impl AuditEntry {
    pub fn new(record: AuditRecord) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            record,
        }
    }

    pub fn apply(&mut self, update: AuditUpdate) {
        self.record.status = update.status;
        self.record.execution_time = update.execution_time;
        self.record.details = update.details;
        self.updated_at = Utc::now();
    }
}

/// 审计后端
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn insert(&self, record: AuditRecord) -> Result<RecordId, AuditError>;

    async fn update(&self, id: &str, update: AuditUpdate) -> Result<(), AuditError>;

    /// 最近的记录，最新的在前
    async fn recent(&self, kind: Option<AuditKind>, limit: usize) -> Result<Vec<AuditEntry>, AuditError>;
}
