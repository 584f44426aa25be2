//! 审计记录文件持久化
//!
//! 记录保存在内存中，每次写入后把完整快照原子写入 JSON 文件，以便 Agent 重启后恢复

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{AuditEntry, AuditError, AuditKind, AuditRecord, AuditSink, AuditUpdate, MemoryAuditSink, RecordId};
use crate::config::env::constants::MAX_AUDIT_HISTORY;

/// 审计文件名
pub const AUDIT_FILE_NAME: &str = "audit.json";

/// 文件格式
#[derive(Debug, Serialize, Deserialize)]
struct PersistedAudit {
    /// 版本号（用于未来格式升级）
    version: u32,
    entries: Vec<AuditEntry>,
    saved_at: DateTime<Utc>,
}

/// JSON 文件审计存储
pub struct FileAuditSink {
    path: PathBuf,
    inner: MemoryAuditSink,
    /// 串行化文件写入
    write_lock: Mutex<()>,
}

impl FileAuditSink {
    /// 打开（或新建）数据目录下的审计文件
    pub async fn open(data_dir: &Path) -> Result<Self, AuditError> {
        fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(AUDIT_FILE_NAME);
        let entries = load_entries(&path).await;

        info!(path = %path.display(), entries = entries.len(), "Opened audit file");

        Ok(Self {
            path,
            inner: MemoryAuditSink::from_entries(entries, MAX_AUDIT_HISTORY),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 保存快照（原子写入）
    async fn save(&self) -> Result<(), AuditError> {
        let _guard = self.write_lock.lock().await;

        let snapshot = PersistedAudit {
            version: 1,
            entries: self.inner.snapshot().await,
            saved_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&snapshot)?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

/// 读取已有文件；文件损坏时忽略并从空记录开始
async fn load_entries(path: &Path) -> Vec<AuditEntry> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read audit file");
            return Vec::new();
        }
    };

    match serde_json::from_str::<PersistedAudit>(&content) {
        Ok(persisted) => persisted.entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse audit file, ignoring");
            Vec::new()
        }
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn insert(&self, record: AuditRecord) -> Result<RecordId, AuditError> {
        let id = self.inner.insert(record).await?;
        self.save().await?;
        Ok(id)
    }

    async fn update(&self, id: &str, update: AuditUpdate) -> Result<(), AuditError> {
        self.inner.update(id, update).await?;
        self.save().await
    }

    async fn recent(&self, kind: Option<AuditKind>, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        self.inner.recent(kind, limit).await
    }
}
