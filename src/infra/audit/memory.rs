//! 内存审计存储
//!
//! 有上限的历史记录，超过上限丢弃最旧的记录

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;

use super::{AuditEntry, AuditError, AuditKind, AuditRecord, AuditSink, AuditUpdate, RecordId};
use crate::config::env::constants::MAX_AUDIT_HISTORY;

/// 内存审计存储
pub struct MemoryAuditSink {
    /// 最新的在前
    entries: RwLock<VecDeque<AuditEntry>>,
    max_entries: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_capacity(MAX_AUDIT_HISTORY)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            max_entries,
        }
    }

    /// 从已有记录恢复（文件存储启动时使用）
    pub fn from_entries(entries: Vec<AuditEntry>, max_entries: usize) -> Self {
        let mut entries: VecDeque<AuditEntry> = entries.into();
        entries.truncate(max_entries);
        Self {
            entries: RwLock::new(entries),
            max_entries,
        }
    }

    pub async fn get(&self, id: &str) -> Option<AuditEntry> {
        let entries = self.entries.read().await;
        entries.iter().find(|e| e.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 当前所有记录的快照
    pub async fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.read().await.iter().cloned().collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn insert(&self, record: AuditRecord) -> Result<RecordId, AuditError> {
        let entry = AuditEntry::new(record);
        let id = entry.id.clone();

        let mut entries = self.entries.write().await;
        entries.push_front(entry);
        while entries.len() > self.max_entries {
            entries.pop_back();
        }
        Ok(id)
    }

    async fn update(&self, id: &str, update: AuditUpdate) -> Result<(), AuditError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| AuditError::NotFound(id.to_string()))?;
        entry.apply(update);
        Ok(())
    }

    async fn recent(&self, kind: Option<AuditKind>, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| kind.map_or(true, |k| e.record.kind == k))
            .take(limit)
            .cloned()
            .collect())
    }
}
