//! 审计回调 HTTP Client
//!
//! 把审计记录转发到外部审计服务，复用连接池，写操作带重试

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{AuditEntry, AuditError, AuditKind, AuditRecord, AuditSink, AuditUpdate, RecordId};

/// 写操作最大尝试次数
const MAX_ATTEMPTS: u32 = 3;

/// 远程审计服务客户端
#[derive(Clone)]
pub struct HttpAuditSink {
    client: Client,
    base_url: String,
}

/// POST 返回体
#[derive(Deserialize)]
struct InsertResponse {
    id: RecordId,
}

impl HttpAuditSink {
    /// # Arguments
    /// * `base_url` - 审计服务根地址（如 `https://audit.example.com`）
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuditError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn records_url(&self) -> String {
        format!("{}/api/audit/records", self.base_url)
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/api/audit/records/{}", self.base_url, id)
    }

    /// 发送请求（带重试）
    async fn send_with_retry<F>(&self, what: &str, build: F) -> Result<reqwest::Response, AuditError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match build().send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(what, attempt, "Audit callback delivered");
                    return Ok(resp);
                }
                Ok(resp) => {
                    warn!(what, status = %resp.status(), attempt, "Audit service returned non-success status");
                    last_error = Some(AuditError::Status(resp.status().as_u16()));
                }
                Err(e) => {
                    warn!(what, error = %e, attempt, "Failed to reach audit service, will retry");
                    last_error = Some(AuditError::Network(e));
                }
            }

            // 重试前等待
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }
        }

        error!(what, "Audit callback failed after {} attempts", MAX_ATTEMPTS);
        Err(last_error.unwrap_or(AuditError::Status(0)))
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn insert(&self, record: AuditRecord) -> Result<RecordId, AuditError> {
        let url = self.records_url();
        let resp = self
            .send_with_retry("insert", || self.client.post(&url).json(&record))
            .await?;
        let body: InsertResponse = resp.json().await?;
        Ok(body.id)
    }

    async fn update(&self, id: &str, update: AuditUpdate) -> Result<(), AuditError> {
        let url = self.record_url(id);
        self.send_with_retry("update", || self.client.patch(&url).json(&update))
            .await?;
        Ok(())
    }

    async fn recent(&self, kind: Option<AuditKind>, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(kind) = kind {
            query.push(("kind", kind.as_str().to_string()));
        }

        let resp = self
            .client
            .get(self.records_url())
            .query(&query)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuditError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }
}
