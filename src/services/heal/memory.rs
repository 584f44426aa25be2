//! check_memory_usage
//!
//! 只报告内存占用最高的进程，不终止任何进程

use serde_json::json;
use std::cmp::Ordering;

use crate::config::env::HealConfig;
use crate::domain::heal::{HealingTask, HealingTaskResult};
use crate::domain::system::{bytes_to_mb, round2};
use crate::infra::host::HostInspector;

use super::HealError;

/// 最多列出的进程数
const TOP_PROCESSES: usize = 5;

pub async fn check_memory_usage(host: &dyn HostInspector, config: &HealConfig) -> Result<HealingTaskResult, HealError> {
    let task = HealingTask::CheckMemoryUsage.as_str();
    let memory = host.memory_usage().await?;
    let usage = memory.usage_percent();

    if usage < config.memory_threshold_percent {
        return Ok(HealingTaskResult::success(task)
            .with("action", "no_action_needed")
            .with("memory_usage_percent", round2(usage))
            .with("threshold", config.memory_threshold_percent));
    }

    let total = memory.total_bytes.max(1) as f64;
    let mut heavy: Vec<(f64, _)> = host
        .processes()
        .await?
        .into_iter()
        .map(|p| (p.memory_bytes as f64 / total * 100.0, p))
        .filter(|(percent, _)| *percent > config.process_memory_threshold_percent)
        .collect();
    heavy.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let processes: Vec<_> = heavy
        .into_iter()
        .take(TOP_PROCESSES)
        .map(|(percent, p)| {
            json!({
                "pid": p.pid,
                "name": p.name,
                "memory_percent": round2(percent),
                "memory_mb": bytes_to_mb(p.memory_bytes),
            })
        })
        .collect();

    tracing::warn!(
        usage = round2(usage),
        identified = processes.len(),
        "Memory usage above threshold"
    );

    Ok(HealingTaskResult::success(task)
        .with("action", "identified_high_memory_processes")
        .with("memory_usage_percent", round2(usage))
        .with("high_memory_processes", processes))
}
