//! 自愈任务领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 内置的自愈任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingTask {
    RestartFailedServices,
    CleanDiskSpace,
    CheckMemoryUsage,
    RestartHangingProcesses,
}

impl HealingTask {
    /// 未指定任务时的默认执行顺序
    pub const DEFAULT_ORDER: [HealingTask; 4] = [
        HealingTask::RestartFailedServices,
        HealingTask::CleanDiskSpace,
        HealingTask::CheckMemoryUsage,
        HealingTask::RestartHangingProcesses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HealingTask::RestartFailedServices => "restart_failed_services",
            HealingTask::CleanDiskSpace => "clean_disk_space",
            HealingTask::CheckMemoryUsage => "check_memory_usage",
            HealingTask::RestartHangingProcesses => "restart_hanging_processes",
        }
    }
}

impl fmt::Display for HealingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealingTask {
    type Err = ();

    /// 同时接受 `clean_disk_space` 和 `clean-disk-space`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        HealingTask::DEFAULT_ORDER
            .into_iter()
            .find(|task| task.as_str() == normalized)
            .ok_or(())
    }
}

/// 单个自愈任务的结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealingTaskResult {
    pub task: String,
    pub succeeded: bool,
    /// 任务相关的摘要字段 (services_restarted, cleaned_mb, current_usage ...)
    pub summary: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealingTaskResult {
    pub fn success(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            succeeded: true,
            summary: BTreeMap::new(),
            error: None,
        }
    }

    pub fn failure(task: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            succeeded: false,
            summary: BTreeMap::new(),
            error: Some(error.into()),
        }
    }

    /// 追加摘要字段
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.summary.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.summary.get(key)
    }
}

/// 一次自愈执行的汇总报告
#[derive(Clone, Debug, Serialize)]
pub struct HealingReport {
    /// 所有任务都成功才为 true
    pub overall_succeeded: bool,
    pub tasks: Vec<HealingTaskResult>,
    pub requester_id: String,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl HealingReport {
    /// 由任务结果汇总
    pub fn from_tasks(
        tasks: Vec<HealingTaskResult>,
        requester_id: String,
        channel_id: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        let overall_succeeded = tasks.iter().all(|t| t.succeeded);
        Self {
            overall_succeeded,
            tasks,
            requester_id,
            channel_id,
            record_id: None,
            started_at,
            completed_at,
            duration_seconds: elapsed_seconds(started_at, completed_at),
        }
    }

    pub fn task(&self, name: &str) -> Option<&HealingTaskResult> {
        self.tasks.iter().find(|t| t.task == name)
    }
}

/// 自愈请求
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HealRequest {
    /// 为空时执行默认任务列表
    #[serde(default)]
    pub tasks: Option<Vec<String>>,
    #[serde(default)]
    pub requester_id: String,
    #[serde(default)]
    pub channel_id: String,
}

/// 两个时间点之间的秒数（保留两位小数）
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let ms = (end - start).num_milliseconds().max(0) as f64;
    (ms / 10.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_parse_accepts_both_spellings() {
        assert_eq!("clean-disk-space".parse::<HealingTask>(), Ok(HealingTask::CleanDiskSpace));
        assert_eq!("restart_failed_services".parse::<HealingTask>(), Ok(HealingTask::RestartFailedServices));
        assert_eq!("defrag".parse::<HealingTask>(), Err(()));
    }

    #[test]
    fn test_report_is_conjunction_of_tasks() {
        let tasks = vec![
            HealingTaskResult::success("restart_failed_services"),
            HealingTaskResult::success("clean_disk_space"),
            HealingTaskResult::failure("check_memory_usage", "boom"),
            HealingTaskResult::success("restart_hanging_processes"),
        ];
        let report = HealingReport::from_tasks(tasks, "U1".into(), "C1".into(), Utc::now());
        assert!(!report.overall_succeeded);
        assert_eq!(report.tasks.len(), 4);
        assert_eq!(report.task("check_memory_usage").unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_report_empty_task_list_succeeds() {
        let report = HealingReport::from_tasks(Vec::new(), String::new(), String::new(), Utc::now());
        assert!(report.overall_succeeded);
    }

    #[test]
    fn test_elapsed_seconds_rounding() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(1234);
        assert_eq!(elapsed_seconds(start, end), 1.23);
    }
}
