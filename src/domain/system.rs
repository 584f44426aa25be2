//! 主机状态领域模型

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 文件系统使用情况（字节）
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl DiskUsage {
    pub fn usage_percent(&self) -> f64 {
        percent(self.used_bytes, self.total_bytes)
    }
}

/// 内存使用情况（字节）
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl MemoryUsage {
    pub fn usage_percent(&self) -> f64 {
        percent(self.used_bytes, self.total_bytes)
    }
}

/// 进程状态（只区分自愈任务关心的几种）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Sleeping,
    Zombie,
    /// 不可中断的磁盘等待 (D)
    DiskSleep,
    Stopped,
    Other,
}

impl ProcessState {
    /// 卡住的进程：僵尸或阻塞在磁盘 I/O 上
    pub fn is_hanging(&self) -> bool {
        matches!(self, ProcessState::Zombie | ProcessState::DiskSleep)
    }
}

/// 进程快照
#[derive(Clone, Debug, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub memory_bytes: u64,
    pub state: ProcessState,
}

/// 系统负载统计
#[derive(Clone, Debug, Serialize)]
pub struct SystemStats {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub cpu_usage_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub memory_usage_percent: f64,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
    pub disk_usage_percent: f64,
    pub process_count: usize,
    pub load_average: LoadAverage,
}

/// 系统负载平均值 (1, 5, 15 分钟)
#[derive(Clone, Copy, Debug, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

impl LoadAverage {
    pub fn new(one: f64, five: f64, fifteen: f64) -> Self {
        Self { one, five, fifteen }
    }
}

/// 字节转 GB
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0 / 1024.0
}

/// 字节转 MB，保留两位小数
pub fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// 四舍五入到两位小数
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
