//! 主机状态采集
//!
//! 磁盘/内存/进程快照。sysinfo 的刷新是同步调用，统一放到 blocking 线程池里执行。

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, ProcessStatus, RefreshKind, System};
use thiserror::Error;

use crate::domain::system::{
    bytes_to_gb, DiskUsage, LoadAverage, MemoryUsage, ProcessSnapshot, ProcessState, SystemStats,
};

/// 主机采集错误
#[derive(Debug, Error)]
pub enum HostError {
    #[error("no mounted filesystem contains {0}")]
    NoFilesystem(PathBuf),

    #[error("host probe task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// 主机状态接口
#[async_trait]
pub trait HostInspector: Send + Sync {
    /// 包含 `path` 的文件系统的使用情况
    async fn disk_usage(&self, path: &Path) -> Result<DiskUsage, HostError>;

    async fn memory_usage(&self) -> Result<MemoryUsage, HostError>;

    async fn processes(&self) -> Result<Vec<ProcessSnapshot>, HostError>;

    async fn system_stats(&self) -> Result<SystemStats, HostError>;
}

/// 基于 sysinfo 的实现
#[derive(Debug, Clone, Default)]
pub struct SysinfoHost;

impl SysinfoHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostInspector for SysinfoHost {
    async fn disk_usage(&self, path: &Path) -> Result<DiskUsage, HostError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || disk_usage_for(&path)).await?
    }

    async fn memory_usage(&self) -> Result<MemoryUsage, HostError> {
        let usage = tokio::task::spawn_blocking(|| {
            let mut sys = System::new();
            sys.refresh_memory();
            MemoryUsage {
                total_bytes: sys.total_memory(),
                used_bytes: sys.used_memory(),
            }
        })
        .await?;
        Ok(usage)
    }

    async fn processes(&self) -> Result<Vec<ProcessSnapshot>, HostError> {
        let processes = tokio::task::spawn_blocking(|| {
            let sys = System::new_all();
            sys.processes()
                .iter()
                .map(|(pid, process)| ProcessSnapshot {
                    pid: pid.as_u32(),
                    name: lossy(process.name()),
                    memory_bytes: process.memory(),
                    state: map_status(process.status()),
                })
                .collect::<Vec<_>>()
        })
        .await?;
        Ok(processes)
    }

    async fn system_stats(&self) -> Result<SystemStats, HostError> {
        let mut sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );

        // 需要等待一小段时间让 CPU 使用率计算准确
        sys.refresh_cpu_all();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = tokio::task::spawn_blocking(move || {
            sys.refresh_cpu_all();
            let root = disk_usage_for(Path::new("/")).unwrap_or(DiskUsage {
                total_bytes: 0,
                used_bytes: 0,
            });
            let memory = MemoryUsage {
                total_bytes: sys.total_memory(),
                used_bytes: sys.used_memory(),
            };
            let cpu_usage = if sys.cpus().is_empty() {
                0.0
            } else {
                sys.cpus().iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / sys.cpus().len() as f64
            };
            let load = System::load_average();
            let process_count = System::new_all().processes().len();

            SystemStats {
                timestamp: chrono::Utc::now(),
                hostname: local_hostname(),
                cpu_usage_percent: cpu_usage,
                memory_used_gb: bytes_to_gb(memory.used_bytes),
                memory_total_gb: bytes_to_gb(memory.total_bytes),
                memory_usage_percent: memory.usage_percent(),
                disk_used_gb: bytes_to_gb(root.used_bytes),
                disk_total_gb: bytes_to_gb(root.total_bytes),
                disk_usage_percent: root.usage_percent(),
                process_count,
                load_average: LoadAverage::new(load.one, load.five, load.fifteen),
            }
        })
        .await?;
        Ok(stats)
    }
}

/// 选出挂载点是 `path` 最长前缀的文件系统
fn disk_usage_for(path: &Path) -> Result<DiskUsage, HostError> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| DiskUsage {
            total_bytes: disk.total_space(),
            used_bytes: disk.total_space().saturating_sub(disk.available_space()),
        })
        .ok_or_else(|| HostError::NoFilesystem(path.to_path_buf()))
}

fn map_status(status: ProcessStatus) -> ProcessState {
    match status {
        ProcessStatus::Run => ProcessState::Running,
        ProcessStatus::Sleep | ProcessStatus::Idle => ProcessState::Sleeping,
        ProcessStatus::Zombie => ProcessState::Zombie,
        ProcessStatus::UninterruptibleDiskSleep => ProcessState::DiskSleep,
        ProcessStatus::Stop => ProcessState::Stopped,
        _ => ProcessState::Other,
    }
}

fn lossy<S: AsRef<OsStr> + ?Sized>(value: &S) -> String {
    value.as_ref().to_string_lossy().into_owned()
}

/// 本机主机名
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
