//! 单元测试共用的脚本化替身

use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::runtime::{CommandSpec, ExecutionOutcome};
use crate::domain::system::{DiskUsage, LoadAverage, MemoryUsage, ProcessSnapshot, SystemStats};
use crate::infra::command::CommandExecutor;
use crate::infra::host::{HostError, HostInspector};

/// 按命令行前缀匹配返回预设结果
///
/// 规则按添加顺序匹配，未匹配的命令视为程序不存在
#[derive(Default)]
pub struct FakeExecutor {
    rules: Mutex<Vec<(String, ExecutionOutcome)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, prefix: &str, outcome: ExecutionOutcome) -> Self {
        self.rules.lock().unwrap().push((prefix.to_string(), outcome));
        self
    }

    pub fn ok(self, prefix: &str, stdout: &str) -> Self {
        self.on(prefix, ExecutionOutcome::exited(Some(0), stdout, ""))
    }

    pub fn fail(self, prefix: &str, code: i32, stderr: &str) -> Self {
        self.on(prefix, ExecutionOutcome::exited(Some(code), "", stderr))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(prefix)).collect()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> ExecutionOutcome {
        let line = spec.display();
        self.calls.lock().unwrap().push(line.clone());
        if cancel.is_cancelled() {
            return ExecutionOutcome::cancelled();
        }
        let rules = self.rules.lock().unwrap();
        rules
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| {
                let err = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
                ExecutionOutcome::spawn_failed(&spec.program, &err)
            })
    }
}

/// 磁盘 / 内存读数固定的主机
pub struct FakeHost {
    pub disk: Mutex<Vec<DiskUsage>>,
    pub memory: MemoryUsage,
    pub processes: Vec<ProcessSnapshot>,
}

impl FakeHost {
    /// 每次磁盘读数都是 `disk_percent`
    pub fn new(disk_percent: u64, memory_percent: u64) -> Self {
        Self {
            disk: Mutex::new(vec![DiskUsage { total_bytes: 100, used_bytes: disk_percent }]),
            memory: MemoryUsage { total_bytes: 1000, used_bytes: memory_percent * 10 },
            processes: Vec::new(),
        }
    }

    /// 依次返回的磁盘读数，最后一个重复使用
    pub fn with_disk_sequence(self, readings: Vec<DiskUsage>) -> Self {
        *self.disk.lock().unwrap() = readings;
        self
    }

    pub fn with_processes(mut self, processes: Vec<ProcessSnapshot>) -> Self {
        self.processes = processes;
        self
    }
}

#[async_trait]
impl HostInspector for FakeHost {
    async fn disk_usage(&self, _path: &Path) -> Result<DiskUsage, HostError> {
        let mut readings = self.disk.lock().unwrap();
        if readings.len() > 1 {
            Ok(readings.remove(0))
        } else {
            Ok(readings[0])
        }
    }

    async fn memory_usage(&self) -> Result<MemoryUsage, HostError> {
        Ok(self.memory)
    }

    async fn processes(&self) -> Result<Vec<ProcessSnapshot>, HostError> {
        Ok(self.processes.clone())
    }

    async fn system_stats(&self) -> Result<SystemStats, HostError> {
        Ok(SystemStats {
            timestamp: chrono::Utc::now(),
            hostname: "fake-host".to_string(),
            cpu_usage_percent: 12.5,
            memory_used_gb: 0.0,
            memory_total_gb: 0.0,
            memory_usage_percent: self.memory.usage_percent(),
            disk_used_gb: 0.0,
            disk_total_gb: 0.0,
            disk_usage_percent: 0.0,
            process_count: self.processes.len(),
            load_average: LoadAverage::new(0.1, 0.2, 0.3),
        })
    }
}
