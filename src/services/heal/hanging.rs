//! restart_hanging_processes
//!
//! 列出僵尸进程和 D 状态进程，不重启也不终止

use serde_json::json;

use crate::domain::heal::{HealingTask, HealingTaskResult};
use crate::infra::host::HostInspector;

use super::HealError;

pub async fn find_hanging_processes(host: &dyn HostInspector) -> Result<HealingTaskResult, HealError> {
    let processes: Vec<_> = host
        .processes()
        .await?
        .into_iter()
        .filter(|p| p.state.is_hanging())
        .map(|p| json!({ "pid": p.pid, "name": p.name, "status": p.state }))
        .collect();

    if !processes.is_empty() {
        tracing::warn!(count = processes.len(), "Found hanging processes");
    }

    Ok(HealingTaskResult::success(HealingTask::RestartHangingProcesses.as_str())
        .with("hanging_processes_found", processes.len() as u64)
        .with("processes", processes)
        .with("action", "identified_hanging_processes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::system::{ProcessSnapshot, ProcessState};
    use crate::testing::FakeHost;

    #[tokio::test]
    async fn test_only_zombie_and_disk_sleep_are_reported() {
        let snapshot = |pid, state| ProcessSnapshot {
            pid,
            name: format!("proc{}", pid),
            memory_bytes: 0,
            state,
        };
        let host = FakeHost::new(10, 10).with_processes(vec![
            snapshot(1, ProcessState::Running),
            snapshot(2, ProcessState::Zombie),
            snapshot(3, ProcessState::Sleeping),
            snapshot(4, ProcessState::DiskSleep),
        ]);

        let result = find_hanging_processes(&host).await.unwrap();

        assert!(result.succeeded);
        assert_eq!(result.field("hanging_processes_found"), Some(&json!(2)));
        let listed = result.field("processes").unwrap().as_array().unwrap();
        assert_eq!(listed[0]["pid"], 2);
        assert_eq!(listed[0]["status"], "zombie");
        assert_eq!(listed[1]["status"], "disk_sleep");
    }
}
