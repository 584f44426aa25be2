//! restart_failed_services

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::env::ToolsConfig;
use crate::domain::heal::{HealingTask, HealingTaskResult};
use crate::domain::runtime::{ApplicationName, CommandSpec};
use crate::infra::command::CommandExecutor;

use super::HealError;

/// 检查候选服务，`failed` / `inactive` 的尝试重启
///
/// 单个服务重启失败只记录在 details 中，不算任务失败
pub async fn restart_failed_services(
    executor: &dyn CommandExecutor,
    services: &[String],
    tools: &ToolsConfig,
    cancel: &CancellationToken,
) -> Result<HealingTaskResult, HealError> {
    let mut details = Vec::with_capacity(services.len());
    let mut restarted = 0u64;
    let mut checked = 0u64;

    for raw in services {
        let Ok(service) = ApplicationName::parse(raw) else {
            warn!(service = %raw, "Skipping invalid service name");
            continue;
        };
        if cancel.is_cancelled() {
            return Err(HealError::Cancelled);
        }

        let unit = service.unit_name();
        let check = CommandSpec::new("systemctl", ["is-active", unit.as_str()], tools.probe_timeout);
        let status = executor.run(&check, cancel).await.stdout_trimmed().to_string();
        checked += 1;

        if status != "failed" && status != "inactive" {
            let status = if status.is_empty() { "unknown".to_string() } else { status };
            details.push(json!({
                "service": service.as_str(),
                "action": "no_action_needed",
                "success": true,
                "status": status,
            }));
            continue;
        }

        let restart = if tools.use_sudo {
            CommandSpec::new("sudo", ["systemctl", "restart", unit.as_str()], tools.command_timeout)
        } else {
            CommandSpec::new("systemctl", ["restart", unit.as_str()], tools.command_timeout)
        };
        let outcome = executor.run(&restart, cancel).await;

        if outcome.succeeded {
            info!(service = %service, previous_status = %status, "Restarted service");
            restarted += 1;
            details.push(json!({
                "service": service.as_str(),
                "action": "restarted",
                "success": true,
                "previous_status": status,
            }));
        } else {
            warn!(service = %service, "Failed to restart service: {}", outcome.stderr.trim());
            details.push(json!({
                "service": service.as_str(),
                "action": "restart_failed",
                "success": false,
                "error": outcome.stderr.trim(),
            }));
        }
    }

    Ok(HealingTaskResult::success(HealingTask::RestartFailedServices.as_str())
        .with("services_restarted", restarted)
        .with("total_services_checked", checked)
        .with("details", details))
}
