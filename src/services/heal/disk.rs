//! clean_disk_space
//!
//! 清理过期日志与临时文件，并清理 Docker 和包缓存
//!
//! 释放空间一律实测，不做估算

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::env::constants::LOG_RETENTION_DAYS;
use crate::config::env::{HealConfig, ToolsConfig};
use crate::domain::heal::{HealingTask, HealingTaskResult};
use crate::domain::runtime::CommandSpec;
use crate::domain::system::{bytes_to_mb, round2};
use crate::infra::command::CommandExecutor;
use crate::infra::host::HostInspector;

use super::HealError;

pub async fn clean_disk_space(
    executor: &dyn CommandExecutor,
    host: &dyn HostInspector,
    config: &HealConfig,
    tools: &ToolsConfig,
    cancel: &CancellationToken,
) -> Result<HealingTaskResult, HealError> {
    let task = HealingTask::CleanDiskSpace.as_str();
    let initial = host.disk_usage(&config.disk_path).await?.usage_percent();

    if initial < config.disk_threshold_percent {
        return Ok(HealingTaskResult::success(task)
            .with("action", "no_cleanup_needed")
            .with("current_usage", round2(initial))
            .with("threshold", config.disk_threshold_percent)
            .with("cleaned_mb", 0.0));
    }

    info!(usage = round2(initial), threshold = config.disk_threshold_percent, "Disk usage above threshold, cleaning");

    let mut cleaned_bytes = 0u64;
    let mut actions = Vec::new();
    let retention = Duration::from_secs(LOG_RETENTION_DAYS * 24 * 3600);

    for dir in &config.clean_dirs {
        if cancel.is_cancelled() {
            return Err(HealError::Cancelled);
        }
        match clean_directory(dir, retention).await {
            Ok(0) => {}
            Ok(bytes) => {
                cleaned_bytes += bytes;
                actions.push(format!("Cleaned {}: {:.1}MB", dir.display(), bytes_to_mb(bytes)));
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to clean directory");
                actions.push(format!("Failed to clean {}: {}", dir.display(), e));
            }
        }
    }

    if let Some(bytes) = prune_docker(executor, tools, cancel).await.filter(|b| *b > 0) {
        cleaned_bytes += bytes;
        actions.push(format!("Cleaned Docker resources: {:.1}MB", bytes_to_mb(bytes)));
    }

    if let Some(bytes) = clean_package_cache(executor, config, tools, cancel).await.filter(|b| *b > 0) {
        cleaned_bytes += bytes;
        actions.push(format!("Cleaned package cache: {:.1}MB", bytes_to_mb(bytes)));
    }

    let final_usage = host.disk_usage(&config.disk_path).await?.usage_percent();
    info!(
        before = round2(initial),
        after = round2(final_usage),
        cleaned_mb = bytes_to_mb(cleaned_bytes),
        "Disk cleanup finished"
    );

    Ok(HealingTaskResult::success(task)
        .with("action", "cleaned")
        .with("initial_usage_percent", round2(initial))
        .with("final_usage_percent", round2(final_usage))
        .with("cleaned_bytes", cleaned_bytes)
        .with("cleaned_mb", bytes_to_mb(cleaned_bytes))
        .with("actions_taken", actions))
}

/// 清理目录中的旧日志和临时文件（不递归），返回释放的字节数
///
/// 目录不存在时返回 0；单个文件删除失败直接跳过
pub async fn clean_directory(dir: &Path, retention: Duration) -> std::io::Result<u64> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let cutoff = SystemTime::now().checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut cleaned = 0u64;

    while let Some(entry) = entries.next_entry().await? {
        let Ok(meta) = entry.metadata().await else { continue };
        if !meta.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let stale_log = file_name.ends_with(".log") && meta.modified().map(|m| m < cutoff).unwrap_or(false);
        let temp = file_name.starts_with("tmp") || file_name.ends_with(".tmp");
        if !stale_log && !temp {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => cleaned += meta.len(),
            Err(e) => debug!(path = %entry.path().display(), error = %e, "Skipping file"),
        }
    }

    Ok(cleaned)
}

/// `docker system prune -f`，返回报告的回收字节数
async fn prune_docker(executor: &dyn CommandExecutor, tools: &ToolsConfig, cancel: &CancellationToken) -> Option<u64> {
    let spec = CommandSpec::new("docker", ["system", "prune", "-f"], tools.command_timeout);
    let outcome = executor.run(&spec, cancel).await;
    if !outcome.succeeded {
        debug!("Docker prune unavailable: {}", outcome.stderr.trim());
        return None;
    }
    Some(parse_reclaimed_space(&outcome.stdout).unwrap_or(0))
}

/// 清理包管理器缓存，按缓存目录大小前后差值计算释放量
async fn clean_package_cache(
    executor: &dyn CommandExecutor,
    config: &HealConfig,
    tools: &ToolsConfig,
    cancel: &CancellationToken,
) -> Option<u64> {
    let before = cache_size(&config.package_cache_dirs).await;

    let mut cleaned = false;
    for (program, args) in [("apt-get", vec!["clean"]), ("yum", vec!["clean", "all"])] {
        let spec = if tools.use_sudo {
            CommandSpec::new("sudo", std::iter::once(program).chain(args), tools.command_timeout)
        } else {
            CommandSpec::new(program, args, tools.command_timeout)
        };
        if executor.run(&spec, cancel).await.succeeded {
            debug!(command = %spec.display(), "Package cache cleaned");
            cleaned = true;
            break;
        }
    }
    if !cleaned {
        return None;
    }

    let after = cache_size(&config.package_cache_dirs).await;
    Some(before.saturating_sub(after))
}

async fn cache_size(dirs: &[PathBuf]) -> u64 {
    let dirs = dirs.to_vec();
    tokio::task::spawn_blocking(move || dirs.iter().map(|d| dir_size(d)).sum::<u64>())
        .await
        .unwrap_or(0)
}

/// 递归统计目录大小，读取失败的部分按 0 计
fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(ft) if ft.is_dir() => dir_size(&entry.path()),
            Ok(ft) if ft.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}

/// 解析 `Total reclaimed space: 1.2GB`
///
/// Docker 使用十进制单位 (kB = 1000)
pub fn parse_reclaimed_space(output: &str) -> Option<u64> {
    let line = output.lines().find(|l| l.contains("Total reclaimed space"))?;
    let value = line.split(':').nth(1)?.trim();

    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((number * multiplier).round() as u64)
}
