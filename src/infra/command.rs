//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 超时控制（超时后强制终止并回收子进程）
//! - 取消支持
//! - stdout/stderr 分离捕获
//!
//! 所有失败（工具不存在、非 0 退出、超时、取消）都以 [`ExecutionOutcome`] 返回，
//! 从不作为错误向上传播。

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::domain::runtime::{CommandSpec, ExecutionOutcome};

/// 外部命令执行接口
///
/// 生产环境使用 [`CommandRunner`]，测试中可以替换为脚本化的实现
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> ExecutionOutcome;
}

/// 基于 tokio::process 的命令执行器
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for CommandRunner {
    async fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> ExecutionOutcome {
        if cancel.is_cancelled() {
            return ExecutionOutcome::cancelled();
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // 独立进程组，超时/取消时连同子孙进程一起终止
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(command = %spec.display(), error = %e, "Failed to spawn command");
                return ExecutionOutcome::spawn_failed(&spec.program, &e);
            }
        };

        // 启动 stdout/stderr 读取任务，避免管道写满导致子进程阻塞
        let stdout_buf = SharedBuffer::default();
        let stderr_buf = SharedBuffer::default();
        let stdout_task = tokio::spawn(read_into(child.stdout.take(), stdout_buf.clone()));
        let stderr_task = tokio::spawn(read_into(child.stderr.take(), stderr_buf.clone()));

        // 等待命令完成，支持超时和取消
        enum Waited {
            Exited(std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let waited = tokio::select! {
            _ = cancel.cancelled() => Waited::Cancelled,
            _ = tokio::time::sleep(spec.timeout) => Waited::TimedOut,
            status = child.wait() => Waited::Exited(status),
        };

        if matches!(waited, Waited::TimedOut | Waited::Cancelled) {
            kill_process_group(&child);
            let _ = child.kill().await;
            // 等待进程实际终止
            let _ = child.wait().await;
        }

        // 残留的子孙进程可能仍持有管道，读取最多再等一小段时间
        for task in [stdout_task, stderr_task] {
            let abort = task.abort_handle();
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await.is_err() {
                warn!(command = %spec.display(), "Output pipe still open after exit, dropping reader");
                abort.abort();
            }
        }
        let stdout = stdout_buf.take();
        let stderr = stderr_buf.take();
        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);

        match waited {
            Waited::Exited(Ok(status)) => ExecutionOutcome::exited(status.code(), &stdout, &stderr),
            Waited::Exited(Err(e)) => {
                error!(command = %spec.display(), error = %e, "Failed to wait for command");
                ExecutionOutcome::fault(format!("failed to wait for {}: {}", spec.program, e))
            }
            Waited::TimedOut => {
                error!(command = %spec.display(), timeout = ?spec.timeout, "Command timed out");
                ExecutionOutcome::timed_out(spec.timeout, &stdout, &stderr)
            }
            Waited::Cancelled => {
                warn!(command = %spec.display(), "Command cancelled, process killed");
                ExecutionOutcome::cancelled()
            }
        }
    }
}

/// 子进程退出后等待输出读取完成的上限
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// 读取任务和调用方共享的输出缓冲，读取任务被中止时已读到的内容仍然保留
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn extend(&self, bytes: &[u8]) {
        if let Ok(mut buf) = self.0.lock() {
            buf.extend_from_slice(bytes);
        }
    }

    fn take(&self) -> Vec<u8> {
        self.0.lock().map(|mut buf| std::mem::take(&mut *buf)).unwrap_or_default()
    }
}

async fn read_into<R>(reader: Option<R>, buf: SharedBuffer)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else { return };
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend(&chunk[..n]),
        }
    }
}

/// 向整个进程组发送 SIGKILL
#[cfg(unix)]
fn kill_process_group(child: &tokio::process::Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &tokio::process::Child) {}

/// 快捷构造一个带超时的命令
pub fn command(program: &str, args: &[&str], timeout: Duration) -> CommandSpec {
    CommandSpec::new(program, args.iter().copied(), timeout)
}
