//! 生命周期执行
//!
//! 将 (后端, 动作) 映射为具体命令并执行
//!
//! 多步命令在第一步失败处停止，保留已执行各步的输出

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::env::{ComposeCommand, ToolsConfig};
use crate::domain::deploy::DeployStage;
use crate::domain::runtime::{ApplicationName, CommandSpec, ExecutionOutcome, LifecycleAction, RuntimeBackend};
use crate::infra::command::CommandExecutor;

pub struct LifecycleExecutor {
    executor: Arc<dyn CommandExecutor>,
    compose: ComposeCommand,
    use_sudo: bool,
    command_timeout: Duration,
    probe_timeout: Duration,
}

impl LifecycleExecutor {
    pub fn new(executor: Arc<dyn CommandExecutor>, tools: &ToolsConfig) -> Self {
        Self {
            executor,
            compose: tools.compose(),
            use_sudo: tools.use_sudo,
            command_timeout: tools.command_timeout,
            probe_timeout: tools.probe_timeout,
        }
    }

    /// 生成命令序列（不执行）
    ///
    /// `image` 只在容器部署时使用
    pub fn plan(
        &self,
        backend: RuntimeBackend,
        action: LifecycleAction,
        name: &ApplicationName,
        image: &str,
    ) -> Vec<CommandSpec> {
        let t = self.command_timeout;
        let n = name.as_str();

        match (backend, action) {
            (RuntimeBackend::ContainerRuntime, LifecycleAction::Restart) => {
                vec![CommandSpec::new("docker", ["restart", n], t)]
            }
            (RuntimeBackend::ContainerRuntime, LifecycleAction::Deploy) => vec![
                CommandSpec::new("docker", ["stop", n], t),
                CommandSpec::new("docker", ["pull", image], t),
                CommandSpec::new("docker", ["start", n], t),
            ],
            (RuntimeBackend::ComposeService, LifecycleAction::Restart) => {
                vec![CommandSpec::new(
                    self.compose.program.as_str(),
                    self.compose.args(["restart", n]),
                    t,
                )]
            }
            (RuntimeBackend::ComposeService, LifecycleAction::Deploy) => {
                vec![CommandSpec::new(
                    self.compose.program.as_str(),
                    self.compose.args(["up", "-d", "--force-recreate", n]),
                    t,
                )]
            }
            // systemd 没有独立的部署动作，Deploy 等同于 Restart
            (RuntimeBackend::SystemService, _) => {
                let unit = name.unit_name();
                if self.use_sudo {
                    vec![CommandSpec::new("sudo", ["systemctl", "restart", unit.as_str()], t)]
                } else {
                    vec![CommandSpec::new("systemctl", ["restart", unit.as_str()], t)]
                }
            }
            (RuntimeBackend::ProcessManager, LifecycleAction::Restart) => {
                vec![CommandSpec::new("pm2", ["restart", n], t)]
            }
            (RuntimeBackend::ProcessManager, LifecycleAction::Deploy) => {
                vec![CommandSpec::new("pm2", ["reload", n], t)]
            }
        }
    }

    /// 最坏情况下的总耗时（各步超时之和）
    pub fn worst_case_duration(&self, backend: RuntimeBackend, action: LifecycleAction) -> Duration {
        let steps = match (backend, action) {
            (RuntimeBackend::ContainerRuntime, LifecycleAction::Deploy) => 3,
            _ => 1,
        };
        let lookup = if needs_image(backend, action) {
            self.probe_timeout
        } else {
            Duration::ZERO
        };
        self.command_timeout * steps + lookup
    }

    pub async fn execute(
        &self,
        backend: RuntimeBackend,
        action: LifecycleAction,
        name: &ApplicationName,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        self.execute_traced(backend, action, name, cancel).await.0
    }

    /// 执行并返回逐步记录
    pub async fn execute_traced(
        &self,
        backend: RuntimeBackend,
        action: LifecycleAction,
        name: &ApplicationName,
        cancel: &CancellationToken,
    ) -> (ExecutionOutcome, Vec<DeployStage>) {
        let image = if needs_image(backend, action) {
            self.resolve_image(name, cancel).await
        } else {
            name.to_string()
        };

        let plan = self.plan(backend, action, name, &image);
        let mut stages: Vec<DeployStage> = plan.iter().map(|spec| DeployStage::new(spec.display())).collect();

        if plan.len() == 1 {
            stages[0].start();
            let outcome = self.executor.run(&plan[0], cancel).await;
            stages[0].finish(outcome.succeeded, outcome.exit_code);
            log_outcome(name, &plan[0], &outcome);
            return (outcome, stages);
        }

        let mut trace = StepTrace::default();
        let mut last = None;

        for (i, spec) in plan.iter().enumerate() {
            stages[i].start();
            let outcome = self.executor.run(spec, cancel).await;
            stages[i].finish(outcome.succeeded, outcome.exit_code);
            log_outcome(name, spec, &outcome);
            trace.push(spec, &outcome);

            let failed = !outcome.succeeded;
            last = Some(outcome);
            if failed {
                for stage in stages.iter_mut().skip(i + 1) {
                    stage.skip();
                }
                break;
            }
        }

        let outcome = match last {
            Some(last) => trace.into_outcome(last),
            None => ExecutionOutcome::fault("empty command plan"),
        };
        (outcome, stages)
    }

    /// 读取容器当前使用的镜像，失败时以容器名作为镜像名
    async fn resolve_image(&self, name: &ApplicationName, cancel: &CancellationToken) -> String {
        let spec = CommandSpec::new(
            "docker",
            ["inspect", "--format", "{{.Config.Image}}", name.as_str()],
            self.probe_timeout,
        );
        let outcome = self.executor.run(&spec, cancel).await;
        let image = outcome.stdout_trimmed();

        if outcome.succeeded && !image.is_empty() {
            image.to_string()
        } else {
            warn!(app = %name, "Could not inspect container image, pulling by container name");
            name.to_string()
        }
    }
}

fn needs_image(backend: RuntimeBackend, action: LifecycleAction) -> bool {
    backend == RuntimeBackend::ContainerRuntime && action == LifecycleAction::Deploy
}

fn log_outcome(name: &ApplicationName, spec: &CommandSpec, outcome: &ExecutionOutcome) {
    if outcome.succeeded {
        info!(app = %name, command = %spec.display(), "Lifecycle step succeeded");
    } else {
        warn!(
            app = %name,
            command = %spec.display(),
            exit_code = ?outcome.exit_code,
            termination = ?outcome.termination,
            "Lifecycle step failed"
        );
    }
}

/// 多步命令的合并输出，每步以 `$ <command>` 开头
#[derive(Default)]
struct StepTrace {
    stdout: String,
    stderr: String,
}

impl StepTrace {
    fn push(&mut self, spec: &CommandSpec, outcome: &ExecutionOutcome) {
        let header = format!("$ {}\n", spec.display());
        append_section(&mut self.stdout, &header, &outcome.stdout);
        append_section(&mut self.stderr, &header, &outcome.stderr);
    }

    /// 合并后的结果沿用最后一步的成败与退出码
    fn into_outcome(self, last: ExecutionOutcome) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: crate::domain::runtime::truncate_capture(&self.stdout),
            stderr: crate::domain::runtime::truncate_capture(&self.stderr),
            ..last
        }
    }
}

fn append_section(buf: &mut String, header: &str, body: &str) {
    buf.push_str(header);
    buf.push_str(body);
    if !body.is_empty() && !body.ends_with('\n') {
        buf.push('\n');
    }
}
