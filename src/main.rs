//! DevOps Agent
//!
//! Usage:
//! - HTTP server (default): `devops-agent serve --port 8000`
//! - One-off restart: `devops-agent deploy web1`
//! - One-off deploy: `devops-agent deploy web1 --action deploy`
//! - Healing: `devops-agent heal --task clean_disk_space --task check_memory_usage`
//! - Status: `devops-agent status web1`

use clap::{Parser, Subcommand};
use std::sync::Arc;

use devops_agent::config::env::{EnvConfig, LogFormat};
use devops_agent::domain::deploy::DeployRequest;
use devops_agent::domain::heal::HealRequest;
use devops_agent::domain::runtime::LifecycleAction;
use devops_agent::state::{get_shutdown_token, AppState};

#[derive(Parser)]
#[command(name = "devops-agent")]
#[command(about = "Deploy and heal applications on this host", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Override the listening port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Restart or deploy an application
    Deploy {
        app: String,
        #[arg(short, long, default_value = "restart")]
        action: LifecycleAction,
    },
    /// Run healing tasks (all by default)
    Heal {
        #[arg(short, long = "task")]
        tasks: Vec<String>,
    },
    /// Show which runtime manages an application and whether it runs
    Status { app: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    devops_agent::init_tracing(LogFormat::from_env());
    let config = EnvConfig::from_env();

    let port = config.port;
    let state = Arc::new(AppState::build(config).await?);

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port: override_port } => {
            devops_agent::run_server(state, override_port.unwrap_or(port)).await?;
        }
        Command::Deploy { app, action } => {
            let result = state
                .orchestrator
                .deploy(DeployRequest::new(app, action), &cancel_on_ctrl_c())
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.succeeded() {
                std::process::exit(1);
            }
        }
        Command::Heal { tasks } => {
            let request = HealRequest {
                tasks: (!tasks.is_empty()).then_some(tasks),
                ..HealRequest::default()
            };
            let report = state.healer.run(request, &cancel_on_ctrl_c()).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.overall_succeeded {
                std::process::exit(1);
            }
        }
        Command::Status { app } => {
            let status = state.orchestrator.status(&app, &cancel_on_ctrl_c()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// 一次性命令：Ctrl+C 时取消正在执行的外部命令
fn cancel_on_ctrl_c() -> tokio_util::sync::CancellationToken {
    let token = get_shutdown_token();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}
