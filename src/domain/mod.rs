//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod deploy;
pub mod heal;
pub mod runtime;
pub mod system;

// Re-exports for convenience
pub use deploy::{DeployRequest, DeployStage, DeployStatus, DeploymentResult, StageStatus};
pub use heal::{HealRequest, HealingReport, HealingTask, HealingTaskResult};
pub use runtime::{
    ApplicationName, CommandSpec, ExecutionOutcome, LifecycleAction, NameError, RuntimeBackend, Termination,
};
pub use system::{DiskUsage, LoadAverage, MemoryUsage, ProcessSnapshot, ProcessState, SystemStats};
