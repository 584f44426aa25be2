//! 服务层模块
//!
//! 包含核心业务逻辑

pub mod deploy;
pub mod heal;

use std::any::Any;

pub use deploy::DeploymentOrchestrator;
pub use heal::HealingRunner;

/// 从 panic payload 中取出消息
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
