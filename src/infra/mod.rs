//! 基础设施模块
//!
//! 封装外部依赖（命令执行、主机状态、审计存储）

pub mod audit;
pub mod command;
pub mod host;

pub use audit::{AuditSink, FileAuditSink, HttpAuditSink, MemoryAuditSink};
pub use command::{CommandExecutor, CommandRunner};
pub use host::{HostInspector, SysinfoHost};
