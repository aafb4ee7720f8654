//! Tool routing and built-in tools for the CronBot worker.
//!
//! The [`CapabilityRegistry`] aggregates tools from every registered
//! provider and sends each call through the autonomy-gated approval policy.
//! [`builtin_provider`] serves a small set of workspace tools in-process so
//! a worker is useful without any external tool server.

pub mod file_read;
pub mod file_write;
pub mod list_dir;
pub mod local;
pub mod registry;
pub mod shell;

pub use local::LocalProvider;
pub use registry::{CapabilityRegistry, PendingApproval, RegisteredTool};

use std::path::PathBuf;
use std::time::Duration;

/// Provider id under which the built-in tools are registered.
pub const BUILTIN_PROVIDER_ID: &str = "builtin";

/// Built-in tools rooted at `workspace`: read, write, list, and execute.
pub fn builtin_provider(workspace: impl Into<PathBuf>, command_timeout: Duration) -> LocalProvider {
    let workspace = workspace.into();
    LocalProvider::new()
        .with_tool(Box::new(file_read::FileReadTool::new(workspace.clone())))
        .with_tool(Box::new(file_write::FileWriteTool::new(workspace.clone())))
        .with_tool(Box::new(list_dir::ListDirectoryTool::new(workspace.clone())))
        .with_tool(Box::new(shell::ShellTool::new(workspace, command_timeout)))
}
