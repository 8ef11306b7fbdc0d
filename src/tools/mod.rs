//! Tool system: built-in tools, remote servers, and the unified dispatcher.

mod fs;
mod registry;
mod remote;
mod search;
mod shell;
mod types;

pub use fs::{EditFileTool, ReadFileTool, WriteFileTool};
pub use registry::ToolRegistry;
pub use remote::{RemoteToolServer, PROVIDER_DISCONNECTED};
pub use search::{GlobTool, GrepTool};
pub use shell::ShellTool;
pub use types::{resolve_path, validate_args, Tool, ToolContext, ToolResult, ToolStatus};
