//! Built-in tools shipped with the runtime.
//!
//! Filesystem tools (`fs.read`, `fs.write`, `fs.patch`, `fs.list`), command
//! execution (`cmd.run`), and HTTP fetch (`http.fetch`). All of them resolve
//! relative paths against the context's working directory; scope checks
//! happen in the policy layer before dispatch ever reaches them.

mod cmd;
mod fs;
mod http;

use anyhow::Result;

pub use cmd::CmdRunTool;
pub use fs::{FsListTool, FsPatchTool, FsReadTool, FsWriteTool};
pub use http::HttpFetchTool;

use crate::registry::ToolRegistry;

/// Maximum bytes of subprocess or HTTP output retained (10 MiB).
pub(crate) const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Register every built-in tool into `registry`.
pub fn register_builtins(registry: &ToolRegistry) -> Result<()> {
    registry.register(Box::new(FsReadTool))?;
    registry.register(Box::new(FsWriteTool))?;
    registry.register(Box::new(FsPatchTool))?;
    registry.register(Box::new(FsListTool))?;
    registry.register(Box::new(CmdRunTool))?;
    registry.register(Box::new(HttpFetchTool))?;
    Ok(())
}
