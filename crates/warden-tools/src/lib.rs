//! Tool registry and built-in tools.
//!
//! A tool is a typed capability: a dotted name, an input contract expressed
//! as a [`Schema`], a set of required permissions, and an async operation.
//! The [`ToolRegistry`] owns dispatch -- validation, enable-list checks, and
//! timeout enforcement -- but never policy: gating is the caller's duty, so
//! trusted orchestration paths can use the registry directly.

pub mod builtin;
pub mod definition;
pub mod registry;
pub mod schema;

pub use definition::{ToolDefinition, ToolInfo, ToolResult};
pub use registry::ToolRegistry;
pub use schema::{Field, Schema};
