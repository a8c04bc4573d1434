//! Policy engine for the warden runtime.
//!
//! Every gated action passes through [`PolicyEngine::check`], which resolves
//! each required permission to allow/deny/confirm from the configuration
//! snapshot, honoring session approvals cached by earlier steps of the same
//! run. Scope checks (path traversal, command and domain allow-lists) live
//! in [`scope`] and are equivalent to denial when they fail.

pub mod engine;
pub mod scope;

pub use engine::{Decision, PolicyEngine};
