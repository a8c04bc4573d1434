//! Warden: a policy-gated local agent runtime.
//!
//! This meta-crate re-exports the workspace members so integration tests and
//! embedders can depend on a single crate. The pieces:
//!
//! - [`types`] -- shared types: permissions, errors, execution context,
//!   audit events, configuration.
//! - [`tools`] -- the tool registry, schema AST, and built-in tools.
//! - [`policy`] -- the policy engine and scope checks.
//! - [`audit`] -- secret redaction, rollback tracking, and the run logger.
//! - [`skills`] -- skill manifests, the skill registry, and the agentic
//!   skill runner.
//! - [`engine`] -- plan parsing, the execution engine, verification, and the
//!   plan runner.
//! - [`daemon`] -- the background scheduler and daemon lifecycle.

pub use warden_audit as audit;
pub use warden_daemon as daemon;
pub use warden_engine as engine;
pub use warden_policy as policy;
pub use warden_skills as skills;
pub use warden_tools as tools;
pub use warden_types as types;
