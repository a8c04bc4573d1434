//! Shared types for the warden runtime.
//!
//! Everything the other crates agree on lives here: permission categories,
//! the closed error set, the per-invocation [`ExecutionContext`], typed
//! audit events with their per-run [`AuditBus`], the configuration model,
//! and run identifiers.

pub mod config;
pub mod config_loader;
pub mod context;
pub mod error;
pub mod events;
pub mod ids;
pub mod permission;
pub mod run;

pub use config::WardenConfig;
pub use config_loader::{ConfigLoader, ConfigSource, EffectiveConfig};
pub use context::{ActionDescriptor, ApprovalPrompter, ExecutionContext};
pub use error::RuntimeError;
pub use events::{input_hash, AuditBus, AuditEvent, AuditEventKind};
pub use ids::RunId;
pub use permission::{Permission, PolicyAction, RiskLevel};
pub use run::{PlanRunRecord, RunStatus, StepRunRecord, StepStatus, VerificationResult};
