//! Audit and rollback for the warden runtime.
//!
//! Three pieces, each owned by exactly one run:
//!
//! - [`SecretRedactor`] masks known secret shapes before any byte reaches
//!   disk or an error reason.
//! - [`RollbackTracker`] captures pre/post snapshots of mutated files,
//!   produces unified patches, and restores on request.
//! - [`AuditLogger`] subscribes to the run's event bus and persists the
//!   finalized run record under `.agent/runs/<runId>/`.

pub mod logger;
pub mod redaction;
pub mod rollback;

pub use logger::{AuditLogger, RunLog, RunSummary};
pub use redaction::SecretRedactor;
pub use rollback::{DiffEntry, RollbackTracker};
