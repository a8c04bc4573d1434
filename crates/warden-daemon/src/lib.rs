//! Background execution: the scheduler and the daemon lifecycle.
//!
//! The [`Scheduler`] is decoupled from plan execution: it parses plans,
//! watches the clock and the filesystem, and fires `(plan, trigger)` pairs
//! into a dispatch callback. The daemon [`lifecycle`] owns the pid file
//! and the SIGTERM shutdown path.

pub mod lifecycle;
pub mod scheduler;
pub mod watcher;

pub use lifecycle::{wait_for_shutdown, PidFile};
pub use scheduler::{PlanLocks, Scheduler};
pub use watcher::PlanWatcher;
