//! Run identifiers.
//!
//! Run ids carry a UTC timestamp prefix so the on-disk run directory sorts
//! chronologically; `AuditLogger::list()` relies on the lexicographic order.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Identifier for one plan or skill run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh id: `run-<UTC timestamp>-<short uuid>`.
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("run-{stamp}-{}", &suffix[..8]))
    }

    /// Wrap an existing id string (e.g. read back from disk).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
