//! Typed audit events and the per-run event bus.
//!
//! Each run owns its own [`AuditBus`]; tools, the policy engine, and the
//! plan runner emit into the bus supplied by their `ExecutionContext`, so
//! concurrent runs never interleave events. Subscribers (the audit logger,
//! a progress UI) receive every event in emission order.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use uuid::Uuid;

/// SHA-256 hex digest of a serialized tool input.
///
/// Audit events carry this instead of the raw payload, so event streams
/// can be correlated without exposing secrets.
pub fn input_hash(input: &serde_json::Value) -> String {
    let serialized = input.to_string();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}

/// The payload of an audit event, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEventKind {
    RunStart {
        plan: String,
        trigger: String,
    },
    RunComplete {
        status: String,
    },
    StepStart {
        step: String,
        name: String,
    },
    StepComplete {
        step: String,
        duration_ms: u64,
    },
    StepFailed {
        step: String,
        error: String,
    },
    /// A tool was dispatched. Arguments are summarized by hash so the
    /// event stream never carries raw payloads.
    ToolCall {
        tool: String,
        input_hash: String,
        success: bool,
        duration_ms: u64,
    },
    PermissionCheck {
        tool: String,
        permission: String,
        decision: String,
    },
    PermissionDenied {
        tool: String,
        permission: String,
        reason: String,
    },
    ApprovalGranted {
        tool: String,
        permissions: Vec<String>,
    },
    ApprovalDenied {
        tool: String,
        reason: String,
    },
    SkillLoaded {
        skill: String,
        version: String,
    },
    DiffGenerated {
        step: String,
        path: String,
    },
}

/// One audit event: a kind plus identity and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Fan-out bus for one run's audit events.
///
/// Cloning the bus shares the subscriber list. Emission never blocks:
/// subscribers get unbounded channels, and closed receivers are pruned on
/// the next emit.
#[derive(Clone, Default)]
pub struct AuditBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<AuditEvent>>>>,
}

impl AuditBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and return its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<AuditEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("audit bus lock poisoned")
            .push(tx);
        rx
    }

    /// Emit an event to every live subscriber.
    pub fn emit(&self, kind: AuditEventKind) {
        let event = AuditEvent::new(kind);
        let mut subs = self.subscribers.lock().expect("audit bus lock poisoned");
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers (primarily for diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("audit bus lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_all_subscribers_in_order() {
        let bus = AuditBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(AuditEventKind::RunStart {
            plan: "demo".into(),
            trigger: "manual".into(),
        });
        bus.emit(AuditEventKind::RunComplete {
            status: "completed".into(),
        });

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            assert!(matches!(first.kind, AuditEventKind::RunStart { .. }));
            let second = rx.recv().await.unwrap();
            assert!(matches!(second.kind, AuditEventKind::RunComplete { .. }));
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = AuditBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);

        bus.emit(AuditEventKind::RunComplete {
            status: "completed".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn input_hash_is_deterministic_and_hides_payload() {
        let input = serde_json::json!({"apiKey": "super_secret_value"});
        let a = input_hash(&input);
        let b = input_hash(&input);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!a.contains("super_secret_value"));
    }

    #[test]
    fn event_serialization_tags_kind() {
        let event = AuditEvent::new(AuditEventKind::ToolCall {
            tool: "fs.write".into(),
            input_hash: "abc123".into(),
            success: true,
            duration_ms: 12,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "tool_call");
        assert_eq!(json["tool"], "fs.write");
        assert_eq!(json["duration_ms"], 12);

        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, event.kind);
    }
}
