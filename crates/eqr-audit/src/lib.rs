//! eqr-audit
//!
//! Append-only structured event log (JSON Lines, one event per line) with an
//! optional SHA-256 hash chain, plus the notification seam used by the
//! reconciler and the drawdown manager.
//!
//! The event log is the audit trail of record: terminal states, order
//! submissions, fills, snapshots and kill-switch triggers all land here, and
//! the invariant checker reads it back.
//!
//! Durable JSON state files (drawdown state, reconciler state, artifacts) go
//! through [`write_atomic`].

mod event;
mod notify;
mod persist;
mod writer;

pub use event::{AuditEvent, EventSink, EventType, MemorySink, NewEvent};
pub use notify::{
    notify_best_effort, Notification, Notifier, NotifyError, RecordingNotifier, Severity,
    TracingNotifier,
};
pub use persist::{read_json_opt, write_atomic, write_json_atomic};
pub use writer::{
    compute_event_hash, read_events, read_events_str, verify_hash_chain, verify_hash_chain_str,
    AuditWriter, VerifyResult,
};
