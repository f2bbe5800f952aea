//! eqr-terminal
//!
//! Exactly-one-terminal-outcome bookkeeping for signals.
//!
//! Every path that removes a signal from the pending set ends in
//! [`TerminalStateTracker::record`]. A second record for the same id is refused
//! with [`TrackerError::DuplicateTerminalState`]; the session runner treats that
//! as fatal. At session end [`TerminalStateTracker::validate`] must come back
//! clean: no generated id without an outcome, no id with more than one.
//!
//! The durable copy of every record is a `TERMINAL_STATE_RECORDED` event in the
//! run's event log. [`TerminalStateTracker::replay`] rebuilds the tracker from
//! that log after a restart.

use std::collections::{BTreeMap, BTreeSet};

use eqr_audit::{AuditEvent, EventSink, EventType, NewEvent};
use eqr_schemas::TerminalState;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const STAGE: &str = "terminal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// The signal already has a terminal state. Logic bug, never auto-corrected.
    DuplicateTerminalState {
        signal_id: String,
        existing: TerminalState,
        attempted: TerminalState,
    },
    /// The event sink refused the record; nothing was stored.
    Sink { signal_id: String, reason: String },
    /// A `TERMINAL_STATE_RECORDED` event whose payload cannot be read back.
    MalformedEvent { seq: u64, reason: String },
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateTerminalState {
                signal_id,
                existing,
                attempted,
            } => write!(
                f,
                "duplicate terminal state for signal {signal_id}: already {existing}, attempted {attempted}"
            ),
            Self::Sink { signal_id, reason } => {
                write!(f, "terminal state for signal {signal_id} not durable: {reason}")
            }
            Self::MalformedEvent { seq, reason } => {
                write!(f, "malformed terminal state event at seq {seq}: {reason}")
            }
        }
    }
}

impl std::error::Error for TrackerError {}

/// One recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub signal_id: String,
    pub terminal_state: TerminalState,
    pub reason: Option<String>,
}

/// Result of [`TerminalStateTracker::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalValidation {
    /// Generated ids with no terminal state.
    pub missing: Vec<String>,
    /// Ids with more than one terminal state.
    pub duplicates: Vec<String>,
    /// Ids with a terminal state that were never reported as generated.
    pub unknown: Vec<String>,
}

impl TerminalValidation {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.duplicates.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TerminalStateTracker {
    // A Vec per id so that a replayed journal with a duplicate entry is
    // visible to `validate` instead of being collapsed.
    records: BTreeMap<String, Vec<TerminalRecord>>,
}

impl TerminalStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the single terminal outcome of `signal_id`.
    ///
    /// The event is emitted (and, for the file sink, fsynced) before the
    /// in-memory mapping is stored. A sink failure leaves the tracker unchanged.
    pub fn record(
        &mut self,
        sink: &mut dyn EventSink,
        signal_id: &str,
        terminal_state: TerminalState,
        reason: Option<&str>,
    ) -> Result<(), TrackerError> {
        if let Some(existing) = self.state_of(signal_id) {
            tracing::error!(
                signal_id,
                existing = %existing,
                attempted = %terminal_state,
                "duplicate terminal state refused"
            );
            return Err(TrackerError::DuplicateTerminalState {
                signal_id: signal_id.to_string(),
                existing,
                attempted: terminal_state,
            });
        }

        let record = TerminalRecord {
            signal_id: signal_id.to_string(),
            terminal_state,
            reason: reason.map(str::to_string),
        };

        let payload = json!({
            "signal_id": record.signal_id,
            "terminal_state": record.terminal_state,
            "reason": record.reason,
        });
        sink.emit(NewEvent::new(EventType::TerminalStateRecorded, payload).stage(STAGE))
            .map_err(|e| TrackerError::Sink {
                signal_id: signal_id.to_string(),
                reason: format!("{e:#}"),
            })?;

        tracing::debug!(signal_id, terminal_state = %terminal_state, "terminal state recorded");
        self.records
            .entry(record.signal_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    /// First recorded outcome for `signal_id`.
    pub fn state_of(&self, signal_id: &str) -> Option<TerminalState> {
        self.records
            .get(signal_id)
            .and_then(|v| v.first())
            .map(|r| r.terminal_state)
    }

    pub fn record_of(&self, signal_id: &str) -> Option<&TerminalRecord> {
        self.records.get(signal_id).and_then(|v| v.first())
    }

    /// Number of recorded outcomes, duplicates included.
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in signal-id order.
    pub fn records(&self) -> impl Iterator<Item = &TerminalRecord> {
        self.records.values().flatten()
    }

    pub fn counts(&self) -> BTreeMap<TerminalState, usize> {
        let mut out = BTreeMap::new();
        for r in self.records() {
            *out.entry(r.terminal_state).or_insert(0) += 1;
        }
        out
    }

    /// Check the session's generated ids against the recorded outcomes.
    pub fn validate<I, S>(&self, all_generated_ids: I) -> TerminalValidation
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let generated: BTreeSet<String> = all_generated_ids
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();

        let missing = generated
            .iter()
            .filter(|id| !self.records.contains_key(id.as_str()))
            .cloned()
            .collect();
        let duplicates = self
            .records
            .iter()
            .filter(|(_, v)| v.len() > 1)
            .map(|(id, _)| id.clone())
            .collect();
        let unknown = self
            .records
            .keys()
            .filter(|id| !generated.contains(id.as_str()))
            .cloned()
            .collect();

        TerminalValidation {
            missing,
            duplicates,
            unknown,
        }
    }

    /// Rebuild from an event log. Every `TERMINAL_STATE_RECORDED` event counts,
    /// so a duplicated journal entry shows up as a duplicate in `validate`.
    pub fn replay<'a, I>(events: I) -> Result<Self, TrackerError>
    where
        I: IntoIterator<Item = &'a AuditEvent>,
    {
        let mut tracker = Self::new();
        for ev in events {
            if ev.event_type != EventType::TerminalStateRecorded {
                continue;
            }
            let record: TerminalRecord =
                serde_json::from_value(ev.payload.clone()).map_err(|e| {
                    TrackerError::MalformedEvent {
                        seq: ev.seq,
                        reason: e.to_string(),
                    }
                })?;
            tracker
                .records
                .entry(record.signal_id.clone())
                .or_default()
                .push(record);
        }
        Ok(tracker)
    }

    /// Ids generated in the session, read from `SIGNAL_GENERATED` events.
    pub fn generated_ids<'a, I>(events: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a AuditEvent>,
    {
        events
            .into_iter()
            .filter(|e| e.event_type == EventType::SignalGenerated)
            .filter_map(|e| e.payload.get("signal_id").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_clean_iff_no_missing_or_duplicates() {
        let mut v = TerminalValidation::default();
        assert!(v.is_clean());
        v.unknown.push("x".into());
        assert!(v.is_clean());
        v.missing.push("y".into());
        assert!(!v.is_clean());
    }
}
