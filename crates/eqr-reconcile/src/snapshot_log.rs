use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use eqr_audit::{AuditEvent, EventSink, EventType, NewEvent};
use eqr_schemas::{BrokerSnapshot, SnapshotKind};

/// Which snapshot kinds a session captured. START and END are mandatory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotLog {
    captured: BTreeMap<SnapshotKind, Vec<DateTime<Utc>>>,
}

impl SnapshotLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, snapshot: &BrokerSnapshot) {
        self.captured
            .entry(snapshot.kind)
            .or_default()
            .push(snapshot.captured_at);
    }

    /// Rebuild from SNAPSHOT_CAPTURED events. Events without a parsable
    /// `kind` are ignored.
    pub fn from_events(events: &[AuditEvent]) -> Self {
        let mut log = Self::new();
        for ev in events.iter().filter(|e| e.event_type == EventType::SnapshotCaptured) {
            let kind = ev
                .payload
                .get("kind")
                .cloned()
                .and_then(|k| serde_json::from_value::<SnapshotKind>(k).ok());
            if let Some(kind) = kind {
                log.captured.entry(kind).or_default().push(ev.ts_utc);
            }
        }
        log
    }

    pub fn count(&self, kind: SnapshotKind) -> usize {
        self.captured.get(&kind).map_or(0, Vec::len)
    }

    pub fn missing_required(&self) -> Vec<SnapshotKind> {
        [SnapshotKind::Start, SnapshotKind::End]
            .into_iter()
            .filter(|k| self.count(*k) == 0)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }
}

/// Append the snapshot to the event log, tagged with its kind.
pub fn log_snapshot(sink: &mut dyn EventSink, snapshot: &BrokerSnapshot) -> anyhow::Result<()> {
    let payload = serde_json::to_value(snapshot)?;
    sink.emit(NewEvent::new(EventType::SnapshotCaptured, payload).stage("snapshot"))?;
    Ok(())
}
