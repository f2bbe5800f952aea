//! Exactly one terminal state per signal.
//!
//! GREEN when:
//! - Every generated id with one recorded outcome validates clean.
//! - A second record for the same id is refused and does not reach the log.
//! - Unrecorded ids are reported missing.
//! - Replaying a journal with a duplicated entry reports the id as duplicate.

use eqr_audit::{read_events, AuditWriter, EventSink, EventType, MemorySink, NewEvent};
use eqr_schemas::TerminalState;
use eqr_terminal::{TerminalStateTracker, TrackerError};
use serde_json::json;
use uuid::Uuid;

#[test]
fn one_outcome_per_signal_validates_clean() {
    let mut sink = MemorySink::new(Uuid::new_v4());
    let mut tracker = TerminalStateTracker::new();

    tracker
        .record(&mut sink, "s1", TerminalState::Executed, None)
        .unwrap();
    tracker
        .record(
            &mut sink,
            "s2",
            TerminalState::RejectedByHeat,
            Some("heat 31.2% > ceiling 30.0%"),
        )
        .unwrap();

    let v = tracker.validate(["s1", "s2"]);
    assert!(v.is_clean(), "{v:?}");
    assert_eq!(sink.count(EventType::TerminalStateRecorded), 2);
    assert_eq!(
        tracker.record_of("s2").and_then(|r| r.reason.as_deref()),
        Some("heat 31.2% > ceiling 30.0%")
    );
}

#[test]
fn duplicate_record_is_refused() {
    let mut sink = MemorySink::new(Uuid::new_v4());
    let mut tracker = TerminalStateTracker::new();

    tracker
        .record(&mut sink, "s1", TerminalState::RejectedByCorrelation, None)
        .unwrap();
    let err = tracker
        .record(&mut sink, "s1", TerminalState::Executed, None)
        .unwrap_err();

    assert_eq!(
        err,
        TrackerError::DuplicateTerminalState {
            signal_id: "s1".into(),
            existing: TerminalState::RejectedByCorrelation,
            attempted: TerminalState::Executed,
        }
    );
    assert_eq!(sink.count(EventType::TerminalStateRecorded), 1);
    assert_eq!(tracker.state_of("s1"), Some(TerminalState::RejectedByCorrelation));
    assert!(tracker.validate(["s1"]).is_clean());
}

#[test]
fn unrecorded_signal_is_missing() {
    let mut sink = MemorySink::new(Uuid::new_v4());
    let mut tracker = TerminalStateTracker::new();
    tracker
        .record(&mut sink, "s1", TerminalState::Executed, None)
        .unwrap();

    let v = tracker.validate(["s1", "s2", "s3"]);
    assert_eq!(v.missing, vec!["s2".to_string(), "s3".to_string()]);
    assert!(v.duplicates.is_empty());
    assert!(!v.is_clean());
}

#[test]
fn replay_from_durable_log_surfaces_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let run_id = Uuid::new_v4();

    {
        let mut writer = AuditWriter::new(&path, run_id, true).unwrap();
        let mut tracker = TerminalStateTracker::new();
        for id in ["a", "b"] {
            writer
                .emit(NewEvent::new(
                    EventType::SignalGenerated,
                    json!({"signal_id": id}),
                ))
                .unwrap();
        }
        tracker
            .record(&mut writer, "a", TerminalState::Executed, None)
            .unwrap();
        tracker
            .record(&mut writer, "b", TerminalState::RejectedBySizing, Some("0 shares"))
            .unwrap();
        // A journal double-write bypassing the tracker.
        writer
            .emit(NewEvent::new(
                EventType::TerminalStateRecorded,
                json!({"signal_id": "b", "terminal_state": "REJECTED_BY_BROKER", "reason": null}),
            ))
            .unwrap();
    }

    let events = read_events(&path).unwrap();
    let generated = TerminalStateTracker::generated_ids(&events);
    assert_eq!(generated, vec!["a".to_string(), "b".to_string()]);

    let tracker = TerminalStateTracker::replay(&events).unwrap();
    assert_eq!(tracker.len(), 3);
    let v = tracker.validate(&generated);
    assert_eq!(v.duplicates, vec!["b".to_string()]);
    assert!(v.missing.is_empty());
    assert_eq!(tracker.counts().get(&TerminalState::Executed), Some(&1));
}

#[test]
fn malformed_journal_entry_is_reported() {
    let mut sink = MemorySink::new(Uuid::new_v4());
    sink.emit(NewEvent::new(
        EventType::TerminalStateRecorded,
        json!({"signal_id": "x", "terminal_state": "MAYBE"}),
    ))
    .unwrap();

    let err = TerminalStateTracker::replay(sink.events()).unwrap_err();
    assert!(matches!(err, TrackerError::MalformedEvent { seq: 0, .. }));
}
