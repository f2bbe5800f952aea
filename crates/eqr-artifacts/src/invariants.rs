//! Post-run invariant checker over a run's event log.
//!
//! Checks, all over the events of one run id:
//!
//! - every `SIGNAL_GENERATED` id has exactly one `TERMINAL_STATE_RECORDED`
//!   (signal count == terminal-state count, zero missing, zero duplicated);
//! - if the reconciliation gating admission failed, every signal ended
//!   `REJECTED_BY_BROKER` and no trade exists;
//! - START and END broker snapshots were captured.
//!
//! "Gating" reconciliation is the last `RECONCILIATION_PASSED` /
//! `RECONCILIATION_FAILED` before the first terminal record or order
//! submission. An END reconciliation failure after trading is reported but is
//! not a violation of the broker-rejection rule.

use std::path::Path;

use anyhow::{Context, Result};
use eqr_audit::{read_events, AuditEvent, EventType};
use eqr_reconcile::SnapshotLog;
use eqr_schemas::{SnapshotKind, TerminalState};
use eqr_terminal::TerminalStateTracker;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manifest::open_run_dir;
use crate::trades::read_trades_csv;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantReport {
    pub run_id: Uuid,
    pub events: usize,
    pub signals_generated: usize,
    pub terminal_states: usize,
    pub missing: Vec<String>,
    pub duplicates: Vec<String>,
    /// Terminal records for ids never announced as generated.
    pub unknown: Vec<String>,
    pub gating_reconciliation_failed: bool,
    pub end_reconciliation_passed: Option<bool>,
    /// Signals that did not end as broker rejections although the gating
    /// reconciliation failed.
    pub non_broker_outcomes: Vec<String>,
    pub trades: usize,
    pub missing_snapshots: Vec<SnapshotKind>,
    pub violations: Vec<String>,
}

impl InvariantReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check the events of `run_id`. Events of other runs are ignored.
/// `trade_rows` is the number of exported trades (0 if none were exported).
pub fn check_run_invariants(run_id: Uuid, events: &[AuditEvent], trade_rows: usize) -> InvariantReport {
    let events: Vec<AuditEvent> = events.iter().filter(|e| e.run_id == run_id).cloned().collect();

    let generated = TerminalStateTracker::generated_ids(&events);
    let mut violations = Vec::new();

    let (tracker, validation) = match TerminalStateTracker::replay(&events) {
        Ok(t) => {
            let v = t.validate(&generated);
            (t, v)
        }
        Err(e) => {
            violations.push(format!("terminal log unreadable: {e}"));
            let t = TerminalStateTracker::new();
            let v = t.validate(&generated);
            (t, v)
        }
    };

    if generated.len() != tracker.len() {
        violations.push(format!(
            "signal count {} != terminal state count {}",
            generated.len(),
            tracker.len()
        ));
    }
    let mut unique = generated.clone();
    unique.sort();
    unique.dedup();
    if unique.len() != generated.len() {
        violations.push(format!(
            "{} signal id(s) generated more than once",
            generated.len() - unique.len()
        ));
    }
    if !validation.missing.is_empty() {
        violations.push(format!(
            "{} signal(s) without terminal state: {}",
            validation.missing.len(),
            validation.missing.join(", ")
        ));
    }
    if !validation.duplicates.is_empty() {
        violations.push(format!(
            "{} signal(s) with several terminal states: {}",
            validation.duplicates.len(),
            validation.duplicates.join(", ")
        ));
    }
    if !validation.unknown.is_empty() {
        violations.push(format!(
            "{} terminal state(s) for ungenerated signals: {}",
            validation.unknown.len(),
            validation.unknown.join(", ")
        ));
    }

    let fills = events
        .iter()
        .filter(|e| e.event_type == EventType::OrderFilled)
        .count();
    let trades = fills.max(trade_rows);

    let gating_failed = gating_reconciliation_failed(&events);
    let mut non_broker = Vec::new();
    if gating_failed {
        non_broker = tracker
            .records()
            .filter(|r| r.terminal_state != TerminalState::RejectedByBroker)
            .map(|r| r.signal_id.clone())
            .collect();
        if !non_broker.is_empty() {
            violations.push(format!(
                "reconciliation failed but {} signal(s) were not broker rejections: {}",
                non_broker.len(),
                non_broker.join(", ")
            ));
        }
        if trades > 0 {
            violations.push(format!("reconciliation failed but {trades} trade(s) exist"));
        }
    }

    let missing_snapshots = SnapshotLog::from_events(&events).missing_required();
    for kind in &missing_snapshots {
        violations.push(format!("no {} broker snapshot captured", kind.as_str()));
    }

    let report = InvariantReport {
        run_id,
        events: events.len(),
        signals_generated: generated.len(),
        terminal_states: tracker.len(),
        missing: validation.missing,
        duplicates: validation.duplicates,
        unknown: validation.unknown,
        gating_reconciliation_failed: gating_failed,
        end_reconciliation_passed: end_reconciliation_passed(&events),
        non_broker_outcomes: non_broker,
        trades,
        missing_snapshots,
        violations,
    };

    if report.passed() {
        tracing::info!(run_id = %run_id, signals = report.signals_generated, trades, "run invariants hold");
    } else {
        for v in &report.violations {
            tracing::error!(run_id = %run_id, violation = %v, "run invariant violated");
        }
    }
    report
}

/// Read `<run_dir>/manifest.json`, its event log and trades CSV, then check.
pub fn check_run_dir(run_dir: &Path) -> Result<InvariantReport> {
    let run = open_run_dir(run_dir)?;
    let events = read_events(run.events_path())
        .with_context(|| format!("read event log of run {}", run.manifest.run_id))?;
    let trades = read_trades_csv(&run.trades_path())?;
    Ok(check_run_invariants(run.manifest.run_id, &events, trades.len()))
}

fn is_reconciliation(e: &AuditEvent) -> bool {
    matches!(
        e.event_type,
        EventType::ReconciliationPassed | EventType::ReconciliationFailed
    )
}

fn gating_reconciliation_failed(events: &[AuditEvent]) -> bool {
    let first_admission = events
        .iter()
        .position(|e| {
            matches!(
                e.event_type,
                EventType::TerminalStateRecorded | EventType::OrderSubmitted
            )
        })
        .unwrap_or(events.len());
    events[..first_admission]
        .iter()
        .rev()
        .find(|e| is_reconciliation(e))
        .map(|e| e.event_type == EventType::ReconciliationFailed)
        .unwrap_or(false)
}

fn end_reconciliation_passed(events: &[AuditEvent]) -> Option<bool> {
    events
        .iter()
        .rev()
        .filter(|e| is_reconciliation(e))
        .find(|e| e.payload.get("kind").and_then(|k| k.as_str()) == Some(SnapshotKind::End.as_str()))
        .map(|e| e.event_type == EventType::ReconciliationPassed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eqr_audit::{EventSink, MemorySink, NewEvent};
    use serde_json::json;

    fn snap(sink: &mut MemorySink, kind: &str) {
        sink.emit(NewEvent::new(EventType::SnapshotCaptured, json!({ "kind": kind })))
            .unwrap();
    }

    #[test]
    fn events_of_other_runs_are_ignored() {
        let run = Uuid::new_v4();
        let mut sink = MemorySink::new(Uuid::new_v4());
        sink.emit(NewEvent::new(EventType::SignalGenerated, json!({ "signal_id": "x" })))
            .unwrap();
        let r = check_run_invariants(run, sink.events(), 0);
        assert_eq!(r.events, 0);
        assert_eq!(r.missing_snapshots, vec![SnapshotKind::Start, SnapshotKind::End]);
    }

    #[test]
    fn empty_session_with_snapshots_passes() {
        let run = Uuid::new_v4();
        let mut sink = MemorySink::new(run);
        snap(&mut sink, "START");
        snap(&mut sink, "END");
        let r = check_run_invariants(run, sink.events(), 0);
        assert!(r.passed(), "{:?}", r.violations);
    }
}
