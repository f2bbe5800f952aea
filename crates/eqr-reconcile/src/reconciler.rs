use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use eqr_audit::{
    notify_best_effort, read_json_opt, write_json_atomic, EventSink, EventType, NewEvent,
    Notification, Notifier, Severity,
};
use eqr_broker::{capture_snapshot, BrokerClient, RetryPolicy};
use eqr_schemas::{BrokerSnapshot, ReconcilerStatus, SnapshotKind};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::engine::reconcile;
use crate::snapshot_log::log_snapshot;
use crate::types::{Discrepancy, LocalBook, ReconcileConfig, ReconcileReport};
use crate::watermark::{SnapshotFreshness, SnapshotWatermark};

/// Durable reconciler state (`reconciler_state.json`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerState {
    pub status: ReconcilerStatus,
    /// Discrepancies that caused the current pause. Empty when ACTIVE.
    pub discrepancies: Vec<Discrepancy>,
    pub last_passed: Option<bool>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_resume_reason: Option<String>,
    pub watermark: SnapshotWatermark,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub report: ReconcileReport,
    /// `None` when the broker could not be read.
    pub snapshot: Option<BrokerSnapshot>,
}

impl ReconcileOutcome {
    pub fn passed(&self) -> bool {
        self.report.passed
    }
}

/// ACTIVE/PAUSED reconciler. Any discrepancy pauses; only a clean
/// reconciliation or [`Reconciler::force_resume`] reactivates.
pub struct Reconciler {
    config: ReconcileConfig,
    path: PathBuf,
    state: ReconcilerState,
}

impl Reconciler {
    /// Restore state from `path`, or start ACTIVE when absent.
    pub fn open(config: ReconcileConfig, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state: ReconcilerState = read_json_opt(&path)?.unwrap_or_default();
        if state.status == ReconcilerStatus::Paused {
            tracing::warn!(
                path = ?path,
                discrepancies = state.discrepancies.len(),
                "reconciler restored PAUSED"
            );
        }
        Ok(Self { config, path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &ReconcilerState {
        &self.state
    }

    pub fn status(&self) -> ReconcilerStatus {
        self.state.status
    }

    pub fn is_paused(&self) -> bool {
        self.state.status == ReconcilerStatus::Paused
    }

    /// True only if a reconciliation has run and passed.
    pub fn last_passed(&self) -> bool {
        self.state.last_passed == Some(true)
    }

    /// Read the broker (with read retries), log the snapshot, reconcile.
    /// A broker that cannot be read pauses the reconciler.
    #[allow(clippy::too_many_arguments)]
    pub fn capture_and_reconcile(
        &mut self,
        broker: &mut dyn BrokerClient,
        retry: &RetryPolicy,
        kind: SnapshotKind,
        at: DateTime<Utc>,
        local: &LocalBook,
        sink: &mut dyn EventSink,
        notifier: &dyn Notifier,
    ) -> Result<ReconcileOutcome> {
        match capture_snapshot(broker, retry, kind, at) {
            Ok(snapshot) => {
                log_snapshot(sink, &snapshot)?;
                let report = self.reconcile_snapshot(&snapshot, local, sink, notifier)?;
                Ok(ReconcileOutcome {
                    report,
                    snapshot: Some(snapshot),
                })
            }
            Err(e) => {
                tracing::error!(kind = kind.as_str(), error = %e, "broker snapshot failed");
                let report = ReconcileReport {
                    kind,
                    captured_at: at,
                    passed: false,
                    discrepancies: vec![Discrepancy::SnapshotUnavailable {
                        reason: e.to_string(),
                    }],
                };
                self.fail(report.clone(), sink, notifier)?;
                Ok(ReconcileOutcome {
                    report,
                    snapshot: None,
                })
            }
        }
    }

    /// Reconcile against an already captured snapshot.
    pub fn reconcile_snapshot(
        &mut self,
        snapshot: &BrokerSnapshot,
        local: &LocalBook,
        sink: &mut dyn EventSink,
        notifier: &dyn Notifier,
    ) -> Result<ReconcileReport> {
        if let SnapshotFreshness::Stale { watermark, got } = self.state.watermark.check(snapshot) {
            let report = ReconcileReport {
                kind: snapshot.kind,
                captured_at: snapshot.captured_at,
                passed: false,
                discrepancies: vec![Discrepancy::StaleSnapshot { watermark, got }],
            };
            self.fail(report.clone(), sink, notifier)?;
            return Ok(report);
        }
        self.state.watermark.accept(snapshot);

        let report = reconcile(&self.config, local, snapshot);
        if report.passed {
            self.pass(&report, sink, notifier)?;
        } else {
            self.fail(report.clone(), sink, notifier)?;
        }
        Ok(report)
    }

    /// Manual override. Requires a non-empty operator reason.
    pub fn force_resume(&mut self, reason: &str, at: DateTime<Utc>, sink: &mut dyn EventSink) -> Result<()> {
        if reason.trim().is_empty() {
            bail!("force_resume requires an operator reason");
        }
        let was = self.state.status;
        let cleared = std::mem::take(&mut self.state.discrepancies);
        self.state.status = ReconcilerStatus::Active;
        self.state.paused_at = None;
        self.state.last_resume_reason = Some(reason.to_string());
        self.persist()?;

        sink.emit(
            NewEvent::new(
                EventType::ReconcilerResumed,
                json!({
                    "from": was.as_str(),
                    "manual": true,
                    "reason": reason,
                    "cleared": cleared.iter().map(Discrepancy::describe).collect::<Vec<_>>(),
                    "at": at,
                }),
            )
            .stage("reconcile"),
        )?;
        tracing::warn!(reason, cleared = cleared.len(), "reconciler force-resumed");
        Ok(())
    }

    fn pass(&mut self, report: &ReconcileReport, sink: &mut dyn EventSink, notifier: &dyn Notifier) -> Result<()> {
        let was_paused = self.is_paused();
        self.state.status = ReconcilerStatus::Active;
        self.state.discrepancies.clear();
        self.state.last_passed = Some(true);
        self.state.last_reconciled_at = Some(report.captured_at);
        self.state.paused_at = None;
        if was_paused {
            self.state.last_resume_reason = Some("clean reconciliation".to_string());
        }
        self.persist()?;

        sink.emit(
            NewEvent::new(
                EventType::ReconciliationPassed,
                json!({ "kind": report.kind, "captured_at": report.captured_at }),
            )
            .stage("reconcile"),
        )?;
        tracing::info!(kind = report.kind.as_str(), "reconciliation passed");

        if was_paused {
            sink.emit(
                NewEvent::new(
                    EventType::ReconcilerResumed,
                    json!({ "from": "PAUSED", "manual": false, "reason": "clean reconciliation" }),
                )
                .stage("reconcile"),
            )?;
            notify_best_effort(
                notifier,
                Notification::new(Severity::Info, "reconciler resumed", "clean reconciliation"),
            );
        }
        Ok(())
    }

    fn fail(&mut self, report: ReconcileReport, sink: &mut dyn EventSink, notifier: &dyn Notifier) -> Result<()> {
        let detail = report.describe();
        if !self.is_paused() {
            self.state.paused_at = Some(report.captured_at);
        }
        self.state.status = ReconcilerStatus::Paused;
        self.state.last_passed = Some(false);
        self.state.last_reconciled_at = Some(report.captured_at);
        self.state.discrepancies = report.discrepancies.clone();
        self.persist()?;

        sink.emit(
            NewEvent::new(
                EventType::ReconciliationFailed,
                json!({
                    "kind": report.kind,
                    "captured_at": report.captured_at,
                    "count": report.discrepancies.len(),
                    "discrepancies": report.discrepancies,
                    "detail": detail,
                }),
            )
            .stage("reconcile"),
        )?;
        tracing::error!(
            kind = report.kind.as_str(),
            count = report.discrepancies.len(),
            detail = %detail,
            "reconciliation failed; reconciler PAUSED"
        );
        notify_best_effort(
            notifier,
            Notification::new(Severity::Critical, "reconciliation failed", detail),
        );
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.state)
    }
}
