//! Operator actions outside a session: inspect breaker state, resume a
//! paused reconciler.

use anyhow::Result;
use chrono::{DateTime, Utc};
use eqr_audit::AuditWriter;
use eqr_drawdown::{DrawdownState, Transition};
use eqr_reconcile::{Reconciler, ReconcilerState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::state::EngineStateStore;

/// Operator actions are logged here, hash-chained like a run log.
pub const OPERATOR_EVENTS_JSONL: &str = "operator_events.jsonl";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub drawdown: DrawdownState,
    pub transitions: Vec<Transition>,
    pub reconciler: ReconcilerState,
}

pub fn engine_status(config: &EngineConfig) -> Result<EngineStatus> {
    let store = EngineStateStore::open(&config.paths.state_dir)?;
    let dd_store = store.drawdown_store();
    let reconciler = Reconciler::open(config.reconcile.clone(), store.reconciler_path())?;
    Ok(EngineStatus {
        drawdown: dd_store.load()?.unwrap_or_default(),
        transitions: dd_store.list_transitions()?,
        reconciler: reconciler.state().clone(),
    })
}

/// Manual override of a PAUSED reconciler. The reason is mandatory and lands
/// in the operator event log.
pub fn resume_reconciler(config: &EngineConfig, reason: &str, at: DateTime<Utc>) -> Result<ReconcilerState> {
    let store = EngineStateStore::open(&config.paths.state_dir)?;
    let mut reconciler = Reconciler::open(config.reconcile.clone(), store.reconciler_path())?;
    let mut sink = AuditWriter::new(store.dir().join(OPERATOR_EVENTS_JSONL), Uuid::new_v4(), true)?;
    reconciler.force_resume(reason, at, &mut sink)?;
    Ok(reconciler.state().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eqr_schemas::{DrawdownMode, ReconcilerStatus};

    #[test]
    fn fresh_state_dir_reports_normal_and_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = EngineConfig::default();
        cfg.paths.state_dir = dir.path().join("state");

        let s = engine_status(&cfg).unwrap();
        assert_eq!(s.drawdown.mode, DrawdownMode::Normal);
        assert!(s.transitions.is_empty());
        assert_eq!(s.reconciler.status, ReconcilerStatus::Active);

        assert!(resume_reconciler(&cfg, "  ", Utc::now()).is_err());
        let r = resume_reconciler(&cfg, "checked broker statement", Utc::now()).unwrap();
        assert_eq!(r.last_resume_reason.as_deref(), Some("checked broker statement"));
    }
}
