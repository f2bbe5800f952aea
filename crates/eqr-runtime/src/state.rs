//! Cross-session engine state under `state_dir`.
//!
//! ```text
//! <state_dir>/ledger.json              PnlLedger (lots, cash, realized)
//! <state_dir>/equity_history.json      one point per session, for metrics
//! <state_dir>/order_intents.jsonl      append-only intent journal
//! <state_dir>/reconciler_state.json    owned by eqr-reconcile
//! <state_dir>/drawdown_state.json      owned by eqr-drawdown
//! <state_dir>/drawdown_transitions/    owned by eqr-drawdown
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use eqr_audit::{read_json_opt, write_json_atomic};
use eqr_broker::OrderIntentJournal;
use eqr_drawdown::DrawdownStore;
use eqr_portfolio::{LedgerSnapshot, PnlLedger};
use serde::{Deserialize, Serialize};

pub const LEDGER_JSON: &str = "ledger.json";
pub const EQUITY_HISTORY_JSON: &str = "equity_history.json";
pub const ORDER_INTENTS_JSONL: &str = "order_intents.jsonl";
pub const RECONCILER_STATE_JSON: &str = "reconciler_state.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub session_index: u64,
    pub as_of: NaiveDate,
    pub equity_micros: i64,
}

#[derive(Debug, Clone)]
pub struct EngineStateStore {
    dir: PathBuf,
}

impl EngineStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create state dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn reconciler_path(&self) -> PathBuf {
        self.dir.join(RECONCILER_STATE_JSON)
    }

    pub fn drawdown_store(&self) -> DrawdownStore {
        DrawdownStore::new(&self.dir)
    }

    pub fn intent_journal(&self) -> Result<OrderIntentJournal> {
        OrderIntentJournal::new(self.dir.join(ORDER_INTENTS_JSONL))
    }

    /// Persisted ledger, or a fresh one holding `initial_cash_micros`.
    pub fn load_ledger(&self, initial_cash_micros: i64) -> Result<PnlLedger> {
        let path = self.dir.join(LEDGER_JSON);
        match read_json_opt::<LedgerSnapshot>(&path)? {
            Some(s) => Ok(PnlLedger::from_snapshot(s)),
            None => {
                tracing::info!(
                    path = %path.display(),
                    initial_cash_micros,
                    "no ledger state, starting flat"
                );
                Ok(PnlLedger::new(initial_cash_micros))
            }
        }
    }

    pub fn save_ledger(&self, ledger: &PnlLedger) -> Result<()> {
        write_json_atomic(&self.dir.join(LEDGER_JSON), &ledger.to_snapshot())
    }

    pub fn load_equity_history(&self) -> Result<Vec<EquityPoint>> {
        Ok(read_json_opt(&self.dir.join(EQUITY_HISTORY_JSON))?.unwrap_or_default())
    }

    /// Closing equity of the latest session before `session_index`: the
    /// daily-loss baseline, so overnight moves count against the limit.
    pub fn prior_equity(&self, session_index: u64) -> Result<Option<EquityPoint>> {
        Ok(self
            .load_equity_history()?
            .into_iter()
            .filter(|p| p.session_index < session_index)
            .max_by_key(|p| p.session_index))
    }

    /// Record the session's closing equity. A rerun of the same session
    /// replaces its point instead of adding a second one.
    pub fn record_equity(&self, point: EquityPoint) -> Result<Vec<EquityPoint>> {
        let mut history = self.load_equity_history()?;
        history.retain(|p| p.session_index != point.session_index);
        history.push(point);
        history.sort_by_key(|p| p.session_index);
        write_json_atomic(&self.dir.join(EQUITY_HISTORY_JSON), &history)?;
        Ok(history)
    }
}
