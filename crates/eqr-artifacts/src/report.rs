//! Daily report artifact.
//!
//! Plain data: the session runner fills it in, this module only shapes and
//! persists it. Rendering (email, dashboards) is someone else's job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use eqr_audit::{read_json_opt, write_json_atomic};
use eqr_portfolio::{MarkMap, PerformanceMetrics, PnlLedger};
use eqr_schemas::{DrawdownMode, ReconcilerStatus, Regime, TerminalState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::manifest::DAILY_REPORT_JSON;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSummary {
    /// Raw records handed over by sources, valid or not.
    pub raw: usize,
    pub invalid: usize,
    pub executed: usize,
    pub rejected: usize,
    pub by_terminal_state: BTreeMap<TerminalState, usize>,
}

impl SignalSummary {
    pub fn from_counts(raw: usize, invalid: usize, counts: &BTreeMap<TerminalState, usize>) -> Self {
        let executed = counts.get(&TerminalState::Executed).copied().unwrap_or(0);
        let total: usize = counts.values().sum();
        Self {
            raw,
            invalid,
            executed,
            rejected: total - executed,
            by_terminal_state: counts.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub placed: usize,
    pub filled: usize,
    pub rejected: usize,
}

/// Heat, P&L, drawdown and circuit-breaker state at report time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub portfolio_value_micros: i64,
    pub daily_start_value_micros: i64,
    pub daily_pnl_micros: i64,
    pub realized_pnl_micros: i64,
    pub unrealized_pnl_micros: i64,
    pub exposure_micros: i64,
    pub heat_bps: i64,
    pub heat_ceiling_bps: i64,
    pub drawdown_mode: DrawdownMode,
    pub drawdown_bps: i64,
    pub peak_value_micros: i64,
    pub sizing_multiplier: f64,
    pub circuit_breaker_halted: bool,
    pub halt_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub strategy_id: String,
    pub symbol: String,
    pub shares: i64,
    pub cost_basis_micros: i64,
    pub mark_micros: Option<i64>,
    pub unrealized_pnl_micros: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub runtime_ms: i64,
    pub data_as_of: Option<NaiveDate>,
    pub data_age_hours: Option<i64>,
    pub errors: usize,
    pub warnings: usize,
    pub reconciler_status: ReconcilerStatus,
    pub last_reconciliation_passed: Option<bool>,
    pub snapshots_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub run_id: Uuid,
    pub session_date: NaiveDate,
    pub session_index: u64,
    pub generated_at: DateTime<Utc>,
    pub regime: Regime,
    pub signals: SignalSummary,
    pub orders: OrderSummary,
    pub risk: RiskSnapshot,
    pub open_positions: Vec<OpenPosition>,
    pub health: SystemHealth,
    /// Metrics over the equity history known to the caller, if any.
    pub performance: Option<PerformanceMetrics>,
}

/// Open (non-flat) ledger positions valued at `marks`.
pub fn open_positions(ledger: &PnlLedger, marks: &MarkMap) -> Vec<OpenPosition> {
    ledger
        .positions()
        .filter(|p| !p.is_flat())
        .map(|p| {
            let mark = marks.get(&p.symbol).copied();
            OpenPosition {
                strategy_id: p.strategy_id.clone(),
                symbol: p.symbol.clone(),
                shares: p.shares(),
                cost_basis_micros: p.cost_basis_micros(),
                mark_micros: mark,
                unrealized_pnl_micros: mark
                    .map(|m| ledger.unrealized_pnl(&p.strategy_id, &p.symbol, m)),
            }
        })
        .collect()
}

pub fn write_daily_report(run_dir: &Path, report: &DailyReport) -> Result<PathBuf> {
    let path = run_dir.join(DAILY_REPORT_JSON);
    write_json_atomic(&path, report)?;
    tracing::info!(
        run_id = %report.run_id,
        session = %report.session_date,
        executed = report.signals.executed,
        rejected = report.signals.rejected,
        path = %path.display(),
        "daily report written"
    );
    Ok(path)
}

pub fn read_daily_report(run_dir: &Path) -> Result<DailyReport> {
    let path = run_dir.join(DAILY_REPORT_JSON);
    read_json_opt(&path)?.with_context(|| format!("no daily report at {}", path.display()))
}
