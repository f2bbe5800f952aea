//! eqr-artifacts
//!
//! Per-run export directory `<exports>/<run_id>/`:
//!
//! - `manifest.json`: run id, engine id, mode, config hash
//! - `events.jsonl`: the event log (written by `eqr_audit::AuditWriter`)
//! - `daily_report.json`: [`DailyReport`]
//! - `trades.csv`: executed trades
//!
//! plus the post-run invariant checker that reads them back.

mod invariants;
mod manifest;
mod report;
mod trades;

pub use invariants::{check_run_dir, check_run_invariants, InvariantReport};
pub use manifest::{
    init_run_artifacts, open_run_dir, ArtifactList, InitRunArtifactsArgs, RunArtifacts,
    RunManifest, DAILY_REPORT_JSON, EVENTS_JSONL, MANIFEST_JSON, TRADES_CSV,
};
pub use report::{
    open_positions, read_daily_report, write_daily_report, DailyReport, OpenPosition,
    OrderSummary, RiskSnapshot, SignalSummary, SystemHealth,
};
pub use trades::{read_trades_csv, write_trades_csv, TradeRow};
