//! eqr-backtest
//!
//! Walk-forward harness over daily closes. Each window primes on its
//! training span and runs the live admission stack (correlation gate, risk
//! gate, cost model, FIFO ledger, terminal-state tracking) over its test span
//! only. Metrics come from `eqr_portfolio::compute_performance`, the same
//! functions the daily report uses.
//!
//! Deterministic: same history + config + source => identical report.

mod data;
mod harness;
mod momentum;
mod windows;

pub use data::{load_closes_csv, parse_closes_csv, PriceHistory};
pub use harness::{
    run_walk_forward, run_window, BacktestConfig, BacktestError, BacktestReport, WindowResult,
};
pub use momentum::{MomentumConfig, MomentumSource};
pub use windows::{walk_forward_windows, WalkForwardConfig, Window};
