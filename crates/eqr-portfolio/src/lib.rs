//! eqr-portfolio
//!
//! - Execution cost model (adverse slippage in bps + per-share commission)
//! - FIFO lot ledger keyed by (strategy, symbol), long-only
//! - Realized vs unrealized P&L attribution
//! - Performance metrics shared by live reporting and the backtest harness
//!
//! Pure deterministic logic: no IO, no clock, no broker wiring.

mod cost;
mod ledger;
mod performance;

pub use cost::{CostModel, CostModelConfig, ExecutionCost};
pub use ledger::{
    LedgerError, LedgerSnapshot, Lot, LotFill, PnlLedger, Position, PositionKey, RealizedEntry,
    SellOutcome,
};
pub use performance::{
    compute_performance, max_drawdown, returns_from_equity, PerformanceMetrics,
    TRADING_DAYS_PER_YEAR,
};

use std::collections::BTreeMap;

/// Canonical mark map type (symbol -> price_micros).
pub type MarkMap = BTreeMap<String, i64>;

/// Helper to build a MarkMap with minimal boilerplate.
pub fn marks<I, S>(items: I) -> MarkMap
where
    I: IntoIterator<Item = (S, i64)>,
    S: Into<String>,
{
    items.into_iter().map(|(s, px)| (s.into(), px)).collect()
}

pub(crate) fn mul_shares_price(shares: i64, price_micros: i64) -> i128 {
    (shares as i128) * (price_micros as i128)
}

pub(crate) fn i128_to_i64_clamp(x: i128) -> i64 {
    if x > i64::MAX as i128 {
        i64::MAX
    } else if x < i64::MIN as i128 {
        i64::MIN
    } else {
        x as i64
    }
}
