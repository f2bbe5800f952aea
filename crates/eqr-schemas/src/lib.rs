//! eqr-schemas
//!
//! Shared data model for the execution & risk engine: signals and their
//! terminal outcomes, trades, broker snapshots, market regime and the
//! strategy capability seam.
//!
//! Money and prices are fixed-point micros (1e-6 USD) everywhere; conversion
//! to `f64` only happens at statistical edges (correlation, performance).

mod broker;
mod signal;

pub use broker::{BrokerAccount, BrokerPosition, BrokerSnapshot, DuplicatePosition, SnapshotKind};
pub use signal::{RawSignal, Signal, SignalValidationError};

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Price/cash scale: micros (1e-6).
pub const MICROS_SCALE: i64 = 1_000_000;

/// Convert a decimal dollar amount to micros (round half away from zero).
pub fn to_micros(v: f64) -> i64 {
    (v * MICROS_SCALE as f64).round() as i64
}

/// Convert micros to a decimal dollar amount.
pub fn from_micros(v: i64) -> f64 {
    v as f64 / MICROS_SCALE as f64
}

/// BUY or SELL. Long-only engine: a SELL always reduces an existing position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Case-insensitive parse of "BUY"/"SELL".
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// The single final outcome recorded for a signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    Executed,
    RejectedByCorrelation,
    RejectedByHeat,
    RejectedByCircuitBreaker,
    RejectedBySizing,
    RejectedByBroker,
}

impl TerminalState {
    pub const ALL: [TerminalState; 6] = [
        TerminalState::Executed,
        TerminalState::RejectedByCorrelation,
        TerminalState::RejectedByHeat,
        TerminalState::RejectedByCircuitBreaker,
        TerminalState::RejectedBySizing,
        TerminalState::RejectedByBroker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Executed => "EXECUTED",
            TerminalState::RejectedByCorrelation => "REJECTED_BY_CORRELATION",
            TerminalState::RejectedByHeat => "REJECTED_BY_HEAT",
            TerminalState::RejectedByCircuitBreaker => "REJECTED_BY_CIRCUIT_BREAKER",
            TerminalState::RejectedBySizing => "REJECTED_BY_SIZING",
            TerminalState::RejectedByBroker => "REJECTED_BY_BROKER",
        }
    }

    pub fn is_rejection(&self) -> bool {
        !matches!(self, TerminalState::Executed)
    }

    pub fn is_broker_rejection(&self) -> bool {
        matches!(self, TerminalState::RejectedByBroker)
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market-volatility classification used to scale risk ceilings.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    #[default]
    Normal,
    HighVol,
    Crisis,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Normal => "NORMAL",
            Regime::HighVol => "HIGH_VOL",
            Regime::Crisis => "CRISIS",
        }
    }
}

/// Drawdown circuit-breaker mode. Persisted across sessions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrawdownMode {
    #[default]
    Normal,
    Halt,
    Panic,
    Rampup,
}

impl DrawdownMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrawdownMode::Normal => "NORMAL",
            DrawdownMode::Halt => "HALT",
            DrawdownMode::Panic => "PANIC",
            DrawdownMode::Rampup => "RAMPUP",
        }
    }

    /// HALT and PANIC suppress new admission.
    pub fn blocks_new_entries(&self) -> bool {
        matches!(self, DrawdownMode::Halt | DrawdownMode::Panic)
    }
}

impl std::fmt::Display for DrawdownMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker reconciler state. PAUSED blocks admission until an explicit resume
/// or a clean reconciliation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcilerStatus {
    #[default]
    Active,
    Paused,
}

impl ReconcilerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerStatus::Active => "ACTIVE",
            ReconcilerStatus::Paused => "PAUSED",
        }
    }
}

/// One executed fill as recorded by the engine.
///
/// `realized_pnl_micros` is set only on SELLs that close lots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub signal_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    pub shares: i64,
    pub quoted_price_micros: i64,
    pub exec_price_micros: i64,
    pub slippage_cost_micros: i64,
    pub commission_cost_micros: i64,
    pub realized_pnl_micros: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub order_id: String,
}

/// Read-only view of one session's market state handed to strategies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketView {
    pub as_of: NaiveDate,
    /// Monotonic session counter (drives cooldowns and backtest windows).
    pub session_index: u64,
    /// Latest close per symbol, micros.
    pub closes: BTreeMap<String, i64>,
}

impl MarketView {
    pub fn close(&self, symbol: &str) -> Option<i64> {
        self.closes.get(symbol).copied()
    }
}

/// Capability interface every strategy implements.
///
/// Strategies are black boxes beyond the signal shape: they only produce raw
/// records, which the engine validates into [`Signal`]s at the boundary.
pub trait SignalSource {
    fn strategy_id(&self) -> &str;

    /// Disabled strategies are skipped and do not count towards the
    /// "at least one strategy enabled" health check.
    fn enabled(&self) -> bool {
        true
    }

    fn generate_signals(&mut self, view: &MarketView) -> Vec<RawSignal>;
}
