use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use eqr_schemas::SnapshotKind;
use serde::{Deserialize, Serialize};

/// Relative tolerances, in bps of the broker value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub price_tolerance_bps: i64,
    pub cash_tolerance_bps: i64,
    /// Diff open order ids when the caller supplies its local set.
    pub check_open_orders: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            price_tolerance_bps: 100,
            cash_tolerance_bps: 100,
            check_open_orders: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPosition {
    pub shares: i64,
    pub avg_price_micros: i64,
}

/// What the engine believes it holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBook {
    pub positions: BTreeMap<String, LocalPosition>,
    pub cash_micros: i64,
    /// `None` skips the open-order diff.
    pub open_order_ids: Option<BTreeSet<String>>,
}

impl LocalBook {
    pub fn new(cash_micros: i64) -> Self {
        Self {
            cash_micros,
            ..Self::default()
        }
    }

    pub fn with_position(mut self, symbol: impl Into<String>, shares: i64, avg_price_micros: i64) -> Self {
        self.positions.insert(
            symbol.into(),
            LocalPosition {
                shares,
                avg_price_micros,
            },
        );
        self
    }

    pub fn with_open_orders<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.open_order_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }
}

/// One breach between the local book and the broker. Ordering is stable so
/// reports are deterministic.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Discrepancy {
    MissingAtBroker {
        symbol: String,
        local_shares: i64,
    },
    /// Broker holds a symbol the engine does not know. Never adopted.
    UnexpectedBrokerPosition {
        symbol: String,
        broker_shares: i64,
    },
    ShareMismatch {
        symbol: String,
        local_shares: i64,
        broker_shares: i64,
    },
    AvgPriceDrift {
        symbol: String,
        local_micros: i64,
        broker_micros: i64,
    },
    CashDrift {
        local_micros: i64,
        broker_micros: i64,
    },
    /// Open at the broker, unknown locally.
    PhantomOrder {
        order_id: String,
    },
    /// Open locally, absent at the broker.
    StuckOrder {
        order_id: String,
    },
    StaleSnapshot {
        watermark: DateTime<Utc>,
        got: DateTime<Utc>,
    },
    SnapshotUnavailable {
        reason: String,
    },
}

impl Discrepancy {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::MissingAtBroker { symbol, .. }
            | Self::UnexpectedBrokerPosition { symbol, .. }
            | Self::ShareMismatch { symbol, .. }
            | Self::AvgPriceDrift { symbol, .. } => Some(symbol),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::MissingAtBroker {
                symbol,
                local_shares,
            } => format!("{symbol}: local holds {local_shares} shares, broker holds none"),
            Self::UnexpectedBrokerPosition {
                symbol,
                broker_shares,
            } => format!("{symbol}: broker holds {broker_shares} shares unknown locally"),
            Self::ShareMismatch {
                symbol,
                local_shares,
                broker_shares,
            } => format!("{symbol}: share mismatch local={local_shares} broker={broker_shares}"),
            Self::AvgPriceDrift {
                symbol,
                local_micros,
                broker_micros,
            } => format!(
                "{symbol}: avg price drift local={:.4} broker={:.4}",
                eqr_schemas::from_micros(*local_micros),
                eqr_schemas::from_micros(*broker_micros)
            ),
            Self::CashDrift {
                local_micros,
                broker_micros,
            } => format!(
                "cash drift local={:.2} broker={:.2}",
                eqr_schemas::from_micros(*local_micros),
                eqr_schemas::from_micros(*broker_micros)
            ),
            Self::PhantomOrder { order_id } => format!("phantom broker order {order_id}"),
            Self::StuckOrder { order_id } => format!("local order {order_id} not open at broker"),
            Self::StaleSnapshot { watermark, got } => {
                format!("stale snapshot captured_at={got} older than watermark {watermark}")
            }
            Self::SnapshotUnavailable { reason } => format!("snapshot unavailable: {reason}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub kind: SnapshotKind,
    pub captured_at: DateTime<Utc>,
    pub passed: bool,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconcileReport {
    pub fn describe(&self) -> String {
        if self.passed {
            return "clean".to_string();
        }
        self.discrepancies
            .iter()
            .map(Discrepancy::describe)
            .collect::<Vec<_>>()
            .join("; ")
    }
}
