use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When in the session a snapshot was captured.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotKind {
    Start,
    Reconciliation,
    End,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Start => "START",
            SnapshotKind::Reconciliation => "RECONCILIATION",
            SnapshotKind::End => "END",
        }
    }
}

/// One position as the broker reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub shares: i64,
    pub avg_price_micros: i64,
}

impl BrokerPosition {
    pub fn new(symbol: impl Into<String>, shares: i64, avg_price_micros: i64) -> Self {
        Self {
            symbol: symbol.into(),
            shares,
            avg_price_micros,
        }
    }
}

/// Account totals as the broker reports them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub cash_micros: i64,
    pub buying_power_micros: i64,
    pub portfolio_value_micros: i64,
}

/// Point-in-time copy of the broker's authoritative state.
///
/// The engine never writes this; it is the external system of record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub kind: SnapshotKind,
    pub captured_at: DateTime<Utc>,
    /// Keyed by symbol.
    pub positions: BTreeMap<String, BrokerPosition>,
    pub cash_micros: i64,
    pub buying_power_micros: i64,
    pub portfolio_value_micros: i64,
    pub open_order_ids: BTreeSet<String>,
}

/// The broker listed one symbol more than once. Merging the rows would hide
/// a broken feed, so the snapshot is refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicatePosition {
    pub symbol: String,
}

impl std::fmt::Display for DuplicatePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "broker reported {} more than once", self.symbol)
    }
}

impl std::error::Error for DuplicatePosition {}

impl BrokerSnapshot {
    pub fn from_parts(
        kind: SnapshotKind,
        captured_at: DateTime<Utc>,
        positions: Vec<BrokerPosition>,
        account: &BrokerAccount,
        open_order_ids: Vec<String>,
    ) -> Result<Self, DuplicatePosition> {
        let mut by_symbol = BTreeMap::new();
        for p in positions {
            if by_symbol.contains_key(&p.symbol) {
                return Err(DuplicatePosition { symbol: p.symbol });
            }
            by_symbol.insert(p.symbol.clone(), p);
        }
        Ok(Self {
            kind,
            captured_at,
            positions: by_symbol,
            cash_micros: account.cash_micros,
            buying_power_micros: account.buying_power_micros,
            portfolio_value_micros: account.portfolio_value_micros,
            open_order_ids: open_order_ids.into_iter().collect(),
        })
    }

    pub fn shares(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map(|p| p.shares).unwrap_or(0)
    }
}
