//! FIFO P&L ledger.
//!
//! Positions are keyed by (strategy, symbol) so realized P&L is attributed to
//! the strategy that opened the lots. The book is long-only: a SELL larger
//! than the held quantity is refused with [`LedgerError::ShortNotSupported`]
//! and leaves the ledger untouched.
//!
//! Realized P&L on a SELL, per lot consumed oldest-first:
//!
//! ```text
//! realized += take * (sell_exec - lot_exec)
//!           - sell_commission * take / total_sold
//! ```
//!
//! Only the SELL's own costs are prorated into realized P&L. A BUY
//! commission leaves cash when the lot is opened and stays out of realized
//! figures. Slippage is already inside the execution prices and is not
//! deducted again. Integer allocation hands any remainder to the last lot
//! consumed so the sum of allocations equals the commission exactly.

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{i128_to_i64_clamp, mul_shares_price, MarkMap};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    NonPositiveShares { shares: i64 },
    NonPositivePrice { price_micros: i64 },
    NegativeCommission { commission_micros: i64 },
    EmptyKey,
    /// SELL larger than the held quantity. Never silently truncated.
    ShortNotSupported {
        strategy_id: String,
        symbol: String,
        requested: i64,
        held: i64,
    },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveShares { shares } => {
                write!(f, "ledger invariant: shares must be > 0, got {shares}")
            }
            Self::NonPositivePrice { price_micros } => {
                write!(f, "ledger invariant: price_micros must be > 0, got {price_micros}")
            }
            Self::NegativeCommission { commission_micros } => write!(
                f,
                "ledger invariant: commission_micros must be >= 0, got {commission_micros}"
            ),
            Self::EmptyKey => write!(f, "ledger invariant: strategy and symbol must not be empty"),
            Self::ShortNotSupported {
                strategy_id,
                symbol,
                requested,
                held,
            } => write!(
                f,
                "short selling not supported: {strategy_id}/{symbol} sell {requested} > held {held}"
            ),
        }
    }
}

impl std::error::Error for LedgerError {}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub strategy_id: String,
    pub symbol: String,
}

impl PositionKey {
    pub fn new(strategy_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub shares: i64,
    pub price_micros: i64,
    pub date: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub strategy_id: String,
    pub symbol: String,
    /// Oldest first.
    pub lots: VecDeque<Lot>,
}

impl Position {
    fn new(key: &PositionKey) -> Self {
        Self {
            strategy_id: key.strategy_id.clone(),
            symbol: key.symbol.clone(),
            lots: VecDeque::new(),
        }
    }

    pub fn shares(&self) -> i64 {
        self.lots.iter().map(|l| l.shares).sum()
    }

    pub fn is_flat(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn cost_basis_micros(&self) -> i64 {
        let total: i128 = self
            .lots
            .iter()
            .map(|l| mul_shares_price(l.shares, l.price_micros))
            .sum();
        i128_to_i64_clamp(total)
    }
}

/// Portion of one lot consumed by a SELL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotFill {
    pub shares: i64,
    pub lot_price_micros: i64,
    pub lot_date: NaiveDate,
    pub realized_pnl_micros: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellOutcome {
    pub realized_pnl_micros: i64,
    pub lots: Vec<LotFill>,
}

/// Persisted form of a [`PnlLedger`]. JSON object keys must be strings, so
/// the (strategy, symbol) maps are flattened into lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub cash_micros: i64,
    pub positions: Vec<Position>,
    pub realized: Vec<RealizedEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizedEntry {
    pub strategy_id: String,
    pub symbol: String,
    pub realized_pnl_micros: i64,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PnlLedger {
    cash_micros: i64,
    positions: BTreeMap<PositionKey, Position>,
    realized: BTreeMap<PositionKey, i64>,
}

impl PnlLedger {
    pub fn new(cash_micros: i64) -> Self {
        Self {
            cash_micros,
            ..Self::default()
        }
    }

    pub fn cash_micros(&self) -> i64 {
        self.cash_micros
    }

    /// Re-seed believed cash, e.g. from the START snapshot of a fresh session.
    pub fn set_cash_micros(&mut self, cash_micros: i64) {
        self.cash_micros = cash_micros;
    }

    /// Append a lot. Cash decreases by notional plus commission.
    pub fn buy(
        &mut self,
        strategy_id: &str,
        symbol: &str,
        shares: i64,
        exec_price_micros: i64,
        commission_micros: i64,
        date: NaiveDate,
    ) -> Result<(), LedgerError> {
        validate(strategy_id, symbol, shares, exec_price_micros, commission_micros)?;

        let key = PositionKey::new(strategy_id, symbol);
        self.positions
            .entry(key.clone())
            .or_insert_with(|| Position::new(&key))
            .lots
            .push_back(Lot {
                shares,
                price_micros: exec_price_micros,
                date,
            });

        let notional = i128_to_i64_clamp(mul_shares_price(shares, exec_price_micros));
        self.cash_micros = self
            .cash_micros
            .saturating_sub(notional)
            .saturating_sub(commission_micros);
        Ok(())
    }

    /// Consume lots oldest-first. Refuses (without mutating) a SELL larger
    /// than the held quantity.
    pub fn sell(
        &mut self,
        strategy_id: &str,
        symbol: &str,
        shares: i64,
        exec_price_micros: i64,
        commission_micros: i64,
    ) -> Result<SellOutcome, LedgerError> {
        validate(strategy_id, symbol, shares, exec_price_micros, commission_micros)?;

        let key = PositionKey::new(strategy_id, symbol);
        let held = self.shares(strategy_id, symbol);
        if shares > held {
            return Err(LedgerError::ShortNotSupported {
                strategy_id: strategy_id.to_string(),
                symbol: symbol.to_string(),
                requested: shares,
                held,
            });
        }

        let Some(pos) = self.positions.get_mut(&key) else {
            return Err(LedgerError::ShortNotSupported {
                strategy_id: strategy_id.to_string(),
                symbol: symbol.to_string(),
                requested: shares,
                held: 0,
            });
        };

        let mut remaining = shares;
        let mut commission_left = commission_micros;
        let mut realized_total: i64 = 0;
        let mut fills = Vec::new();

        while remaining > 0 {
            let Some(lot) = pos.lots.front_mut() else {
                break;
            };
            let take = lot.shares.min(remaining);

            let gross = i128_to_i64_clamp(mul_shares_price(
                take,
                exec_price_micros - lot.price_micros,
            ));

            let sell_share = if take == remaining {
                commission_left
            } else {
                i128_to_i64_clamp(
                    (commission_micros as i128) * (take as i128) / (shares as i128),
                )
            };
            commission_left -= sell_share;

            let realized = gross.saturating_sub(sell_share);
            realized_total = realized_total.saturating_add(realized);
            fills.push(LotFill {
                shares: take,
                lot_price_micros: lot.price_micros,
                lot_date: lot.date,
                realized_pnl_micros: realized,
            });

            lot.shares -= take;
            remaining -= take;
            if lot.shares == 0 {
                pos.lots.pop_front();
            }
        }

        if pos.is_flat() {
            self.positions.remove(&key);
        }

        let proceeds = i128_to_i64_clamp(mul_shares_price(shares, exec_price_micros));
        self.cash_micros = self
            .cash_micros
            .saturating_add(proceeds)
            .saturating_sub(commission_micros);

        let r = self.realized.entry(key).or_insert(0);
        *r = r.saturating_add(realized_total);

        Ok(SellOutcome {
            realized_pnl_micros: realized_total,
            lots: fills,
        })
    }

    pub fn shares(&self, strategy_id: &str, symbol: &str) -> i64 {
        self.positions
            .get(&PositionKey::new(strategy_id, symbol))
            .map(Position::shares)
            .unwrap_or(0)
    }

    pub fn position(&self, strategy_id: &str, symbol: &str) -> Option<&Position> {
        self.positions.get(&PositionKey::new(strategy_id, symbol))
    }

    /// Open positions in (strategy, symbol) order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn realized_pnl(&self, strategy_id: &str, symbol: &str) -> i64 {
        self.realized
            .get(&PositionKey::new(strategy_id, symbol))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_realized_pnl(&self) -> i64 {
        self.realized
            .values()
            .fold(0i64, |acc, v| acc.saturating_add(*v))
    }

    /// Realized P&L summed per strategy.
    pub fn realized_by_strategy(&self) -> BTreeMap<String, i64> {
        let mut out: BTreeMap<String, i64> = BTreeMap::new();
        for (k, v) in &self.realized {
            let e = out.entry(k.strategy_id.clone()).or_insert(0);
            *e = e.saturating_add(*v);
        }
        out
    }

    /// Value remaining lots at `mark_micros`. Read-only.
    pub fn unrealized_pnl(&self, strategy_id: &str, symbol: &str, mark_micros: i64) -> i64 {
        self.position(strategy_id, symbol)
            .map(|p| unrealized_of(p, mark_micros))
            .unwrap_or(0)
    }

    /// Unrealized P&L over all positions. Symbols with no mark are skipped.
    pub fn total_unrealized_pnl(&self, marks: &MarkMap) -> i64 {
        self.positions
            .values()
            .filter_map(|p| marks.get(&p.symbol).map(|m| unrealized_of(p, *m)))
            .fold(0i64, |acc, v| acc.saturating_add(v))
    }

    /// Serializable copy of the whole book.
    pub fn to_snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            cash_micros: self.cash_micros,
            positions: self.positions.values().cloned().collect(),
            realized: self
                .realized
                .iter()
                .map(|(k, v)| RealizedEntry {
                    strategy_id: k.strategy_id.clone(),
                    symbol: k.symbol.clone(),
                    realized_pnl_micros: *v,
                })
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let positions = snapshot
            .positions
            .into_iter()
            .filter(|p| !p.is_flat())
            .map(|p| (PositionKey::new(p.strategy_id.clone(), p.symbol.clone()), p))
            .collect();
        let realized = snapshot
            .realized
            .into_iter()
            .map(|r| (PositionKey::new(r.strategy_id, r.symbol), r.realized_pnl_micros))
            .collect();
        Self {
            cash_micros: snapshot.cash_micros,
            positions,
            realized,
        }
    }

    /// Shares per symbol across strategies (the view the broker sees).
    pub fn shares_by_symbol(&self) -> BTreeMap<String, i64> {
        let mut out: BTreeMap<String, i64> = BTreeMap::new();
        for p in self.positions.values() {
            *out.entry(p.symbol.clone()).or_insert(0) += p.shares();
        }
        out
    }

    /// Lot-weighted average entry price per symbol across strategies.
    pub fn avg_price_by_symbol(&self) -> BTreeMap<String, i64> {
        let mut acc: BTreeMap<String, (i128, i128)> = BTreeMap::new();
        for p in self.positions.values() {
            let e = acc.entry(p.symbol.clone()).or_insert((0, 0));
            for l in &p.lots {
                e.0 += mul_shares_price(l.shares, l.price_micros);
                e.1 += l.shares as i128;
            }
        }
        acc.into_iter()
            .filter(|(_, (_, q))| *q > 0)
            .map(|(s, (n, q))| (s, i128_to_i64_clamp(n / q)))
            .collect()
    }

    /// Market value of all open lots. Symbols with no mark are valued at cost.
    pub fn exposure_micros(&self, marks: &MarkMap) -> i64 {
        let total: i128 = self
            .positions
            .values()
            .map(|p| match marks.get(&p.symbol) {
                Some(m) => mul_shares_price(p.shares(), *m),
                None => p.cost_basis_micros() as i128,
            })
            .sum();
        i128_to_i64_clamp(total)
    }

    /// Cash plus market value of open lots.
    pub fn equity_micros(&self, marks: &MarkMap) -> i64 {
        self.cash_micros.saturating_add(self.exposure_micros(marks))
    }
}

fn unrealized_of(p: &Position, mark_micros: i64) -> i64 {
    let total: i128 = p
        .lots
        .iter()
        .map(|l| mul_shares_price(l.shares, mark_micros - l.price_micros))
        .sum();
    i128_to_i64_clamp(total)
}

fn validate(
    strategy_id: &str,
    symbol: &str,
    shares: i64,
    price_micros: i64,
    commission_micros: i64,
) -> Result<(), LedgerError> {
    if strategy_id.trim().is_empty() || symbol.trim().is_empty() {
        return Err(LedgerError::EmptyKey);
    }
    if shares <= 0 {
        return Err(LedgerError::NonPositiveShares { shares });
    }
    if price_micros <= 0 {
        return Err(LedgerError::NonPositivePrice { price_micros });
    }
    if commission_micros < 0 {
        return Err(LedgerError::NegativeCommission { commission_micros });
    }
    Ok(())
}
