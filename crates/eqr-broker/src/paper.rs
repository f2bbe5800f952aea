//! Deterministic in-memory "paper" broker.
//!
//! - `broker_order_id` is `"paper:" + client_order_id`.
//! - Submit is idempotent on `client_order_id`: a repeat returns the original
//!   ack without touching state.
//! - Orders fill immediately at the engine's reference price through the same
//!   [`CostModel`] the engine uses, so a correct engine ledger reconciles to
//!   this broker exactly.
//! - Positions are FIFO lots, so average prices match the engine's ledger.
//! - No randomness. No clock.
//!
//! [`PaperFaults`] injects the failures the engine must survive: transient
//! read errors, rejections and ambiguous submits.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use eqr_portfolio::{CostModel, CostModelConfig};
use eqr_schemas::{BrokerAccount, BrokerPosition, Side};

use crate::types::{BrokerClient, BrokerError, OrderAck, OrderRequest, OrderStatus};

#[derive(Clone, Debug, Default)]
pub struct PaperFaults {
    /// Number of upcoming reads that fail with a transient error.
    pub transient_reads: u32,
    /// Submits for these symbols are rejected.
    pub reject_symbols: BTreeSet<String>,
    /// Submits for these symbols come back ambiguous and leave an open order
    /// behind at the broker.
    pub ambiguous_symbols: BTreeSet<String>,
    /// Every submit is rejected.
    pub reject_all: bool,
}

#[derive(Clone, Debug, Default)]
pub struct PaperBroker {
    cash_micros: i64,
    lots: BTreeMap<String, VecDeque<(i64, i64)>>, // symbol -> [(shares, price)]
    marks: BTreeMap<String, i64>,
    cost: CostModel,
    acks: BTreeMap<String, OrderAck>, // keyed by client_order_id
    open_orders: BTreeSet<String>,
    submits: u64,
    pub faults: PaperFaults,
}

impl PaperBroker {
    pub fn new(cash_micros: i64, cost: CostModelConfig) -> Self {
        Self {
            cash_micros,
            cost: CostModel::new(cost),
            ..Self::default()
        }
    }

    pub fn cash_micros(&self) -> i64 {
        self.cash_micros
    }

    pub fn set_cash(&mut self, cash_micros: i64) {
        self.cash_micros = cash_micros;
    }

    /// Set a position deterministically (scenario wiring). Replaces any lots.
    pub fn set_position(&mut self, symbol: impl Into<String>, shares: i64, avg_price_micros: i64) {
        let symbol = symbol.into();
        if shares <= 0 {
            self.lots.remove(&symbol);
            return;
        }
        self.lots
            .insert(symbol.clone(), VecDeque::from([(shares, avg_price_micros)]));
        self.marks.entry(symbol).or_insert(avg_price_micros);
    }

    pub fn set_mark(&mut self, symbol: impl Into<String>, price_micros: i64) {
        self.marks.insert(symbol.into(), price_micros);
    }

    pub fn set_marks(&mut self, marks: &BTreeMap<String, i64>) {
        for (s, px) in marks {
            self.marks.insert(s.clone(), *px);
        }
    }

    /// Leave an order open at the broker (phantom from the engine's view).
    pub fn add_open_order(&mut self, order_id: impl Into<String>) {
        self.open_orders.insert(order_id.into());
    }

    /// Number of submit calls received, repeats included.
    pub fn submit_calls(&self) -> u64 {
        self.submits
    }

    pub fn shares(&self, symbol: &str) -> i64 {
        self.lots
            .get(symbol)
            .map(|l| l.iter().map(|(q, _)| q).sum())
            .unwrap_or(0)
    }

    fn avg_price(lots: &VecDeque<(i64, i64)>) -> i64 {
        let (notional, shares) = lots.iter().fold((0i128, 0i128), |(n, s), (q, p)| {
            (n + (*q as i128) * (*p as i128), s + *q as i128)
        });
        if shares == 0 {
            0
        } else {
            (notional / shares) as i64
        }
    }

    fn market_value(&self) -> i64 {
        let total: i128 = self
            .lots
            .iter()
            .map(|(sym, lots)| {
                let shares: i64 = lots.iter().map(|(q, _)| q).sum();
                let mark = self
                    .marks
                    .get(sym)
                    .copied()
                    .unwrap_or_else(|| Self::avg_price(lots));
                (shares as i128) * (mark as i128)
            })
            .sum();
        total.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    fn take_read_fault(&mut self, op: &'static str) -> Result<(), BrokerError> {
        if self.faults.transient_reads > 0 {
            self.faults.transient_reads -= 1;
            return Err(BrokerError::Transient {
                op,
                reason: "paper: injected timeout".to_string(),
            });
        }
        Ok(())
    }

    fn fill(
        &mut self,
        client_order_id: &str,
        symbol: &str,
        side: Side,
        shares: i64,
        price_micros: i64,
    ) -> Result<OrderAck, BrokerError> {
        if shares <= 0 || price_micros <= 0 {
            return Err(BrokerError::Rejected {
                reason: format!("invalid order: shares={shares} price={price_micros}"),
            });
        }
        let cost = self.cost.price(price_micros, side, shares);
        let notional = (shares as i128) * (cost.exec_price_micros as i128);

        match side {
            Side::Buy => {
                let needed = notional + cost.commission_micros as i128;
                if needed > self.cash_micros as i128 {
                    return Err(BrokerError::Rejected {
                        reason: format!("insufficient buying power for {shares} {symbol}"),
                    });
                }
                self.cash_micros -= needed as i64;
                self.lots
                    .entry(symbol.to_string())
                    .or_default()
                    .push_back((shares, cost.exec_price_micros));
            }
            Side::Sell => {
                let held = self.shares(symbol);
                if shares > held {
                    return Err(BrokerError::Rejected {
                        reason: format!("insufficient position: sell {shares} {symbol}, held {held}"),
                    });
                }
                let mut remaining = shares;
                let mut emptied = false;
                if let Some(lots) = self.lots.get_mut(symbol) {
                    while remaining > 0 {
                        let Some(front) = lots.front_mut() else {
                            break;
                        };
                        let take = front.0.min(remaining);
                        front.0 -= take;
                        remaining -= take;
                        if front.0 == 0 {
                            lots.pop_front();
                        }
                    }
                    emptied = lots.is_empty();
                }
                if emptied {
                    self.lots.remove(symbol);
                }
                self.cash_micros += (notional - cost.commission_micros as i128) as i64;
            }
        }
        self.marks.insert(symbol.to_string(), cost.exec_price_micros);

        let ack = OrderAck {
            broker_order_id: format!("paper:{client_order_id}"),
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            status: OrderStatus::Filled,
            filled_shares: shares,
            avg_fill_price_micros: cost.exec_price_micros,
            commission_micros: cost.commission_micros,
        };
        self.acks.insert(client_order_id.to_string(), ack.clone());
        Ok(ack)
    }
}

impl BrokerClient for PaperBroker {
    fn get_positions(&mut self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.take_read_fault("get_positions")?;
        Ok(self
            .lots
            .iter()
            .map(|(sym, lots)| {
                BrokerPosition::new(
                    sym.clone(),
                    lots.iter().map(|(q, _)| q).sum(),
                    Self::avg_price(lots),
                )
            })
            .collect())
    }

    fn get_account(&mut self) -> Result<BrokerAccount, BrokerError> {
        self.take_read_fault("get_account")?;
        Ok(BrokerAccount {
            cash_micros: self.cash_micros,
            buying_power_micros: self.cash_micros.max(0),
            portfolio_value_micros: self.cash_micros.saturating_add(self.market_value()),
        })
    }

    fn get_open_orders(&mut self) -> Result<Vec<String>, BrokerError> {
        self.take_read_fault("get_open_orders")?;
        Ok(self.open_orders.iter().cloned().collect())
    }

    fn submit_order(&mut self, req: &OrderRequest) -> Result<OrderAck, BrokerError> {
        self.submits += 1;

        if let Some(existing) = self.acks.get(&req.client_order_id) {
            return Ok(existing.clone());
        }
        if self.faults.reject_all || self.faults.reject_symbols.contains(&req.symbol) {
            return Err(BrokerError::Rejected {
                reason: format!("paper: {} not tradable", req.symbol),
            });
        }
        if self.faults.ambiguous_symbols.contains(&req.symbol) {
            self.open_orders.insert(format!("paper:{}", req.client_order_id));
            return Err(BrokerError::Ambiguous {
                reason: format!("paper: no response for {}", req.client_order_id),
            });
        }

        self.fill(
            &req.client_order_id,
            &req.symbol,
            req.side,
            req.shares,
            req.reference_price_micros,
        )
    }

    fn close_position(&mut self, symbol: &str) -> Result<OrderAck, BrokerError> {
        let shares = self.shares(symbol);
        if shares == 0 {
            return Err(BrokerError::Rejected {
                reason: format!("no position in {symbol}"),
            });
        }
        let Some(mark) = self.marks.get(symbol).copied() else {
            return Err(BrokerError::Rejected {
                reason: format!("no price for {symbol}"),
            });
        };
        self.submits += 1;
        let id = format!("close:{symbol}:{}", self.submits);
        self.fill(&id, symbol, Side::Sell, shares, mark)
    }
}
