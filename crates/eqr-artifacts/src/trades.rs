use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use eqr_schemas::{from_micros, Trade};
use serde::{Deserialize, Serialize};

/// One `trades.csv` row. Money columns are dollars; the micros stay in the
/// event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRow {
    pub ts_utc: DateTime<Utc>,
    pub order_id: String,
    pub signal_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub side: String,
    pub shares: i64,
    pub quoted_price: f64,
    pub exec_price: f64,
    pub slippage_cost: f64,
    pub commission_cost: f64,
    pub realized_pnl: Option<f64>,
}

impl From<&Trade> for TradeRow {
    fn from(t: &Trade) -> Self {
        Self {
            ts_utc: t.timestamp,
            order_id: t.order_id.clone(),
            signal_id: t.signal_id.clone(),
            strategy_id: t.strategy_id.clone(),
            symbol: t.symbol.clone(),
            side: t.side.as_str().to_string(),
            shares: t.shares,
            quoted_price: from_micros(t.quoted_price_micros),
            exec_price: from_micros(t.exec_price_micros),
            slippage_cost: from_micros(t.slippage_cost_micros),
            commission_cost: from_micros(t.commission_cost_micros),
            realized_pnl: t.realized_pnl_micros.map(from_micros),
        }
    }
}

/// Overwrite `path` with a header plus one row per trade.
pub fn write_trades_csv(path: &Path, trades: &[Trade]) -> Result<usize> {
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("create trades csv {}", path.display()))?;
    if trades.is_empty() {
        // serde rows only emit a header alongside the first record
        w.write_record([
            "ts_utc",
            "order_id",
            "signal_id",
            "strategy_id",
            "symbol",
            "side",
            "shares",
            "quoted_price",
            "exec_price",
            "slippage_cost",
            "commission_cost",
            "realized_pnl",
        ])
        .context("write trades csv header")?;
    }
    for t in trades {
        w.serialize(TradeRow::from(t)).context("write trades csv row")?;
    }
    w.flush().context("flush trades csv")?;
    Ok(trades.len())
}

/// Rows of a trades CSV. A missing file reads as no trades.
pub fn read_trades_csv(path: &Path) -> Result<Vec<TradeRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("open trades csv {}", path.display()))?;
    let mut out = Vec::new();
    for (i, rec) in rdr.deserialize::<TradeRow>().enumerate() {
        out.push(rec.with_context(|| format!("trades csv line {}", i + 2))?);
    }
    Ok(out)
}
