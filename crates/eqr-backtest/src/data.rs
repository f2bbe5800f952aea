//! Daily close history.
//!
//! CSV format (header required, any row order):
//!
//! ```text
//! date,symbol,close
//! 2024-01-02,AAPL,185.64
//! ```
//!
//! Sessions are the sorted distinct dates. A symbol without a row on a date
//! is simply absent from that session's view.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use eqr_schemas::{to_micros, MarketView};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CloseRow {
    date: NaiveDate,
    symbol: String,
    close: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PriceHistory {
    dates: Vec<NaiveDate>,
    closes: BTreeMap<NaiveDate, BTreeMap<String, i64>>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate, symbol: impl Into<String>, close_micros: i64) {
        self.closes.entry(date).or_default().insert(symbol.into(), close_micros);
        self.dates = self.closes.keys().copied().collect();
    }

    /// Build from per-symbol series aligned to `dates`.
    pub fn from_series(dates: &[NaiveDate], series: &BTreeMap<String, Vec<i64>>) -> Self {
        let mut closes: BTreeMap<NaiveDate, BTreeMap<String, i64>> = BTreeMap::new();
        for (sym, values) in series {
            for (d, v) in dates.iter().zip(values) {
                closes.entry(*d).or_default().insert(sym.clone(), *v);
            }
        }
        Self {
            dates: closes.keys().copied().collect(),
            closes,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.closes.values().flat_map(|m| m.keys().cloned()).collect()
    }

    pub fn view(&self, session_index: usize) -> Option<MarketView> {
        let date = *self.dates.get(session_index)?;
        Some(MarketView {
            as_of: date,
            session_index: session_index as u64,
            closes: self.closes.get(&date).cloned().unwrap_or_default(),
        })
    }
}

pub fn parse_closes_csv(raw: &str) -> Result<PriceHistory> {
    let mut rdr = csv::Reader::from_reader(raw.as_bytes());
    let mut history = PriceHistory::new();
    let mut seen: BTreeSet<(NaiveDate, String)> = BTreeSet::new();

    for (i, rec) in rdr.deserialize::<CloseRow>().enumerate() {
        let line = i + 2;
        let row = rec.with_context(|| format!("closes csv line {line}"))?;
        let symbol = row.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            bail!("closes csv line {line}: empty symbol");
        }
        if !row.close.is_finite() || row.close <= 0.0 {
            bail!("closes csv line {line}: close must be positive, got {}", row.close);
        }
        if !seen.insert((row.date, symbol.clone())) {
            bail!("closes csv line {line}: duplicate {symbol} on {}", row.date);
        }
        history
            .closes
            .entry(row.date)
            .or_default()
            .insert(symbol, to_micros(row.close));
    }
    history.dates = history.closes.keys().copied().collect();
    if history.is_empty() {
        bail!("closes csv has no rows");
    }
    Ok(history)
}

pub fn load_closes_csv(path: &Path) -> Result<PriceHistory> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read closes csv {:?}", path))?;
    parse_closes_csv(&raw)
}
