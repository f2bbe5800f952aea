use std::collections::{BTreeMap, VecDeque};

use chrono::{NaiveTime, TimeZone, Utc};
use eqr_schemas::{MarketView, RawSignal, Side, SignalSource};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub lookback: usize,
    /// Absolute lookback return needed to emit a signal.
    pub entry_threshold: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            entry_threshold: 0.05,
        }
    }
}

/// Demo source: BUY when the lookback return exceeds the threshold, SELL
/// when it falls below its negative. Exists to drive the harness and the
/// CLI; it makes no claim to be a strategy.
#[derive(Clone, Debug)]
pub struct MomentumSource {
    strategy_id: String,
    config: MomentumConfig,
    history: BTreeMap<String, VecDeque<i64>>,
}

impl MomentumSource {
    pub fn new(strategy_id: impl Into<String>, config: MomentumConfig) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            config,
            history: BTreeMap::new(),
        }
    }

    fn lookback_return(&self, symbol: &str) -> Option<f64> {
        let h = self.history.get(symbol)?;
        if h.len() < self.config.lookback + 1 {
            return None;
        }
        let first = *h.front()?;
        let last = *h.back()?;
        if first <= 0 {
            return None;
        }
        Some((last - first) as f64 / first as f64)
    }
}

impl SignalSource for MomentumSource {
    fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    fn enabled(&self) -> bool {
        self.config.lookback > 0
    }

    fn generate_signals(&mut self, view: &MarketView) -> Vec<RawSignal> {
        let cap = self.config.lookback + 1;
        for (sym, px) in &view.closes {
            let h = self.history.entry(sym.clone()).or_default();
            h.push_back(*px);
            while h.len() > cap {
                h.pop_front();
            }
        }

        let generated_at = Utc.from_utc_datetime(&view.as_of.and_time(NaiveTime::default()));
        let mut out = Vec::new();
        for sym in view.closes.keys() {
            let Some(ret) = self.lookback_return(sym) else {
                continue;
            };
            let side = if ret >= self.config.entry_threshold {
                Side::Buy
            } else if ret <= -self.config.entry_threshold {
                Side::Sell
            } else {
                continue;
            };
            let scale = (self.config.entry_threshold * 4.0).max(f64::EPSILON);
            out.push(RawSignal {
                id: Some(format!("{}-{}-{}", self.strategy_id, view.as_of, sym)),
                strategy_id: Some(self.strategy_id.clone()),
                symbol: Some(sym.clone()),
                side: Some(side.as_str().to_string()),
                generated_at: Some(generated_at),
                confidence: Some((ret.abs() / scale).min(1.0)),
                as_of: Some(view.as_of),
            });
        }
        out
    }
}
