//! Per-session inputs and the file-fed signal source.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use eqr_schemas::{to_micros, MarketView, RawSignal, Regime, SignalSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything one session needs besides config, state and the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionInputs {
    pub session_index: u64,
    pub as_of: NaiveDate,
    pub regime: Regime,
    /// Newest market data timestamp. Absent means no data: the kill switch
    /// denies admission and the drawdown health check fails.
    pub data_as_of: Option<DateTime<Utc>>,
    /// Wall clock for the session. Defaults to the system clock.
    pub now: Option<DateTime<Utc>>,
    /// Session closes, micros.
    pub closes: BTreeMap<String, i64>,
    /// Prior closes per symbol, oldest first, excluding this session.
    pub history: BTreeMap<String, Vec<i64>>,
    /// Fixed run id (replays). A fresh v4 id otherwise.
    pub run_id: Option<Uuid>,
}

impl SessionInputs {
    pub fn new(session_index: u64, as_of: NaiveDate) -> Self {
        Self {
            session_index,
            as_of,
            regime: Regime::Normal,
            data_as_of: None,
            now: None,
            closes: BTreeMap::new(),
            history: BTreeMap::new(),
            run_id: None,
        }
    }

    pub fn market_view(&self) -> MarketView {
        MarketView {
            as_of: self.as_of,
            session_index: self.session_index,
            closes: self.closes.clone(),
        }
    }

    pub fn now_or_system(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }
}

/// Midnight UTC of `date`.
pub fn date_start_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// Session header as written by hand: prices in dollars.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub session_index: u64,
    pub as_of: NaiveDate,
    #[serde(default)]
    pub regime: Regime,
    #[serde(default)]
    pub data_as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closes: BTreeMap<String, f64>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub run_id: Option<Uuid>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategySignals {
    pub strategy_id: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub signals: Vec<RawSignal>,
}

fn enabled_default() -> bool {
    true
}

/// A session JSON document: market header plus each strategy's raw output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub session: SessionHeader,
    #[serde(default)]
    pub strategies: Vec<StrategySignals>,
}

impl SessionFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read session file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse session file {}", path.display()))
    }

    pub fn inputs(&self) -> SessionInputs {
        let h = &self.session;
        SessionInputs {
            session_index: h.session_index,
            as_of: h.as_of,
            regime: h.regime,
            data_as_of: h.data_as_of,
            now: h.now,
            closes: h.closes.iter().map(|(s, p)| (s.to_ascii_uppercase(), to_micros(*p))).collect(),
            history: h
                .history
                .iter()
                .map(|(s, v)| (s.to_ascii_uppercase(), v.iter().map(|p| to_micros(*p)).collect()))
                .collect(),
            run_id: h.run_id,
        }
    }

    pub fn sources(&self) -> Vec<Box<dyn SignalSource>> {
        self.strategies
            .iter()
            .map(|s| {
                Box::new(StaticSignalSource::new(&s.strategy_id, s.enabled, s.signals.clone()))
                    as Box<dyn SignalSource>
            })
            .collect()
    }
}

/// Hands out a fixed batch of raw records once.
#[derive(Clone, Debug)]
pub struct StaticSignalSource {
    strategy_id: String,
    enabled: bool,
    pending: Vec<RawSignal>,
}

impl StaticSignalSource {
    pub fn new(strategy_id: impl Into<String>, enabled: bool, signals: Vec<RawSignal>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            enabled,
            pending: signals,
        }
    }
}

impl SignalSource for StaticSignalSource {
    fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn generate_signals(&mut self, _view: &MarketView) -> Vec<RawSignal> {
        std::mem::take(&mut self.pending)
    }
}
