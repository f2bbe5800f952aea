use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use eqr_audit::MemorySink;
use eqr_correlation::{CorrelationConfig, CorrelationGate};
use eqr_portfolio::{
    compute_performance, returns_from_equity, CostModel, CostModelConfig, LedgerError, MarkMap,
    PerformanceMetrics, PnlLedger,
};
use eqr_risk::{PortfolioRiskGate, RiskConfig};
use eqr_schemas::{Regime, Side, Signal, SignalSource, TerminalState, Trade};
use eqr_terminal::{TerminalStateTracker, TerminalValidation, TrackerError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::PriceHistory;
use crate::windows::{walk_forward_windows, WalkForwardConfig, Window};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_cash_micros: i64,
    /// Backtests run a fixed regime; regime detection is the caller's.
    pub regime: Regime,
    pub walk_forward: WalkForwardConfig,
    pub cost: CostModelConfig,
    pub risk: RiskConfig,
    pub correlation: CorrelationConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_cash_micros: 100_000_000_000,
            regime: Regime::Normal,
            walk_forward: WalkForwardConfig::default(),
            cost: CostModelConfig::default(),
            risk: RiskConfig::default(),
            correlation: CorrelationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BacktestError {
    NotEnoughHistory { sessions: usize, required: usize },
    Ledger(LedgerError),
    Tracker(TrackerError),
    /// A generated signal ended the window without a terminal state.
    Unresolved { window: usize, validation: TerminalValidation },
}

impl std::fmt::Display for BacktestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotEnoughHistory { sessions, required } => write!(
                f,
                "walk-forward needs more than {required} sessions, history has {sessions}"
            ),
            Self::Ledger(e) => write!(f, "ledger: {e}"),
            Self::Tracker(e) => write!(f, "terminal tracker: {e}"),
            Self::Unresolved { window, validation } => write!(
                f,
                "window {window}: {} signal(s) without terminal state, {} with several",
                validation.missing.len(),
                validation.duplicates.len()
            ),
        }
    }
}

impl std::error::Error for BacktestError {}

impl From<LedgerError> for BacktestError {
    fn from(e: LedgerError) -> Self {
        BacktestError::Ledger(e)
    }
}

impl From<TrackerError> for BacktestError {
    fn from(e: TrackerError) -> Self {
        BacktestError::Tracker(e)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub window: Window,
    pub test_start: Option<NaiveDate>,
    pub test_end: Option<NaiveDate>,
    /// Opening cash followed by one point per test session.
    pub equity_curve: Vec<i64>,
    pub trades: Vec<Trade>,
    pub outcomes: BTreeMap<TerminalState, usize>,
    pub invalid_signals: usize,
    pub metrics: PerformanceMetrics,
}

impl WindowResult {
    pub fn closed_trade_pnls(&self) -> Vec<i64> {
        self.trades.iter().filter_map(|t| t.realized_pnl_micros).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub windows: Vec<WindowResult>,
    /// Window returns compounded back to back from the initial cash.
    pub aggregate_equity_curve: Vec<i64>,
    pub aggregate: PerformanceMetrics,
}

/// Run every walk-forward window. `make_source` builds a fresh source per
/// window so no state leaks across windows.
pub fn run_walk_forward<F>(
    config: &BacktestConfig,
    history: &PriceHistory,
    mut make_source: F,
) -> Result<BacktestReport, BacktestError>
where
    F: FnMut(&Window) -> Box<dyn SignalSource>,
{
    let windows = walk_forward_windows(history.len(), &config.walk_forward);
    if windows.is_empty() {
        return Err(BacktestError::NotEnoughHistory {
            sessions: history.len(),
            required: config.walk_forward.train_sessions + config.walk_forward.test_sessions,
        });
    }

    let mut results = Vec::with_capacity(windows.len());
    for w in &windows {
        let mut source = make_source(w);
        results.push(run_window(config, history, w, source.as_mut())?);
    }

    let mut curve = vec![config.initial_cash_micros];
    let mut pnls = Vec::new();
    for r in &results {
        for ret in returns_from_equity(&r.equity_curve) {
            let last = curve.last().copied().unwrap_or(config.initial_cash_micros);
            curve.push((last as f64 * (1.0 + ret)).round() as i64);
        }
        pnls.extend(r.closed_trade_pnls());
    }
    let aggregate = compute_performance(&curve, &pnls);

    tracing::info!(
        windows = results.len(),
        total_return = aggregate.total_return,
        sharpe = aggregate.sharpe,
        max_drawdown = aggregate.max_drawdown,
        trades = pnls.len(),
        "walk-forward complete"
    );

    Ok(BacktestReport {
        windows: results,
        aggregate_equity_curve: curve,
        aggregate,
    })
}

/// One window: the training span primes the correlation history and the
/// source; the full gate stack runs over the test span only.
pub fn run_window(
    config: &BacktestConfig,
    history: &PriceHistory,
    window: &Window,
    source: &mut dyn SignalSource,
) -> Result<WindowResult, BacktestError> {
    let mut run = WindowRun {
        risk_config: config.risk.clone(),
        regime: config.regime,
        window: window.index,
        gate: CorrelationGate::new(config.correlation.clone()),
        cost: CostModel::new(config.cost.clone()),
        ledger: PnlLedger::new(config.initial_cash_micros),
        marks: MarkMap::new(),
        trades: Vec::new(),
    };

    for i in window.train.clone() {
        if let Some(view) = history.view(i) {
            run.gate.record_closes(&view.closes);
            run.marks.extend(view.closes.iter().map(|(s, p)| (s.clone(), *p)));
            // Sources with their own lookback build it from the training
            // span; nothing is admitted from it.
            let _warmup = source.generate_signals(&view);
        }
    }

    let mut tracker = TerminalStateTracker::new();
    let mut sink = MemorySink::new(Uuid::nil());
    let mut generated: BTreeSet<String> = BTreeSet::new();
    let mut invalid = 0usize;
    let mut equity_curve = vec![config.initial_cash_micros];
    let mut prev_equity = config.initial_cash_micros;

    for i in window.test.clone() {
        let Some(view) = history.view(i) else {
            continue;
        };
        run.gate.record_closes(&view.closes);
        run.marks.extend(view.closes.iter().map(|(s, p)| (s.clone(), *p)));

        let mut risk = PortfolioRiskGate::start_session(run.risk_config.clone(), prev_equity, run.regime);
        let opening = run.ledger.equity_micros(&run.marks);
        if risk.check_daily_loss(opening).is_halt() {
            tracing::debug!(window = window.index, session = i, "daily loss halt");
        }

        let at = Utc.from_utc_datetime(&view.as_of.and_time(NaiveTime::default()));
        let raws = if source.enabled() {
            source.generate_signals(&view)
        } else {
            Vec::new()
        };
        for raw in raws {
            let signal = match Signal::try_from(raw) {
                Ok(s) => s,
                Err(e) => {
                    invalid += 1;
                    tracing::debug!(window = window.index, error = %e, "invalid signal dropped");
                    continue;
                }
            };
            if !generated.insert(signal.id.clone()) {
                invalid += 1;
                tracing::debug!(window = window.index, signal_id = %signal.id, "duplicate signal id dropped");
                continue;
            }
            let (state, reason) = run.admit(&signal, &risk, at)?;
            tracker.record(&mut sink, &signal.id, state, reason.as_deref())?;
        }

        let eq = run.ledger.equity_micros(&run.marks);
        equity_curve.push(eq);
        prev_equity = eq;
    }

    let validation = tracker.validate(generated.iter());
    if !validation.is_clean() {
        return Err(BacktestError::Unresolved {
            window: window.index,
            validation,
        });
    }

    let pnls: Vec<i64> = run.trades.iter().filter_map(|t| t.realized_pnl_micros).collect();
    let metrics = compute_performance(&equity_curve, &pnls);
    tracing::debug!(
        window = window.index,
        trades = run.trades.len(),
        total_return = metrics.total_return,
        "window complete"
    );

    Ok(WindowResult {
        window: window.clone(),
        test_start: history.dates().get(window.test.start).copied(),
        test_end: window
            .test
            .end
            .checked_sub(1)
            .and_then(|i| history.dates().get(i).copied()),
        equity_curve,
        trades: run.trades,
        outcomes: tracker.counts(),
        invalid_signals: invalid,
        metrics,
    })
}

struct WindowRun {
    risk_config: RiskConfig,
    regime: Regime,
    window: usize,
    gate: CorrelationGate,
    cost: CostModel,
    ledger: PnlLedger,
    marks: MarkMap,
    trades: Vec<Trade>,
}

impl WindowRun {
    fn admit(
        &mut self,
        signal: &Signal,
        risk: &PortfolioRiskGate,
        at: DateTime<Utc>,
    ) -> Result<(TerminalState, Option<String>), BacktestError> {
        if risk.is_halted() {
            let reason = risk
                .state()
                .halt_reason
                .clone()
                .unwrap_or_else(|| "trading halted for session".to_string());
            return Ok((TerminalState::RejectedByCircuitBreaker, Some(reason)));
        }
        let Some(quoted) = self.marks.get(&signal.symbol).copied() else {
            return Ok((
                TerminalState::RejectedBySizing,
                Some(format!("no price for {}", signal.symbol)),
            ));
        };

        match signal.side {
            Side::Sell => {
                let held = self.ledger.shares(&signal.strategy_id, &signal.symbol);
                if held <= 0 {
                    return Ok((
                        TerminalState::RejectedBySizing,
                        Some(format!("no {} position to sell", signal.symbol)),
                    ));
                }
                let c = self.cost.price(quoted, Side::Sell, held);
                let out = self.ledger.sell(
                    &signal.strategy_id,
                    &signal.symbol,
                    held,
                    c.exec_price_micros,
                    c.commission_micros,
                )?;
                self.push_trade(signal, held, quoted, &c, Some(out.realized_pnl_micros), at);
            }
            Side::Buy => {
                let held: Vec<String> = self
                    .ledger
                    .shares_by_symbol()
                    .into_iter()
                    .filter(|(_, q)| *q > 0)
                    .map(|(s, _)| s)
                    .collect();
                let d = self.gate.check(Side::Buy, &signal.symbol, &held);
                if !d.accepted {
                    return Ok((TerminalState::RejectedByCorrelation, d.reason(&signal.symbol)));
                }

                let equity = self.ledger.equity_micros(&self.marks);
                let target = risk.target_position_value(equity, 1.0);
                let shares = if quoted > 0 { target / quoted } else { 0 };
                if shares <= 0 {
                    return Ok((
                        TerminalState::RejectedBySizing,
                        Some(format!("target {target} micros buys no {}", signal.symbol)),
                    ));
                }
                let c = self.cost.price(quoted, Side::Buy, shares);
                let needed = (shares as i128) * (c.exec_price_micros as i128) + c.commission_micros as i128;
                if needed > self.ledger.cash_micros() as i128 {
                    return Ok((
                        TerminalState::RejectedBySizing,
                        Some(format!("insufficient cash for {shares} {}", signal.symbol)),
                    ));
                }
                let heat = risk.heat_check(
                    shares.saturating_mul(quoted),
                    self.ledger.exposure_micros(&self.marks),
                    equity,
                );
                if !heat.allowed {
                    return Ok((TerminalState::RejectedByHeat, Some(heat.reason())));
                }
                self.ledger.buy(
                    &signal.strategy_id,
                    &signal.symbol,
                    shares,
                    c.exec_price_micros,
                    c.commission_micros,
                    signal.as_of,
                )?;
                self.push_trade(signal, shares, quoted, &c, None, at);
            }
        }
        Ok((TerminalState::Executed, None))
    }

    fn push_trade(
        &mut self,
        signal: &Signal,
        shares: i64,
        quoted: i64,
        c: &eqr_portfolio::ExecutionCost,
        realized: Option<i64>,
        at: DateTime<Utc>,
    ) {
        self.trades.push(Trade {
            signal_id: signal.id.clone(),
            strategy_id: signal.strategy_id.clone(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            shares,
            quoted_price_micros: quoted,
            exec_price_micros: c.exec_price_micros,
            slippage_cost_micros: c.slippage_micros,
            commission_cost_micros: c.commission_micros,
            realized_pnl_micros: realized,
            timestamp: at,
            order_id: format!("bt-w{}-{}", self.window, signal.id),
        });
    }
}
