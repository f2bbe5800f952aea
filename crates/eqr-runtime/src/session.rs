//! One trading session, start to finish.
//!
//! ```text
//! SESSION_STARTED
//! START snapshot + reconcile          (PAUSED on any discrepancy)
//! risk gate baseline, drawdown evaluate (+ optional PANIC flatten)
//! for each enabled source, each raw record:
//!     validate -> SIGNAL_GENERATED | SIGNAL_INVALID
//!     admit    -> kill switch, sizing, correlation, heat, broker
//!     record exactly one terminal state
//! END snapshot + reconcile
//! trades.csv, daily_report.json, equity history
//! SESSION_COMPLETED, run invariants
//! ```
//!
//! Order intents are journaled (fsynced) before `submit_order`, and the
//! ledger is saved after every fill. `submit_order` is never retried.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use eqr_artifacts::{
    check_run_dir, init_run_artifacts, open_positions, write_daily_report, write_trades_csv,
    DailyReport, InitRunArtifactsArgs, InvariantReport, OrderSummary, RiskSnapshot,
    SignalSummary, SystemHealth,
};
use eqr_audit::{
    notify_best_effort, AuditWriter, EventSink, EventType, NewEvent, Notification, Notifier,
    Severity,
};
use eqr_broker::{
    client_order_id, BrokerClient, IntentKind, OrderAck, OrderIntent, OrderIntentJournal,
    OrderRequest, OrderStatus,
};
use eqr_correlation::CorrelationGate;
use eqr_drawdown::{
    flatten_all, DrawdownStopManager, FlattenReport, HealthCheckInput, SessionEvaluation,
};
use eqr_portfolio::{compute_performance, CostModel, MarkMap, PnlLedger};
use eqr_reconcile::{LocalBook, Reconciler};
use eqr_risk::{
    evaluate_kill_conditions, DailyLossCheck, KillContext, KillDecision, PortfolioRiskGate,
    BPS_SCALE,
};
use eqr_schemas::{
    DrawdownMode, ReconcilerStatus, Side, Signal, SignalSource, SnapshotKind, TerminalState, Trade,
};
use eqr_terminal::TerminalStateTracker;
use serde_json::json;
use uuid::Uuid;

use crate::admission::Admission;
use crate::config::EngineConfig;
use crate::inputs::SessionInputs;
use crate::state::{EngineStateStore, EquityPoint};

pub const RUN_SCHEMA_VERSION: i32 = 1;

/// Everything a caller may want to inspect after a session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub run_id: Uuid,
    pub run_dir: PathBuf,
    pub report: DailyReport,
    pub trades: Vec<Trade>,
    pub terminal_counts: BTreeMap<TerminalState, usize>,
    pub drawdown: SessionEvaluation,
    pub start_reconciliation_passed: bool,
    pub end_reconciliation_passed: bool,
    /// Present when a PANIC transition forced a flatten this session.
    pub flatten: Option<FlattenReport>,
    pub invariants: InvariantReport,
}

pub struct SessionRunner {
    config: EngineConfig,
    config_hash: String,
    mode: String,
}

impl SessionRunner {
    pub fn new(config: EngineConfig, config_hash: impl Into<String>) -> Self {
        Self {
            config,
            config_hash: config_hash.into(),
            mode: "PAPER".to_string(),
        }
    }

    /// Label written to the run manifest (`PAPER`, `LIVE`, ...).
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(
        &self,
        inputs: &SessionInputs,
        sources: &mut [Box<dyn SignalSource>],
        broker: &mut dyn BrokerClient,
        notifier: &dyn Notifier,
    ) -> Result<SessionOutcome> {
        let started = Instant::now();
        let cfg = &self.config;
        let now = inputs.now_or_system();
        let run_id = inputs.run_id.unwrap_or_else(Uuid::new_v4);

        let store = EngineStateStore::open(&cfg.paths.state_dir)?;
        let run = init_run_artifacts(InitRunArtifactsArgs {
            exports_root: &cfg.paths.exports_dir,
            schema_version: RUN_SCHEMA_VERSION,
            run_id,
            engine_id: &cfg.engine.engine_id,
            mode: &self.mode,
            config_hash: &self.config_hash,
            session_date: Some(inputs.as_of),
            created_at_utc: now,
        })?;
        let mut sink = AuditWriter::new(run.events_path(), run_id, true)?;
        sink.emit(
            NewEvent::new(
                EventType::SessionStarted,
                json!({
                    "session_index": inputs.session_index,
                    "as_of": inputs.as_of,
                    "regime": inputs.regime,
                    "config_hash": self.config_hash,
                    "mode": self.mode,
                }),
            )
            .stage("session"),
        )?;
        tracing::info!(
            run_id = %run_id,
            session_index = inputs.session_index,
            as_of = %inputs.as_of,
            regime = inputs.regime.as_str(),
            "session started"
        );

        let ledger = store.load_ledger(cfg.engine.initial_cash_micros)?;
        let journal = store.intent_journal()?;
        let mut reconciler = Reconciler::open(cfg.reconcile.clone(), store.reconciler_path())?;

        let start = reconciler.capture_and_reconcile(
            broker,
            &cfg.retry,
            SnapshotKind::Start,
            now,
            &local_book(&ledger, cfg.reconcile.check_open_orders),
            &mut sink,
            notifier,
        )?;

        let marks: MarkMap = inputs.closes.clone();
        let equity_at_open = ledger.equity_micros(&marks);
        let baseline = match store.prior_equity(inputs.session_index)? {
            Some(p) => {
                tracing::info!(
                    from_session = p.session_index,
                    baseline_micros = p.equity_micros,
                    equity_micros = equity_at_open,
                    "daily loss baseline from prior close"
                );
                p.equity_micros
            }
            None => equity_at_open,
        };

        let enabled = sources.iter().filter(|s| s.enabled()).count();
        let health = HealthCheckInput {
            last_reconciliation_passed: reconciler.last_passed(),
            data_as_of: inputs.data_as_of,
            now,
            duplicate_order_intents_24h: journal.duplicates_within(now, Duration::hours(24))?,
            enabled_strategies: enabled,
        };
        let mut drawdown = DrawdownStopManager::open(cfg.drawdown.clone(), store.drawdown_store())?;
        let dd = drawdown.evaluate(inputs.session_index, equity_at_open, &health, notifier, now)?;
        if let Some(t) = &dd.transition {
            sink.emit(
                NewEvent::new(
                    EventType::DrawdownTransition,
                    serde_json::to_value(t).context("serialize drawdown transition")?,
                )
                .stage("drawdown"),
            )?;
        }

        let mut gate = CorrelationGate::new(cfg.correlation.clone());
        for (symbol, closes) in &inputs.history {
            gate.load_history(symbol, closes);
        }
        gate.record_closes(&inputs.closes);

        let mut session = Session {
            cfg,
            run_id,
            now,
            data_as_of: inputs.data_as_of,
            journal: &journal,
            store: &store,
            notifier,
            cost: CostModel::new(cfg.cost.clone()),
            gate,
            risk: PortfolioRiskGate::start_session(cfg.risk.clone(), baseline, inputs.regime),
            ledger,
            marks,
            sizing_multiplier: dd.sizing_multiplier,
            drawdown_mode: dd.mode,
            reconciler_status: reconciler.status(),
            kill_announced: false,
            orders: OrderSummary::default(),
            trades: Vec::new(),
            errors: 0,
            warnings: 0,
        };
        if !start.passed() {
            session.errors += 1;
        }
        session.check_daily_loss(&mut sink)?;

        let flatten = if dd.flatten_required {
            Some(session.flatten(broker, &mut sink)?)
        } else {
            None
        };

        // admission
        let view = inputs.market_view();
        let mut tracker = TerminalStateTracker::new();
        let mut generated: BTreeSet<String> = BTreeSet::new();
        let mut raw_count = 0usize;
        let mut invalid = 0usize;

        for source in sources.iter_mut() {
            let strategy_id = source.strategy_id().to_string();
            if !source.enabled() {
                tracing::info!(strategy_id = %strategy_id, "strategy disabled, skipped");
                continue;
            }
            for raw in source.generate_signals(&view) {
                raw_count += 1;
                let signal = match Signal::try_from(raw.clone()) {
                    Ok(s) => s,
                    Err(e) => {
                        invalid += 1;
                        tracing::warn!(strategy_id = %strategy_id, error = %e, "invalid signal dropped");
                        sink.emit(
                            NewEvent::new(
                                EventType::SignalInvalid,
                                json!({ "error": e.to_string(), "raw": raw }),
                            )
                            .strategy(strategy_id.as_str())
                            .stage("signal"),
                        )?;
                        continue;
                    }
                };
                if !generated.insert(signal.id.clone()) {
                    invalid += 1;
                    tracing::warn!(signal_id = %signal.id, "duplicate signal id dropped");
                    sink.emit(
                        NewEvent::new(
                            EventType::SignalInvalid,
                            json!({ "error": "duplicate signal id", "signal_id": signal.id }),
                        )
                        .strategy(signal.strategy_id.as_str())
                        .symbol(signal.symbol.as_str())
                        .stage("signal"),
                    )?;
                    continue;
                }

                sink.emit(
                    NewEvent::new(
                        EventType::SignalGenerated,
                        json!({
                            "signal_id": signal.id,
                            "side": signal.side,
                            "confidence": signal.confidence,
                            "as_of": signal.as_of,
                            "generated_at": signal.generated_at,
                        }),
                    )
                    .strategy(signal.strategy_id.as_str())
                    .symbol(signal.symbol.as_str())
                    .stage("signal"),
                )?;

                let admission = session.admit(&signal, broker, &mut sink)?;
                let state = admission.terminal_state();
                let reason = admission.reason();
                if let Some(r) = &reason {
                    sink.emit(
                        NewEvent::new(
                            EventType::SignalRejected,
                            json!({
                                "signal_id": signal.id,
                                "terminal_state": state,
                                "reason": r,
                            }),
                        )
                        .strategy(signal.strategy_id.as_str())
                        .symbol(signal.symbol.as_str())
                        .stage("admission"),
                    )?;
                    tracing::info!(signal_id = %signal.id, terminal_state = %state, reason = %r, "signal rejected");
                }
                if let Admission::Executed(trade) = admission {
                    session.trades.push(trade);
                }
                tracker.record(&mut sink, &signal.id, state, reason.as_deref())?;
            }
        }

        let end = reconciler.capture_and_reconcile(
            broker,
            &cfg.retry,
            SnapshotKind::End,
            now,
            &local_book(&session.ledger, cfg.reconcile.check_open_orders),
            &mut sink,
            notifier,
        )?;
        if !end.passed() {
            session.errors += 1;
        }

        let validation = tracker.validate(generated.iter());
        if !validation.is_clean() {
            tracing::error!(
                run_id = %run_id,
                missing = ?validation.missing,
                duplicates = ?validation.duplicates,
                "terminal state invariant violated"
            );
            bail!(
                "run {run_id}: {} signal(s) without terminal state, {} with several",
                validation.missing.len(),
                validation.duplicates.len()
            );
        }

        write_trades_csv(&run.trades_path(), &session.trades)?;

        let end_equity = session.ledger.equity_micros(&session.marks);
        let history = store.record_equity(EquityPoint {
            session_index: inputs.session_index,
            as_of: inputs.as_of,
            equity_micros: end_equity,
        })?;
        let performance = if history.len() >= 2 {
            let curve: Vec<i64> = history.iter().map(|p| p.equity_micros).collect();
            let pnls: Vec<i64> = session.trades.iter().filter_map(|t| t.realized_pnl_micros).collect();
            Some(compute_performance(&curve, &pnls))
        } else {
            None
        };

        let counts = tracker.counts();
        let report = DailyReport {
            run_id,
            session_date: inputs.as_of,
            session_index: inputs.session_index,
            generated_at: now,
            regime: inputs.regime,
            signals: SignalSummary::from_counts(raw_count, invalid, &counts),
            orders: session.orders.clone(),
            risk: session.risk_snapshot(baseline, end_equity, &drawdown, &dd),
            open_positions: open_positions(&session.ledger, &session.marks),
            health: SystemHealth {
                runtime_ms: started.elapsed().as_millis() as i64,
                data_as_of: inputs.data_as_of.map(|d| d.date_naive()),
                data_age_hours: inputs.data_as_of.map(|d| (now - d).num_hours()),
                errors: session.errors,
                warnings: session.warnings,
                reconciler_status: reconciler.status(),
                last_reconciliation_passed: Some(end.passed()),
                snapshots_complete: start.snapshot.is_some() && end.snapshot.is_some(),
            },
            performance,
        };
        write_daily_report(&run.run_dir, &report)?;

        sink.emit(
            NewEvent::new(
                EventType::SessionCompleted,
                json!({
                    "signals": generated.len(),
                    "invalid": invalid,
                    "trades": session.trades.len(),
                    "equity_micros": end_equity,
                    "reconciler": reconciler.status(),
                    "drawdown_mode": drawdown.mode(),
                }),
            )
            .stage("session"),
        )?;

        let invariants = check_run_dir(&run.run_dir)?;
        tracing::info!(
            run_id = %run_id,
            signals = generated.len(),
            executed = report.signals.executed,
            rejected = report.signals.rejected,
            trades = session.trades.len(),
            end_reconciliation_passed = end.passed(),
            invariants_passed = invariants.passed(),
            "session completed"
        );

        Ok(SessionOutcome {
            run_id,
            run_dir: run.run_dir.clone(),
            report,
            trades: session.trades,
            terminal_counts: counts,
            drawdown: dd,
            start_reconciliation_passed: start.passed(),
            end_reconciliation_passed: end.passed(),
            flatten,
            invariants,
        })
    }
}

/// What the engine believes the broker holds.
fn local_book(ledger: &PnlLedger, check_open_orders: bool) -> LocalBook {
    let avg = ledger.avg_price_by_symbol();
    let mut book = LocalBook::new(ledger.cash_micros());
    for (symbol, shares) in ledger.shares_by_symbol() {
        if shares != 0 {
            let px = avg.get(&symbol).copied().unwrap_or(0);
            book = book.with_position(symbol, shares, px);
        }
    }
    if check_open_orders {
        // every order the engine sends fills or is rejected within the session
        book = book.with_open_orders(Vec::<String>::new());
    }
    book
}

struct Session<'a> {
    cfg: &'a EngineConfig,
    run_id: Uuid,
    now: DateTime<Utc>,
    data_as_of: Option<DateTime<Utc>>,
    journal: &'a OrderIntentJournal,
    store: &'a EngineStateStore,
    notifier: &'a dyn Notifier,
    cost: CostModel,
    gate: CorrelationGate,
    risk: PortfolioRiskGate,
    ledger: PnlLedger,
    marks: MarkMap,
    sizing_multiplier: f64,
    drawdown_mode: DrawdownMode,
    reconciler_status: ReconcilerStatus,
    kill_announced: bool,
    orders: OrderSummary,
    trades: Vec<Trade>,
    errors: usize,
    warnings: usize,
}

impl Session<'_> {
    fn admit(
        &mut self,
        signal: &Signal,
        broker: &mut dyn BrokerClient,
        sink: &mut dyn EventSink,
    ) -> Result<Admission> {
        let kill = self.kill_check(sink)?;
        if !kill.is_allow() {
            return Ok(Admission::KillSwitch(kill));
        }
        let Some(quoted) = self.marks.get(&signal.symbol).copied().filter(|p| *p > 0) else {
            return Ok(Admission::Sizing(format!("no price for {}", signal.symbol)));
        };

        match signal.side {
            Side::Sell => {
                let held = self.ledger.shares(&signal.strategy_id, &signal.symbol);
                if held <= 0 {
                    return Ok(Admission::Sizing(format!(
                        "no {} position held by {} to sell",
                        signal.symbol, signal.strategy_id
                    )));
                }
                self.execute(signal, held, quoted, broker, sink)
            }
            Side::Buy => {
                let held: Vec<String> = self
                    .ledger
                    .shares_by_symbol()
                    .into_iter()
                    .filter(|(s, q)| *q > 0 && s != &signal.symbol)
                    .map(|(s, _)| s)
                    .collect();
                let d = self.gate.check(Side::Buy, &signal.symbol, &held);
                if !d.accepted {
                    let reason = d
                        .reason(&signal.symbol)
                        .unwrap_or_else(|| format!("{} correlated with a held symbol", signal.symbol));
                    return Ok(Admission::Correlation(reason));
                }
                if !d.unchecked.is_empty() {
                    self.warnings += 1;
                    sink.emit(
                        NewEvent::new(
                            EventType::CorrelationSkipped,
                            json!({ "signal_id": signal.id, "unchecked": d.unchecked }),
                        )
                        .strategy(signal.strategy_id.as_str())
                        .symbol(signal.symbol.as_str())
                        .stage("correlation"),
                    )?;
                }

                let equity = self.ledger.equity_micros(&self.marks);
                let target = self.risk.target_position_value(equity, self.sizing_multiplier);
                let shares = target / quoted;
                if shares <= 0 {
                    return Ok(Admission::Sizing(format!(
                        "target {target} micros (x{:.2}) buys no {}",
                        self.sizing_multiplier, signal.symbol
                    )));
                }
                let c = self.cost.price(quoted, Side::Buy, shares);
                let needed = (shares as i128) * (c.exec_price_micros as i128) + c.commission_micros as i128;
                if needed > self.ledger.cash_micros() as i128 {
                    return Ok(Admission::Sizing(format!(
                        "insufficient cash for {shares} {}",
                        signal.symbol
                    )));
                }
                let heat = self.risk.heat_check(
                    shares.saturating_mul(quoted),
                    self.ledger.exposure_micros(&self.marks),
                    equity,
                );
                if !heat.allowed {
                    return Ok(Admission::Heat(heat.reason()));
                }
                self.execute(signal, shares, quoted, broker, sink)
            }
        }
    }

    fn kill_check(&mut self, sink: &mut dyn EventSink) -> Result<KillDecision> {
        let ctx = KillContext {
            reconciler: self.reconciler_status,
            drawdown_mode: self.drawdown_mode,
            session_halted: self.risk.is_halted(),
            data_as_of: self.data_as_of,
            now: self.now,
        };
        let decision = evaluate_kill_conditions(&self.cfg.risk.kill_switch, &ctx);
        if !decision.is_allow() && !self.kill_announced {
            self.kill_announced = true;
            self.warnings += 1;
            let codes: Vec<&str> = decision.reasons().iter().map(|r| r.code()).collect();
            sink.emit(
                NewEvent::new(
                    EventType::KillSwitchTriggered,
                    json!({ "reasons": codes, "detail": decision.describe() }),
                )
                .stage("admission"),
            )?;
            tracing::warn!(reasons = %decision.describe(), "kill switch denies admission");
            notify_best_effort(
                self.notifier,
                Notification::new(Severity::Warning, "kill switch triggered", decision.describe()),
            );
        }
        Ok(decision)
    }

    /// Journal, submit once, then book the fill.
    fn execute(
        &mut self,
        signal: &Signal,
        shares: i64,
        quoted: i64,
        broker: &mut dyn BrokerClient,
        sink: &mut dyn EventSink,
    ) -> Result<Admission> {
        let coid = client_order_id(self.run_id, &signal.id);
        let intent = OrderIntent {
            client_order_id: coid.clone(),
            signal_id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            at: self.now,
            kind: IntentKind::Submit,
        };
        if self.journal.contains(&coid)? {
            self.warnings += 1;
            self.journal.record_duplicate(&intent)?;
            tracing::error!(signal_id = %signal.id, client_order_id = %coid, "order intent already journaled");
            sink.emit(
                NewEvent::new(
                    EventType::OrderDuplicate,
                    json!({ "signal_id": signal.id, "client_order_id": coid }),
                )
                .strategy(signal.strategy_id.as_str())
                .symbol(signal.symbol.as_str())
                .stage("order"),
            )?;
            return Ok(Admission::Broker(format!("duplicate order intent {coid}")));
        }
        self.journal.append(&intent)?;

        let req = OrderRequest {
            client_order_id: coid.clone(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            shares,
            reference_price_micros: quoted,
        };
        sink.emit(
            NewEvent::new(
                EventType::OrderSubmitted,
                json!({
                    "signal_id": signal.id,
                    "client_order_id": coid,
                    "side": signal.side,
                    "shares": shares,
                    "reference_price_micros": quoted,
                }),
            )
            .strategy(signal.strategy_id.as_str())
            .symbol(signal.symbol.as_str())
            .stage("order"),
        )?;
        self.orders.placed += 1;

        let ack = match broker.submit_order(&req) {
            Ok(ack) if ack.status == OrderStatus::Filled && ack.filled_shares > 0 => ack,
            Ok(ack) => {
                return self.order_rejected(
                    signal,
                    &coid,
                    format!("order {} accepted but not filled", ack.broker_order_id),
                    sink,
                );
            }
            Err(e) => return self.order_rejected(signal, &coid, e.to_string(), sink),
        };

        let booked = match signal.side {
            Side::Buy => self
                .ledger
                .buy(
                    &signal.strategy_id,
                    &signal.symbol,
                    ack.filled_shares,
                    ack.avg_fill_price_micros,
                    ack.commission_micros,
                    signal.as_of,
                )
                .map(|_| None),
            Side::Sell => self
                .ledger
                .sell(
                    &signal.strategy_id,
                    &signal.symbol,
                    ack.filled_shares,
                    ack.avg_fill_price_micros,
                    ack.commission_micros,
                )
                .map(|out| Some(out.realized_pnl_micros)),
        };
        let realized = match booked {
            Ok(r) => r,
            Err(e) => return self.fill_not_booked(signal, &ack, e.to_string(), sink),
        };
        self.store.save_ledger(&self.ledger)?;
        self.orders.filled += 1;

        let trade = Trade {
            signal_id: signal.id.clone(),
            strategy_id: signal.strategy_id.clone(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            shares: ack.filled_shares,
            quoted_price_micros: quoted,
            exec_price_micros: ack.avg_fill_price_micros,
            slippage_cost_micros: slippage_micros(quoted, ack.avg_fill_price_micros, ack.filled_shares),
            commission_cost_micros: ack.commission_micros,
            realized_pnl_micros: realized,
            timestamp: self.now,
            order_id: ack.broker_order_id.clone(),
        };
        sink.emit(
            NewEvent::new(
                EventType::OrderFilled,
                serde_json::to_value(&trade).context("serialize trade")?,
            )
            .strategy(signal.strategy_id.as_str())
            .symbol(signal.symbol.as_str())
            .stage("order"),
        )?;
        tracing::info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            side = signal.side.as_str(),
            shares = trade.shares,
            exec_price_micros = trade.exec_price_micros,
            "order filled"
        );

        self.check_daily_loss(sink)?;
        Ok(Admission::Executed(trade))
    }

    /// The broker filled but the ledger refused the fill. The book now
    /// disagrees with the broker; END reconciliation pauses the engine.
    fn fill_not_booked(
        &mut self,
        signal: &Signal,
        ack: &OrderAck,
        error: String,
        sink: &mut dyn EventSink,
    ) -> Result<Admission> {
        self.orders.filled += 1;
        self.errors += 1;
        tracing::error!(
            signal_id = %signal.id,
            broker_order_id = %ack.broker_order_id,
            filled_shares = ack.filled_shares,
            error = %error,
            "fill could not be booked"
        );
        sink.emit(
            NewEvent::new(
                EventType::FillNotBooked,
                json!({
                    "signal_id": signal.id,
                    "client_order_id": ack.client_order_id,
                    "broker_order_id": ack.broker_order_id,
                    "side": ack.side,
                    "filled_shares": ack.filled_shares,
                    "avg_fill_price_micros": ack.avg_fill_price_micros,
                    "error": error,
                }),
            )
            .strategy(signal.strategy_id.as_str())
            .symbol(signal.symbol.as_str())
            .stage("order"),
        )?;
        notify_best_effort(
            self.notifier,
            Notification::new(
                Severity::Critical,
                "fill not booked",
                format!("{} {} {}: {error}", ack.side.as_str(), ack.filled_shares, signal.symbol),
            ),
        );
        Ok(Admission::Broker(format!(
            "fill {} not booked: {error}",
            ack.broker_order_id
        )))
    }

    fn order_rejected(
        &mut self,
        signal: &Signal,
        client_order_id: &str,
        reason: String,
        sink: &mut dyn EventSink,
    ) -> Result<Admission> {
        self.orders.rejected += 1;
        self.warnings += 1;
        tracing::warn!(signal_id = %signal.id, client_order_id, reason = %reason, "order not filled");
        sink.emit(
            NewEvent::new(
                EventType::OrderRejected,
                json!({
                    "signal_id": signal.id,
                    "client_order_id": client_order_id,
                    "reason": reason,
                }),
            )
            .strategy(signal.strategy_id.as_str())
            .symbol(signal.symbol.as_str())
            .stage("order"),
        )?;
        Ok(Admission::Broker(format!("broker: {reason}")))
    }

    /// Runs at session start and after every fill. Trips at most once.
    fn check_daily_loss(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        if self.risk.is_halted() {
            return Ok(());
        }
        let equity = self.ledger.equity_micros(&self.marks);
        if let DailyLossCheck::Halt { loss_bps, reason } = self.risk.check_daily_loss(equity) {
            self.warnings += 1;
            sink.emit(
                NewEvent::new(
                    EventType::DailyLossHalt,
                    json!({ "loss_bps": loss_bps, "reason": reason, "equity_micros": equity }),
                )
                .stage("risk"),
            )?;
            notify_best_effort(
                self.notifier,
                Notification::new(Severity::Critical, "daily loss halt", reason),
            );
        }
        Ok(())
    }

    /// PANIC flatten. Skipped while the reconciler is paused: the ledger is
    /// not trusted and a paused session must not trade.
    fn flatten(&mut self, broker: &mut dyn BrokerClient, sink: &mut dyn EventSink) -> Result<FlattenReport> {
        if self.reconciler_status == ReconcilerStatus::Paused {
            self.errors += 1;
            tracing::error!("PANIC flatten skipped: reconciler paused");
            notify_best_effort(
                self.notifier,
                Notification::new(
                    Severity::Critical,
                    "panic flatten skipped",
                    "reconciler is PAUSED; close positions manually",
                ),
            );
            return Ok(FlattenReport {
                closed: Vec::new(),
                failures: vec![("*".to_string(), "reconciler paused".to_string())],
            });
        }

        let report = flatten_all(broker, &self.cfg.retry);
        self.errors += report.failures.len();
        for ack in &report.closed {
            let holders: Vec<(String, i64)> = self
                .ledger
                .positions()
                .filter(|p| p.symbol == ack.symbol && !p.is_flat())
                .map(|p| (p.strategy_id.clone(), p.shares()))
                .collect();
            let total: i64 = holders.iter().map(|(_, q)| q).sum();
            let mut commission_left = ack.commission_micros;
            let mut to_close = ack.filled_shares.min(total);

            for (i, (strategy_id, held)) in holders.iter().enumerate() {
                let shares = (*held).min(to_close);
                if shares <= 0 {
                    break;
                }
                to_close -= shares;
                let commission = if i + 1 == holders.len() || to_close == 0 {
                    commission_left
                } else {
                    let c = ((ack.commission_micros as i128) * (shares as i128) / (total as i128)) as i64;
                    commission_left -= c;
                    c
                };
                let out = self.ledger.sell(
                    strategy_id,
                    &ack.symbol,
                    shares,
                    ack.avg_fill_price_micros,
                    commission,
                )?;
                let quoted = self.marks.get(&ack.symbol).copied().unwrap_or(ack.avg_fill_price_micros);
                let trade = Trade {
                    signal_id: format!("flatten:{}", ack.symbol),
                    strategy_id: strategy_id.clone(),
                    symbol: ack.symbol.clone(),
                    side: Side::Sell,
                    shares,
                    quoted_price_micros: quoted,
                    exec_price_micros: ack.avg_fill_price_micros,
                    slippage_cost_micros: slippage_micros(quoted, ack.avg_fill_price_micros, shares),
                    commission_cost_micros: commission,
                    realized_pnl_micros: Some(out.realized_pnl_micros),
                    timestamp: self.now,
                    order_id: ack.broker_order_id.clone(),
                };
                sink.emit(
                    NewEvent::new(
                        EventType::PositionClosed,
                        serde_json::to_value(&trade).context("serialize flatten trade")?,
                    )
                    .strategy(strategy_id.as_str())
                    .symbol(ack.symbol.as_str())
                    .stage("drawdown"),
                )?;
                self.trades.push(trade);
            }
        }
        self.store.save_ledger(&self.ledger)?;
        if !report.is_complete() {
            notify_best_effort(
                self.notifier,
                Notification::new(
                    Severity::Critical,
                    "panic flatten incomplete",
                    report
                        .failures
                        .iter()
                        .map(|(s, e)| format!("{s}: {e}"))
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
            );
        }
        Ok(report)
    }

    fn risk_snapshot(
        &self,
        baseline: i64,
        end_equity: i64,
        drawdown: &DrawdownStopManager,
        dd: &SessionEvaluation,
    ) -> RiskSnapshot {
        let exposure = self.ledger.exposure_micros(&self.marks);
        let heat_bps = if end_equity > 0 {
            ((exposure as i128) * (BPS_SCALE as i128) / (end_equity as i128)) as i64
        } else {
            0
        };
        let state = self.risk.state();
        RiskSnapshot {
            portfolio_value_micros: end_equity,
            daily_start_value_micros: baseline,
            daily_pnl_micros: end_equity - baseline,
            realized_pnl_micros: self.ledger.total_realized_pnl(),
            unrealized_pnl_micros: self.ledger.total_unrealized_pnl(&self.marks),
            exposure_micros: exposure,
            heat_bps,
            heat_ceiling_bps: state.heat_ceiling_bps,
            drawdown_mode: dd.mode,
            drawdown_bps: dd.drawdown_bps,
            peak_value_micros: drawdown.state().peak_value_micros,
            sizing_multiplier: dd.sizing_multiplier,
            circuit_breaker_halted: state.trading_halted || dd.blocks_new_entries(),
            halt_reason: state.halt_reason.clone(),
        }
    }
}

fn slippage_micros(quoted: i64, exec: i64, shares: i64) -> i64 {
    let v = ((exec as i128) - (quoted as i128)).abs() * (shares as i128);
    v.clamp(0, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_book_aggregates_strategies_per_symbol() {
        let d = chrono::NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let mut ledger = PnlLedger::new(1_000_000_000);
        ledger.buy("a", "AAA", 10, 100_000_000, 0, d).unwrap();
        ledger.buy("b", "AAA", 10, 110_000_000, 0, d).unwrap();

        let book = local_book(&ledger, true);
        let p = &book.positions["AAA"];
        assert_eq!(p.shares, 20);
        assert_eq!(p.avg_price_micros, 105_000_000);
        assert_eq!(book.open_order_ids, Some(BTreeSet::new()));
        assert!(local_book(&ledger, false).open_order_ids.is_none());
    }

    #[test]
    fn slippage_is_unsigned() {
        assert_eq!(slippage_micros(100, 101, 10), 10);
        assert_eq!(slippage_micros(100, 99, 10), 10);
    }
}
