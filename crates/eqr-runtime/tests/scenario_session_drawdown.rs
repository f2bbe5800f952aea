use std::path::Path;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use eqr_audit::{read_events, EventType, RecordingNotifier};
use eqr_broker::{PaperBroker, RetryPolicy};
use eqr_drawdown::{DrawdownState, DrawdownStore};
use eqr_portfolio::CostModelConfig;
use eqr_runtime::{engine_status, EngineConfig, EngineStateStore, SessionInputs, SessionRunner, StaticSignalSource};
use eqr_schemas::{DrawdownMode, RawSignal, SignalSource, TerminalState};

const M: i64 = 1_000_000;

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 21, 0, 0).unwrap()
}

fn config(root: &Path) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.paths.state_dir = root.join("state");
    cfg.paths.exports_dir = root.join("exports");
    cfg.cost = CostModelConfig::zero();
    cfg.retry = RetryPolicy::immediate(3);
    cfg.engine.initial_cash_micros = 100_000 * M;
    cfg
}

fn seed_peak(cfg: &EngineConfig, peak: i64) {
    let store = DrawdownStore::new(&cfg.paths.state_dir);
    store
        .save(&DrawdownState {
            peak_value_micros: peak,
            last_session_index: Some(4),
            ..DrawdownState::default()
        })
        .unwrap();
}

fn inputs() -> SessionInputs {
    let mut i = SessionInputs::new(5, as_of());
    i.now = Some(now());
    i.data_as_of = Some(Utc.with_ymd_and_hms(2024, 6, 10, 20, 0, 0).unwrap());
    i.closes = [("AAA".to_string(), 100 * M), ("BBB".to_string(), 50 * M)]
        .into_iter()
        .collect();
    i
}

fn buy(id: &str, symbol: &str) -> Vec<Box<dyn SignalSource>> {
    let raw = RawSignal {
        id: Some(id.to_string()),
        strategy_id: Some("mom".to_string()),
        symbol: Some(symbol.to_string()),
        side: Some("BUY".to_string()),
        generated_at: Some(now()),
        confidence: Some(0.7),
        as_of: Some(as_of()),
    };
    vec![Box::new(StaticSignalSource::new("mom", true, vec![raw]))]
}

#[test]
fn drawdown_past_halt_blocks_entries_as_circuit_breaker() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    // 100k against a 110k peak: 9.09%
    seed_peak(&cfg, 110_000 * M);

    let inputs = inputs();
    let mut broker = PaperBroker::new(100_000 * M, CostModelConfig::zero());
    broker.set_marks(&inputs.closes);
    let notifier = RecordingNotifier::new();

    let mut src = buy("s1", "AAA");
    let out = SessionRunner::new(cfg.clone(), "h")
        .run(&inputs, &mut src, &mut broker, &notifier)
        .unwrap();

    assert_eq!(out.drawdown.mode, DrawdownMode::Halt);
    assert_eq!(out.drawdown.drawdown_bps, 909);
    assert!(out.drawdown.transition.is_some());
    assert!(out.flatten.is_none());
    assert_eq!(
        out.terminal_counts.get(&TerminalState::RejectedByCircuitBreaker),
        Some(&1)
    );
    assert_eq!(broker.submit_calls(), 0);
    assert!(out.report.risk.circuit_breaker_halted);
    assert_eq!(out.report.risk.sizing_multiplier, 0.0);

    let titles = notifier.titles();
    assert!(titles.iter().any(|t| t == "drawdown NORMAL -> HALT"), "{titles:?}");
    assert!(titles.iter().any(|t| t == "kill switch triggered"));

    let events = read_events(out.run_dir.join("events.jsonl")).unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::DrawdownTransition));
    let rejection = events
        .iter()
        .find(|e| e.event_type == EventType::SignalRejected)
        .unwrap();
    assert!(rejection.payload["reason"]
        .as_str()
        .unwrap()
        .contains("KILL_DRAWDOWN_HALT"));

    let status = engine_status(&cfg).unwrap();
    assert_eq!(status.drawdown.mode, DrawdownMode::Halt);
    assert_eq!(status.transitions.len(), 1);
    assert!(out.invariants.passed(), "{:?}", out.invariants.violations);
}

#[test]
fn panic_with_forced_flatten_closes_everything_before_admission() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.drawdown.force_flatten_on_panic = true;
    // 100k against a 120k peak: 16.7%
    seed_peak(&cfg, 120_000 * M);

    let store = EngineStateStore::open(&cfg.paths.state_dir).unwrap();
    let mut ledger = store.load_ledger(100_000 * M).unwrap();
    ledger.buy("mom", "AAA", 100, 100 * M, 0, as_of()).unwrap();
    store.save_ledger(&ledger).unwrap();

    let inputs = inputs();
    let mut broker = PaperBroker::new(90_000 * M, CostModelConfig::zero());
    broker.set_position("AAA", 100, 100 * M);
    broker.set_marks(&inputs.closes);
    let notifier = RecordingNotifier::new();

    let mut src = buy("s1", "BBB");
    let out = SessionRunner::new(cfg.clone(), "h")
        .run(&inputs, &mut src, &mut broker, &notifier)
        .unwrap();

    assert_eq!(out.drawdown.mode, DrawdownMode::Panic);
    assert!(out.drawdown.flatten_required);
    let flatten = out.flatten.as_ref().unwrap();
    assert!(flatten.is_complete());
    assert_eq!(flatten.closed.len(), 1);

    assert_eq!(broker.shares("AAA"), 0);
    assert_eq!(broker.cash_micros(), 100_000 * M);
    assert_eq!(out.trades.len(), 1);
    assert_eq!(out.trades[0].signal_id, "flatten:AAA");
    assert_eq!(out.trades[0].shares, 100);
    assert_eq!(out.trades[0].realized_pnl_micros, Some(0));

    assert_eq!(
        out.terminal_counts.get(&TerminalState::RejectedByCircuitBreaker),
        Some(&1)
    );
    assert!(out.end_reconciliation_passed);
    assert!(out.report.open_positions.is_empty());
    assert!(out.invariants.passed(), "{:?}", out.invariants.violations);

    let events = read_events(out.run_dir.join("events.jsonl")).unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == EventType::PositionClosed)
            .count(),
        1
    );

    let ledger = store.load_ledger(0).unwrap();
    assert_eq!(ledger.shares("mom", "AAA"), 0);
    assert_eq!(ledger.cash_micros(), 100_000 * M);
}

#[test]
fn panic_flatten_is_skipped_while_reconciler_is_paused() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.drawdown.force_flatten_on_panic = true;
    seed_peak(&cfg, 120_000 * M);

    let inputs = inputs();
    let mut broker = PaperBroker::new(100_000 * M, CostModelConfig::zero());
    broker.set_marks(&inputs.closes);
    broker.set_position("ZZZ", 5, 10 * M);
    let notifier = RecordingNotifier::new();

    let mut src = buy("s1", "AAA");
    let out = SessionRunner::new(cfg, "h")
        .run(&inputs, &mut src, &mut broker, &notifier)
        .unwrap();

    assert!(!out.start_reconciliation_passed);
    let flatten = out.flatten.as_ref().unwrap();
    assert!(!flatten.is_complete());
    assert!(flatten.closed.is_empty());
    assert_eq!(broker.shares("ZZZ"), 5);
    assert!(notifier.titles().iter().any(|t| t == "panic flatten skipped"));
    assert_eq!(
        out.terminal_counts.get(&TerminalState::RejectedByBroker),
        Some(&1)
    );
}
