use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use eqr_backtest::{
    run_walk_forward, walk_forward_windows, BacktestConfig, BacktestError, MomentumConfig,
    MomentumSource, PriceHistory, WalkForwardConfig,
};
use eqr_portfolio::CostModelConfig;
use eqr_schemas::{MarketView, RawSignal, SignalSource, TerminalState};

const M: i64 = 1_000_000;

#[test]
fn five_years_yield_five_non_overlapping_test_windows() {
    let windows = walk_forward_windows(1260, &WalkForwardConfig::default());
    assert_eq!(windows.len(), 5);

    let tests: Vec<_> = windows.iter().map(|w| (w.test.start, w.test.end)).collect();
    assert_eq!(
        tests,
        vec![(504, 630), (630, 756), (756, 882), (882, 1008), (1008, 1134)]
    );
    for w in &windows {
        assert_eq!(w.train.len(), 504);
        assert_eq!(w.train.end, w.test.start);
    }
    for pair in windows.windows(2) {
        assert!(pair[0].test.end <= pair[1].test.start);
    }
}

/// Emits pre-scripted signals keyed by session index.
struct Scripted {
    by_session: BTreeMap<u64, Vec<RawSignal>>,
}

impl SignalSource for Scripted {
    fn strategy_id(&self) -> &str {
        "scripted"
    }

    fn generate_signals(&mut self, view: &MarketView) -> Vec<RawSignal> {
        self.by_session.get(&view.session_index).cloned().unwrap_or_default()
    }
}

fn day(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(i as i64)
}

fn raw(session: usize, symbol: &str, side: &str) -> RawSignal {
    RawSignal {
        id: Some(format!("s{session}-{symbol}-{side}")),
        strategy_id: Some("scripted".to_string()),
        symbol: Some(symbol.to_string()),
        side: Some(side.to_string()),
        generated_at: Some(Utc.from_utc_datetime(&day(session).and_time(NaiveTime::default()))),
        confidence: Some(0.8),
        as_of: Some(day(session)),
    }
}

fn history(n: usize) -> PriceHistory {
    let dates: Vec<NaiveDate> = (0..n).map(day).collect();
    let aaa: Vec<i64> = (0..n).map(|t| (100 + t as i64) * M).collect();
    let bbb: Vec<i64> = aaa.iter().map(|p| p * 2).collect();
    let series = BTreeMap::from([("AAA".to_string(), aaa), ("BBB".to_string(), bbb)]);
    PriceHistory::from_series(&dates, &series)
}

fn config() -> BacktestConfig {
    BacktestConfig {
        cost: CostModelConfig::zero(),
        walk_forward: WalkForwardConfig {
            train_sessions: 40,
            test_sessions: 20,
            step_sessions: 20,
        },
        ..BacktestConfig::default()
    }
}

fn scripted() -> Scripted {
    let mut missing_confidence = raw(42, "AAA", "BUY");
    missing_confidence.confidence = None;
    Scripted {
        by_session: BTreeMap::from([
            (40, vec![raw(40, "AAA", "BUY")]),
            (41, vec![raw(41, "BBB", "BUY")]),
            (42, vec![missing_confidence]),
            (45, vec![raw(45, "AAA", "SELL")]),
            (46, vec![raw(46, "CCC", "SELL")]),
        ]),
    }
}

#[test]
fn window_runs_the_full_gate_stack() {
    let h = history(100);
    let report = run_walk_forward(&config(), &h, |_| Box::new(scripted())).unwrap();
    assert_eq!(report.windows.len(), 2);

    let w0 = &report.windows[0];
    assert_eq!(w0.window.test, 40..60);
    assert_eq!(w0.equity_curve.len(), 21);
    assert_eq!(w0.invalid_signals, 1);
    assert_eq!(w0.outcomes.get(&TerminalState::Executed), Some(&2));
    assert_eq!(w0.outcomes.get(&TerminalState::RejectedByCorrelation), Some(&1));
    assert_eq!(w0.outcomes.get(&TerminalState::RejectedBySizing), Some(&1));

    // 5% of 100k at 140 => 35 shares; sold at 145 with zero costs
    assert_eq!(w0.trades.len(), 2);
    assert_eq!(w0.trades[0].shares, 35);
    assert_eq!(w0.trades[1].realized_pnl_micros, Some(175 * M));
    assert_eq!(w0.closed_trade_pnls(), vec![175 * M]);
    assert_eq!(*w0.equity_curve.last().unwrap(), 100_000 * M + 175 * M);

    // second window gets a fresh source and sees no scripted sessions
    assert!(report.windows[1].trades.is_empty());
    assert_eq!(report.aggregate_equity_curve.len(), 41);
}

#[test]
fn replay_is_deterministic() {
    let h = history(100);
    let cfg = BacktestConfig {
        walk_forward: WalkForwardConfig {
            train_sessions: 40,
            test_sessions: 20,
            step_sessions: 20,
        },
        ..BacktestConfig::default()
    };
    let mk = |_: &eqr_backtest::Window| -> Box<dyn SignalSource> {
        Box::new(MomentumSource::new(
            "mom",
            MomentumConfig {
                lookback: 5,
                entry_threshold: 0.02,
            },
        ))
    };
    let a = run_walk_forward(&cfg, &h, mk).unwrap();
    let b = run_walk_forward(&cfg, &h, mk).unwrap();
    assert_eq!(a, b);
}

#[test]
fn short_history_is_an_error() {
    let h = history(50);
    let err = run_walk_forward(&config(), &h, |_| Box::new(scripted())).unwrap_err();
    assert_eq!(
        err,
        BacktestError::NotEnoughHistory {
            sessions: 50,
            required: 60
        }
    );
}

#[test]
fn closes_load_from_csv_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("closes.csv");
    std::fs::write(
        &path,
        "date,symbol,close\n2024-01-02,aapl,185.64\n2024-01-03,AAPL,184.25\n",
    )
    .unwrap();
    let h = eqr_backtest::load_closes_csv(&path).unwrap();
    assert_eq!(h.len(), 2);
    assert_eq!(h.view(1).unwrap().close("AAPL"), Some(184_250_000));
    assert!(eqr_backtest::load_closes_csv(&dir.path().join("missing.csv")).is_err());
}
