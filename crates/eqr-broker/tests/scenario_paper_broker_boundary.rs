//! Broker boundary.
//!
//! GREEN when:
//! - Transient read failures are retried up to the bound, then surfaced.
//! - Submit is never retried and is idempotent on the client order id.
//! - Paper fills use the shared cost model and FIFO average prices.
//! - Ambiguous submits leave an open order behind at the broker.

use chrono::{Duration, Utc};
use eqr_broker::{
    capture_snapshot, client_order_id, BrokerClient, BrokerError, IntentKind, OrderIntent,
    OrderIntentJournal, OrderRequest, PaperBroker, RetryPolicy,
};
use eqr_portfolio::{CostModel, CostModelConfig};
use eqr_schemas::{BrokerAccount, BrokerPosition, Side, SnapshotKind};
use uuid::Uuid;

const M: i64 = 1_000_000;

fn order(id: &str, symbol: &str, side: Side, shares: i64, px: i64) -> OrderRequest {
    OrderRequest {
        client_order_id: id.to_string(),
        symbol: symbol.to_string(),
        side,
        shares,
        reference_price_micros: px,
    }
}

#[test]
fn transient_reads_are_retried_within_bound() {
    let mut broker = PaperBroker::new(100_000 * M, CostModelConfig::zero());
    broker.faults.transient_reads = 2;

    let snap = capture_snapshot(
        &mut broker,
        &RetryPolicy::immediate(3),
        SnapshotKind::Start,
        Utc::now(),
    )
    .unwrap();
    assert_eq!(snap.kind, SnapshotKind::Start);
    assert_eq!(snap.cash_micros, 100_000 * M);

    broker.faults.transient_reads = 3;
    let err = capture_snapshot(
        &mut broker,
        &RetryPolicy::immediate(3),
        SnapshotKind::End,
        Utc::now(),
    )
    .unwrap_err();
    assert!(matches!(err, BrokerError::Transient { op: "get_positions", .. }));
}

#[test]
fn non_transient_errors_are_not_retried() {
    let mut calls = 0;
    let res: Result<(), BrokerError> = RetryPolicy::immediate(5).read("get_account", || {
        calls += 1;
        Err(BrokerError::Ambiguous {
            reason: "x".into(),
        })
    });
    assert!(res.is_err());
    assert_eq!(calls, 1);
}

#[test]
fn fills_match_cost_model_and_fifo_average() {
    let cfg = CostModelConfig::default();
    let mut broker = PaperBroker::new(100_000 * M, cfg.clone());
    let model = CostModel::new(cfg);

    let a = broker
        .submit_order(&order("o1", "SPY", Side::Buy, 10, 400 * M))
        .unwrap();
    let b = broker
        .submit_order(&order("o2", "SPY", Side::Buy, 30, 420 * M))
        .unwrap();
    assert_eq!(
        a.avg_fill_price_micros,
        model.price(400 * M, Side::Buy, 10).exec_price_micros
    );

    let positions = broker.get_positions().unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].shares, 40);
    let expected_avg =
        (10 * a.avg_fill_price_micros + 30 * b.avg_fill_price_micros) / 40;
    assert_eq!(positions[0].avg_price_micros, expected_avg);

    let spent = 10 * a.avg_fill_price_micros
        + a.commission_micros
        + 30 * b.avg_fill_price_micros
        + b.commission_micros;
    assert_eq!(broker.cash_micros(), 100_000 * M - spent);
}

#[test]
fn submit_is_idempotent_on_client_order_id() {
    let mut broker = PaperBroker::new(100_000 * M, CostModelConfig::zero());
    let run = Uuid::new_v4();
    let id = client_order_id(run, "sig-1");

    let first = broker
        .submit_order(&order(&id, "SPY", Side::Buy, 10, 100 * M))
        .unwrap();
    let again = broker
        .submit_order(&order(&id, "SPY", Side::Buy, 10, 100 * M))
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(broker.shares("SPY"), 10);
    assert_eq!(broker.submit_calls(), 2);
}

#[test]
fn rejections_and_ambiguity() {
    let mut broker = PaperBroker::new(1_000 * M, CostModelConfig::zero());
    broker.faults.reject_symbols.insert("BAD".into());
    broker.faults.ambiguous_symbols.insert("FOG".into());

    assert!(matches!(
        broker.submit_order(&order("o1", "BAD", Side::Buy, 1, M)),
        Err(BrokerError::Rejected { .. })
    ));
    assert!(matches!(
        broker.submit_order(&order("o2", "SPY", Side::Buy, 100, 100 * M)),
        Err(BrokerError::Rejected { .. })
    ));
    assert!(matches!(
        broker.submit_order(&order("o3", "SPY", Side::Sell, 1, 100 * M)),
        Err(BrokerError::Rejected { .. })
    ));

    let err = broker
        .submit_order(&order("o4", "FOG", Side::Buy, 1, M))
        .unwrap_err();
    assert!(matches!(err, BrokerError::Ambiguous { .. }));
    assert_eq!(broker.get_open_orders().unwrap(), vec!["paper:o4".to_string()]);
    assert_eq!(broker.shares("FOG"), 0);
}

#[test]
fn close_position_sells_everything_at_mark() {
    let mut broker = PaperBroker::new(0, CostModelConfig::zero());
    broker.set_position("QQQ", 20, 300 * M);
    broker.set_mark("QQQ", 310 * M);

    let ack = broker.close_position("QQQ").unwrap();
    assert_eq!(ack.filled_shares, 20);
    assert_eq!(broker.shares("QQQ"), 0);
    assert_eq!(broker.cash_micros(), 20 * 310 * M);
    assert!(broker.close_position("QQQ").is_err());
}

#[test]
fn intent_journal_counts_duplicates_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("order_intents.jsonl");
    let now = Utc::now();

    let j = OrderIntentJournal::new(&path).unwrap();
    for (id, age_h) in [("a", 1), ("b", 2), ("a", 3)] {
        j.append(&OrderIntent {
            client_order_id: id.into(),
            signal_id: id.into(),
            symbol: "SPY".into(),
            at: now - Duration::hours(age_h),
            kind: IntentKind::Submit,
        })
        .unwrap();
    }

    let reopened = OrderIntentJournal::new(&path).unwrap();
    assert_eq!(reopened.load().unwrap().len(), 3);
    assert_eq!(reopened.duplicates_within(now, Duration::hours(24)).unwrap(), 1);
    assert!(reopened.contains("b").unwrap());
    assert!(!reopened.contains("c").unwrap());
}

/// Lists every position twice, as a broken positions feed would.
struct DoubleListing(PaperBroker);

impl BrokerClient for DoubleListing {
    fn get_positions(&mut self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let p = self.0.get_positions()?;
        Ok(p.iter().chain(p.iter()).cloned().collect())
    }

    fn get_account(&mut self) -> Result<BrokerAccount, BrokerError> {
        self.0.get_account()
    }

    fn get_open_orders(&mut self) -> Result<Vec<String>, BrokerError> {
        self.0.get_open_orders()
    }

    fn submit_order(&mut self, req: &OrderRequest) -> Result<eqr_broker::OrderAck, BrokerError> {
        self.0.submit_order(req)
    }

    fn close_position(&mut self, symbol: &str) -> Result<eqr_broker::OrderAck, BrokerError> {
        self.0.close_position(symbol)
    }
}

#[test]
fn duplicate_symbols_in_positions_refuse_the_snapshot() {
    let mut inner = PaperBroker::new(1_000 * M, CostModelConfig::zero());
    inner.set_position("SPY", 5, 400 * M);
    let mut broker = DoubleListing(inner);

    let err = capture_snapshot(&mut broker, &RetryPolicy::immediate(3), SnapshotKind::Start, Utc::now())
        .unwrap_err();
    assert!(matches!(err, BrokerError::Malformed { op: "get_positions", .. }));
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("SPY"));
}
