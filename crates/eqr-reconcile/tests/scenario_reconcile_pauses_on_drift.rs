use chrono::{DateTime, Duration, TimeZone, Utc};
use eqr_audit::{EventType, MemorySink, RecordingNotifier};
use eqr_broker::{PaperBroker, RetryPolicy};
use eqr_portfolio::CostModelConfig;
use eqr_reconcile::{
    reconcile, Discrepancy, LocalBook, ReconcileConfig, Reconciler, SnapshotLog,
};
use eqr_schemas::{BrokerAccount, BrokerPosition, BrokerSnapshot, ReconcilerStatus, SnapshotKind};
use uuid::Uuid;

const M: i64 = 1_000_000;

fn t(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 5, 14, 30, 0).unwrap() + Duration::minutes(minute)
}

fn snapshot(kind: SnapshotKind, at: DateTime<Utc>, positions: Vec<BrokerPosition>, cash: i64) -> BrokerSnapshot {
    let acct = BrokerAccount {
        cash_micros: cash,
        buying_power_micros: cash,
        portfolio_value_micros: cash,
    };
    BrokerSnapshot::from_parts(kind, at, positions, &acct, Vec::new()).unwrap()
}

#[test]
fn identical_books_pass_share_mismatch_names_symbol() {
    let cfg = ReconcileConfig::default();
    let local = LocalBook::new(50_000 * M).with_position("AAPL", 10, 150 * M);

    let same = snapshot(
        SnapshotKind::Reconciliation,
        t(0),
        vec![BrokerPosition::new("AAPL", 10, 150 * M)],
        50_000 * M,
    );
    assert!(reconcile(&cfg, &local, &same).passed);

    let drifted = snapshot(
        SnapshotKind::Reconciliation,
        t(0),
        vec![BrokerPosition::new("AAPL", 15, 150 * M)],
        50_000 * M,
    );
    let r = reconcile(&cfg, &local, &drifted);
    assert!(!r.passed);
    assert_eq!(
        r.discrepancies,
        vec![Discrepancy::ShareMismatch {
            symbol: "AAPL".to_string(),
            local_shares: 10,
            broker_shares: 15,
        }]
    );
    assert!(r.describe().contains("AAPL"));
}

#[test]
fn tolerances_and_unmatched_positions() {
    let cfg = ReconcileConfig::default();
    let local = LocalBook::new(10_000 * M).with_position("MSFT", 5, 400 * M);

    // avg within 1%, cash within 1%, broker-only position never adopted
    let snap = snapshot(
        SnapshotKind::Reconciliation,
        t(0),
        vec![
            BrokerPosition::new("MSFT", 5, 403 * M),
            BrokerPosition::new("TSLA", 3, 200 * M),
        ],
        10_090 * M,
    );
    let r = reconcile(&cfg, &local, &snap);
    assert_eq!(
        r.discrepancies,
        vec![Discrepancy::UnexpectedBrokerPosition {
            symbol: "TSLA".to_string(),
            broker_shares: 3,
        }]
    );

    // 2% price drift, 5% cash drift, local symbol missing at broker
    let local = local.with_position("NVDA", 2, 500 * M);
    let snap = snapshot(
        SnapshotKind::Reconciliation,
        t(0),
        vec![BrokerPosition::new("MSFT", 5, 408 * M)],
        10_500 * M,
    );
    let r = reconcile(&cfg, &local, &snap);
    let symbols: Vec<_> = r.discrepancies.iter().filter_map(|d| d.symbol()).collect();
    assert_eq!(symbols, vec!["NVDA", "MSFT"]);
    assert!(r
        .discrepancies
        .iter()
        .any(|d| matches!(d, Discrepancy::CashDrift { .. })));
}

#[test]
fn paused_survives_restart_until_clean_or_manual_resume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reconciler_state.json");
    let mut sink = MemorySink::new(Uuid::new_v4());
    let notifier = RecordingNotifier::new();
    let local = LocalBook::new(1_000 * M).with_position("SPY", 2, 450 * M);

    {
        let mut rec = Reconciler::open(ReconcileConfig::default(), &path).unwrap();
        let bad = snapshot(SnapshotKind::Start, t(0), vec![BrokerPosition::new("SPY", 1, 450 * M)], 1_000 * M);
        let r = rec.reconcile_snapshot(&bad, &local, &mut sink, &notifier).unwrap();
        assert!(!r.passed);
        assert!(rec.is_paused());
    }
    assert_eq!(sink.count(EventType::ReconciliationFailed), 1);
    assert_eq!(notifier.titles(), vec!["reconciliation failed".to_string()]);

    let mut rec = Reconciler::open(ReconcileConfig::default(), &path).unwrap();
    assert_eq!(rec.status(), ReconcilerStatus::Paused);
    assert_eq!(rec.state().discrepancies.len(), 1);
    assert!(!rec.last_passed());

    // no timeout-based resume: an empty reason is refused
    assert!(rec.force_resume("  ", t(5), &mut sink).is_err());
    assert!(rec.is_paused());

    let good = snapshot(SnapshotKind::Reconciliation, t(10), vec![BrokerPosition::new("SPY", 2, 450 * M)], 1_000 * M);
    assert!(rec.reconcile_snapshot(&good, &local, &mut sink, &notifier).unwrap().passed);
    assert_eq!(rec.status(), ReconcilerStatus::Active);
    assert!(rec.last_passed());
    assert_eq!(sink.count(EventType::ReconcilerResumed), 1);

    let reopened = Reconciler::open(ReconcileConfig::default(), &path).unwrap();
    assert_eq!(reopened.status(), ReconcilerStatus::Active);
}

#[test]
fn manual_resume_clears_pause() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reconciler_state.json");
    let mut sink = MemorySink::new(Uuid::new_v4());
    let notifier = RecordingNotifier::failing();

    let mut rec = Reconciler::open(ReconcileConfig::default(), &path).unwrap();
    let bad = snapshot(SnapshotKind::Start, t(0), vec![], 900 * M);
    rec.reconcile_snapshot(&bad, &LocalBook::new(1_000 * M), &mut sink, &notifier)
        .unwrap();
    assert!(rec.is_paused());

    rec.force_resume("cash transfer confirmed by ops", t(1), &mut sink).unwrap();
    assert!(!rec.is_paused());
    assert!(rec.state().discrepancies.is_empty());
    assert_eq!(
        rec.state().last_resume_reason.as_deref(),
        Some("cash transfer confirmed by ops")
    );
    let ev = sink
        .events()
        .iter()
        .find(|e| e.event_type == EventType::ReconcilerResumed)
        .unwrap();
    assert_eq!(ev.payload["manual"], true);
}

#[test]
fn stale_snapshot_is_rejected_and_pauses() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = MemorySink::new(Uuid::new_v4());
    let notifier = RecordingNotifier::new();
    let local = LocalBook::new(1_000 * M);

    let mut rec = Reconciler::open(ReconcileConfig::default(), dir.path().join("r.json")).unwrap();
    let fresh = snapshot(SnapshotKind::Start, t(10), vec![], 1_000 * M);
    assert!(rec.reconcile_snapshot(&fresh, &local, &mut sink, &notifier).unwrap().passed);

    let stale = snapshot(SnapshotKind::Reconciliation, t(5), vec![], 1_000 * M);
    let r = rec.reconcile_snapshot(&stale, &local, &mut sink, &notifier).unwrap();
    assert!(!r.passed);
    assert!(matches!(r.discrepancies[0], Discrepancy::StaleSnapshot { .. }));
    assert!(rec.is_paused());
    assert_eq!(rec.state().watermark.last_accepted(), Some(t(10)));
}

#[test]
fn capture_against_paper_broker_logs_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = MemorySink::new(Uuid::new_v4());
    let notifier = RecordingNotifier::new();

    let mut broker = PaperBroker::new(10_000 * M, CostModelConfig::zero());
    broker.set_position("AAPL", 10, 150 * M);
    broker.faults.transient_reads = 2;

    let local = LocalBook::new(10_000 * M)
        .with_position("AAPL", 10, 150 * M)
        .with_open_orders(Vec::<String>::new());

    let mut rec = Reconciler::open(ReconcileConfig::default(), dir.path().join("r.json")).unwrap();
    let out = rec
        .capture_and_reconcile(&mut broker, &RetryPolicy::immediate(3), SnapshotKind::Start, t(0), &local, &mut sink, &notifier)
        .unwrap();
    assert!(out.passed());
    assert_eq!(out.snapshot.unwrap().kind, SnapshotKind::Start);

    // an order left open at the broker is a phantom
    broker.add_open_order("paper:orphan");
    let out = rec
        .capture_and_reconcile(&mut broker, &RetryPolicy::immediate(3), SnapshotKind::End, t(60), &local, &mut sink, &notifier)
        .unwrap();
    assert_eq!(
        out.report.discrepancies,
        vec![Discrepancy::PhantomOrder {
            order_id: "paper:orphan".to_string()
        }]
    );

    let log = SnapshotLog::from_events(sink.events());
    assert!(log.is_complete());
    assert_eq!(log.count(SnapshotKind::Start), 1);
}

#[test]
fn unreadable_broker_pauses() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = MemorySink::new(Uuid::new_v4());
    let notifier = RecordingNotifier::new();
    let mut broker = PaperBroker::new(0, CostModelConfig::zero());
    broker.faults.transient_reads = 10;

    let mut rec = Reconciler::open(ReconcileConfig::default(), dir.path().join("r.json")).unwrap();
    let out = rec
        .capture_and_reconcile(&mut broker, &RetryPolicy::immediate(3), SnapshotKind::Start, t(0), &LocalBook::new(0), &mut sink, &notifier)
        .unwrap();
    assert!(out.snapshot.is_none());
    assert!(matches!(
        out.report.discrepancies[0],
        Discrepancy::SnapshotUnavailable { .. }
    ));
    assert!(rec.is_paused());

    let log = SnapshotLog::from_events(sink.events());
    assert_eq!(log.missing_required(), vec![SnapshotKind::Start, SnapshotKind::End]);
}
