use chrono::{DateTime, Duration, TimeZone, Utc};
use eqr_audit::RecordingNotifier;
use eqr_broker::{BrokerClient, PaperBroker, RetryPolicy};
use eqr_drawdown::{
    flatten_all, DrawdownConfig, DrawdownStopManager, DrawdownStore, HealthCheckInput,
};
use eqr_portfolio::CostModelConfig;
use eqr_schemas::DrawdownMode;

const M: i64 = 1_000_000;

fn at(session: u64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 21, 0, 0).unwrap() + Duration::days(session as i64)
}

#[test]
fn halt_survives_restart_with_transition_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();

    {
        let mut mgr =
            DrawdownStopManager::open(DrawdownConfig::default(), DrawdownStore::new(dir.path()))
                .unwrap();
        mgr.evaluate(0, 100_000 * M, &HealthCheckInput::healthy(at(0)), &notifier, at(0))
            .unwrap();
        let ev = mgr
            .evaluate(1, 91_000 * M, &HealthCheckInput::healthy(at(1)), &notifier, at(1))
            .unwrap();
        assert_eq!(ev.mode, DrawdownMode::Halt);
        assert!(ev.blocks_new_entries());
        assert!(ev.notified);
        let path = ev.artifact_path.expect("artifact written");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_s000001_NORMAL_to_HALT.json"), "{name}");
    }

    let store = DrawdownStore::new(dir.path());
    assert!(store.state_path().exists());
    let mgr = DrawdownStopManager::open(DrawdownConfig::default(), store).unwrap();
    assert_eq!(mgr.mode(), DrawdownMode::Halt);
    assert_eq!(mgr.state().cooldown_end, Some(11));
    assert_eq!(mgr.state().peak_value_micros, 100_000 * M);

    let transitions = mgr.store().list_transitions().unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].to, DrawdownMode::Halt);

    assert_eq!(notifier.titles(), vec!["drawdown NORMAL -> HALT".to_string()]);
}

#[test]
fn failing_notifier_does_not_block_transition() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::failing();
    let mut mgr =
        DrawdownStopManager::open(DrawdownConfig::default(), DrawdownStore::new(dir.path()))
            .unwrap();

    mgr.evaluate(0, 50_000 * M, &HealthCheckInput::healthy(at(0)), &notifier, at(0))
        .unwrap();
    let ev = mgr
        .evaluate(1, 45_000 * M, &HealthCheckInput::healthy(at(1)), &notifier, at(1))
        .unwrap();

    assert_eq!(ev.mode, DrawdownMode::Panic);
    assert!(!ev.notified);
    assert_eq!(notifier.sent().len(), 1);

    let reopened =
        DrawdownStopManager::open(DrawdownConfig::default(), DrawdownStore::new(dir.path()))
            .unwrap();
    assert_eq!(reopened.mode(), DrawdownMode::Panic);
}

#[test]
fn panic_with_force_flatten_closes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = DrawdownConfig {
        force_flatten_on_panic: true,
        ..DrawdownConfig::default()
    };
    let mut mgr = DrawdownStopManager::open(cfg, DrawdownStore::new(dir.path())).unwrap();
    let notifier = RecordingNotifier::new();

    mgr.evaluate(0, 100_000 * M, &HealthCheckInput::healthy(at(0)), &notifier, at(0))
        .unwrap();
    let ev = mgr
        .evaluate(1, 89_000 * M, &HealthCheckInput::healthy(at(1)), &notifier, at(1))
        .unwrap();
    assert!(ev.flatten_required);

    let mut broker = PaperBroker::new(10_000 * M, CostModelConfig::zero());
    broker.set_position("AAPL", 10, 150 * M);
    broker.set_position("MSFT", 4, 300 * M);

    let report = flatten_all(&mut broker, &RetryPolicy::immediate(3));
    assert!(report.is_complete());
    assert_eq!(report.closed.len(), 2);
    assert!(broker.get_positions().unwrap().is_empty());
    assert_eq!(broker.cash_micros(), 10_000 * M + 1_500 * M + 1_200 * M);

    // already in PANIC: no second flatten request
    let ev = mgr
        .evaluate(2, 85_000 * M, &HealthCheckInput::healthy(at(2)), &notifier, at(2))
        .unwrap();
    assert!(ev.transition.is_none());
    assert!(!ev.flatten_required);
}
