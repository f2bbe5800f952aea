use chrono::{NaiveDate, TimeZone, Utc};
use eqr_schemas::*;

fn full_raw() -> RawSignal {
    RawSignal {
        id: Some("sig-1".to_string()),
        strategy_id: Some("momo".to_string()),
        symbol: Some("aapl".to_string()),
        side: Some("buy".to_string()),
        generated_at: Some(Utc.with_ymd_and_hms(2026, 3, 2, 13, 30, 0).unwrap()),
        confidence: Some(0.8),
        as_of: NaiveDate::from_ymd_opt(2026, 3, 2),
    }
}

#[test]
fn complete_record_validates_and_normalizes() {
    let s = Signal::try_from(full_raw()).unwrap();
    assert_eq!(s.symbol, "AAPL");
    assert_eq!(s.side, Side::Buy);
    assert_eq!(s.strategy_id, "momo");
}

#[test]
fn missing_field_is_rejected_not_defaulted() {
    let mut raw = full_raw();
    raw.as_of = None;
    assert_eq!(
        Signal::try_from(raw).unwrap_err(),
        SignalValidationError::MissingField { field: "as_of" }
    );

    let mut raw = full_raw();
    raw.symbol = Some("   ".to_string());
    assert_eq!(
        Signal::try_from(raw).unwrap_err(),
        SignalValidationError::EmptyField { field: "symbol" }
    );
}

#[test]
fn bad_side_and_confidence_are_rejected() {
    let mut raw = full_raw();
    raw.side = Some("SHORT".to_string());
    assert!(matches!(
        Signal::try_from(raw).unwrap_err(),
        SignalValidationError::UnknownSide { .. }
    ));

    let mut raw = full_raw();
    raw.confidence = Some(1.5);
    assert!(matches!(
        Signal::try_from(raw).unwrap_err(),
        SignalValidationError::ConfidenceOutOfRange { .. }
    ));
}

#[test]
fn terminal_state_wire_names_are_stable() {
    let json = serde_json::to_string(&TerminalState::RejectedByCircuitBreaker).unwrap();
    assert_eq!(json, "\"REJECTED_BY_CIRCUIT_BREAKER\"");
    for ts in TerminalState::ALL {
        let quoted = format!("\"{}\"", ts.as_str());
        assert_eq!(serde_json::to_string(&ts).unwrap(), quoted);
    }
    assert!(TerminalState::RejectedByBroker.is_broker_rejection());
    assert!(!TerminalState::Executed.is_rejection());
}

#[test]
fn micros_conversion_rounds() {
    assert_eq!(to_micros(100.0), 100 * MICROS_SCALE);
    assert_eq!(to_micros(12.345678), 12_345_678);
    assert_eq!(from_micros(1_500_000), 1.5);
}
