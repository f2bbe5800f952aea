use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed set of event types written to the log.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SessionStarted,
    SessionCompleted,
    SnapshotCaptured,
    SignalGenerated,
    SignalInvalid,
    SignalRejected,
    TerminalStateRecorded,
    OrderSubmitted,
    OrderFilled,
    OrderRejected,
    /// Second attempt for a journaled client order id; never sent.
    OrderDuplicate,
    /// Broker filled but the ledger refused the fill.
    FillNotBooked,
    PositionClosed,
    ReconciliationPassed,
    ReconciliationFailed,
    ReconcilerResumed,
    DrawdownTransition,
    KillSwitchTriggered,
    DailyLossHalt,
    /// A BUY was compared against a held symbol with too little history.
    CorrelationSkipped,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStarted => "SESSION_STARTED",
            EventType::SessionCompleted => "SESSION_COMPLETED",
            EventType::SnapshotCaptured => "SNAPSHOT_CAPTURED",
            EventType::SignalGenerated => "SIGNAL_GENERATED",
            EventType::SignalInvalid => "SIGNAL_INVALID",
            EventType::SignalRejected => "SIGNAL_REJECTED",
            EventType::TerminalStateRecorded => "TERMINAL_STATE_RECORDED",
            EventType::OrderSubmitted => "ORDER_SUBMITTED",
            EventType::OrderFilled => "ORDER_FILLED",
            EventType::OrderRejected => "ORDER_REJECTED",
            EventType::OrderDuplicate => "ORDER_DUPLICATE",
            EventType::FillNotBooked => "FILL_NOT_BOOKED",
            EventType::PositionClosed => "POSITION_CLOSED",
            EventType::ReconciliationPassed => "RECONCILIATION_PASSED",
            EventType::ReconciliationFailed => "RECONCILIATION_FAILED",
            EventType::ReconcilerResumed => "RECONCILER_RESUMED",
            EventType::DrawdownTransition => "DRAWDOWN_TRANSITION",
            EventType::KillSwitchTriggered => "KILL_SWITCH_TRIGGERED",
            EventType::DailyLossHalt => "DAILY_LOSS_HALT",
            EventType::CorrelationSkipped => "CORRELATION_SKIPPED",
        }
    }
}

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub run_id: Uuid,
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub event_type: EventType,
    pub strategy_id: Option<String>,
    pub symbol: Option<String>,
    pub stage: Option<String>,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// An event before the sink assigns id, sequence, timestamp and hashes.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub strategy_id: Option<String>,
    pub symbol: Option<String>,
    pub stage: Option<String>,
    pub payload: Value,
}

impl NewEvent {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            event_type,
            strategy_id: None,
            symbol: None,
            stage: None,
            payload,
        }
    }

    pub fn strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

/// Anything that can durably accept events for one run.
///
/// `emit` must not return `Ok` until the event is as durable as the sink
/// promises (the file sink fsyncs).
pub trait EventSink {
    fn run_id(&self) -> Uuid;
    fn emit(&mut self, event: NewEvent) -> Result<AuditEvent>;
}

/// In-memory sink for tests and offline replays (backtests).
#[derive(Debug, Clone)]
pub struct MemorySink {
    run_id: Uuid,
    events: Vec<AuditEvent>,
}

impl MemorySink {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSink for MemorySink {
    fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn emit(&mut self, event: NewEvent) -> Result<AuditEvent> {
        let seq = self.events.len() as u64;
        let ev = AuditEvent {
            event_id: Uuid::new_v5(&self.run_id, &seq.to_be_bytes()),
            run_id: self.run_id,
            seq,
            ts_utc: Utc::now(),
            event_type: event.event_type,
            strategy_id: event.strategy_id,
            symbol: event.symbol,
            stage: event.stage,
            payload: event.payload,
            hash_prev: None,
            hash_self: None,
        };
        self.events.push(ev.clone());
        Ok(ev)
    }
}
