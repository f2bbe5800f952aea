//! eqr-runtime
//!
//! Typed engine configuration and the per-session control flow tying the
//! gates together: reconcile, drawdown, admission, execution, artifacts.
//!
//! A session is single-threaded. Broker calls are the only blocking
//! operations; reads retry with backoff, submits never do.

mod admission;
mod config;
mod inputs;
mod operator;
mod session;
mod state;

pub use admission::Admission;
pub use config::{load_engine_config, BacktestSection, EngineConfig, EngineSection, PathsConfig};
pub use inputs::{
    date_start_utc, SessionFile, SessionHeader, SessionInputs, StaticSignalSource, StrategySignals,
};
pub use operator::{engine_status, resume_reconciler, EngineStatus, OPERATOR_EVENTS_JSONL};
pub use session::{SessionOutcome, SessionRunner, RUN_SCHEMA_VERSION};
pub use state::{
    EngineStateStore, EquityPoint, EQUITY_HISTORY_JSON, LEDGER_JSON, ORDER_INTENTS_JSONL,
    RECONCILER_STATE_JSON,
};
