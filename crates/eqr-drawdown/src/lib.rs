//! eqr-drawdown
//!
//! Portfolio-level drawdown circuit breaker.
//!
//! ```text
//! NORMAL --dd >= halt-->  HALT  (cooldown 10 sessions)
//! NORMAL --dd >= panic--> PANIC (cooldown 20 sessions, optional flatten)
//! HALT   --dd >= panic--> PANIC
//! HALT/PANIC --cooldown elapsed, checks pass--> RAMPUP (x0.5, 5 sessions)
//! HALT/PANIC --cooldown elapsed, checks fail--> same mode, cooldown +5
//! RAMPUP --duration elapsed--> NORMAL (x1.0)
//! ```
//!
//! Drawdown is always measured from the running peak. The state machine is
//! pure ([`step`]); [`DrawdownStopManager`] wraps it with durable state, one
//! artifact per transition and best-effort notification.

mod health;
mod machine;
mod manager;
mod store;

pub use health::{run_health_checks, HealthCheckInput, HealthFailure, HealthReport};
pub use machine::{drawdown_bps, step, DrawdownConfig, DrawdownState, Transition, TransitionKind};
pub use manager::{flatten_all, DrawdownStopManager, FlattenReport, SessionEvaluation};
pub use store::DrawdownStore;
