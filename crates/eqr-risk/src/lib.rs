//! eqr-risk
//!
//! Portfolio risk gate:
//! - regime-scaled heat ceiling (`can_add_position`)
//! - daily-loss circuit breaker, sticky for the session
//! - `evaluate_kill_conditions`: one pure function over everything that can
//!   stop new admission (reconciler, drawdown, session halt, manual kill,
//!   stale data)
//!
//! Configuration is handed in at session start; the gate never reads globals.

mod gate;
mod kill;
mod types;

pub use gate::{DailyLossCheck, HeatCheck, PortfolioRiskGate};
pub use kill::{evaluate_kill_conditions, KillContext, KillDecision, KillReason};
pub use types::{KillSwitchConfig, RegimeMultipliers, RiskConfig, RiskState, BPS_SCALE};
