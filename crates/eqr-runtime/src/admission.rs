use eqr_risk::KillDecision;
use eqr_schemas::{TerminalState, Trade};

/// How a validated signal left the pending set. Every variant maps to exactly
/// one terminal state, so the match in the session loop is exhaustive.
#[derive(Clone, Debug, PartialEq)]
pub enum Admission {
    Executed(Trade),
    KillSwitch(KillDecision),
    Correlation(String),
    Heat(String),
    Sizing(String),
    Broker(String),
}

impl Admission {
    pub fn terminal_state(&self) -> TerminalState {
        match self {
            Admission::Executed(_) => TerminalState::Executed,
            Admission::KillSwitch(d) => d
                .terminal_state()
                .unwrap_or(TerminalState::RejectedByCircuitBreaker),
            Admission::Correlation(_) => TerminalState::RejectedByCorrelation,
            Admission::Heat(_) => TerminalState::RejectedByHeat,
            Admission::Sizing(_) => TerminalState::RejectedBySizing,
            Admission::Broker(_) => TerminalState::RejectedByBroker,
        }
    }

    /// Human-readable reason. `None` only for executions.
    pub fn reason(&self) -> Option<String> {
        match self {
            Admission::Executed(_) => None,
            Admission::KillSwitch(d) => Some(format!("kill switch: {}", d.describe())),
            Admission::Correlation(r)
            | Admission::Heat(r)
            | Admission::Sizing(r)
            | Admission::Broker(r) => Some(r.clone()),
        }
    }

    pub fn trade(&self) -> Option<&Trade> {
        match self {
            Admission::Executed(t) => Some(t),
            _ => None,
        }
    }
}
