use chrono::{DateTime, Utc};
use eqr_schemas::{DrawdownMode, ReconcilerStatus, TerminalState};
use serde::{Deserialize, Serialize};

use crate::types::KillSwitchConfig;

/// Everything that can stop new admission, gathered by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillContext {
    pub reconciler: ReconcilerStatus,
    pub drawdown_mode: DrawdownMode,
    pub session_halted: bool,
    /// Newest market data timestamp, if any.
    pub data_as_of: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillReason {
    ReconcilerPaused,
    DrawdownHalt,
    DrawdownPanic,
    DailyLossHalt,
    ManualKill,
    StaleData { age_hours: i64 },
    NoMarketData,
}

impl KillReason {
    pub fn code(&self) -> &'static str {
        match self {
            KillReason::ReconcilerPaused => "KILL_RECONCILER_PAUSED",
            KillReason::DrawdownHalt => "KILL_DRAWDOWN_HALT",
            KillReason::DrawdownPanic => "KILL_DRAWDOWN_PANIC",
            KillReason::DailyLossHalt => "KILL_DAILY_LOSS_HALT",
            KillReason::ManualKill => "KILL_MANUAL",
            KillReason::StaleData { .. } => "KILL_STALE_DATA",
            KillReason::NoMarketData => "KILL_NO_MARKET_DATA",
        }
    }

    /// Terminal state a signal denied for this reason resolves to. A paused
    /// reconciler means the broker ledger is not trusted: broker rejection.
    pub fn terminal_state(&self) -> TerminalState {
        match self {
            KillReason::ReconcilerPaused => TerminalState::RejectedByBroker,
            _ => TerminalState::RejectedByCircuitBreaker,
        }
    }
}

impl std::fmt::Display for KillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillReason::StaleData { age_hours } => {
                write!(f, "{} (data age {age_hours}h)", self.code())
            }
            _ => f.write_str(self.code()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillDecision {
    Allow,
    Deny { reasons: Vec<KillReason> },
}

impl KillDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, KillDecision::Allow)
    }

    pub fn reasons(&self) -> &[KillReason] {
        match self {
            KillDecision::Allow => &[],
            KillDecision::Deny { reasons } => reasons,
        }
    }

    /// Terminal state for a denied signal. Broker rejection wins when the
    /// reconciler is among the reasons.
    pub fn terminal_state(&self) -> Option<TerminalState> {
        let reasons = self.reasons();
        if reasons.is_empty() {
            return None;
        }
        if reasons.iter().any(|r| r.terminal_state().is_broker_rejection()) {
            Some(TerminalState::RejectedByBroker)
        } else {
            Some(TerminalState::RejectedByCircuitBreaker)
        }
    }

    pub fn describe(&self) -> String {
        self.reasons()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Pure: same config + context, same answer. Reasons are sorted.
pub fn evaluate_kill_conditions(config: &KillSwitchConfig, ctx: &KillContext) -> KillDecision {
    let mut reasons = Vec::new();

    if ctx.reconciler == ReconcilerStatus::Paused {
        reasons.push(KillReason::ReconcilerPaused);
    }
    match ctx.drawdown_mode {
        DrawdownMode::Halt => reasons.push(KillReason::DrawdownHalt),
        DrawdownMode::Panic => reasons.push(KillReason::DrawdownPanic),
        DrawdownMode::Normal | DrawdownMode::Rampup => {}
    }
    if ctx.session_halted {
        reasons.push(KillReason::DailyLossHalt);
    }
    if config.manual_kill {
        reasons.push(KillReason::ManualKill);
    }
    match ctx.data_as_of {
        None => reasons.push(KillReason::NoMarketData),
        Some(as_of) => {
            let age_hours = (ctx.now - as_of).num_hours();
            if age_hours >= config.max_data_age_hours {
                reasons.push(KillReason::StaleData { age_hours });
            }
        }
    }

    if reasons.is_empty() {
        KillDecision::Allow
    } else {
        reasons.sort();
        KillDecision::Deny { reasons }
    }
}
