use chrono::{DateTime, Utc};
use eqr_schemas::DrawdownMode;
use serde::{Deserialize, Serialize};

use crate::health::{run_health_checks, HealthCheckInput, HealthReport};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawdownConfig {
    pub halt_threshold_bps: i64,
    pub panic_threshold_bps: i64,
    pub halt_cooldown_sessions: u64,
    pub panic_cooldown_sessions: u64,
    /// Added to the cooldown when the resume checks fail.
    pub failed_check_extension_sessions: u64,
    pub rampup_sessions: u64,
    pub rampup_sizing_multiplier: f64,
    /// Close every broker position on entering PANIC.
    pub force_flatten_on_panic: bool,
    pub max_data_age_hours: i64,
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self {
            halt_threshold_bps: 800,
            panic_threshold_bps: 1_000,
            halt_cooldown_sessions: 10,
            panic_cooldown_sessions: 20,
            failed_check_extension_sessions: 5,
            rampup_sessions: 5,
            rampup_sizing_multiplier: 0.5,
            force_flatten_on_panic: false,
            max_data_age_hours: 72,
        }
    }
}

/// Long-lived breaker state. Persisted after every evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawdownState {
    pub mode: DrawdownMode,
    pub peak_value_micros: i64,
    /// Session index at which HALT/PANIC may attempt to resume.
    pub cooldown_end: Option<u64>,
    /// Session index at which RAMPUP returns to NORMAL.
    pub rampup_end: Option<u64>,
    pub sizing_multiplier: f64,
    pub last_session_index: Option<u64>,
    pub last_value_micros: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for DrawdownState {
    fn default() -> Self {
        Self {
            mode: DrawdownMode::Normal,
            peak_value_micros: 0,
            cooldown_end: None,
            rampup_end: None,
            sizing_multiplier: 1.0,
            last_session_index: None,
            last_value_micros: None,
            updated_at: None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    Halt,
    Panic,
    /// HALT deepened past the panic threshold.
    Escalate,
    /// Cooldown elapsed but a health check failed.
    CooldownExtended,
    Rampup,
    Resume,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub from: DrawdownMode,
    pub to: DrawdownMode,
    pub session_index: u64,
    pub at: DateTime<Utc>,
    pub portfolio_value_micros: i64,
    pub peak_value_micros: i64,
    pub drawdown_bps: i64,
    pub reason: String,
    pub health: Option<HealthReport>,
    pub cooldown_end: Option<u64>,
    pub rampup_end: Option<u64>,
    pub sizing_multiplier: f64,
}

/// (peak - value) / peak in bps, floored. 0 when there is no positive peak
/// or the value is at/above it.
pub fn drawdown_bps(peak_micros: i64, value_micros: i64) -> i64 {
    if peak_micros <= 0 || value_micros >= peak_micros {
        return 0;
    }
    let dd = (peak_micros as i128 - value_micros as i128) * 10_000 / peak_micros as i128;
    dd as i64
}

fn pct(bps: i64) -> String {
    format!("{:.2}%", bps as f64 / 100.0)
}

/// Advance the breaker by one session evaluation. Pure: the caller persists.
pub fn step(
    config: &DrawdownConfig,
    state: &mut DrawdownState,
    session_index: u64,
    portfolio_value_micros: i64,
    health: &HealthCheckInput,
    at: DateTime<Utc>,
) -> Option<Transition> {
    if state.peak_value_micros <= 0 || portfolio_value_micros > state.peak_value_micros {
        state.peak_value_micros = portfolio_value_micros;
    }
    state.last_session_index = Some(session_index);
    state.last_value_micros = Some(portfolio_value_micros);
    state.updated_at = Some(at);

    let dd = drawdown_bps(state.peak_value_micros, portfolio_value_micros);
    let from = state.mode;
    let cooldown_elapsed = state.cooldown_end.map_or(true, |end| session_index >= end);

    let (kind, reason, report) = match state.mode {
        // RAMPUP trades at reduced size but still answers to both thresholds,
        // measured from the peak re-baselined on resume.
        DrawdownMode::Normal | DrawdownMode::Rampup if dd >= config.panic_threshold_bps => {
            enter(state, DrawdownMode::Panic, session_index + config.panic_cooldown_sessions);
            (
                TransitionKind::Panic,
                format!(
                    "drawdown {} >= panic threshold {}{}",
                    pct(dd),
                    pct(config.panic_threshold_bps),
                    during(from)
                ),
                None,
            )
        }
        DrawdownMode::Normal | DrawdownMode::Rampup if dd >= config.halt_threshold_bps => {
            enter(state, DrawdownMode::Halt, session_index + config.halt_cooldown_sessions);
            (
                TransitionKind::Halt,
                format!(
                    "drawdown {} >= halt threshold {}{}",
                    pct(dd),
                    pct(config.halt_threshold_bps),
                    during(from)
                ),
                None,
            )
        }
        DrawdownMode::Normal => return None,
        DrawdownMode::Halt if dd >= config.panic_threshold_bps => {
            enter(state, DrawdownMode::Panic, session_index + config.panic_cooldown_sessions);
            (
                TransitionKind::Escalate,
                format!(
                    "drawdown {} >= panic threshold {} while halted",
                    pct(dd),
                    pct(config.panic_threshold_bps)
                ),
                None,
            )
        }
        DrawdownMode::Halt | DrawdownMode::Panic => {
            if !cooldown_elapsed {
                return None;
            }
            let report = run_health_checks(health, config.max_data_age_hours);
            if report.passed {
                state.mode = DrawdownMode::Rampup;
                state.cooldown_end = None;
                state.rampup_end = Some(session_index + config.rampup_sessions);
                state.sizing_multiplier = config.rampup_sizing_multiplier;
                // Re-baseline so the loss that tripped the breaker does not
                // immediately re-trip it.
                state.peak_value_micros = portfolio_value_micros;
                (
                    TransitionKind::Rampup,
                    format!("cooldown elapsed, health checks passed; sizing x{}", config.rampup_sizing_multiplier),
                    Some(report),
                )
            } else {
                let end = state.cooldown_end.unwrap_or(session_index).max(session_index)
                    + config.failed_check_extension_sessions;
                state.cooldown_end = Some(end);
                (
                    TransitionKind::CooldownExtended,
                    format!("health checks failed ({}); cooldown extended to session {end}", report.describe()),
                    Some(report),
                )
            }
        }
        DrawdownMode::Rampup => {
            let done = state.rampup_end.map_or(true, |end| session_index >= end);
            if !done {
                return None;
            }
            state.mode = DrawdownMode::Normal;
            state.rampup_end = None;
            state.sizing_multiplier = 1.0;
            (TransitionKind::Resume, "ramp-up complete".to_string(), None)
        }
    };

    Some(Transition {
        kind,
        from,
        to: state.mode,
        session_index,
        at,
        portfolio_value_micros,
        peak_value_micros: state.peak_value_micros,
        drawdown_bps: dd,
        reason,
        health: report,
        cooldown_end: state.cooldown_end,
        rampup_end: state.rampup_end,
        sizing_multiplier: state.sizing_multiplier,
    })
}

fn during(mode: DrawdownMode) -> &'static str {
    match mode {
        DrawdownMode::Rampup => " during ramp-up",
        _ => "",
    }
}

fn enter(state: &mut DrawdownState, mode: DrawdownMode, cooldown_end: u64) {
    state.mode = mode;
    state.cooldown_end = Some(cooldown_end);
    state.rampup_end = None;
    state.sizing_multiplier = 0.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawdown_bps_floors() {
        assert_eq!(drawdown_bps(100_000, 92_000), 800);
        assert_eq!(drawdown_bps(100_000, 92_001), 799);
        assert_eq!(drawdown_bps(100_000, 120_000), 0);
        assert_eq!(drawdown_bps(0, 5), 0);
    }

    #[test]
    fn rampup_rechecks_thresholds_from_the_new_peak() {
        let cfg = DrawdownConfig::default();
        let at = Utc::now();
        let mut s = DrawdownState {
            mode: DrawdownMode::Rampup,
            peak_value_micros: 90_000,
            rampup_end: Some(20),
            sizing_multiplier: 0.5,
            ..DrawdownState::default()
        };

        assert!(step(&cfg, &mut s, 16, 85_000, &HealthCheckInput::healthy(at), at).is_none());
        assert_eq!(s.mode, DrawdownMode::Rampup);

        let t = step(&cfg, &mut s, 17, 82_800, &HealthCheckInput::healthy(at), at).expect("halt");
        assert_eq!(t.kind, TransitionKind::Halt);
        assert_eq!((t.from, t.to), (DrawdownMode::Rampup, DrawdownMode::Halt));
        assert_eq!(t.drawdown_bps, 800);
        assert!(t.reason.contains("during ramp-up"));
        assert_eq!(s.rampup_end, None);
        assert_eq!(s.cooldown_end, Some(27));
        assert_eq!(s.sizing_multiplier, 0.0);

        let mut s = DrawdownState {
            mode: DrawdownMode::Rampup,
            peak_value_micros: 90_000,
            rampup_end: Some(20),
            sizing_multiplier: 0.5,
            ..DrawdownState::default()
        };
        let t = step(&cfg, &mut s, 17, 81_000, &HealthCheckInput::healthy(at), at).expect("panic");
        assert_eq!(t.kind, TransitionKind::Panic);
        assert_eq!(s.mode, DrawdownMode::Panic);
    }
}
