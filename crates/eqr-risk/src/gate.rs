use eqr_schemas::Regime;
use serde::{Deserialize, Serialize};

use crate::types::{heat_ceiling_bps, RiskConfig, RiskState, BPS_SCALE};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DailyLossCheck {
    Continue,
    Halt { loss_bps: i64, reason: String },
}

impl DailyLossCheck {
    pub fn is_halt(&self) -> bool {
        matches!(self, DailyLossCheck::Halt { .. })
    }
}

/// Detail behind a `can_add_position` answer, for rejection reasons.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatCheck {
    pub allowed: bool,
    /// (current_exposure + candidate) / portfolio, bps. i64::MAX when the
    /// portfolio value is not positive.
    pub projected_heat_bps: i64,
    pub ceiling_bps: i64,
    pub halted: bool,
}

impl HeatCheck {
    pub fn reason(&self) -> String {
        if self.halted {
            return "trading halted for session".to_string();
        }
        format!(
            "heat {:.2}% > ceiling {:.2}%",
            self.projected_heat_bps as f64 / 100.0,
            self.ceiling_bps as f64 / 100.0
        )
    }
}

/// Admission control. Never mutates exposure; the only state it owns is the
/// session halt and the active ceiling.
#[derive(Clone, Debug)]
pub struct PortfolioRiskGate {
    config: RiskConfig,
    state: RiskState,
}

impl PortfolioRiskGate {
    pub fn new(config: RiskConfig) -> Self {
        let state = RiskState::new(&config, Regime::Normal);
        Self { config, state }
    }

    /// Fresh gate for a session: baseline and regime set, not halted.
    pub fn start_session(config: RiskConfig, daily_start_value_micros: i64, regime: Regime) -> Self {
        let mut gate = Self::new(config);
        gate.set_regime(regime);
        gate.set_daily_baseline(daily_start_value_micros);
        gate
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state.trading_halted
    }

    /// Reset the daily-loss tracker (and the session halt) to a new baseline.
    pub fn set_daily_baseline(&mut self, value_micros: i64) {
        self.state.daily_start_value_micros = Some(value_micros);
        self.state.trading_halted = false;
        self.state.halt_reason = None;
    }

    pub fn set_regime(&mut self, regime: Regime) {
        self.state.regime = regime;
        self.state.heat_ceiling_bps = heat_ceiling_bps(&self.config, regime);
    }

    /// Halts for the rest of the session once the loss from the baseline
    /// exceeds the limit. No baseline is treated as a breach.
    pub fn check_daily_loss(&mut self, current_value_micros: i64) -> DailyLossCheck {
        if let Some(reason) = &self.state.halt_reason {
            return DailyLossCheck::Halt {
                loss_bps: self.loss_bps(current_value_micros),
                reason: reason.clone(),
            };
        }

        let Some(base) = self.state.daily_start_value_micros.filter(|b| *b > 0) else {
            let reason = "no positive daily baseline".to_string();
            self.halt(reason.clone());
            return DailyLossCheck::Halt {
                loss_bps: 0,
                reason,
            };
        };

        let loss = (base as i128) - (current_value_micros as i128);
        if loss * (BPS_SCALE as i128) > (self.config.daily_loss_limit_bps as i128) * (base as i128) {
            let loss_bps = self.loss_bps(current_value_micros);
            let reason = format!(
                "daily loss {:.2}% > limit {:.2}%",
                loss_bps as f64 / 100.0,
                self.config.daily_loss_limit_bps as f64 / 100.0
            );
            tracing::warn!(loss_bps, limit_bps = self.config.daily_loss_limit_bps, "daily loss halt");
            self.halt(reason.clone());
            return DailyLossCheck::Halt { loss_bps, reason };
        }
        DailyLossCheck::Continue
    }

    fn loss_bps(&self, current_value_micros: i64) -> i64 {
        match self.state.daily_start_value_micros {
            Some(base) if base > 0 => {
                let loss = (base as i128) - (current_value_micros as i128);
                (loss * (BPS_SCALE as i128) / (base as i128)) as i64
            }
            _ => 0,
        }
    }

    fn halt(&mut self, reason: String) {
        self.state.trading_halted = true;
        self.state.halt_reason = Some(reason);
    }

    pub fn can_add_position(
        &self,
        candidate_value_micros: i64,
        current_exposure_micros: i64,
        portfolio_value_micros: i64,
    ) -> bool {
        self.heat_check(
            candidate_value_micros,
            current_exposure_micros,
            portfolio_value_micros,
        )
        .allowed
    }

    pub fn heat_check(
        &self,
        candidate_value_micros: i64,
        current_exposure_micros: i64,
        portfolio_value_micros: i64,
    ) -> HeatCheck {
        let ceiling_bps = self.state.heat_ceiling_bps;
        let projected = (current_exposure_micros as i128) + (candidate_value_micros as i128);

        let projected_heat_bps = if portfolio_value_micros <= 0 {
            i64::MAX
        } else {
            let bps = projected * (BPS_SCALE as i128) / (portfolio_value_micros as i128);
            bps.clamp(i64::MIN as i128, i64::MAX as i128) as i64
        };

        let within = portfolio_value_micros > 0
            && projected * (BPS_SCALE as i128)
                <= (ceiling_bps as i128) * (portfolio_value_micros as i128);

        HeatCheck {
            allowed: within && !self.state.trading_halted,
            projected_heat_bps,
            ceiling_bps,
            halted: self.state.trading_halted,
        }
    }

    /// Target notional for a new position: portfolio * size fraction *
    /// drawdown sizing multiplier.
    pub fn target_position_value(&self, portfolio_value_micros: i64, sizing_multiplier: f64) -> i64 {
        if portfolio_value_micros <= 0 || !sizing_multiplier.is_finite() || sizing_multiplier <= 0.0 {
            return 0;
        }
        let base = (portfolio_value_micros as i128) * (self.config.position_size_bps as i128)
            / (BPS_SCALE as i128);
        (base as f64 * sizing_multiplier).floor() as i64
    }
}
