use eqr_schemas::Regime;
use serde::{Deserialize, Serialize};

/// 1.0 in basis points.
pub const BPS_SCALE: i64 = 10_000;

/// Heat-ceiling multipliers per regime, in bps of the base ceiling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeMultipliers {
    pub normal_bps: i64,
    pub high_vol_bps: i64,
    pub crisis_bps: i64,
}

impl Default for RegimeMultipliers {
    fn default() -> Self {
        // 30% base => 30% / 25% / 20%.
        Self {
            normal_bps: 10_000,
            high_vol_bps: 8_334,
            crisis_bps: 6_667,
        }
    }
}

impl RegimeMultipliers {
    pub fn for_regime(&self, regime: Regime) -> i64 {
        match regime {
            Regime::Normal => self.normal_bps,
            Regime::HighVol => self.high_vol_bps,
            Regime::Crisis => self.crisis_bps,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSwitchConfig {
    /// Operator kill switch. When set, nothing is admitted.
    pub manual_kill: bool,
    /// Market data older than this denies admission.
    pub max_data_age_hours: i64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            manual_kill: false,
            max_data_age_hours: 72,
        }
    }
}

/// Risk configuration (thresholds + policies).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Max (exposure / portfolio value) in NORMAL regime, bps.
    pub base_heat_ceiling_bps: i64,
    /// Session halts once the loss from the daily baseline exceeds this, bps.
    pub daily_loss_limit_bps: i64,
    /// Fraction of portfolio value targeted per new position, bps (before the
    /// drawdown sizing multiplier).
    pub position_size_bps: i64,
    pub regime_multipliers: RegimeMultipliers,
    pub kill_switch: KillSwitchConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_heat_ceiling_bps: 3_000,
            daily_loss_limit_bps: 200,
            position_size_bps: 500,
            regime_multipliers: RegimeMultipliers::default(),
            kill_switch: KillSwitchConfig::default(),
        }
    }
}

/// Session-scoped risk state. Reset at the daily-start snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    pub regime: Regime,
    pub heat_ceiling_bps: i64,
    pub daily_start_value_micros: Option<i64>,
    /// Sticky for the session once set.
    pub trading_halted: bool,
    pub halt_reason: Option<String>,
}

impl RiskState {
    pub fn new(config: &RiskConfig, regime: Regime) -> Self {
        Self {
            regime,
            heat_ceiling_bps: heat_ceiling_bps(config, regime),
            daily_start_value_micros: None,
            trading_halted: false,
            halt_reason: None,
        }
    }
}

pub(crate) fn heat_ceiling_bps(config: &RiskConfig, regime: Regime) -> i64 {
    let mult = config.regime_multipliers.for_regime(regime) as i128;
    ((config.base_heat_ceiling_bps as i128) * mult / (BPS_SCALE as i128)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ceilings_per_regime() {
        let c = RiskConfig::default();
        assert_eq!(heat_ceiling_bps(&c, Regime::Normal), 3_000);
        assert_eq!(heat_ceiling_bps(&c, Regime::HighVol), 2_500);
        assert_eq!(heat_ceiling_bps(&c, Regime::Crisis), 2_000);
    }
}
