//! Typed engine configuration.
//!
//! Every section is `#[serde(default)]`, so an empty YAML document yields the
//! stock thresholds (1% reconcile tolerance, 0.7 correlation, 8%/10%
//! drawdown, 2% daily loss, 30% heat). The default document doubles as the
//! key schema: a key it has no slot for is reported as unused.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use eqr_backtest::{BacktestConfig, MomentumConfig, WalkForwardConfig};
use eqr_broker::RetryPolicy;
use eqr_config::{
    load_layered_yaml, report_unused_keys, LoadedConfig, UnusedKeyPolicy, UnusedKeyReport,
};
use eqr_correlation::CorrelationConfig;
use eqr_drawdown::DrawdownConfig;
use eqr_portfolio::CostModelConfig;
use eqr_reconcile::ReconcileConfig;
use eqr_risk::RiskConfig;
use eqr_schemas::Regime;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub engine_id: String,
    /// Ledger cash when no ledger state exists yet.
    pub initial_cash_micros: i64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            engine_id: "EQR".to_string(),
            initial_cash_micros: 100_000_000_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Drawdown state, reconciler state, ledger, intent journal.
    pub state_dir: PathBuf,
    /// `<exports_dir>/<run_id>/` per session.
    pub exports_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
            exports_dir: PathBuf::from("exports"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSection {
    pub regime: Regime,
    pub walk_forward: WalkForwardConfig,
    pub momentum: MomentumConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub paths: PathsConfig,
    pub risk: RiskConfig,
    pub correlation: CorrelationConfig,
    pub cost: CostModelConfig,
    pub drawdown: DrawdownConfig,
    pub reconcile: ReconcileConfig,
    pub retry: RetryPolicy,
    pub backtest: BacktestSection,
}

impl EngineConfig {
    /// The default document: every key the typed config reads, nested the
    /// way YAML writes it.
    pub fn schema() -> Result<serde_json::Value> {
        serde_json::to_value(EngineConfig::default()).context("serialize default engine config")
    }

    /// Type the merged document, report unknown keys under `policy`, then
    /// validate.
    pub fn from_loaded(
        loaded: &LoadedConfig,
        policy: UnusedKeyPolicy,
    ) -> Result<(EngineConfig, UnusedKeyReport)> {
        let report = report_unused_keys(&loaded.config_json, &Self::schema()?, policy)?;
        let config: EngineConfig = loaded.typed()?;
        config.validate()?;
        Ok((config, report))
    }

    pub fn validate(&self) -> Result<()> {
        let dd = &self.drawdown;
        if dd.halt_threshold_bps <= 0 || dd.panic_threshold_bps <= dd.halt_threshold_bps {
            bail!(
                "drawdown thresholds must satisfy 0 < halt ({}) < panic ({})",
                dd.halt_threshold_bps,
                dd.panic_threshold_bps
            );
        }
        if !(dd.rampup_sizing_multiplier > 0.0 && dd.rampup_sizing_multiplier <= 1.0) {
            bail!(
                "drawdown.rampup_sizing_multiplier must be in (0, 1], got {}",
                dd.rampup_sizing_multiplier
            );
        }
        let c = &self.correlation;
        if !(c.threshold > 0.0 && c.threshold <= 1.0) {
            bail!("correlation.threshold must be in (0, 1], got {}", c.threshold);
        }
        if c.long_window < 2 || c.short_window < 2 {
            bail!("correlation windows need at least 2 returns");
        }
        let r = &self.risk;
        if r.position_size_bps <= 0 || r.base_heat_ceiling_bps <= 0 || r.daily_loss_limit_bps <= 0 {
            bail!("risk limits must be positive");
        }
        if self.reconcile.price_tolerance_bps < 0 || self.reconcile.cash_tolerance_bps < 0 {
            bail!("reconcile tolerances must be >= 0");
        }
        if self.cost.slippage_bps < 0
            || self.cost.commission_per_share_micros < 0
            || self.cost.min_commission_micros < 0
        {
            bail!("cost model parameters must be >= 0");
        }
        if self.engine.initial_cash_micros <= 0 {
            bail!("engine.initial_cash_micros must be positive");
        }
        Ok(())
    }

    /// The harness shares the live risk, correlation and cost sections.
    pub fn backtest_config(&self) -> BacktestConfig {
        BacktestConfig {
            initial_cash_micros: self.engine.initial_cash_micros,
            regime: self.backtest.regime,
            walk_forward: self.backtest.walk_forward.clone(),
            cost: self.cost.clone(),
            risk: self.risk.clone(),
            correlation: self.correlation.clone(),
        }
    }
}

/// Layered load + typed config in one call. No paths means stock defaults.
pub fn load_engine_config(
    paths: &[&str],
    policy: UnusedKeyPolicy,
) -> Result<(EngineConfig, LoadedConfig, UnusedKeyReport)> {
    let loaded = load_layered_yaml(paths)?;
    let (config, report) = EngineConfig::from_loaded(&loaded, policy)?;
    Ok((config, loaded, report))
}
