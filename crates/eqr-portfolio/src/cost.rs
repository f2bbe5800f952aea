use eqr_schemas::Side;
use serde::{Deserialize, Serialize};

use crate::{i128_to_i64_clamp, mul_shares_price};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModelConfig {
    /// Adverse slippage applied to the quoted price, in basis points.
    pub slippage_bps: i64,
    pub commission_per_share_micros: i64,
    /// Floor for a non-empty order's commission.
    pub min_commission_micros: i64,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 5,
            commission_per_share_micros: 5_000,
            min_commission_micros: 1_000_000,
        }
    }
}

impl CostModelConfig {
    /// No slippage, no commission.
    pub fn zero() -> Self {
        Self {
            slippage_bps: 0,
            commission_per_share_micros: 0,
            min_commission_micros: 0,
        }
    }
}

/// Itemized cost of one fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCost {
    pub exec_price_micros: i64,
    /// |exec - quoted| * shares.
    pub slippage_micros: i64,
    pub commission_micros: i64,
    pub total_cost_micros: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CostModel {
    config: CostModelConfig,
}

impl CostModel {
    pub fn new(config: CostModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CostModelConfig {
        &self.config
    }

    /// Price a fill. Slippage is always adverse: BUY rounds the execution
    /// price up, SELL rounds it down, so BUY exec >= quoted >= SELL exec.
    pub fn price(&self, quoted_price_micros: i64, side: Side, shares: i64) -> ExecutionCost {
        let slip = self.config.slippage_bps.max(0) as i128;
        let quoted = quoted_price_micros as i128;

        let exec = match side {
            Side::Buy => {
                let num = quoted * (10_000 + slip);
                (num + 9_999).div_euclid(10_000)
            }
            Side::Sell => (quoted * (10_000 - slip).max(0)).div_euclid(10_000),
        };
        let exec_price_micros = i128_to_i64_clamp(exec);

        let shares = shares.max(0);
        let slippage_micros =
            i128_to_i64_clamp(mul_shares_price(shares, (exec_price_micros - quoted_price_micros).abs()));

        let commission_micros = if shares == 0 {
            0
        } else {
            let per_share = i128_to_i64_clamp(mul_shares_price(
                shares,
                self.config.commission_per_share_micros.max(0),
            ));
            per_share.max(self.config.min_commission_micros.max(0))
        };

        ExecutionCost {
            exec_price_micros,
            slippage_micros,
            commission_micros,
            total_cost_micros: slippage_micros.saturating_add(commission_micros),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: i64 = 1_000_000;

    #[test]
    fn buy_rounds_up_sell_rounds_down() {
        let m = CostModel::new(CostModelConfig {
            slippage_bps: 3,
            ..CostModelConfig::zero()
        });
        // 33.333333 * 1.0003 = 33.3433329999 before rounding
        let q = 33_333_333;
        let b = m.price(q, Side::Buy, 1);
        let s = m.price(q, Side::Sell, 1);
        assert_eq!(b.exec_price_micros, 33_343_333);
        assert_eq!(s.exec_price_micros, 33_323_333);
    }

    #[test]
    fn commission_floor_applies() {
        let m = CostModel::default();
        assert_eq!(m.price(100 * M, Side::Buy, 10).commission_micros, M);
        assert_eq!(m.price(100 * M, Side::Buy, 1_000).commission_micros, 5 * M);
        assert_eq!(m.price(100 * M, Side::Buy, 0).commission_micros, 0);
    }
}
