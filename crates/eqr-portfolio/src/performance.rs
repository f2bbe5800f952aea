//! Performance metrics.
//!
//! One set of formulas for the backtest harness and the live daily report:
//!
//! - returns: simple period returns of the equity curve
//! - Sharpe: sqrt(252) * mean / population std (0 when std == 0)
//! - Sortino: sqrt(252) * mean / downside deviation, where downside deviation
//!   is sqrt(mean(min(r, 0)^2)) over all periods (0 when it is 0)
//! - max drawdown: largest peak-to-trough decline of the equity curve, as a
//!   fraction of the peak
//! - profit factor: gross win / |gross loss| over closed trades, 0 if no losses

use serde::{Deserialize, Serialize};

use eqr_schemas::from_micros;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    /// Mean winning trade, dollars.
    pub avg_win: f64,
    /// Mean losing trade, dollars (negative or 0).
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub num_periods: usize,
    pub num_trades: usize,
}

/// Simple returns between consecutive equity points. A non-positive base
/// contributes a 0 return.
pub fn returns_from_equity(equity_micros: &[i64]) -> Vec<f64> {
    equity_micros
        .windows(2)
        .map(|w| {
            if w[0] <= 0 {
                0.0
            } else {
                (w[1] - w[0]) as f64 / w[0] as f64
            }
        })
        .collect()
}

pub fn max_drawdown(equity_micros: &[i64]) -> f64 {
    let Some(first) = equity_micros.first() else {
        return 0.0;
    };
    let mut peak = *first as f64;
    let mut max_dd = 0.0_f64;
    for &e in equity_micros {
        let e = e as f64;
        if e > peak {
            peak = e;
        }
        if peak > 0.0 {
            let dd = (peak - e) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn population_std(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|r| (r - m).powi(2)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

fn downside_deviation(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let sq = xs.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / xs.len() as f64;
    sq.sqrt()
}

/// Metrics from an equity curve (one point per session) and the realized
/// P&L of each closed trade.
pub fn compute_performance(equity_micros: &[i64], trade_pnls_micros: &[i64]) -> PerformanceMetrics {
    let returns = returns_from_equity(equity_micros);
    let ann = TRADING_DAYS_PER_YEAR.sqrt();

    let total_return = match (equity_micros.first(), equity_micros.last()) {
        (Some(&start), Some(&end)) if start > 0 => (end - start) as f64 / start as f64,
        _ => 0.0,
    };

    let annualized_return = if returns.is_empty() || total_return <= -1.0 {
        0.0
    } else {
        (1.0 + total_return).powf(TRADING_DAYS_PER_YEAR / returns.len() as f64) - 1.0
    };

    let mu = mean(&returns);
    let sigma = population_std(&returns);
    let sharpe = if sigma > 0.0 { ann * mu / sigma } else { 0.0 };
    let dd = downside_deviation(&returns);
    let sortino = if dd > 0.0 { ann * mu / dd } else { 0.0 };

    let wins: Vec<i64> = trade_pnls_micros.iter().copied().filter(|p| *p > 0).collect();
    let losses: Vec<i64> = trade_pnls_micros.iter().copied().filter(|p| *p < 0).collect();
    let gross_win: i64 = wins.iter().sum();
    let gross_loss: i64 = losses.iter().sum();

    let num_trades = trade_pnls_micros.len();
    let win_rate = if num_trades == 0 {
        0.0
    } else {
        wins.len() as f64 / num_trades as f64
    };
    let avg_win = if wins.is_empty() {
        0.0
    } else {
        from_micros(gross_win) / wins.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        from_micros(gross_loss) / losses.len() as f64
    };
    let profit_factor = if gross_loss == 0 {
        0.0
    } else {
        gross_win as f64 / (gross_loss as f64).abs()
    };

    PerformanceMetrics {
        total_return,
        annualized_return,
        annualized_volatility: sigma * ann,
        sharpe,
        sortino,
        max_drawdown: max_drawdown(equity_micros),
        win_rate,
        avg_win,
        avg_loss,
        profit_factor,
        num_periods: returns.len(),
        num_trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_curve_has_zero_ratios() {
        let m = compute_performance(&[100, 100, 100], &[]);
        assert_eq!(m.sharpe, 0.0);
        assert_eq!(m.sortino, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.profit_factor, 0.0);
    }

    #[test]
    fn drawdown_measured_from_running_peak() {
        // peak 120, trough 90 => 25%
        let dd = max_drawdown(&[100, 120, 110, 90, 130]);
        assert!((dd - 0.25).abs() < 1e-12);
    }
}
