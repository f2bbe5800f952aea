use eqr_schemas::BrokerSnapshot;

use crate::types::{Discrepancy, LocalBook, ReconcileConfig, ReconcileReport};

/// |local - broker| <= tol_bps * |broker| / 10000. A zero broker value only
/// matches a zero local value.
pub fn within_tolerance(local: i64, broker: i64, tol_bps: i64) -> bool {
    let diff = (local as i128 - broker as i128).abs();
    diff * 10_000 <= (tol_bps as i128) * (broker as i128).abs()
}

/// Pure comparison of the local book against a broker snapshot.
///
/// - shares must match exactly
/// - avg price and cash within the configured relative tolerance
/// - every broker symbol must exist locally
/// - open order ids are diffed when the local set is supplied
pub fn reconcile(cfg: &ReconcileConfig, local: &LocalBook, broker: &BrokerSnapshot) -> ReconcileReport {
    let mut out = Vec::new();

    for (symbol, lp) in &local.positions {
        if lp.shares == 0 {
            continue;
        }
        match broker.positions.get(symbol) {
            None => out.push(Discrepancy::MissingAtBroker {
                symbol: symbol.clone(),
                local_shares: lp.shares,
            }),
            Some(bp) => {
                if bp.shares != lp.shares {
                    out.push(Discrepancy::ShareMismatch {
                        symbol: symbol.clone(),
                        local_shares: lp.shares,
                        broker_shares: bp.shares,
                    });
                }
                if !within_tolerance(lp.avg_price_micros, bp.avg_price_micros, cfg.price_tolerance_bps) {
                    out.push(Discrepancy::AvgPriceDrift {
                        symbol: symbol.clone(),
                        local_micros: lp.avg_price_micros,
                        broker_micros: bp.avg_price_micros,
                    });
                }
            }
        }
    }

    for (symbol, bp) in &broker.positions {
        let known = local.positions.get(symbol).is_some_and(|lp| lp.shares != 0);
        if bp.shares != 0 && !known {
            out.push(Discrepancy::UnexpectedBrokerPosition {
                symbol: symbol.clone(),
                broker_shares: bp.shares,
            });
        }
    }

    if !within_tolerance(local.cash_micros, broker.cash_micros, cfg.cash_tolerance_bps) {
        out.push(Discrepancy::CashDrift {
            local_micros: local.cash_micros,
            broker_micros: broker.cash_micros,
        });
    }

    if cfg.check_open_orders {
        if let Some(local_orders) = &local.open_order_ids {
            for id in broker.open_order_ids.difference(local_orders) {
                out.push(Discrepancy::PhantomOrder { order_id: id.clone() });
            }
            for id in local_orders.difference(&broker.open_order_ids) {
                out.push(Discrepancy::StuckOrder { order_id: id.clone() });
            }
        }
    }

    out.sort();
    ReconcileReport {
        kind: broker.kind,
        captured_at: broker.captured_at,
        passed: out.is_empty(),
        discrepancies: out,
    }
}
