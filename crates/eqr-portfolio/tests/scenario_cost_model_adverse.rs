use eqr_portfolio::{CostModel, CostModelConfig};
use eqr_schemas::Side;

const M: i64 = 1_000_000;

#[test]
fn slippage_is_always_adverse() {
    let model = CostModel::default();
    for quoted in [1, 999_999, 12_345_678, 100 * M, 4_321 * M] {
        for shares in [1, 7, 250] {
            let buy = model.price(quoted, Side::Buy, shares);
            let sell = model.price(quoted, Side::Sell, shares);
            assert!(buy.exec_price_micros >= quoted, "buy {quoted}");
            assert!(sell.exec_price_micros <= quoted, "sell {quoted}");
            assert_eq!(
                buy.total_cost_micros,
                buy.slippage_micros + buy.commission_micros
            );
        }
    }
}

#[test]
fn five_bps_on_100_dollars() {
    let model = CostModel::new(CostModelConfig {
        slippage_bps: 5,
        commission_per_share_micros: 5_000,
        min_commission_micros: M,
    });
    let c = model.price(100 * M, Side::Buy, 100);
    assert_eq!(c.exec_price_micros, 100_050_000);
    assert_eq!(c.slippage_micros, 5 * M);
    assert_eq!(c.commission_micros, M);
    assert_eq!(c.total_cost_micros, 6 * M);

    let c = model.price(100 * M, Side::Sell, 100);
    assert_eq!(c.exec_price_micros, 99_950_000);
}

#[test]
fn identical_inputs_identical_outputs() {
    let a = CostModel::default();
    let b = CostModel::new(CostModelConfig::default());
    assert_eq!(
        a.price(37_123_456, Side::Sell, 33),
        b.price(37_123_456, Side::Sell, 33)
    );
}

#[test]
fn zero_model_is_free() {
    let c = CostModel::new(CostModelConfig::zero()).price(100 * M, Side::Buy, 10);
    assert_eq!(c.exec_price_micros, 100 * M);
    assert_eq!(c.total_cost_micros, 0);
}
