use eqr_config::{load_layered_yaml_from_strings, report_unused_keys, UnusedKeyPolicy};

const BASE_YAML: &str = r#"
engine:
  engine_id: "MAIN"
risk:
  daily_loss_limit_bps: 200
  base_heat_ceiling_bps: 3000
reconcile:
  price_tolerance_bps: 100
"#;

const BASE_YAML_REORDERED: &str = r#"
reconcile:
  price_tolerance_bps: 100
risk:
  base_heat_ceiling_bps: 3000
  daily_loss_limit_bps: 200
engine:
  engine_id: "MAIN"
"#;

const OVERLAY_YAML: &str = r#"
risk:
  daily_loss_limit_bps: 150
"#;

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64);
}

#[test]
fn later_layers_override_earlier_ones() {
    let merged = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(
        merged.config_json.pointer("/risk/daily_loss_limit_bps"),
        Some(&serde_json::json!(150))
    );
    // untouched siblings survive the merge
    assert_eq!(
        merged.config_json.pointer("/risk/base_heat_ceiling_bps"),
        Some(&serde_json::json!(3000))
    );

    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_ne!(base.config_hash, merged.config_hash);
}

#[test]
fn secret_literal_aborts_loading() {
    let yaml = r#"
broker:
  api_key: "sk_live_0123456789abcdef"
"#;
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err();
    assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));

    let ok = r#"
broker:
  api_key_env: "BROKER_API_KEY"
"#;
    assert!(load_layered_yaml_from_strings(&[ok]).is_ok());
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "engine": {"engine_id": "EQR"},
        "risk": {"daily_loss_limit_bps": 200, "base_heat_ceiling_bps": 3000},
        "reconcile": {"price_tolerance_bps": 100},
    })
}

#[test]
fn unused_keys_warn_or_fail() {
    let yaml = r#"
risk:
  daily_loss_limit_bps: 200
  daily_los_limit_bps: 100
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();

    let report =
        report_unused_keys(&loaded.config_json, &schema(), UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(report.pointers(), vec!["/risk/daily_los_limit_bps"]);
    assert_eq!(
        report.unknown[0].expected,
        vec!["base_heat_ceiling_bps", "daily_loss_limit_bps"]
    );

    let err = report_unused_keys(&loaded.config_json, &schema(), UnusedKeyPolicy::Fail)
        .unwrap_err()
        .to_string();
    assert!(err.contains("CONFIG_UNUSED_KEYS"));
    assert!(err.contains("/risk/daily_los_limit_bps (expected one of: base_heat_ceiling_bps, daily_loss_limit_bps)"));
}

#[test]
fn section_with_a_shared_stem_is_its_own_unknown_section() {
    let yaml = r#"
risk:
  daily_loss_limit_bps: 150
riskless:
  c: 3
  d:
    e: 4
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report =
        report_unused_keys(&loaded.config_json, &schema(), UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(report.pointers(), vec!["/riskless"]);
    assert_eq!(report.unknown[0].expected, vec!["engine", "reconcile", "risk"]);
}

#[test]
fn full_base_layer_is_clean() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let report =
        report_unused_keys(&loaded.config_json, &schema(), UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean());
}
