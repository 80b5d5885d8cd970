use mdk_config::{load_layered_yaml, load_layered_yaml_from_strings};
use std::io::Write;

const BASE_YAML: &str = r#"
account:
  currency: USD
  cash:
    - currency: USD
      amount: 100000
securities:
  - symbol: SPY
    buying_power:
      kind: margin
      leverage: 2
margin_call:
  warning_threshold: 0.05
"#;

const BASE_YAML_REORDERED: &str = r#"
margin_call:
  warning_threshold: 0.05
securities:
  - buying_power:
      leverage: 2
      kind: margin
    symbol: SPY
account:
  cash:
    - amount: 100000
      currency: USD
  currency: USD
"#;

const OVERLAY_YAML: &str = r#"
margin_call:
  warning_threshold: 0.10
pdt:
  enabled: false
"#;

#[test]
fn same_input_produces_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();

    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();

    assert_eq!(
        original.config_hash, reordered.config_hash,
        "reordering keys in YAML must not change the hash"
    );
}

#[test]
fn overlay_overrides_and_changes_hash() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let merged = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();

    assert_ne!(base.config_hash, merged.config_hash);

    let threshold = merged
        .config_json
        .pointer("/margin_call/warning_threshold")
        .and_then(|v| v.as_f64())
        .unwrap();
    assert!((threshold - 0.10).abs() < 1e-12);

    // Untouched base keys survive the merge.
    assert_eq!(
        merged.config_json.pointer("/securities/0/symbol").unwrap(),
        "SPY"
    );
    assert_eq!(
        merged.config_json.pointer("/pdt/enabled").unwrap(),
        &serde_json::Value::Bool(false)
    );
}

#[test]
fn files_load_like_strings() {
    let dir = tempfile::tempdir().unwrap();
    let base_path = dir.path().join("base.yaml");
    let overlay_path = dir.path().join("overlay.yaml");
    std::fs::File::create(&base_path)
        .unwrap()
        .write_all(BASE_YAML.as_bytes())
        .unwrap();
    std::fs::File::create(&overlay_path)
        .unwrap()
        .write_all(OVERLAY_YAML.as_bytes())
        .unwrap();

    let from_files = load_layered_yaml(&[
        base_path.to_str().unwrap(),
        overlay_path.to_str().unwrap(),
    ])
    .unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);
}

#[test]
fn missing_file_is_an_error_naming_the_path() {
    let err = load_layered_yaml(&["/definitely/not/here.yaml"]).unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here.yaml"));
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&["{}"]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}
