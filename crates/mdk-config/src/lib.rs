//! mdk-config
//!
//! Layered YAML configuration for the margin desk.
//! - Layers merge in order; later documents override earlier ones
//! - The merged document is hashed over its canonical JSON form
//! - Unused keys are reported against a consumed-pointer registry
//! - `EngineConfig` is the typed view that builds an `Account`

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

mod consumption;
mod engine;

pub use consumption::{
    consumed_pointers_for_mode, report_unused_keys, ConfigMode, UnusedKeyPolicy, UnusedKeyReport,
};
pub use engine::{
    AccountConfig, BacktestConfig, BuyingPowerConfig, CashConfig, ConversionConfig, EngineConfig,
    MarginCallConfig, MarketConfig, PdtConfig, SecurityConfig, SettlementConfig,
};

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Hex SHA-256 of `canonical_json`.
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for (i, raw) in yaml_docs.iter().enumerate() {
        let v_yaml: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {i}"))?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; anything else (including arrays) is replaced
/// wholesale by the later layer.
fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

// serde_json's default map is ordered by key, so compact serialization is
// already canonical.
fn canonicalize_json(v: &Value) -> Result<String> {
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_are_replaced_not_concatenated() {
        let loaded = load_layered_yaml_from_strings(&[
            "securities: [{symbol: SPY}, {symbol: QQQ}]",
            "securities: [{symbol: IWM}]",
        ])
        .unwrap();
        let arr = loaded.config_json.pointer("/securities").unwrap();
        assert_eq!(arr.as_array().unwrap().len(), 1);
        assert_eq!(
            loaded.config_json.pointer("/securities/0/symbol").unwrap(),
            "IWM"
        );
    }

    #[test]
    fn invalid_layer_is_named() {
        let err = load_layered_yaml_from_strings(&["a: 1", "a: [unclosed"]).unwrap_err();
        assert!(format!("{err:#}").contains("layer 1"));
    }
}
