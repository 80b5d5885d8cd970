//! Command handler modules for mdk-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod query;
pub mod run;

use std::str::FromStr;

use anyhow::{Context, Result};
use mdk_config::{report_unused_keys, ConfigMode, EngineConfig, LoadedConfig, UnusedKeyPolicy};
use rust_decimal::Decimal;
use tracing::warn;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// A layered config, checked for unused keys and parsed.
pub struct PreparedConfig {
    pub loaded: LoadedConfig,
    pub engine: EngineConfig,
}

/// Load `paths` in merge order, report unused keys for `mode`, and parse
/// the engine config.
pub fn prepare_config(
    paths: &[String],
    mode: ConfigMode,
    fail_on_unused_keys: bool,
) -> Result<PreparedConfig> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = mdk_config::load_layered_yaml(&path_refs)?;

    let policy = if fail_on_unused_keys {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(mode, &loaded.config_json, policy)?;
    if !report.is_clean() {
        warn!(
            mode = %report.mode,
            unused = ?report.unused_leaf_pointers,
            "config contains keys this command does not read"
        );
    }

    let engine = EngineConfig::from_loaded(&loaded)?;
    Ok(PreparedConfig { loaded, engine })
}

/// Parse an exact decimal CLI argument.
pub fn parse_decimal_arg(flag: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim()).with_context(|| format!("invalid {flag}: {raw:?}"))
}

/// Pretty JSON to stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output json failed")?;
    println!("{json}");
    Ok(())
}
