//! Consumed-key registry and unused-key report.
//!
//! "Consumed pointers" are JSON-pointer prefixes. A leaf under any consumed
//! prefix is consumed; every other leaf is unused. A `*` token matches any
//! single token, which is how array elements are covered:
//! - "/securities/*/symbol" consumes "/securities/3/symbol"
//! - "/account/cash" consumes "/account/cash/0/amount"
//!
//! The registry lists what `EngineConfig` actually reads. A typo such as
//! `securities[0].leverag` therefore shows up as unused instead of silently
//! falling back to a default.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// `mdk run`: the account plus the `backtest` section.
    Backtest,
    /// `mdk buying-power`: the account only.
    Query,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::Backtest => "BACKTEST",
            ConfigMode::Query => "QUERY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub mode: String,
    /// Consumed JSON-pointer prefixes used for this analysis (sorted, unique)
    pub consumed_prefixes: Vec<String>,
    /// Unused leaf pointers (sorted)
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

static ACCOUNT_POINTERS: &[&str] = &[
    "/account/currency",
    "/account/cash/*/currency",
    "/account/cash/*/amount",
    "/account/cash/*/rate",
    "/account/conversions/*/currency",
    "/account/conversions/*/symbol",
    "/account/conversions/*/inverted",
    "/markets/*/name",
    "/markets/*/time_zone",
    "/markets/*/open",
    "/markets/*/close",
    "/markets/*/weekdays_only",
    "/markets/*/settlement",
    "/securities/*/symbol",
    "/securities/*/market",
    "/securities/*/quote_currency",
    "/securities/*/lot_size",
    "/securities/*/multiplier",
    "/securities/*/buying_power",
    "/securities/*/required_free_buying_power_percent",
    "/securities/*/settlement",
    "/securities/*/fees",
    "/securities/*/data",
    "/margin_call/warning_threshold",
    "/margin_call/liquidation_tolerance",
    "/pdt/enabled",
    "/pdt/window_days",
    "/pdt/max_day_trades_in_window",
    "/pdt/min_equity",
];

static BACKTEST_POINTERS: &[&str] = &[
    "/backtest/issue_warning_only",
    "/backtest/halt_on_unresolved_margin_call",
];

/// Registry of consumed JSON-pointer prefixes per mode.
pub fn consumed_pointers_for_mode(mode: ConfigMode) -> Vec<&'static str> {
    let mut out = ACCOUNT_POINTERS.to_vec();
    if mode == ConfigMode::Backtest {
        out.extend_from_slice(BACKTEST_POINTERS);
    }
    out
}

/// Produce an unused-key report for a given mode.
/// If `policy == Fail`, returns an error when unused keys exist.
/// If `policy == Warn`, always returns Ok(report).
pub fn report_unused_keys(
    mode: ConfigMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = consumed_pointers_for_mode(mode)
        .into_iter()
        .map(normalize_pointer)
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|leaf| !consumed_prefixes.iter().any(|cp| is_prefix_pointer(cp, leaf)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        mode: mode.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS (mode={}): {} unused config leaf key(s) detected. \
            Remove them or update the consumed registry. First few: {}",
            report.mode,
            report.unused_leaf_pointers.len(),
            preview_list(&report.unused_leaf_pointers, 12)
        );
    }

    Ok(report)
}

/// Leading "/" required; no trailing "/" unless it is the root.
fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if s.is_empty() {
        return "/".to_string();
    }
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    s
}

/// True if `prefix` covers `leaf`, token by token.
///
/// - "/" covers everything
/// - "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc"
/// - "*" matches any single token
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    let mut leaf_tokens = leaf.split('/').skip(1);
    for p in prefix.split('/').skip(1) {
        match leaf_tokens.next() {
            Some(l) if p == "*" || p == l => {}
            _ => return false,
        }
    }
    true
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn preview_list(items: &[String], n: usize) -> String {
    let take = items.iter().take(n).cloned().collect::<Vec<_>>();
    format!("{:?}", take)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_respects_token_boundaries() {
        assert!(is_prefix_pointer("/a/b", "/a/b"));
        assert!(is_prefix_pointer("/a/b", "/a/b/c"));
        assert!(!is_prefix_pointer("/a/b", "/a/bc"));
        assert!(!is_prefix_pointer("/a/b/c", "/a/b"));
        assert!(is_prefix_pointer("/", "/anything"));
    }

    #[test]
    fn wildcard_matches_one_token() {
        assert!(is_prefix_pointer("/securities/*/symbol", "/securities/12/symbol"));
        assert!(!is_prefix_pointer("/securities/*/symbol", "/securities/12/sym"));
        assert!(is_prefix_pointer(
            "/securities/*/fees",
            "/securities/0/fees/per_unit"
        ));
    }

    #[test]
    fn escaped_tokens() {
        let v = serde_json::json!({ "a/b": { "c~d": 1 } });
        let mut out = Vec::new();
        collect_leaf_pointers(&v, "", &mut out);
        assert_eq!(out, vec!["/a~1b/c~0d".to_string()]);
    }
}
