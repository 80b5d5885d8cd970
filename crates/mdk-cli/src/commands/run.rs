//! `mdk run`: replay a price/order scenario against a configured account.

use std::fs;

use anyhow::{bail, Context, Result};
use mdk_backtest::{load_orders_csv, load_prices_csv, BacktestEngine};
use mdk_config::ConfigMode;
use tracing::info;

use super::{prepare_config, print_json};

pub struct RunArgs {
    pub config_paths: Vec<String>,
    pub prices: String,
    pub orders: Option<String>,
    pub out: Option<String>,
    pub fail_on_unused_keys: bool,
}

pub fn run_scenario(args: RunArgs) -> Result<()> {
    let prepared = prepare_config(
        &args.config_paths,
        ConfigMode::Backtest,
        args.fail_on_unused_keys,
    )?;
    let account = prepared.engine.build_account()?;

    let prices = load_prices_csv(&args.prices)?;
    let orders = match &args.orders {
        Some(path) => load_orders_csv(path)?,
        None => Vec::new(),
    };
    info!(
        config_hash = %prepared.loaded.config_hash,
        prices = prices.len(),
        orders = orders.len(),
        "scenario loaded"
    );

    let engine = BacktestEngine::new(account, prepared.engine.backtest.clone())
        .with_config_hash(&prepared.loaded.config_hash);
    let report = engine.run(&prices, &orders).context("backtest run failed")?;

    match &args.out {
        Some(path) => {
            let json =
                serde_json::to_string_pretty(&report).context("serialize report json failed")?;
            fs::write(path, json).with_context(|| format!("write report failed: {path}"))?;
            println!("run_id={}", report.run_id);
            println!("report_path={path}");
        }
        None => print_json(&report)?,
    }

    if report.halted {
        bail!(
            "run halted: {}",
            report.halt_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}
