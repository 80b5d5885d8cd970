//! `mdk buying-power`: point-in-time buying power for one security on a
//! freshly configured account.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use mdk_config::ConfigMode;
use mdk_portfolio::{
    Account, BuyingPower, DataValue, GetMaximumOrderQuantityResult,
    HasSufficientBuyingPowerForOrderResult, OrderDirection, Symbol,
};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{parse_decimal_arg, prepare_config, print_json};

pub struct QueryArgs {
    pub config_paths: Vec<String>,
    pub symbol: String,
    pub price: String,
    /// Extra `SYMBOL=PRICE` marks (other securities or conversion feeds).
    pub marks: Vec<String>,
    pub target: String,
    pub quantity: Option<String>,
    pub at: Option<String>,
    pub fail_on_unused_keys: bool,
}

#[derive(Debug, Serialize)]
pub struct BuyingPowerQuery {
    pub config_hash: String,
    pub as_of: DateTime<Utc>,
    pub symbol: Symbol,
    pub price: Decimal,
    /// Attributes configured under `securities[].data`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, DataValue>,
    pub total_portfolio_value: Decimal,
    pub margin_remaining: Decimal,
    pub buy: BuyingPower,
    pub sell: BuyingPower,
    pub target: Decimal,
    pub maximum_order_quantity: GetMaximumOrderQuantityResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_check: Option<OrderCheck>,
}

#[derive(Debug, Serialize)]
pub struct OrderCheck {
    pub quantity: Decimal,
    #[serde(flatten)]
    pub result: HasSufficientBuyingPowerForOrderResult,
}

pub fn buying_power(args: QueryArgs) -> Result<()> {
    let prepared =
        prepare_config(&args.config_paths, ConfigMode::Query, args.fail_on_unused_keys)?;
    let mut account = prepared.engine.build_account()?;

    let as_of = match &args.at {
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .with_context(|| format!("invalid --at (want RFC 3339): {raw:?}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let symbol = Symbol::new(args.symbol.as_str());
    let price = parse_decimal_arg("--price", &args.price)?;
    let target = parse_decimal_arg("--target", &args.target)?;

    account.set_time(as_of);
    for raw in &args.marks {
        let (sym, px) = parse_mark(raw)?;
        apply_mark(&mut account, &sym, px, as_of)?;
    }
    account
        .set_price(&symbol, price, as_of)
        .with_context(|| format!("unknown --symbol {symbol}"))?;

    let order_check = match &args.quantity {
        Some(raw) => {
            let quantity = parse_decimal_arg("--quantity", raw)?;
            Some(OrderCheck {
                quantity,
                result: account.has_sufficient_buying_power_for_order(&symbol, quantity)?,
            })
        }
        None => None,
    };

    let out = BuyingPowerQuery {
        config_hash: prepared.loaded.config_hash.clone(),
        as_of,
        price,
        attributes: account.security(&symbol)?.data().values().clone(),
        total_portfolio_value: account.total_portfolio_value()?,
        margin_remaining: account.margin_remaining()?,
        buy: account.buying_power(&symbol, OrderDirection::Buy)?,
        sell: account.buying_power(&symbol, OrderDirection::Sell)?,
        target,
        maximum_order_quantity: account
            .maximum_order_quantity_for_target_buying_power(&symbol, target, false)?,
        order_check,
        symbol,
    };
    print_json(&out)
}

fn parse_mark(raw: &str) -> Result<(Symbol, Decimal)> {
    let Some((sym, px)) = raw.split_once('=') else {
        bail!("invalid --mark {raw:?}: expected SYMBOL=PRICE");
    };
    if sym.trim().is_empty() {
        bail!("invalid --mark {raw:?}: empty symbol");
    }
    Ok((Symbol::new(sym.trim()), parse_decimal_arg("--mark", px)?))
}

fn apply_mark(
    account: &mut Account,
    symbol: &Symbol,
    price: Decimal,
    as_of: DateTime<Utc>,
) -> Result<()> {
    if account.securities().by_symbol(symbol).is_some() {
        account.set_price(symbol, price, as_of)?;
    } else if account.set_conversion_price(symbol, price) == 0 {
        bail!("--mark {symbol}: neither a configured security nor a conversion feed");
    }
    Ok(())
}
