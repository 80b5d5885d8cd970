//! Scenario CSV loaders (deterministic).
//!
//! Prices: `ts,symbol,price`
//!
//! Orders: `ts,symbol,quantity,limit_price,target,tag`
//! - exactly one of `quantity` / `target` per row
//! - `limit_price` only alongside `quantity`
//! - `limit_price`, `target` and `tag` columns may be omitted entirely
//!
//! `ts` is RFC 3339. Rows must be in non-decreasing time order; rows that
//! share a timestamp keep their file order. Blank lines are skipped.

use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use mdk_portfolio::Symbol;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{OrderInstruction, PriceTick, ScriptedOrder};

#[derive(Debug, Deserialize)]
struct PriceRow {
    ts: DateTime<Utc>,
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct OrderRow {
    ts: DateTime<Utc>,
    symbol: String,
    #[serde(default)]
    quantity: Option<String>,
    #[serde(default)]
    limit_price: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    tag: Option<String>,
}

pub fn load_prices_csv(path: impl AsRef<Path>) -> Result<Vec<PriceTick>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("open prices csv: {}", path.display()))?;
    parse_prices_csv(file)
}

pub fn parse_prices_csv<R: Read>(input: R) -> Result<Vec<PriceTick>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut out: Vec<PriceTick> = Vec::new();
    for (i, rec) in rdr.deserialize::<PriceRow>().enumerate() {
        let line = i + 2;
        let row = rec.with_context(|| format!("prices csv line {line}"))?;
        let price = parse_decimal("price", &row.price, line)?;
        out.push(PriceTick::new(row.ts, &row.symbol, price));
    }
    ensure_sorted(out.iter().map(|p| p.time), "prices")?;
    Ok(out)
}

pub fn load_orders_csv(path: impl AsRef<Path>) -> Result<Vec<ScriptedOrder>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("open orders csv: {}", path.display()))?;
    parse_orders_csv(file)
}

pub fn parse_orders_csv<R: Read>(input: R) -> Result<Vec<ScriptedOrder>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut out: Vec<ScriptedOrder> = Vec::new();
    for (i, rec) in rdr.deserialize::<OrderRow>().enumerate() {
        let line = i + 2;
        let row = rec.with_context(|| format!("orders csv line {line}"))?;
        let quantity = optional_decimal("quantity", row.quantity.as_deref(), line)?;
        let limit_price = optional_decimal("limit_price", row.limit_price.as_deref(), line)?;
        let target = optional_decimal("target", row.target.as_deref(), line)?;

        let instruction = match (quantity, target) {
            (Some(quantity), None) => OrderInstruction::Quantity {
                quantity,
                limit_price,
            },
            (None, Some(target)) => {
                if limit_price.is_some() {
                    bail!("orders csv line {line}: limit_price cannot be combined with target");
                }
                OrderInstruction::Target { target }
            }
            _ => bail!("orders csv line {line}: exactly one of quantity or target is required"),
        };

        out.push(ScriptedOrder {
            time: row.ts,
            symbol: Symbol::new(row.symbol.as_str()),
            instruction,
            tag: row.tag.filter(|t| !t.is_empty()),
        });
    }
    ensure_sorted(out.iter().map(|o| o.time), "orders")?;
    Ok(out)
}

fn parse_decimal(column: &str, value: &str, line: usize) -> Result<Decimal> {
    Decimal::from_str(value)
        .with_context(|| format!("line {line}: failed to parse decimal in column {column}: {value:?}"))
}

fn optional_decimal(column: &str, value: Option<&str>, line: usize) -> Result<Option<Decimal>> {
    match value {
        None | Some("") => Ok(None),
        Some(v) => parse_decimal(column, v, line).map(Some),
    }
}

fn ensure_sorted(times: impl Iterator<Item = DateTime<Utc>>, what: &str) -> Result<()> {
    let mut prev: Option<DateTime<Utc>> = None;
    for (i, t) in times.enumerate() {
        if let Some(p) = prev {
            if t < p {
                bail!("{what} csv not in time order at row {}: {t} < {p}", i + 1);
            }
        }
        prev = Some(t);
    }
    Ok(())
}
