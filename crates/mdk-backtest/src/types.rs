use chrono::{DateTime, Utc};
use mdk_portfolio::{
    MarginCallExecution, MarginCallFailure, OrderTicket, PortfolioSnapshot, Symbol,
};
use rust_decimal::Decimal;
use serde::Serialize;

/// One price observation. Symbols that are not securities are treated as
/// currency-conversion feeds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PriceTick {
    pub time: DateTime<Utc>,
    pub symbol: Symbol,
    pub price: Decimal,
}

impl PriceTick {
    pub fn new(time: DateTime<Utc>, symbol: &str, price: Decimal) -> Self {
        Self {
            time,
            symbol: Symbol::new(symbol),
            price,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderInstruction {
    /// Signed quantity; a limit price makes it a limit order.
    Quantity {
        quantity: Decimal,
        limit_price: Option<Decimal>,
    },
    /// Share of total portfolio value, sized by the buying power model.
    Target { target: Decimal },
}

/// An order the script submits at `time`, after that step's prices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScriptedOrder {
    pub time: DateTime<Utc>,
    pub symbol: Symbol,
    pub instruction: OrderInstruction,
    pub tag: Option<String>,
}

impl ScriptedOrder {
    pub fn market(time: DateTime<Utc>, symbol: &str, quantity: Decimal) -> Self {
        Self {
            time,
            symbol: Symbol::new(symbol),
            instruction: OrderInstruction::Quantity {
                quantity,
                limit_price: None,
            },
            tag: None,
        }
    }

    pub fn limit(time: DateTime<Utc>, symbol: &str, quantity: Decimal, limit_price: Decimal) -> Self {
        Self {
            time,
            symbol: Symbol::new(symbol),
            instruction: OrderInstruction::Quantity {
                quantity,
                limit_price: Some(limit_price),
            },
            tag: None,
        }
    }

    pub fn target(time: DateTime<Utc>, symbol: &str, target: Decimal) -> Self {
        Self {
            time,
            symbol: Symbol::new(symbol),
            instruction: OrderInstruction::Target { target },
            tag: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub total_portfolio_value: Decimal,
    pub margin_remaining: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SettlementRecord {
    pub time: DateTime<Utc>,
    pub currency: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarginCallRecord {
    pub time: DateTime<Utc>,
    /// Liquidation tickets that ended `Filled`.
    pub orders_filled: usize,
    pub orders_failed: usize,
    pub resolved: bool,
    /// Present when liquidation could not restore margin.
    pub unresolved_deficit: Option<Decimal>,
    pub failures: Vec<MarginCallFailure>,
}

impl MarginCallRecord {
    pub fn from_execution(
        time: DateTime<Utc>,
        exec: &MarginCallExecution,
        unresolved_deficit: Option<Decimal>,
    ) -> Self {
        Self {
            time,
            orders_filled: exec.filled(),
            orders_failed: exec.failures.len(),
            resolved: unresolved_deficit.is_none(),
            unresolved_deficit,
            failures: exec.failures.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedTarget {
    pub time: DateTime<Utc>,
    pub symbol: Symbol,
    pub reason: String,
}

/// Backtest report produced after a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BacktestReport {
    /// Deterministic id over the config hash and the input sizes.
    pub run_id: String,
    pub halted: bool,
    pub halt_reason: Option<String>,
    /// Distinct timestamps processed.
    pub steps: usize,
    /// Every ticket, strategy and liquidation alike, in order-id order.
    pub tickets: Vec<OrderTicket>,
    pub skipped_targets: Vec<SkippedTarget>,
    pub settlements: Vec<SettlementRecord>,
    pub margin_calls: Vec<MarginCallRecord>,
    pub equity_curve: Vec<EquityPoint>,
    /// Symbols whose holdings disagree with a journal replay. Empty when
    /// the books are consistent.
    pub integrity_violations: Vec<Symbol>,
    pub final_snapshot: PortfolioSnapshot,
}
