//! mdk-backtest
//!
//! Deterministic scenario replay over a configured account.
//!
//! Pipeline per timestamp: PRICES -> SETTLEMENT -> FILLS -> MARGIN CALL
//!
//! - Same config + same inputs => identical report (run id included)
//! - Every order goes through the transaction manager and its buying power
//!   checks, liquidations included
//! - Paper brokerage fills at the last price; limit orders rest until met
//! - An unresolved margin call halts the run unless configured otherwise

mod engine;
mod loader;
mod paper;
pub mod types;

pub use engine::{BacktestEngine, BacktestError};
pub use loader::{load_orders_csv, load_prices_csv, parse_orders_csv, parse_prices_csv};
pub use paper::PaperBrokerage;
pub use types::{
    BacktestReport, EquityPoint, MarginCallRecord, OrderInstruction, PriceTick, ScriptedOrder,
    SettlementRecord, SkippedTarget,
};
