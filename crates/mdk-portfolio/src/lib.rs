//! mdk-portfolio
//!
//! Portfolio accounting and buying power core.
//! - Multi-currency cash book with a fixed account-currency anchor
//! - Weighted-average cost holdings, realized vs unrealized profit
//! - Immediate and delayed settlement with an unsettled-cash queue
//! - Cash / Margin / PatternDayTrading buying power models
//! - Margin call detection, liquidation sizing and execution
//! - Pure deterministic logic: time comes in through fills, prices and scans

mod accounting;
mod error;
mod holding;
mod types;

pub mod account;
pub mod buying_power;
pub mod cash;
pub mod data;
pub mod fees;
pub mod margin_call;
pub mod market;
pub mod orders;
pub mod pdt;
pub mod portfolio;
pub mod security;
pub mod settlement;

pub use accounting::{apply_fill_to_holding, replay_holding, HoldingChange, JournalEntry};
pub use account::{Account, SharedAccount};
pub use buying_power::{
    BuyingPower, BuyingPowerKind, BuyingPowerModel, GetMaximumOrderQuantityResult,
    HasSufficientBuyingPowerForOrderResult, ReservedBuyingPowerForPosition,
    DEFAULT_INTRADAY_LEVERAGE, DEFAULT_OVERNIGHT_LEVERAGE, DEFAULT_REQUIRED_FREE_BUYING_POWER_PERCENT,
    MAX_SOLVE_ITERATIONS,
};
pub use cash::{Cash, CashBook, CurrencyConversion};
pub use data::{DataValue, SecurityData};
pub use error::PortfolioError;
pub use fees::FeeModel;
pub use holding::SecurityHolding;
pub use margin_call::{
    MarginCallExecution, MarginCallFailure, MarginCallModel, MarginCallOrder, MarginCallPlan,
    DEFAULT_MARGIN_WARNING_THRESHOLD, MARGIN_CALL_TAG,
};
pub use market::{Market, MarketHours, MarketRegistry};
pub use orders::{OrderProcessor, OrderStatus, OrderTicket, OrderType, SubmitOrderRequest};
pub use pdt::{evaluate_pdt, DayTradeLedger, PdtDecision, PdtInput, PdtPolicy, PdtReason};
pub use portfolio::{
    AppliedFill, CashLine, FillOutcome, HoldingLine, PortfolioSnapshot, PortfolioView,
    SecurityPortfolioManager,
};
pub use security::{Security, SecurityDefinition, SecurityManager, SymbolProperties};
pub use settlement::{SettlementModel, UnsettledCashAmount, UnsettledCashQueue};

pub use types::{currency_code, round_to_lot, CashAmount, Fill, OrderDirection, SecurityId, Symbol};
