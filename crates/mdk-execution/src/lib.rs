//! mdk-execution
//!
//! Order-processing boundary between strategies, the portfolio and a
//! brokerage.
//! - `SecurityTransactionManager` is the only path to the brokerage
//! - Pre-trade validation and buying-power checks before every submission
//! - Ticket state machine with idempotent fill replay
//! - Fills flow back into the shared account exactly once
//! - Margin-call execution through the same path as every other order

mod error;
mod targets;
mod transaction;

pub mod brokerage;
pub mod ticket;

pub use brokerage::{
    BrokerageAdapter, BrokerageFill, BrokerageOrder, BrokerageResult, BrokerageSubmitResponse,
    OrderEvent,
};
pub use error::TransactionError;
pub use targets::{targets_to_order_requests, PortfolioTarget, TargetOrders, SET_HOLDINGS_TAG};
pub use ticket::{TicketEvent, TicketRecord, TicketTransitionError};
pub use transaction::SecurityTransactionManager;
