//! Order requests, tickets, and the order-processing seam.
//!
//! The portfolio never routes orders itself. Margin-call liquidations and
//! strategy orders go through an [`OrderProcessor`], implemented by the
//! transaction manager in the execution crate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{OrderDirection, Symbol};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit { limit_price: Decimal },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrderRequest {
    pub symbol: Symbol,
    /// Signed: positive buys, negative sells.
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub tag: String,
    pub time: DateTime<Utc>,
}

impl SubmitOrderRequest {
    pub fn market(symbol: Symbol, quantity: Decimal, time: DateTime<Utc>) -> Self {
        Self {
            symbol,
            quantity,
            order_type: OrderType::Market,
            tag: String::new(),
            time,
        }
    }

    pub fn limit(symbol: Symbol, quantity: Decimal, limit_price: Decimal, time: DateTime<Utc>) -> Self {
        Self {
            symbol,
            quantity,
            order_type: OrderType::Limit { limit_price },
            tag: String::new(),
            time,
        }
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn direction(&self) -> OrderDirection {
        OrderDirection::from_quantity(self.quantity)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    /// Rejected before reaching the brokerage (validation, buying power).
    Invalid,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Invalid
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Submitted => "submitted",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Invalid => "invalid",
        }
    }
}

/// Caller-facing view of an order's progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub order_id: u64,
    pub request: SubmitOrderRequest,
    pub status: OrderStatus,
    pub quantity_filled: Decimal,
    pub average_fill_price: Decimal,
    pub message: Option<String>,
}

impl OrderTicket {
    pub fn quantity_remaining(&self) -> Decimal {
        self.request.quantity - self.quantity_filled
    }
}

/// Accepts order requests and returns the resulting ticket.
///
/// Implementations must not require the caller to hold the account lock.
pub trait OrderProcessor: Send + Sync {
    fn process(&self, request: SubmitOrderRequest) -> OrderTicket;
}
