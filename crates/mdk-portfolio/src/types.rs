use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ticker-like identifier of a tradable instrument.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self(s.into().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

/// Stable handle into the [`crate::SecurityManager`] arena.
///
/// Handles are never reused: securities are added, never removed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecurityId(pub(crate) usize);

impl SecurityId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Normalize an ISO-ish currency code ("usd " -> "USD").
pub fn currency_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Direction of an order relative to the book.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Buy,
    Sell,
    Hold,
}

impl OrderDirection {
    /// Direction implied by a signed quantity.
    pub fn from_quantity(quantity: Decimal) -> Self {
        if quantity > Decimal::ZERO {
            OrderDirection::Buy
        } else if quantity < Decimal::ZERO {
            OrderDirection::Sell
        } else {
            OrderDirection::Hold
        }
    }

    pub fn sign(self) -> Decimal {
        match self {
            OrderDirection::Buy => Decimal::ONE,
            OrderDirection::Sell => Decimal::NEGATIVE_ONE,
            OrderDirection::Hold => Decimal::ZERO,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderDirection::Buy => OrderDirection::Sell,
            OrderDirection::Sell => OrderDirection::Buy,
            OrderDirection::Hold => OrderDirection::Hold,
        }
    }
}

/// An amount of money tagged with its currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashAmount {
    pub amount: Decimal,
    pub currency: String,
}

impl CashAmount {
    pub fn new<S: AsRef<str>>(amount: Decimal, currency: S) -> Self {
        Self {
            amount,
            currency: currency_code(currency.as_ref()),
        }
    }

    pub fn zero<S: AsRef<str>>(currency: S) -> Self {
        Self::new(Decimal::ZERO, currency)
    }
}

/// A single executed fill (the accounting atom).
///
/// `quantity` is signed: positive buys, negative sells.
/// `price` is per unit in the security's quote currency.
/// `fee` is non-negative and may be in any currency known to the cash book.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Unique per execution. Re-delivery of the same id is ignored.
    pub fill_id: String,
    pub order_id: u64,
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: CashAmount,
    pub utc_time: DateTime<Utc>,
}

impl Fill {
    pub fn new<I: Into<String>>(
        fill_id: I,
        order_id: u64,
        symbol: Symbol,
        quantity: Decimal,
        price: Decimal,
        fee: CashAmount,
        utc_time: DateTime<Utc>,
    ) -> Self {
        Self {
            fill_id: fill_id.into(),
            order_id,
            symbol,
            quantity,
            price,
            fee,
            utc_time,
        }
    }

    pub fn direction(&self) -> OrderDirection {
        OrderDirection::from_quantity(self.quantity)
    }
}

/// Round `quantity` toward zero to a whole multiple of `lot_size`.
pub fn round_to_lot(quantity: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return quantity;
    }
    (quantity / lot_size).trunc() * lot_size
}
