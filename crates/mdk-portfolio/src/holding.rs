use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::Symbol;

/// Position in one security, kept at weighted-average cost.
///
/// Price-denominated fields (`average_price`) are in the quote currency.
/// Money accumulators (fees, sale volume, profit) are in the account
/// currency, converted at the rate in force when each fill was applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SecurityHolding {
    pub(crate) symbol: Symbol,
    pub(crate) quantity: Decimal,
    pub(crate) average_price: Decimal,
    pub(crate) total_fees: Decimal,
    pub(crate) total_sale_volume: Decimal,
    pub(crate) last_trade_profit: Decimal,
    pub(crate) realized_profit: Decimal,
    pub(crate) trade_count: u64,
}

impl SecurityHolding {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            total_sale_volume: Decimal::ZERO,
            last_trade_profit: Decimal::ZERO,
            realized_profit: Decimal::ZERO,
            trade_count: 0,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Signed: positive long, negative short.
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn absolute_quantity(&self) -> Decimal {
        self.quantity.abs()
    }

    pub fn average_price(&self) -> Decimal {
        self.average_price
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    pub fn invested(&self) -> bool {
        !self.quantity.is_zero()
    }

    pub fn total_fees(&self) -> Decimal {
        self.total_fees
    }

    pub fn total_sale_volume(&self) -> Decimal {
        self.total_sale_volume
    }

    /// Gross profit of the most recent position-reducing fill.
    pub fn last_trade_profit(&self) -> Decimal {
        self.last_trade_profit
    }

    /// Accumulated gross realized profit.
    pub fn realized_profit(&self) -> Decimal {
        self.realized_profit
    }

    /// Realized profit net of every fee paid on this security.
    pub fn net_profit(&self) -> Decimal {
        self.realized_profit - self.total_fees
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count
    }

    /// |quantity| × average price × multiplier, quote currency.
    pub fn cost_basis(&self, multiplier: Decimal) -> Decimal {
        self.average_price * self.absolute_quantity() * multiplier
    }

    /// Signed market value at `price`, quote currency.
    pub fn market_value(&self, price: Decimal, multiplier: Decimal) -> Decimal {
        self.quantity * price * multiplier
    }

    /// Unrealized profit at `price`, quote currency.
    pub fn unrealized_profit(&self, price: Decimal, multiplier: Decimal) -> Decimal {
        (price - self.average_price) * self.quantity * multiplier
    }
}
