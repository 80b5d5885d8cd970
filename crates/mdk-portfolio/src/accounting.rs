//! Weighted-average cost accounting.
//!
//! Rules for a fill of signed `qty` at `price` against holding `h`:
//! - Same direction (or flat): quantity grows, average price is the
//!   quantity-weighted mean of old average and fill price.
//! - Opposite direction: the closed part realizes
//!   `sign(h) × (price − avg) × closed × multiplier × rate`.
//!   Landing flat resets the average to zero; crossing through zero opens
//!   the remainder at the fill price; otherwise the average is unchanged.
//!
//! Deterministic, pure logic. No IO.

use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::holding::SecurityHolding;
use crate::types::{Fill, SecurityId, Symbol};

/// What a fill did to a holding. Money in account currency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoldingChange {
    pub realized_profit: Decimal,
    /// Quantity that reduced an existing position (unsigned).
    pub closed_quantity: Decimal,
    /// Quantity that opened or extended a position (unsigned).
    pub opened_quantity: Decimal,
}

/// Apply one fill to a holding. `fee` is already in account currency.
pub fn apply_fill_to_holding(
    holding: &mut SecurityHolding,
    quantity: Decimal,
    price: Decimal,
    multiplier: Decimal,
    conversion_rate: Decimal,
    fee: Decimal,
) -> HoldingChange {
    let prior = holding.quantity;
    let mut change = HoldingChange {
        realized_profit: Decimal::ZERO,
        closed_quantity: Decimal::ZERO,
        opened_quantity: Decimal::ZERO,
    };

    let reduces = !prior.is_zero() && prior.signum() != quantity.signum();
    if reduces {
        let closed = quantity.abs().min(prior.abs());
        let profit =
            prior.signum() * (price - holding.average_price) * closed * multiplier * conversion_rate;
        holding.last_trade_profit = profit;
        holding.realized_profit += profit;
        change.realized_profit = profit;
        change.closed_quantity = closed;
        change.opened_quantity = quantity.abs() - closed;
    } else {
        change.opened_quantity = quantity.abs();
    }

    let next = prior + quantity;
    holding.average_price = if !reduces {
        if next.is_zero() {
            Decimal::ZERO
        } else {
            (holding.average_price * prior.abs() + price * quantity.abs()) / next.abs()
        }
    } else if next.is_zero() {
        Decimal::ZERO
    } else if next.signum() != prior.signum() {
        price
    } else {
        holding.average_price
    };
    holding.quantity = next;

    holding.total_fees += fee;
    holding.total_sale_volume += (quantity * price * multiplier).abs() * conversion_rate;
    holding.trade_count += 1;
    change
}

/// A fill as it was applied, with the conversion inputs in force then.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub security: SecurityId,
    pub fill: Fill,
    pub multiplier: Decimal,
    pub conversion_rate: Decimal,
    pub fee_in_account_currency: Decimal,
}

/// Rebuild a holding from scratch by replaying journal entries in order.
pub fn replay_holding<'a, I>(symbol: Symbol, entries: I) -> SecurityHolding
where
    I: IntoIterator<Item = &'a JournalEntry>,
{
    let mut h = SecurityHolding::new(symbol);
    for e in entries {
        apply_fill_to_holding(
            &mut h,
            e.fill.quantity,
            e.fill.price,
            e.multiplier,
            e.conversion_rate,
            e.fee_in_account_currency,
        );
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn apply(h: &mut SecurityHolding, q: Decimal, p: Decimal) -> HoldingChange {
        apply_fill_to_holding(h, q, p, dec!(1), dec!(1), dec!(0))
    }

    #[test]
    fn adding_to_a_position_averages_cost() {
        let mut h = SecurityHolding::new(Symbol::new("AAPL"));
        apply(&mut h, dec!(10), dec!(100));
        apply(&mut h, dec!(10), dec!(110));
        assert_eq!(h.quantity(), dec!(20));
        assert_eq!(h.average_price(), dec!(105));
        assert_eq!(h.realized_profit(), dec!(0));
    }

    #[test]
    fn partial_close_realizes_against_average_and_keeps_it() {
        let mut h = SecurityHolding::new(Symbol::new("AAPL"));
        apply(&mut h, dec!(20), dec!(105));
        let c = apply(&mut h, dec!(-5), dec!(120));
        assert_eq!(c.realized_profit, dec!(75));
        assert_eq!(c.closed_quantity, dec!(5));
        assert_eq!(h.quantity(), dec!(15));
        assert_eq!(h.average_price(), dec!(105));
        assert_eq!(h.last_trade_profit(), dec!(75));
    }

    #[test]
    fn short_cover_profit_uses_holding_sign() {
        let mut h = SecurityHolding::new(Symbol::new("TSLA"));
        apply(&mut h, dec!(-10), dec!(200));
        let c = apply(&mut h, dec!(4), dec!(180));
        assert_eq!(c.realized_profit, dec!(80));
        assert_eq!(h.quantity(), dec!(-6));
        assert_eq!(h.average_price(), dec!(200));
    }

    #[test]
    fn flattening_resets_average_price() {
        let mut h = SecurityHolding::new(Symbol::new("AAPL"));
        apply(&mut h, dec!(10), dec!(100));
        apply(&mut h, dec!(-10), dec!(90));
        assert_eq!(h.quantity(), dec!(0));
        assert_eq!(h.average_price(), dec!(0));
        assert_eq!(h.realized_profit(), dec!(-100));
    }

    #[test]
    fn crossing_zero_reopens_at_fill_price() {
        let mut h = SecurityHolding::new(Symbol::new("AAPL"));
        apply(&mut h, dec!(10), dec!(100));
        let c = apply(&mut h, dec!(-15), dec!(110));
        assert_eq!(c.realized_profit, dec!(100));
        assert_eq!(c.closed_quantity, dec!(10));
        assert_eq!(c.opened_quantity, dec!(5));
        assert_eq!(h.quantity(), dec!(-5));
        assert_eq!(h.average_price(), dec!(110));
    }

    #[test]
    fn profit_and_volume_convert_to_account_currency() {
        let mut h = SecurityHolding::new(Symbol::new("SAP"));
        apply_fill_to_holding(&mut h, dec!(10), dec!(100), dec!(1), dec!(1.1), dec!(2));
        let c = apply_fill_to_holding(&mut h, dec!(-10), dec!(110), dec!(1), dec!(1.2), dec!(2));
        assert_eq!(c.realized_profit, dec!(120));
        assert_eq!(h.total_fees(), dec!(4));
        assert_eq!(h.total_sale_volume(), dec!(1100) + dec!(1320));
        assert_eq!(h.net_profit(), dec!(116));
    }
}
