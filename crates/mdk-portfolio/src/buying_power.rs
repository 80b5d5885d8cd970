//! Buying power models.
//!
//! A small closed set of variants assigned per security:
//! - `Cash`: leverage 1, settled cash only, no shorting.
//! - `Margin`: fixed initial leverage with a maintenance leverage used for
//!   reserved margin.
//! - `PatternDayTrading`: intraday leverage while the security's market is
//!   open, overnight leverage otherwise, plus PDT equity restrictions.
//!
//! Every evaluation is read-only over a [`PortfolioView`]. Shortfalls are
//! reported in the result structs, never as errors.
//!
//! Units: unless stated otherwise every amount here is in the account
//! currency. Per-unit value of a security is `price × multiplier × rate`.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::pdt::{evaluate_pdt, PdtInput};
use crate::portfolio::PortfolioView;
use crate::security::Security;
use crate::types::OrderDirection;

/// Default headroom kept free at all times, as a fraction of total
/// portfolio value.
pub const DEFAULT_REQUIRED_FREE_BUYING_POWER_PERCENT: Decimal = dec!(0.0025);

/// Reg-T style pattern-day-trading leverage.
pub const DEFAULT_INTRADAY_LEVERAGE: Decimal = dec!(4);
pub const DEFAULT_OVERNIGHT_LEVERAGE: Decimal = dec!(2);

/// Iteration cap for the order-quantity bisection.
pub const MAX_SOLVE_ITERATIONS: u32 = 64;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BuyingPower {
    pub value: Decimal,
    pub currency: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReservedBuyingPowerForPosition {
    pub absolute_used_buying_power: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GetMaximumOrderQuantityResult {
    /// Signed, a whole multiple of the lot size.
    pub quantity: Decimal,
    pub reason: Option<String>,
    pub is_error: bool,
}

impl GetMaximumOrderQuantityResult {
    fn quantity(quantity: Decimal) -> Self {
        Self {
            quantity,
            reason: None,
            is_error: false,
        }
    }

    fn error<S: Into<String>>(reason: S) -> Self {
        Self {
            quantity: Decimal::ZERO,
            reason: Some(reason.into()),
            is_error: true,
        }
    }

    fn with_note(quantity: Decimal, reason: String, silence: bool) -> Self {
        Self {
            quantity,
            reason: if silence { None } else { Some(reason) },
            is_error: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HasSufficientBuyingPowerForOrderResult {
    pub is_sufficient: bool,
    pub reason: Option<String>,
}

impl HasSufficientBuyingPowerForOrderResult {
    fn sufficient() -> Self {
        Self {
            is_sufficient: true,
            reason: None,
        }
    }

    fn insufficient<S: Into<String>>(reason: S) -> Self {
        Self {
            is_sufficient: false,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuyingPowerKind {
    Cash,
    Margin {
        leverage: Decimal,
        maintenance_leverage: Decimal,
    },
    PatternDayTrading {
        intraday_leverage: Decimal,
        overnight_leverage: Decimal,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BuyingPowerModel {
    kind: BuyingPowerKind,
    required_free_buying_power_percent: Decimal,
}

impl BuyingPowerModel {
    pub fn cash() -> Self {
        Self::from_kind(BuyingPowerKind::Cash)
    }

    pub fn margin(leverage: Decimal) -> Self {
        Self::from_kind(BuyingPowerKind::Margin {
            leverage,
            maintenance_leverage: leverage,
        })
    }

    pub fn margin_with_maintenance(leverage: Decimal, maintenance_leverage: Decimal) -> Self {
        Self::from_kind(BuyingPowerKind::Margin {
            leverage,
            maintenance_leverage,
        })
    }

    /// Reg-T style defaults: 4x intraday, 2x overnight.
    pub fn pattern_day_trading() -> Self {
        Self::pattern_day_trading_with(DEFAULT_INTRADAY_LEVERAGE, DEFAULT_OVERNIGHT_LEVERAGE)
    }

    pub fn pattern_day_trading_with(intraday_leverage: Decimal, overnight_leverage: Decimal) -> Self {
        Self::from_kind(BuyingPowerKind::PatternDayTrading {
            intraday_leverage,
            overnight_leverage,
        })
    }

    fn from_kind(kind: BuyingPowerKind) -> Self {
        Self {
            kind,
            required_free_buying_power_percent: DEFAULT_REQUIRED_FREE_BUYING_POWER_PERCENT,
        }
    }

    pub fn with_required_free_buying_power_percent(mut self, percent: Decimal) -> Self {
        self.required_free_buying_power_percent = percent;
        self
    }

    pub fn kind(&self) -> &BuyingPowerKind {
        &self.kind
    }

    pub fn is_cash(&self) -> bool {
        matches!(self.kind, BuyingPowerKind::Cash)
    }

    pub fn required_free_buying_power_percent(&self) -> Decimal {
        self.required_free_buying_power_percent
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            BuyingPowerKind::Cash => "Cash",
            BuyingPowerKind::Margin { .. } => "Margin",
            BuyingPowerKind::PatternDayTrading { .. } => "PatternDayTrading",
        }
    }

    pub fn validate(&self) -> Result<(), PortfolioError> {
        let pct = self.required_free_buying_power_percent;
        if pct < Decimal::ZERO || pct >= Decimal::ONE {
            return Err(PortfolioError::invalid_config(format!(
                "required free buying power percent must be in [0, 1), got {pct}"
            )));
        }
        let at_least_one = |label: &str, v: Decimal| {
            if v < Decimal::ONE {
                Err(PortfolioError::invalid_config(format!(
                    "{label} must be >= 1, got {v}"
                )))
            } else {
                Ok(())
            }
        };
        match self.kind {
            BuyingPowerKind::Cash => Ok(()),
            BuyingPowerKind::Margin {
                leverage,
                maintenance_leverage,
            } => {
                at_least_one("leverage", leverage)?;
                at_least_one("maintenance leverage", maintenance_leverage)
            }
            BuyingPowerKind::PatternDayTrading {
                intraday_leverage,
                overnight_leverage,
            } => {
                at_least_one("intraday leverage", intraday_leverage)?;
                at_least_one("overnight leverage", overnight_leverage)
            }
        }
    }

    /// Configured leverage (overnight for pattern day trading).
    pub fn leverage(&self) -> Decimal {
        match self.kind {
            BuyingPowerKind::Cash => Decimal::ONE,
            BuyingPowerKind::Margin { leverage, .. } => leverage,
            BuyingPowerKind::PatternDayTrading {
                overnight_leverage, ..
            } => overnight_leverage,
        }
    }

    /// Explicit leverage change. Cash accounts only accept 1.
    pub fn set_leverage(&mut self, new_leverage: Decimal) -> Result<(), PortfolioError> {
        if new_leverage < Decimal::ONE {
            return Err(PortfolioError::invalid_config(format!(
                "leverage must be >= 1, got {new_leverage}"
            )));
        }
        match &mut self.kind {
            BuyingPowerKind::Cash if new_leverage != Decimal::ONE => {
                Err(PortfolioError::invalid_config(format!(
                    "cash accounts cannot be leveraged, got {new_leverage}"
                )))
            }
            BuyingPowerKind::Cash => Ok(()),
            BuyingPowerKind::Margin {
                leverage,
                maintenance_leverage,
            } => {
                *leverage = new_leverage;
                *maintenance_leverage = new_leverage;
                Ok(())
            }
            BuyingPowerKind::PatternDayTrading {
                overnight_leverage,
                ..
            } => {
                *overnight_leverage = new_leverage;
                Ok(())
            }
        }
    }

    /// Leverage in force at the view's clock.
    pub fn current_leverage(&self, view: &PortfolioView<'_>, security: &Security) -> Decimal {
        match self.kind {
            BuyingPowerKind::Cash => Decimal::ONE,
            BuyingPowerKind::Margin { leverage, .. } => leverage,
            BuyingPowerKind::PatternDayTrading {
                intraday_leverage,
                overnight_leverage,
            } => {
                if market_open(view.now(), security) {
                    intraday_leverage
                } else {
                    overnight_leverage
                }
            }
        }
    }

    fn maintenance_leverage(&self, view: &PortfolioView<'_>, security: &Security) -> Decimal {
        match self.kind {
            BuyingPowerKind::Margin {
                maintenance_leverage,
                ..
            } => maintenance_leverage,
            _ => self.current_leverage(view, security),
        }
    }

    /// 1 / current leverage.
    pub fn initial_margin_requirement(&self, view: &PortfolioView<'_>, security: &Security) -> Decimal {
        Decimal::ONE / self.current_leverage(view, security)
    }

    /// |quantity| × unit value × initial margin requirement.
    pub fn initial_margin(
        &self,
        view: &PortfolioView<'_>,
        security: &Security,
        quantity: Decimal,
    ) -> Decimal {
        quantity.abs() * view.unit_value(security) * self.initial_margin_requirement(view, security)
    }

    /// Margin the current position ties up: |holding value| / maintenance leverage.
    pub fn reserved_buying_power_for_position(
        &self,
        view: &PortfolioView<'_>,
        security: &Security,
    ) -> ReservedBuyingPowerForPosition {
        let quantity = view.holding_quantity(security.id());
        let value = quantity.abs() * view.unit_value(security);
        ReservedBuyingPowerForPosition {
            absolute_used_buying_power: value / self.maintenance_leverage(view, security),
        }
    }

    /// Margin left for an order in `direction`, net of the free buffer.
    ///
    /// Trading against the current position also frees that position's
    /// reserved margin and the initial margin of closing it.
    pub fn margin_remaining(
        &self,
        view: &PortfolioView<'_>,
        security: &Security,
        direction: OrderDirection,
    ) -> Result<Decimal, PortfolioError> {
        let tpv = view.total_portfolio_value()?;
        let mut remaining = tpv - view.total_margin_used();
        let held = OrderDirection::from_quantity(view.holding_quantity(security.id()));
        if held != OrderDirection::Hold && direction == held.opposite() {
            let quantity = view.holding_quantity(security.id());
            remaining += self
                .reserved_buying_power_for_position(view, security)
                .absolute_used_buying_power
                + self.initial_margin(view, security, quantity);
        }
        remaining -= tpv * self.required_free_buying_power_percent;
        Ok(remaining.max(Decimal::ZERO))
    }

    pub fn buying_power(
        &self,
        view: &PortfolioView<'_>,
        security: &Security,
        direction: OrderDirection,
    ) -> Result<BuyingPower, PortfolioError> {
        match self.kind {
            BuyingPowerKind::Cash => cash_buying_power(self, view, security, direction),
            _ => Ok(BuyingPower {
                value: self.margin_remaining(view, security, direction)?,
                currency: view.cash_book().account_currency().to_string(),
            }),
        }
    }

    pub fn has_sufficient_buying_power_for_order(
        &self,
        view: &PortfolioView<'_>,
        security: &Security,
        quantity: Decimal,
    ) -> HasSufficientBuyingPowerForOrderResult {
        if quantity.is_zero() {
            return HasSufficientBuyingPowerForOrderResult::sufficient();
        }

        let held = view.holding_quantity(security.id());
        let reduces_only =
            !held.is_zero() && held.signum() != quantity.signum() && quantity.abs() <= held.abs();
        if reduces_only {
            return HasSufficientBuyingPowerForOrderResult::sufficient();
        }

        if !security.has_data() {
            return HasSufficientBuyingPowerForOrderResult::insufficient(format!(
                "The price of the {} security is zero because it does not have any market data yet.",
                security.symbol()
            ));
        }
        let Some(rate) = view.conversion_rate(security) else {
            return HasSufficientBuyingPowerForOrderResult::insufficient(format!(
                "No conversion rate available from {} to {}.",
                security.quote_currency(),
                view.cash_book().account_currency()
            ));
        };

        if let BuyingPowerKind::Cash = self.kind {
            return cash_has_sufficient(self, view, security, quantity);
        }

        if let Some(blocked) = pdt_restriction(self, view, security) {
            return blocked;
        }

        let direction = OrderDirection::from_quantity(quantity);
        let fee = security.order_fee(quantity) * rate;
        let required = self.initial_margin(view, security, quantity) + fee;
        let available = match self.margin_remaining(view, security, direction) {
            Ok(v) => v,
            Err(e) => return HasSufficientBuyingPowerForOrderResult::insufficient(e.to_string()),
        };
        if required > available {
            return HasSufficientBuyingPowerForOrderResult::insufficient(format!(
                "Insufficient buying power to complete order (Value:{}), Reason: Symbol: {}, Quantity: {}, Initial Margin: {}, Free Margin: {}.",
                required.round_dp(2),
                security.symbol(),
                quantity,
                required.round_dp(2),
                available.round_dp(2)
            ));
        }
        HasSufficientBuyingPowerForOrderResult::sufficient()
    }

    /// Largest signed quantity such that the post-trade margin tied up in
    /// this security (plus fees) does not exceed
    /// `target × (TPV − TPV × free%)`.
    pub fn maximum_order_quantity_for_target_buying_power(
        &self,
        view: &PortfolioView<'_>,
        security: &Security,
        target: Decimal,
        silence_non_error_reasons: bool,
    ) -> GetMaximumOrderQuantityResult {
        let held = view.holding_quantity(security.id());

        if !security.has_data() {
            return GetMaximumOrderQuantityResult::error(format!(
                "The price of the {} security is zero because it does not have any market data yet. When the price is set, the order quantity can be calculated.",
                security.symbol()
            ));
        }
        let Some(rate) = view.conversion_rate(security) else {
            return GetMaximumOrderQuantityResult::error(format!(
                "No conversion rate available from {} to {}.",
                security.quote_currency(),
                view.cash_book().account_currency()
            ));
        };

        let mut target = target;
        let mut note = None;
        if self.is_cash() && target < Decimal::ZERO {
            target = Decimal::ZERO;
            note = Some(format!(
                "Cash accounts cannot hold short positions; the target for {} was clamped to zero.",
                security.symbol()
            ));
        }

        if target.is_zero() {
            let quantity = -held;
            return match note {
                Some(n) => GetMaximumOrderQuantityResult::with_note(
                    quantity,
                    n,
                    silence_non_error_reasons,
                ),
                None => GetMaximumOrderQuantityResult::quantity(quantity),
            };
        }

        let tpv = match view.total_portfolio_value() {
            Ok(v) => v,
            Err(e) => return GetMaximumOrderQuantityResult::error(e.to_string()),
        };
        if tpv <= Decimal::ZERO {
            return GetMaximumOrderQuantityResult::error(format!(
                "The total portfolio value is {tpv}; no buying power is available."
            ));
        }

        let leverage = self.current_leverage(view, security);
        let unit_margin = view.unit_value(security) / leverage;
        let target_margin = target * (tpv - tpv * self.required_free_buying_power_percent);
        let current_margin = held * unit_margin;
        let delta = target_margin - current_margin;
        let direction = OrderDirection::from_quantity(delta);
        if direction == OrderDirection::Hold {
            return GetMaximumOrderQuantityResult::quantity(Decimal::ZERO);
        }

        let capacity = match self.kind {
            BuyingPowerKind::Cash if direction == OrderDirection::Sell => delta.abs(),
            BuyingPowerKind::Cash => {
                match cash_buying_power(self, view, security, OrderDirection::Buy) {
                    Ok(bp) => bp.value * rate,
                    Err(e) => return GetMaximumOrderQuantityResult::error(e.to_string()),
                }
            }
            _ => {
                let increases = held.is_zero() || held.signum() == direction.sign();
                if increases && pdt_restriction(self, view, security).is_some() {
                    return GetMaximumOrderQuantityResult::error(format!(
                        "Pattern day trading restrictions prevent increasing the {} position.",
                        security.symbol()
                    ));
                }
                match self.margin_remaining(view, security, direction) {
                    Ok(v) => v,
                    Err(e) => return GetMaximumOrderQuantityResult::error(e.to_string()),
                }
            }
        };
        if capacity <= Decimal::ZERO {
            return GetMaximumOrderQuantityResult::error(
                "The portfolio does not have enough margin available.",
            );
        }

        let lot = security.lot_size();
        let fee = |qty: Decimal| security.order_fee(qty) * rate;
        let crosses_zero = !held.is_zero() && target_margin.signum() != held.signum();

        let quantity = if crosses_zero {
            // Close the whole position, then open what the target allows
            // on the other side.
            let budget = target_margin
                .abs()
                .min(capacity - self.initial_margin(view, security, held));
            let closing = held.abs();
            let cost = |lots: Decimal| lots * lot * unit_margin + fee(closing + lots * lot);
            if cost(Decimal::ZERO) > budget {
                -held
            } else {
                let upper = (budget / (lot * unit_margin)).floor();
                match solve_lots(upper, budget, cost) {
                    Some(lots) => (closing + lots * lot) * direction.sign(),
                    None => return non_convergence(security),
                }
            }
        } else {
            let budget = delta.abs().min(capacity);
            let cost = |lots: Decimal| lots * lot * unit_margin + fee(lots * lot);
            let upper = (budget / (lot * unit_margin)).floor();
            match solve_lots(upper, budget, cost) {
                Some(lots) => lots * lot * direction.sign(),
                None => return non_convergence(security),
            }
        };

        if quantity.is_zero() {
            return GetMaximumOrderQuantityResult::with_note(
                Decimal::ZERO,
                format!(
                    "The order quantity for {} is less than the lot size of {} and has been rounded to zero.",
                    security.symbol(),
                    lot
                ),
                silence_non_error_reasons,
            );
        }

        match note {
            Some(n) => GetMaximumOrderQuantityResult::with_note(quantity, n, silence_non_error_reasons),
            None => GetMaximumOrderQuantityResult::quantity(quantity),
        }
    }

    /// Same solve, expressed as a change of `delta` (account currency) in
    /// the margin tied up in this security.
    pub fn maximum_order_quantity_for_delta_buying_power(
        &self,
        view: &PortfolioView<'_>,
        security: &Security,
        delta: Decimal,
        silence_non_error_reasons: bool,
    ) -> GetMaximumOrderQuantityResult {
        let tpv = match view.total_portfolio_value() {
            Ok(v) => v,
            Err(e) => return GetMaximumOrderQuantityResult::error(e.to_string()),
        };
        let usable = tpv - tpv * self.required_free_buying_power_percent;
        if usable <= Decimal::ZERO {
            return GetMaximumOrderQuantityResult::error(format!(
                "The total portfolio value is {tpv}; no buying power is available."
            ));
        }
        let held = view.holding_quantity(security.id());
        let current = held * self.initial_margin(view, security, Decimal::ONE);
        let target = (current + delta) / usable;
        self.maximum_order_quantity_for_target_buying_power(
            view,
            security,
            target,
            silence_non_error_reasons,
        )
    }
}

// ---------------------------------------------------------------------------
// Cash accounts
// ---------------------------------------------------------------------------

/// Settled cash in the quote currency, less the free buffer.
fn cash_buying_power(
    model: &BuyingPowerModel,
    view: &PortfolioView<'_>,
    security: &Security,
    direction: OrderDirection,
) -> Result<BuyingPower, PortfolioError> {
    let currency = security.quote_currency().to_string();
    let value = match direction {
        OrderDirection::Sell => {
            let held = view.holding_quantity(security.id()).max(Decimal::ZERO);
            held * security.price() * security.multiplier()
        }
        _ => {
            let settled = view
                .cash_book()
                .get(&currency)
                .map(|c| c.amount())
                .unwrap_or(Decimal::ZERO);
            let buffer = if model.required_free_buying_power_percent.is_zero() {
                Decimal::ZERO
            } else {
                let buffer_account =
                    view.total_portfolio_value()? * model.required_free_buying_power_percent;
                view.cash_book().convert(
                    buffer_account,
                    view.cash_book().account_currency(),
                    &currency,
                )?
            };
            settled - buffer
        }
    };
    Ok(BuyingPower {
        value: value.max(Decimal::ZERO),
        currency,
    })
}

fn cash_has_sufficient(
    model: &BuyingPowerModel,
    view: &PortfolioView<'_>,
    security: &Security,
    quantity: Decimal,
) -> HasSufficientBuyingPowerForOrderResult {
    let held = view.holding_quantity(security.id());
    if quantity < Decimal::ZERO {
        return HasSufficientBuyingPowerForOrderResult::insufficient(format!(
            "Cash accounts cannot short: order quantity {} for {} exceeds the {} held.",
            quantity,
            security.symbol(),
            held.max(Decimal::ZERO)
        ));
    }

    let required =
        quantity * security.price() * security.multiplier() + security.order_fee(quantity);
    let available = match cash_buying_power(model, view, security, OrderDirection::Buy) {
        Ok(bp) => bp,
        Err(e) => return HasSufficientBuyingPowerForOrderResult::insufficient(e.to_string()),
    };
    if required > available.value {
        return HasSufficientBuyingPowerForOrderResult::insufficient(format!(
            "Insufficient buying power to complete order (Value:{} {}), Reason: Your portfolio holds {} {} of settled cash available to buy {}.",
            required.round_dp(2),
            available.currency,
            available.value.round_dp(2),
            available.currency,
            security.symbol()
        ));
    }
    HasSufficientBuyingPowerForOrderResult::sufficient()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn market_open(now: Option<DateTime<Utc>>, security: &Security) -> bool {
    now.map(|t| security.market().is_open(t)).unwrap_or(false)
}

/// Blocks risk-increasing orders for pattern day trading accounts the
/// ledger has flagged while equity is under the minimum.
fn pdt_restriction(
    model: &BuyingPowerModel,
    view: &PortfolioView<'_>,
    security: &Security,
) -> Option<HasSufficientBuyingPowerForOrderResult> {
    if !matches!(model.kind, BuyingPowerKind::PatternDayTrading { .. }) {
        return None;
    }
    let now = view.now()?;
    let equity = match view.total_portfolio_value() {
        Ok(v) => v,
        Err(e) => return Some(HasSufficientBuyingPowerForOrderResult::insufficient(e.to_string())),
    };
    let decision = evaluate_pdt(
        view.pdt_policy(),
        view.day_trades(),
        &PdtInput {
            today: security.market().local_date(now),
            equity,
            is_day_trade: false,
        },
    );
    if decision.trading_allowed {
        return None;
    }
    Some(HasSufficientBuyingPowerForOrderResult::insufficient(format!(
        "Pattern day trading restriction ({}): {} day trades in the window and equity below {}.",
        decision.reason.as_str(),
        decision.window_day_trade_count,
        view.pdt_policy().min_equity
    )))
}

/// Largest lot count in `[0, upper]` with `cost(lots) <= budget`.
///
/// `cost` must be non-decreasing and `cost(0) <= budget`. Returns `None`
/// if the bracket does not close within [`MAX_SOLVE_ITERATIONS`].
fn solve_lots<F>(upper: Decimal, budget: Decimal, cost: F) -> Option<Decimal>
where
    F: Fn(Decimal) -> Decimal,
{
    if upper <= Decimal::ZERO {
        return Some(Decimal::ZERO);
    }
    if cost(upper) <= budget {
        return Some(upper);
    }
    let mut lo = Decimal::ZERO;
    let mut hi = upper;
    for _ in 0..MAX_SOLVE_ITERATIONS {
        if hi - lo <= Decimal::ONE {
            return Some(lo);
        }
        let mid = lo + ((hi - lo) / Decimal::TWO).floor();
        if cost(mid) <= budget {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    if hi - lo <= Decimal::ONE {
        Some(lo)
    } else {
        None
    }
}

fn non_convergence(security: &Security) -> GetMaximumOrderQuantityResult {
    GetMaximumOrderQuantityResult::error(format!(
        "Unable to size an order for {} within {} iterations.",
        security.symbol(),
        MAX_SOLVE_ITERATIONS
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_finds_largest_affordable_lot_count() {
        // cost = 10 per lot + flat 5
        let cost = |lots: Decimal| lots * dec!(10) + if lots > Decimal::ZERO { dec!(5) } else { dec!(0) };
        assert_eq!(solve_lots(dec!(100), dec!(1000), cost), Some(dec!(99)));
        assert_eq!(solve_lots(dec!(100), dec!(2000), cost), Some(dec!(100)));
        assert_eq!(solve_lots(dec!(0), dec!(2000), cost), Some(dec!(0)));
        assert_eq!(solve_lots(dec!(1), dec!(12), cost), Some(dec!(0)));
    }

    #[test]
    fn solver_gives_up_on_absurd_brackets() {
        let cost = |lots: Decimal| lots;
        let upper = Decimal::MAX.floor();
        assert_eq!(solve_lots(upper, upper - dec!(1000), cost), None);
    }

    #[test]
    fn leverage_rules() {
        let mut cash = BuyingPowerModel::cash();
        assert!(cash.set_leverage(dec!(2)).is_err());
        assert!(cash.set_leverage(dec!(1)).is_ok());

        let mut margin = BuyingPowerModel::margin(dec!(2));
        margin.set_leverage(dec!(4)).unwrap();
        assert_eq!(margin.leverage(), dec!(4));
        assert!(margin.set_leverage(dec!(0.5)).is_err());

        assert!(BuyingPowerModel::margin(dec!(0.5)).validate().is_err());
        assert!(BuyingPowerModel::cash()
            .with_required_free_buying_power_percent(dec!(1))
            .validate()
            .is_err());
        assert_eq!(BuyingPowerModel::pattern_day_trading().leverage(), dec!(2));
    }
}
