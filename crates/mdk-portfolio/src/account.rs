//! Account: markets + securities + portfolio, behind one lock.
//!
//! Every query resolves the symbol once and hands the models a
//! [`PortfolioView`]. [`SharedAccount`] is the handle threads share; brokerage
//! calls must happen with no guard held.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::buying_power::{
    BuyingPower, GetMaximumOrderQuantityResult, HasSufficientBuyingPowerForOrderResult,
    ReservedBuyingPowerForPosition,
};
use crate::cash::CurrencyConversion;
use crate::error::PortfolioError;
use crate::holding::SecurityHolding;
use crate::margin_call::{MarginCallModel, MarginCallPlan};
use crate::market::MarketRegistry;
use crate::pdt::PdtPolicy;
use crate::portfolio::{FillOutcome, PortfolioSnapshot, PortfolioView, SecurityPortfolioManager};
use crate::security::{Security, SecurityDefinition, SecurityManager};
use crate::settlement::UnsettledCashAmount;
use crate::types::{Fill, OrderDirection, SecurityId, Symbol};

#[derive(Debug)]
pub struct Account {
    markets: MarketRegistry,
    securities: SecurityManager,
    portfolio: SecurityPortfolioManager,
    margin_call_model: MarginCallModel,
}

impl Account {
    /// Empty account with the default `usa` and `crypto` markets.
    pub fn new(account_currency: &str) -> Self {
        Self::with_markets(account_currency, MarketRegistry::with_defaults())
    }

    pub fn with_markets(account_currency: &str, markets: MarketRegistry) -> Self {
        Self {
            markets,
            securities: SecurityManager::new(),
            portfolio: SecurityPortfolioManager::new(account_currency),
            margin_call_model: MarginCallModel::default(),
        }
    }

    pub fn markets(&self) -> &MarketRegistry {
        &self.markets
    }

    pub fn securities(&self) -> &SecurityManager {
        &self.securities
    }

    pub fn portfolio(&self) -> &SecurityPortfolioManager {
        &self.portfolio
    }

    pub fn margin_call_model(&self) -> &MarginCallModel {
        &self.margin_call_model
    }

    pub fn set_margin_call_model(&mut self, model: MarginCallModel) -> Result<(), PortfolioError> {
        model.validate()?;
        self.margin_call_model = model;
        Ok(())
    }

    pub fn set_pdt_policy(&mut self, policy: PdtPolicy) {
        self.portfolio.set_pdt_policy(policy);
    }

    pub fn account_currency(&self) -> &str {
        self.portfolio.cash_book().account_currency()
    }

    pub fn set_cash(
        &mut self,
        currency: &str,
        amount: Decimal,
        conversion_rate: Decimal,
    ) -> Result<(), PortfolioError> {
        self.portfolio.set_cash(currency, amount, conversion_rate)
    }

    pub fn bind_currency_conversion(
        &mut self,
        currency: &str,
        conversion: CurrencyConversion,
    ) -> Result<(), PortfolioError> {
        self.portfolio.cash_book_mut().bind_conversion(currency, conversion)
    }

    /// Add a security. Its quote currency must already be convertible, or
    /// bound to a conversion feed.
    pub fn add_security(&mut self, def: SecurityDefinition) -> Result<SecurityId, PortfolioError> {
        let market = self.markets.require(&def.market)?.clone();
        let book = self.portfolio.cash_book();
        let quote = crate::types::currency_code(&def.quote_currency);
        let bound = book.get(&quote).and_then(|c| c.conversion()).is_some();
        if !bound {
            book.rate_to_account(&quote)?;
        }
        let id = self.securities.add(def, &market)?;
        self.portfolio.cash_book_mut().ensure_currency(&quote);
        Ok(id)
    }

    pub fn security(&self, symbol: &Symbol) -> Result<&Security, PortfolioError> {
        self.securities.require(symbol)
    }

    pub fn security_mut(&mut self, symbol: &Symbol) -> Result<&mut Security, PortfolioError> {
        self.securities
            .by_symbol_mut(symbol)
            .ok_or_else(|| PortfolioError::UnknownSecurity {
                symbol: symbol.clone(),
            })
    }

    pub fn set_leverage(&mut self, symbol: &Symbol, leverage: Decimal) -> Result<(), PortfolioError> {
        self.security_mut(symbol)?.set_leverage(leverage)
    }

    /// Mark a security and feed any currency bound to the same symbol.
    pub fn set_price(
        &mut self,
        symbol: &Symbol,
        price: Decimal,
        time: DateTime<Utc>,
    ) -> Result<(), PortfolioError> {
        self.security_mut(symbol)?.set_price(price, time)?;
        self.portfolio.cash_book_mut().update_from_price(symbol, price);
        self.portfolio.set_time(time);
        Ok(())
    }

    /// Feed a conversion-only symbol (not a tradable security).
    pub fn set_conversion_price(&mut self, symbol: &Symbol, price: Decimal) -> usize {
        self.portfolio.cash_book_mut().update_from_price(symbol, price)
    }

    pub fn set_time(&mut self, now: DateTime<Utc>) {
        self.portfolio.set_time(now);
    }

    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.portfolio.now()
    }

    pub fn process_fill(&mut self, fill: &Fill) -> Result<FillOutcome, PortfolioError> {
        self.portfolio.process_fill(&self.securities, fill)
    }

    pub fn scan_for_cash_settlement(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnsettledCashAmount>, PortfolioError> {
        self.portfolio.scan_for_cash_settlement(now)
    }

    pub fn view(&self) -> PortfolioView<'_> {
        self.portfolio.view(&self.securities)
    }

    pub fn holding(&self, symbol: &Symbol) -> Option<&SecurityHolding> {
        self.securities
            .id_of(symbol)
            .and_then(|id| self.portfolio.holding(id))
    }

    pub fn holding_quantity(&self, symbol: &Symbol) -> Decimal {
        self.holding(symbol)
            .map(SecurityHolding::quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total_portfolio_value(&self) -> Result<Decimal, PortfolioError> {
        self.view().total_portfolio_value()
    }

    pub fn total_margin_used(&self) -> Decimal {
        self.view().total_margin_used()
    }

    pub fn margin_remaining(&self) -> Result<Decimal, PortfolioError> {
        self.view().margin_remaining()
    }

    pub fn buying_power(
        &self,
        symbol: &Symbol,
        direction: OrderDirection,
    ) -> Result<BuyingPower, PortfolioError> {
        let security = self.security(symbol)?;
        security
            .buying_power_model()
            .buying_power(&self.view(), security, direction)
    }

    pub fn reserved_buying_power_for_position(
        &self,
        symbol: &Symbol,
    ) -> Result<ReservedBuyingPowerForPosition, PortfolioError> {
        let security = self.security(symbol)?;
        Ok(security
            .buying_power_model()
            .reserved_buying_power_for_position(&self.view(), security))
    }

    pub fn has_sufficient_buying_power_for_order(
        &self,
        symbol: &Symbol,
        quantity: Decimal,
    ) -> Result<HasSufficientBuyingPowerForOrderResult, PortfolioError> {
        let security = self.security(symbol)?;
        Ok(security
            .buying_power_model()
            .has_sufficient_buying_power_for_order(&self.view(), security, quantity))
    }

    pub fn maximum_order_quantity_for_target_buying_power(
        &self,
        symbol: &Symbol,
        target: Decimal,
        silence_non_error_reasons: bool,
    ) -> Result<GetMaximumOrderQuantityResult, PortfolioError> {
        let security = self.security(symbol)?;
        Ok(security
            .buying_power_model()
            .maximum_order_quantity_for_target_buying_power(
                &self.view(),
                security,
                target,
                silence_non_error_reasons,
            ))
    }

    pub fn maximum_order_quantity_for_delta_buying_power(
        &self,
        symbol: &Symbol,
        delta: Decimal,
        silence_non_error_reasons: bool,
    ) -> Result<GetMaximumOrderQuantityResult, PortfolioError> {
        let security = self.security(symbol)?;
        Ok(security
            .buying_power_model()
            .maximum_order_quantity_for_delta_buying_power(
                &self.view(),
                security,
                delta,
                silence_non_error_reasons,
            ))
    }

    pub fn margin_call_orders(
        &self,
        issue_warning_only: bool,
    ) -> Result<MarginCallPlan, PortfolioError> {
        self.margin_call_model
            .get_margin_call_orders(&self.view(), issue_warning_only)
    }

    pub fn snapshot(&self) -> Result<PortfolioSnapshot, PortfolioError> {
        self.view().snapshot()
    }

    pub fn verify_integrity(&self) -> Vec<Symbol> {
        self.portfolio.verify_integrity()
    }
}

/// Thread-shared account handle.
#[derive(Clone, Debug)]
pub struct SharedAccount(Arc<RwLock<Account>>);

impl SharedAccount {
    pub fn new(account: Account) -> Self {
        Self(Arc::new(RwLock::new(account)))
    }

    /// Every mutation validates before it writes, so state behind a
    /// poisoned lock is still consistent.
    pub fn read(&self) -> RwLockReadGuard<'_, Account> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Account> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}
