//! Multi-currency cash book.
//!
//! One [`Cash`] entry per currency. The account currency is the anchor and
//! always converts at exactly 1. Other entries carry a rate into the
//! account currency, fed either explicitly or from a bound conversion
//! symbol's price updates.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::types::{currency_code, Symbol};

/// Price feed binding for a currency's conversion rate.
///
/// With `inverted == false` the symbol quotes units of account currency per
/// unit of this currency (e.g. `EURUSD` for EUR in a USD account).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CurrencyConversion {
    pub symbol: Symbol,
    pub inverted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Cash {
    currency: String,
    amount: Decimal,
    conversion_rate: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversion: Option<CurrencyConversion>,
}

impl Cash {
    fn new(currency: String, amount: Decimal, conversion_rate: Decimal) -> Self {
        Self {
            currency,
            amount,
            conversion_rate,
            conversion: None,
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn conversion_rate(&self) -> Decimal {
        self.conversion_rate
    }

    pub fn conversion(&self) -> Option<&CurrencyConversion> {
        self.conversion.as_ref()
    }

    /// Value of this balance expressed in the account currency. An empty
    /// balance is worth zero even before its rate is known.
    pub fn value_in_account_currency(&self, account_currency: &str) -> Result<Decimal, PortfolioError> {
        if self.amount.is_zero() {
            return Ok(Decimal::ZERO);
        }
        if self.conversion_rate <= Decimal::ZERO {
            return Err(PortfolioError::UnresolvableCurrencyConversion {
                from: self.currency.clone(),
                to: account_currency.to_string(),
            });
        }
        Ok(self.amount * self.conversion_rate)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CashBook {
    account_currency: String,
    entries: BTreeMap<String, Cash>,
}

impl CashBook {
    pub fn new(account_currency: &str) -> Self {
        let account_currency = currency_code(account_currency);
        let mut entries = BTreeMap::new();
        entries.insert(
            account_currency.clone(),
            Cash::new(account_currency.clone(), Decimal::ZERO, Decimal::ONE),
        );
        Self {
            account_currency,
            entries,
        }
    }

    pub fn account_currency(&self) -> &str {
        &self.account_currency
    }

    pub fn get(&self, currency: &str) -> Option<&Cash> {
        self.entries.get(&currency_code(currency))
    }

    pub fn contains(&self, currency: &str) -> bool {
        self.entries.contains_key(&currency_code(currency))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cash> {
        self.entries.values()
    }

    /// Insert or overwrite a currency entry. The anchor's rate must stay 1;
    /// every other rate must be positive.
    pub fn set_cash(
        &mut self,
        currency: &str,
        amount: Decimal,
        conversion_rate: Decimal,
    ) -> Result<(), PortfolioError> {
        let code = currency_code(currency);
        check_rate(&self.account_currency, &code, conversion_rate)?;
        let entry = self
            .entries
            .entry(code.clone())
            .or_insert_with(|| Cash::new(code, Decimal::ZERO, conversion_rate));
        entry.amount = amount;
        entry.conversion_rate = conversion_rate;
        Ok(())
    }

    /// Make sure an entry exists; a new one starts empty with no rate.
    pub fn ensure_currency(&mut self, currency: &str) {
        let code = currency_code(currency);
        self.entries
            .entry(code.clone())
            .or_insert_with(|| Cash::new(code, Decimal::ZERO, Decimal::ZERO));
    }

    /// Add a signed delta to a balance, returning the new amount.
    pub fn add_amount(&mut self, currency: &str, delta: Decimal) -> Result<Decimal, PortfolioError> {
        let code = currency_code(currency);
        let account_currency = self.account_currency.clone();
        let entry = self.entries.get_mut(&code).ok_or(
            PortfolioError::UnresolvableCurrencyConversion {
                from: code,
                to: account_currency,
            },
        )?;
        entry.amount += delta;
        Ok(entry.amount)
    }

    pub fn set_conversion_rate(
        &mut self,
        currency: &str,
        conversion_rate: Decimal,
    ) -> Result<(), PortfolioError> {
        let code = currency_code(currency);
        check_rate(&self.account_currency, &code, conversion_rate)?;
        self.ensure_currency(&code);
        if let Some(entry) = self.entries.get_mut(&code) {
            entry.conversion_rate = conversion_rate;
        }
        Ok(())
    }

    /// Bind a currency's rate to a price feed symbol.
    pub fn bind_conversion(
        &mut self,
        currency: &str,
        conversion: CurrencyConversion,
    ) -> Result<(), PortfolioError> {
        let code = currency_code(currency);
        if code == self.account_currency {
            return Err(PortfolioError::invalid_config(format!(
                "account currency {code} cannot be bound to a conversion feed"
            )));
        }
        self.ensure_currency(&code);
        if let Some(entry) = self.entries.get_mut(&code) {
            entry.conversion = Some(conversion);
        }
        Ok(())
    }

    /// Push a price update into every entry bound to `symbol`.
    ///
    /// Returns how many entries changed. Non-positive prices are ignored.
    pub fn update_from_price(&mut self, symbol: &Symbol, price: Decimal) -> usize {
        if price <= Decimal::ZERO {
            return 0;
        }
        let mut updated = 0;
        for entry in self.entries.values_mut() {
            let Some(conv) = &entry.conversion else {
                continue;
            };
            if &conv.symbol != symbol {
                continue;
            }
            entry.conversion_rate = if conv.inverted {
                Decimal::ONE / price
            } else {
                price
            };
            updated += 1;
        }
        updated
    }

    /// Σ amount × rate over every entry, in the account currency.
    ///
    /// Fails if any non-empty balance has no rate yet.
    pub fn total_value_in_account_currency(&self) -> Result<Decimal, PortfolioError> {
        let mut total = Decimal::ZERO;
        for entry in self.entries.values() {
            total += entry.value_in_account_currency(&self.account_currency)?;
        }
        Ok(total)
    }

    /// Rate that converts one unit of `currency` into the account currency.
    pub fn rate_to_account(&self, currency: &str) -> Result<Decimal, PortfolioError> {
        let code = currency_code(currency);
        match self.entries.get(&code) {
            Some(c) if c.conversion_rate > Decimal::ZERO => Ok(c.conversion_rate),
            _ => Err(PortfolioError::UnresolvableCurrencyConversion {
                from: code,
                to: self.account_currency.clone(),
            }),
        }
    }

    pub fn convert_to_account_currency(
        &self,
        amount: Decimal,
        currency: &str,
    ) -> Result<Decimal, PortfolioError> {
        Ok(amount * self.rate_to_account(currency)?)
    }

    /// Convert between any two known currencies via the account currency.
    pub fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal, PortfolioError> {
        let from = currency_code(from);
        let to = currency_code(to);
        if from == to {
            return Ok(amount);
        }
        let from_rate = self.rate_to_account(&from)?;
        let to_rate = self
            .rate_to_account(&to)
            .map_err(|_| PortfolioError::UnresolvableCurrencyConversion {
                from: from.clone(),
                to: to.clone(),
            })?;
        Ok(amount * from_rate / to_rate)
    }
}

fn check_rate(account_currency: &str, code: &str, rate: Decimal) -> Result<(), PortfolioError> {
    if rate <= Decimal::ZERO {
        return Err(PortfolioError::invalid_config(format!(
            "conversion rate for {code} must be > 0, got {rate}"
        )));
    }
    if code == account_currency && rate != Decimal::ONE {
        return Err(PortfolioError::invalid_config(format!(
            "account currency {code} must convert at 1, got {rate}"
        )));
    }
    Ok(())
}
