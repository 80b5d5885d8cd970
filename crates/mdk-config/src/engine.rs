//! Typed engine configuration.
//!
//! Deserialized from the merged config JSON. Every field with a sensible
//! default may be omitted; `build_account` applies the portfolio crate's own
//! defaults (FINRA PDT policy, 5% margin warning, 0.25% free buying power).

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use std::collections::BTreeMap;

use mdk_portfolio::{
    currency_code, Account, BuyingPowerModel, CurrencyConversion, DataValue, FeeModel,
    MarginCallModel,
    Market, MarketHours, MarketRegistry, PdtPolicy, SecurityDefinition, SettlementModel, Symbol,
    DEFAULT_INTRADAY_LEVERAGE, DEFAULT_OVERNIGHT_LEVERAGE,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::LoadedConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub markets: Vec<MarketConfig>,
    #[serde(default)]
    pub securities: Vec<SecurityConfig>,
    #[serde(default)]
    pub margin_call: MarginCallConfig,
    #[serde(default)]
    pub pdt: PdtConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_account_currency")]
    pub currency: String,
    #[serde(default)]
    pub cash: Vec<CashConfig>,
    #[serde(default)]
    pub conversions: Vec<ConversionConfig>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            currency: default_account_currency(),
            cash: Vec::new(),
            conversions: Vec::new(),
        }
    }
}

fn default_account_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashConfig {
    pub currency: String,
    pub amount: Decimal,
    /// Units of account currency per unit of `currency`. Required for
    /// anything but the account currency.
    #[serde(default)]
    pub rate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub currency: String,
    pub symbol: String,
    #[serde(default)]
    pub inverted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub name: String,
    /// IANA name, e.g. `Europe/Berlin`.
    pub time_zone: String,
    pub open: NaiveTime,
    pub close: NaiveTime,
    #[serde(default = "default_true")]
    pub weekdays_only: bool,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

impl MarketConfig {
    pub fn to_market(&self) -> Result<Market> {
        let tz: Tz = self
            .time_zone
            .parse()
            .map_err(|_| anyhow!("unknown time zone: {}", self.time_zone))?;
        Ok(Market::new(
            self.name.as_str(),
            tz,
            MarketHours {
                open: self.open,
                close: self.close,
                weekdays_only: self.weekdays_only,
            },
            self.settlement.to_model(),
        ))
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementConfig {
    #[default]
    Immediate,
    Delayed { days: u32, time_of_day: NaiveTime },
}

impl SettlementConfig {
    pub fn to_model(&self) -> SettlementModel {
        match self {
            SettlementConfig::Immediate => SettlementModel::Immediate,
            SettlementConfig::Delayed { days, time_of_day } => SettlementModel::Delayed {
                days: *days,
                time_of_day: *time_of_day,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuyingPowerConfig {
    #[default]
    Cash,
    Margin {
        leverage: Decimal,
        #[serde(default)]
        maintenance_leverage: Option<Decimal>,
    },
    PatternDayTrading {
        #[serde(default)]
        intraday_leverage: Option<Decimal>,
        #[serde(default)]
        overnight_leverage: Option<Decimal>,
    },
}

impl BuyingPowerConfig {
    pub fn to_model(&self) -> BuyingPowerModel {
        match self {
            BuyingPowerConfig::Cash => BuyingPowerModel::cash(),
            BuyingPowerConfig::Margin {
                leverage,
                maintenance_leverage,
            } => BuyingPowerModel::margin_with_maintenance(
                *leverage,
                maintenance_leverage.unwrap_or(*leverage),
            ),
            BuyingPowerConfig::PatternDayTrading {
                intraday_leverage,
                overnight_leverage,
            } => BuyingPowerModel::pattern_day_trading_with(
                intraday_leverage.unwrap_or(DEFAULT_INTRADAY_LEVERAGE),
                overnight_leverage.unwrap_or(DEFAULT_OVERNIGHT_LEVERAGE),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub symbol: String,
    #[serde(default = "default_market")]
    pub market: String,
    /// Defaults to the account currency.
    #[serde(default)]
    pub quote_currency: Option<String>,
    #[serde(default)]
    pub lot_size: Option<Decimal>,
    #[serde(default)]
    pub multiplier: Option<Decimal>,
    #[serde(default)]
    pub buying_power: BuyingPowerConfig,
    #[serde(default)]
    pub required_free_buying_power_percent: Option<Decimal>,
    /// Defaults to the market's convention for cash accounts.
    #[serde(default)]
    pub settlement: Option<SettlementConfig>,
    #[serde(default)]
    pub fees: FeeModel,
    /// Free-form attributes (sector, beta, listing date) kept on the security.
    #[serde(default)]
    pub data: BTreeMap<String, DataValue>,
}

fn default_market() -> String {
    "usa".to_string()
}

impl SecurityConfig {
    pub fn to_definition(&self, account_currency: &str) -> SecurityDefinition {
        let mut model = self.buying_power.to_model();
        if let Some(pct) = self.required_free_buying_power_percent {
            model = model.with_required_free_buying_power_percent(pct);
        }
        let mut def = SecurityDefinition::equity(Symbol::new(self.symbol.as_str()), model)
            .with_market(&self.market)
            .with_quote_currency(self.quote_currency.as_deref().unwrap_or(account_currency))
            .with_fee_model(self.fees.clone());
        if let Some(lot) = self.lot_size {
            def = def.with_lot_size(lot);
        }
        if let Some(mult) = self.multiplier {
            def = def.with_multiplier(mult);
        }
        if let Some(settlement) = &self.settlement {
            def = def.with_settlement(settlement.to_model());
        }
        for (key, value) in &self.data {
            def = def.with_attribute(key.as_str(), value.clone());
        }
        def
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarginCallConfig {
    #[serde(default)]
    pub warning_threshold: Option<Decimal>,
    #[serde(default)]
    pub liquidation_tolerance: Option<Decimal>,
}

impl MarginCallConfig {
    pub fn to_model(&self) -> MarginCallModel {
        let defaults = MarginCallModel::default();
        MarginCallModel {
            warning_threshold: self.warning_threshold.unwrap_or(defaults.warning_threshold),
            liquidation_tolerance: self
                .liquidation_tolerance
                .unwrap_or(defaults.liquidation_tolerance),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdtConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub window_days: Option<u32>,
    #[serde(default)]
    pub max_day_trades_in_window: Option<u32>,
    #[serde(default)]
    pub min_equity: Option<Decimal>,
}

impl PdtConfig {
    /// FINRA defaults with any configured field overriding.
    pub fn to_policy(&self) -> PdtPolicy {
        let base = PdtPolicy::finra_defaults();
        PdtPolicy {
            enabled: self.enabled.unwrap_or(base.enabled),
            window_days: self.window_days.unwrap_or(base.window_days),
            max_day_trades_in_window: self
                .max_day_trades_in_window
                .unwrap_or(base.max_day_trades_in_window),
            min_equity: self.min_equity.unwrap_or(base.min_equity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Deficits within the margin-call tolerance only warn.
    #[serde(default)]
    pub issue_warning_only: bool,
    /// Stop the run at the first margin call that liquidation cannot cure.
    #[serde(default = "default_true")]
    pub halt_on_unresolved_margin_call: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            issue_warning_only: false,
            halt_on_unresolved_margin_call: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        serde_json::from_value(config_json.clone()).context("invalid engine config")
    }

    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        Self::from_json(&loaded.config_json)
    }

    /// Build a fresh account: markets, margin-call model, PDT policy, cash,
    /// conversion feeds and securities, in that order.
    pub fn build_account(&self) -> Result<Account> {
        let mut markets = MarketRegistry::with_defaults();
        for m in &self.markets {
            markets.insert(m.to_market().with_context(|| format!("market {}", m.name))?);
        }

        let mut account = Account::with_markets(&self.account.currency, markets);
        account
            .set_margin_call_model(self.margin_call.to_model())
            .context("margin_call")?;
        account.set_pdt_policy(self.pdt.to_policy());

        let account_currency = account.account_currency().to_string();
        for c in &self.account.cash {
            let rate = match c.rate {
                Some(rate) => rate,
                None if currency_code(&c.currency) == account_currency => Decimal::ONE,
                None => bail!(
                    "account.cash {}: rate is required for a non-account currency",
                    c.currency
                ),
            };
            account
                .set_cash(&c.currency, c.amount, rate)
                .with_context(|| format!("account.cash {}", c.currency))?;
        }

        for conv in &self.account.conversions {
            account
                .bind_currency_conversion(
                    &conv.currency,
                    CurrencyConversion {
                        symbol: Symbol::new(conv.symbol.as_str()),
                        inverted: conv.inverted,
                    },
                )
                .with_context(|| format!("account.conversions {}", conv.currency))?;
        }

        for s in &self.securities {
            account
                .add_security(s.to_definition(&account_currency))
                .with_context(|| format!("security {}", s.symbol))?;
        }

        let tpv = account
            .total_portfolio_value()
            .context("account.cash: balances must be valued in the account currency")?;
        info!(
            currency = %account_currency,
            securities = self.securities.len(),
            tpv = %tpv,
            "account configured"
        );
        Ok(account)
    }
}
