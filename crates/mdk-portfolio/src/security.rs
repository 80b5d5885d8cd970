//! Securities and the arena that owns them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::buying_power::BuyingPowerModel;
use crate::data::{DataValue, SecurityData};
use crate::error::PortfolioError;
use crate::fees::FeeModel;
use crate::market::Market;
use crate::settlement::SettlementModel;
use crate::types::{currency_code, SecurityId, Symbol};

/// Contract attributes that do not change while trading.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SymbolProperties {
    /// Smallest tradable increment. Order quantities are multiples of it.
    pub lot_size: Decimal,
    /// Quote-currency value of one unit per point of price.
    pub contract_multiplier: Decimal,
}

impl Default for SymbolProperties {
    fn default() -> Self {
        Self {
            lot_size: Decimal::ONE,
            contract_multiplier: Decimal::ONE,
        }
    }
}

/// Everything needed to add a security to an account.
#[derive(Clone, Debug)]
pub struct SecurityDefinition {
    pub symbol: Symbol,
    pub market: String,
    pub quote_currency: String,
    pub properties: SymbolProperties,
    pub buying_power_model: BuyingPowerModel,
    /// Falls back to the market's cash settlement for cash accounts and to
    /// immediate settlement otherwise.
    pub settlement_model: Option<SettlementModel>,
    pub fee_model: FeeModel,
    /// Seeded into the security's [`SecurityData`] value bag.
    pub attributes: BTreeMap<String, DataValue>,
}

impl SecurityDefinition {
    /// USD equity on the `usa` market, lot size 1.
    pub fn equity<S: Into<Symbol>>(symbol: S, buying_power_model: BuyingPowerModel) -> Self {
        Self {
            symbol: symbol.into(),
            market: "usa".to_string(),
            quote_currency: "USD".to_string(),
            properties: SymbolProperties::default(),
            buying_power_model,
            settlement_model: None,
            fee_model: FeeModel::Zero,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_quote_currency(mut self, currency: &str) -> Self {
        self.quote_currency = currency_code(currency);
        self
    }

    pub fn with_market(mut self, market: &str) -> Self {
        self.market = market.to_string();
        self
    }

    pub fn with_lot_size(mut self, lot_size: Decimal) -> Self {
        self.properties.lot_size = lot_size;
        self
    }

    pub fn with_multiplier(mut self, multiplier: Decimal) -> Self {
        self.properties.contract_multiplier = multiplier;
        self
    }

    pub fn with_settlement(mut self, model: SettlementModel) -> Self {
        self.settlement_model = Some(model);
        self
    }

    pub fn with_fee_model(mut self, model: FeeModel) -> Self {
        self.fee_model = model;
        self
    }

    pub fn with_attribute<K: Into<String>>(mut self, key: K, value: DataValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

#[derive(Debug)]
pub struct Security {
    id: SecurityId,
    symbol: Symbol,
    market: Market,
    quote_currency: String,
    properties: SymbolProperties,
    price: Decimal,
    last_update: Option<DateTime<Utc>>,
    buying_power_model: BuyingPowerModel,
    settlement_model: SettlementModel,
    fee_model: FeeModel,
    data: SecurityData,
}

impl Security {
    pub fn id(&self) -> SecurityId {
        self.id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn quote_currency(&self) -> &str {
        &self.quote_currency
    }

    pub fn properties(&self) -> &SymbolProperties {
        &self.properties
    }

    pub fn lot_size(&self) -> Decimal {
        self.properties.lot_size
    }

    pub fn multiplier(&self) -> Decimal {
        self.properties.contract_multiplier
    }

    /// Last traded/marked price in quote currency. Zero until first data.
    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn has_data(&self) -> bool {
        self.price > Decimal::ZERO
    }

    pub fn buying_power_model(&self) -> &BuyingPowerModel {
        &self.buying_power_model
    }

    pub fn settlement_model(&self) -> &SettlementModel {
        &self.settlement_model
    }

    pub fn fee_model(&self) -> &FeeModel {
        &self.fee_model
    }

    pub fn data(&self) -> &SecurityData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SecurityData {
        &mut self.data
    }

    /// Configured (overnight) leverage.
    pub fn leverage(&self) -> Decimal {
        self.buying_power_model.leverage()
    }

    pub fn set_leverage(&mut self, leverage: Decimal) -> Result<(), PortfolioError> {
        self.buying_power_model.set_leverage(leverage)
    }

    pub fn set_buying_power_model(&mut self, model: BuyingPowerModel) -> Result<(), PortfolioError> {
        model.validate()?;
        self.buying_power_model = model;
        Ok(())
    }

    pub fn set_fee_model(&mut self, model: FeeModel) -> Result<(), PortfolioError> {
        model.validate().map_err(PortfolioError::invalid_config)?;
        self.fee_model = model;
        Ok(())
    }

    pub fn set_price(&mut self, price: Decimal, time: DateTime<Utc>) -> Result<(), PortfolioError> {
        if price < Decimal::ZERO {
            return Err(PortfolioError::invalid_config(format!(
                "{}: price must be >= 0, got {price}",
                self.symbol
            )));
        }
        self.price = price;
        self.last_update = Some(time);
        Ok(())
    }

    /// Fee for `quantity` units at the current price, in quote currency.
    pub fn order_fee(&self, quantity: Decimal) -> Decimal {
        self.fee_model
            .order_fee(quantity, self.price, self.properties.contract_multiplier)
    }
}

/// Arena of securities with a symbol index.
#[derive(Debug, Default)]
pub struct SecurityManager {
    arena: Vec<Security>,
    by_symbol: BTreeMap<Symbol, SecurityId>,
}

impl SecurityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a security listed on `market`.
    pub fn add(
        &mut self,
        def: SecurityDefinition,
        market: &Market,
    ) -> Result<SecurityId, PortfolioError> {
        if def.symbol.as_str().is_empty() {
            return Err(PortfolioError::invalid_config("symbol must not be empty"));
        }
        if self.by_symbol.contains_key(&def.symbol) {
            return Err(PortfolioError::invalid_config(format!(
                "security {} already added",
                def.symbol
            )));
        }
        if def.properties.lot_size <= Decimal::ZERO {
            return Err(PortfolioError::invalid_config(format!(
                "{}: lot size must be > 0, got {}",
                def.symbol, def.properties.lot_size
            )));
        }
        if def.properties.contract_multiplier <= Decimal::ZERO {
            return Err(PortfolioError::invalid_config(format!(
                "{}: contract multiplier must be > 0, got {}",
                def.symbol, def.properties.contract_multiplier
            )));
        }
        def.buying_power_model.validate()?;
        def.fee_model
            .validate()
            .map_err(PortfolioError::invalid_config)?;

        let settlement_model = match def.settlement_model {
            Some(m) => m,
            None if def.buying_power_model.is_cash() => market.cash_settlement.clone(),
            None => SettlementModel::Immediate,
        };

        let mut data = SecurityData::new();
        for (key, value) in def.attributes {
            data.set_value(key, value);
        }

        let id = SecurityId(self.arena.len());
        self.by_symbol.insert(def.symbol.clone(), id);
        self.arena.push(Security {
            id,
            symbol: def.symbol,
            market: market.clone(),
            quote_currency: currency_code(&def.quote_currency),
            properties: def.properties,
            price: Decimal::ZERO,
            last_update: None,
            buying_power_model: def.buying_power_model,
            settlement_model,
            fee_model: def.fee_model,
            data,
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn get(&self, id: SecurityId) -> Option<&Security> {
        self.arena.get(id.0)
    }

    pub fn get_mut(&mut self, id: SecurityId) -> Option<&mut Security> {
        self.arena.get_mut(id.0)
    }

    pub fn id_of(&self, symbol: &Symbol) -> Option<SecurityId> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn by_symbol(&self, symbol: &Symbol) -> Option<&Security> {
        self.id_of(symbol).and_then(|id| self.get(id))
    }

    pub fn by_symbol_mut(&mut self, symbol: &Symbol) -> Option<&mut Security> {
        self.id_of(symbol).and_then(move |id| self.arena.get_mut(id.0))
    }

    pub fn require(&self, symbol: &Symbol) -> Result<&Security, PortfolioError> {
        self.by_symbol(symbol)
            .ok_or_else(|| PortfolioError::UnknownSecurity {
                symbol: symbol.clone(),
            })
    }

    /// Securities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Security> {
        self.arena.iter()
    }
}
