//! The portfolio aggregate.
//!
//! [`SecurityPortfolioManager`] owns the cash book, the unsettled queue and
//! every holding. [`SecurityPortfolioManager::process_fill`] is the single
//! writer of holdings and cash; everything else reads through a
//! [`PortfolioView`], which pairs the manager with the security arena so
//! prices and models can be resolved by handle.
//!
//! Nothing derived (portfolio value, margin used) is cached: every read
//! recomputes from current state.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::accounting::{apply_fill_to_holding, replay_holding, JournalEntry};
use crate::cash::CashBook;
use crate::error::PortfolioError;
use crate::holding::SecurityHolding;
use crate::pdt::{DayTradeLedger, PdtPolicy};
use crate::security::{Security, SecurityManager};
use crate::settlement::{UnsettledCashAmount, UnsettledCashQueue};
use crate::types::{CashAmount, Fill, SecurityId, Symbol};

// ---------------------------------------------------------------------------
// Fill outcomes
// ---------------------------------------------------------------------------

/// Effect of one applied fill. Money in account currency unless noted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppliedFill {
    pub security: SecurityId,
    pub realized_profit: Decimal,
    pub fee: Decimal,
    /// Trade cash in quote currency: negative for buys, positive for sells.
    pub cash_delta: Decimal,
    /// Set when the cash delta was parked for delayed settlement.
    pub settlement_time: Option<DateTime<Utc>>,
    pub day_trade: bool,
    pub quantity_after: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FillOutcome {
    Applied(AppliedFill),
    /// The fill id was seen before; nothing changed.
    Duplicate,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SecurityPortfolioManager {
    cash_book: CashBook,
    unsettled: UnsettledCashQueue,
    holdings: BTreeMap<SecurityId, SecurityHolding>,
    day_trades: DayTradeLedger,
    pdt_policy: PdtPolicy,
    journal: Vec<JournalEntry>,
    applied_fill_ids: HashSet<String>,
    clock: Option<DateTime<Utc>>,
}

impl SecurityPortfolioManager {
    pub fn new(account_currency: &str) -> Self {
        Self {
            cash_book: CashBook::new(account_currency),
            unsettled: UnsettledCashQueue::new(),
            holdings: BTreeMap::new(),
            day_trades: DayTradeLedger::new(),
            pdt_policy: PdtPolicy::finra_defaults(),
            journal: Vec::new(),
            applied_fill_ids: HashSet::new(),
            clock: None,
        }
    }

    pub fn with_pdt_policy(mut self, policy: PdtPolicy) -> Self {
        self.pdt_policy = policy;
        self
    }

    pub fn set_pdt_policy(&mut self, policy: PdtPolicy) {
        self.pdt_policy = policy;
    }

    pub fn cash_book(&self) -> &CashBook {
        &self.cash_book
    }

    pub fn unsettled(&self) -> &UnsettledCashQueue {
        &self.unsettled
    }

    pub fn day_trades(&self) -> &DayTradeLedger {
        &self.day_trades
    }

    pub fn day_trades_mut(&mut self) -> &mut DayTradeLedger {
        &mut self.day_trades
    }

    pub fn pdt_policy(&self) -> &PdtPolicy {
        &self.pdt_policy
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn holding(&self, id: SecurityId) -> Option<&SecurityHolding> {
        self.holdings.get(&id)
    }

    pub fn holdings(&self) -> impl Iterator<Item = (SecurityId, &SecurityHolding)> {
        self.holdings.iter().map(|(id, h)| (*id, h))
    }

    /// Latest instant the portfolio has observed (fills, scans, clock ticks).
    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.clock
    }

    /// Advance the portfolio clock. Earlier instants are ignored.
    pub fn set_time(&mut self, now: DateTime<Utc>) {
        self.clock = Some(self.clock.map_or(now, |c| c.max(now)));
    }

    /// Deposit or overwrite a cash balance (setup and funding only).
    pub fn set_cash(
        &mut self,
        currency: &str,
        amount: Decimal,
        conversion_rate: Decimal,
    ) -> Result<(), PortfolioError> {
        self.cash_book.set_cash(currency, amount, conversion_rate)
    }

    pub(crate) fn cash_book_mut(&mut self) -> &mut CashBook {
        &mut self.cash_book
    }

    /// Apply a fill: update the holding, book the fee, route trade cash
    /// through the security's settlement model.
    ///
    /// All validation happens before any state changes, so an `Err` leaves
    /// the portfolio untouched. Re-delivered fill ids are ignored.
    pub fn process_fill(
        &mut self,
        securities: &SecurityManager,
        fill: &Fill,
    ) -> Result<FillOutcome, PortfolioError> {
        if self.applied_fill_ids.contains(&fill.fill_id) {
            debug!(fill_id = %fill.fill_id, symbol = %fill.symbol, "duplicate fill ignored");
            return Ok(FillOutcome::Duplicate);
        }

        let security = securities.require(&fill.symbol)?;
        if fill.fill_id.trim().is_empty() {
            return Err(PortfolioError::invalid_fill("", "fill id must not be empty"));
        }
        if fill.quantity.is_zero() {
            return Err(PortfolioError::invalid_fill(&fill.fill_id, "quantity must not be zero"));
        }
        if fill.price <= Decimal::ZERO {
            return Err(PortfolioError::invalid_fill(
                &fill.fill_id,
                format!("price must be > 0, got {}", fill.price),
            ));
        }
        if fill.fee.amount < Decimal::ZERO {
            return Err(PortfolioError::invalid_fill(
                &fill.fill_id,
                format!("fee must be >= 0, got {}", fill.fee.amount),
            ));
        }

        let id = security.id();
        let multiplier = security.multiplier();
        let quote = security.quote_currency().to_string();
        let rate = self.cash_book.rate_to_account(&quote)?;
        let fee = self
            .cash_book
            .convert_to_account_currency(fill.fee.amount, &fill.fee.currency)?;

        let cash_delta = -fill.quantity * fill.price * multiplier;
        let settlement_time = if cash_delta > Decimal::ZERO {
            security
                .settlement_model()
                .settlement_time(fill.utc_time, security.market())?
        } else {
            None
        };
        let today = security.market().local_date(fill.utc_time);

        // --- validated; mutate ---

        let holding = self
            .holdings
            .entry(id)
            .or_insert_with(|| SecurityHolding::new(security.symbol().clone()));
        let change = apply_fill_to_holding(holding, fill.quantity, fill.price, multiplier, rate, fee);
        let quantity_after = holding.quantity();

        self.cash_book.add_amount(&fill.fee.currency, -fill.fee.amount)?;
        match settlement_time {
            Some(at) => self.unsettled.push(UnsettledCashAmount {
                settlement_time_utc: at,
                amount: CashAmount::new(cash_delta, &quote),
            }),
            None => {
                self.cash_book.add_amount(&quote, cash_delta)?;
            }
        }

        let day_trade =
            self.day_trades
                .record_fill(&self.pdt_policy, id, today, &change, quantity_after);

        self.journal.push(JournalEntry {
            security: id,
            fill: fill.clone(),
            multiplier,
            conversion_rate: rate,
            fee_in_account_currency: fee,
        });
        self.applied_fill_ids.insert(fill.fill_id.clone());
        self.set_time(fill.utc_time);

        debug!(
            fill_id = %fill.fill_id,
            symbol = %fill.symbol,
            quantity = %fill.quantity,
            price = %fill.price,
            realized = %change.realized_profit,
            quantity_after = %quantity_after,
            settles_at = ?settlement_time,
            "fill applied"
        );

        Ok(FillOutcome::Applied(AppliedFill {
            security: id,
            realized_profit: change.realized_profit,
            fee,
            cash_delta,
            settlement_time,
            day_trade,
            quantity_after,
        }))
    }

    /// Move every unsettled amount due at or before `now` into the cash book.
    pub fn scan_for_cash_settlement(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnsettledCashAmount>, PortfolioError> {
        let due = self.unsettled.drain_due(now)?;
        for entry in &due {
            self.cash_book
                .add_amount(&entry.amount.currency, entry.amount.amount)?;
        }
        if !due.is_empty() {
            info!(
                settled = due.len(),
                pending = self.unsettled.len(),
                now = %now,
                "cash settled"
            );
        }
        self.set_time(now);
        Ok(due)
    }

    /// Symbols whose incremental holding differs from a replay of the
    /// journal. Empty means the books are consistent.
    pub fn verify_integrity(&self) -> Vec<Symbol> {
        let mut by_security: BTreeMap<SecurityId, Vec<&JournalEntry>> = BTreeMap::new();
        for e in &self.journal {
            by_security.entry(e.security).or_default().push(e);
        }
        let mut mismatched = Vec::new();
        for (id, held) in &self.holdings {
            let entries = by_security.remove(id).unwrap_or_default();
            let replayed = replay_holding(held.symbol().clone(), entries);
            if &replayed != held {
                mismatched.push(held.symbol().clone());
            }
        }
        mismatched
    }

    pub fn view<'a>(&'a self, securities: &'a SecurityManager) -> PortfolioView<'a> {
        PortfolioView {
            portfolio: self,
            securities,
        }
    }
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// Read-only pairing of portfolio state with the security arena.
#[derive(Clone, Copy)]
pub struct PortfolioView<'a> {
    pub portfolio: &'a SecurityPortfolioManager,
    pub securities: &'a SecurityManager,
}

impl<'a> PortfolioView<'a> {
    pub fn cash_book(&self) -> &'a CashBook {
        &self.portfolio.cash_book
    }

    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.portfolio.clock
    }

    pub fn pdt_policy(&self) -> &'a PdtPolicy {
        &self.portfolio.pdt_policy
    }

    pub fn day_trades(&self) -> &'a DayTradeLedger {
        &self.portfolio.day_trades
    }

    pub fn holding(&self, id: SecurityId) -> Option<&'a SecurityHolding> {
        self.portfolio.holdings.get(&id)
    }

    pub fn holding_quantity(&self, id: SecurityId) -> Decimal {
        self.holding(id)
            .map(SecurityHolding::quantity)
            .unwrap_or(Decimal::ZERO)
    }

    /// Rate from the security's quote currency to the account currency.
    pub fn conversion_rate(&self, security: &Security) -> Option<Decimal> {
        self.cash_book()
            .rate_to_account(security.quote_currency())
            .ok()
    }

    /// Account-currency value of one unit at the current price. Zero when
    /// the price or the conversion rate is missing.
    pub fn unit_value(&self, security: &Security) -> Decimal {
        let rate = self.conversion_rate(security).unwrap_or(Decimal::ZERO);
        security.price() * security.multiplier() * rate
    }

    /// Securities with a non-zero position, paired with their holding.
    pub fn invested(&self) -> impl Iterator<Item = (&'a Security, &'a SecurityHolding)> + 'a {
        let securities = self.securities;
        self.portfolio
            .holdings
            .iter()
            .filter(|(_, h)| h.invested())
            .filter_map(move |(id, h)| securities.get(*id).map(|s| (s, h)))
    }

    /// Signed market value of one holding. Fails when the holding is open
    /// and its quote currency has no rate.
    pub fn holding_value(&self, security: &Security) -> Result<Decimal, PortfolioError> {
        let quantity = self.holding_quantity(security.id());
        if quantity.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let rate = self.cash_book().rate_to_account(security.quote_currency())?;
        Ok(quantity * security.price() * security.multiplier() * rate)
    }

    /// Σ signed holding values.
    pub fn total_holdings_value(&self) -> Result<Decimal, PortfolioError> {
        let mut total = Decimal::ZERO;
        for (s, _) in self.invested() {
            total += self.holding_value(s)?;
        }
        Ok(total)
    }

    /// Σ |holding value|.
    pub fn total_absolute_holdings_value(&self) -> Result<Decimal, PortfolioError> {
        let mut total = Decimal::ZERO;
        for (s, _) in self.invested() {
            total += self.holding_value(s)?.abs();
        }
        Ok(total)
    }

    pub fn total_unrealized_profit(&self) -> Result<Decimal, PortfolioError> {
        let mut total = Decimal::ZERO;
        for (s, h) in self.invested() {
            let rate = self.cash_book().rate_to_account(s.quote_currency())?;
            total += h.unrealized_profit(s.price(), s.multiplier()) * rate;
        }
        Ok(total)
    }

    pub fn total_realized_profit(&self) -> Decimal {
        self.portfolio
            .holdings
            .values()
            .map(SecurityHolding::realized_profit)
            .sum()
    }

    pub fn total_fees(&self) -> Decimal {
        self.portfolio
            .holdings
            .values()
            .map(SecurityHolding::total_fees)
            .sum()
    }

    /// Settled cash across all currencies.
    pub fn settled_cash(&self) -> Result<Decimal, PortfolioError> {
        self.cash_book().total_value_in_account_currency()
    }

    pub fn unsettled_cash(&self) -> Result<Decimal, PortfolioError> {
        self.portfolio
            .unsettled
            .total_value_in_account_currency(&self.portfolio.cash_book)
    }

    /// Settled cash + unsettled cash + Σ signed holding values.
    ///
    /// `Err(UnresolvableCurrencyConversion)` when any balance, pending
    /// amount or open holding sits in a currency with no rate.
    pub fn total_portfolio_value(&self) -> Result<Decimal, PortfolioError> {
        Ok(self.settled_cash()? + self.unsettled_cash()? + self.total_holdings_value()?)
    }

    /// Σ reserved buying power over invested holdings.
    pub fn total_margin_used(&self) -> Decimal {
        self.invested()
            .map(|(s, _)| {
                s.buying_power_model()
                    .reserved_buying_power_for_position(self, s)
                    .absolute_used_buying_power
            })
            .sum()
    }

    /// TPV − total margin used. Negative means a margin call is due.
    pub fn margin_remaining(&self) -> Result<Decimal, PortfolioError> {
        Ok(self.total_portfolio_value()? - self.total_margin_used())
    }

    pub fn snapshot(&self) -> Result<PortfolioSnapshot, PortfolioError> {
        let cash = self
            .cash_book()
            .iter()
            .map(|c| CashLine {
                currency: c.currency().to_string(),
                amount: c.amount(),
                conversion_rate: c.conversion_rate(),
            })
            .collect();

        let mut holdings = Vec::new();
        for (id, h) in &self.portfolio.holdings {
            let Some(s) = self.securities.get(*id) else {
                continue;
            };
            let unrealized = if h.invested() {
                h.unrealized_profit(s.price(), s.multiplier())
                    * self.cash_book().rate_to_account(s.quote_currency())?
            } else {
                Decimal::ZERO
            };
            holdings.push(HoldingLine {
                symbol: s.symbol().clone(),
                quantity: h.quantity(),
                average_price: h.average_price(),
                price: s.price(),
                market_value: self.holding_value(s)?,
                unrealized_profit: unrealized,
                realized_profit: h.realized_profit(),
                total_fees: h.total_fees(),
                total_sale_volume: h.total_sale_volume(),
            });
        }

        let tpv = self.total_portfolio_value()?;
        let used = self.total_margin_used();
        Ok(PortfolioSnapshot {
            as_of: self.now(),
            account_currency: self.cash_book().account_currency().to_string(),
            cash,
            unsettled: self.portfolio.unsettled.iter().cloned().collect(),
            holdings,
            total_portfolio_value: tpv,
            total_margin_used: used,
            margin_remaining: tpv - used,
            total_unrealized_profit: self.total_unrealized_profit()?,
            total_realized_profit: self.total_realized_profit(),
            total_fees: self.total_fees(),
            pdt_flagged: self.day_trades().is_flagged(),
        })
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CashLine {
    pub currency: String,
    pub amount: Decimal,
    pub conversion_rate: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HoldingLine {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub price: Decimal,
    pub market_value: Decimal,
    pub unrealized_profit: Decimal,
    pub realized_profit: Decimal,
    pub total_fees: Decimal,
    pub total_sale_volume: Decimal,
}

/// Point-in-time, serializable account state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortfolioSnapshot {
    pub as_of: Option<DateTime<Utc>>,
    pub account_currency: String,
    pub cash: Vec<CashLine>,
    pub unsettled: Vec<UnsettledCashAmount>,
    pub holdings: Vec<HoldingLine>,
    pub total_portfolio_value: Decimal,
    pub total_margin_used: Decimal,
    pub margin_remaining: Decimal,
    pub total_unrealized_profit: Decimal,
    pub total_realized_profit: Decimal,
    pub total_fees: Decimal,
    pub pdt_flagged: bool,
}
