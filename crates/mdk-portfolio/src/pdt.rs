//! Pattern day trading (PDT) bookkeeping.
//!
//! # Regulatory Background
//! FINRA Rule 4210 defines a *pattern day trader* as any customer who executes
//! four or more *day trades* within five business days. A flagged PDT account
//! must maintain a minimum equity of $25,000; below that the account is
//! restricted to closing-only orders.
//!
//! A *day trade* here is a fill that reduces a position which was opened or
//! extended on the same exchange-local date.
//!
//! The portfolio feeds every applied fill through [`DayTradeLedger::record_fill`].
//! The pattern-day-trading buying power model consults [`evaluate_pdt`] before
//! letting a risk-increasing order through.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::accounting::HoldingChange;
use crate::market::is_weekday;
use crate::types::SecurityId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// FINRA threshold: four or more day trades in five business days triggers PDT.
pub const PDT_DAY_TRADE_THRESHOLD: u32 = 4;

/// FINRA minimum equity to trade when flagged as a PDT account.
pub const PDT_MIN_EQUITY: Decimal = dec!(25000);

/// Default rolling window width in business days.
pub const PDT_DEFAULT_WINDOW_DAYS: u32 = 5;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PdtPolicy {
    /// When `false`, [`evaluate_pdt`] always allows (paper / backtest modes).
    pub enabled: bool,

    /// Business days in the rolling window. FINRA uses 5.
    pub window_days: u32,

    /// Max day trades permitted in the window before the account is flagged.
    pub max_day_trades_in_window: u32,

    /// Minimum equity the account must hold when flagged.
    pub min_equity: Decimal,
}

impl PdtPolicy {
    /// FINRA-compliant defaults.
    pub fn finra_defaults() -> Self {
        Self {
            enabled: true,
            window_days: PDT_DEFAULT_WINDOW_DAYS,
            // ≥ 4 triggers PDT, so 3 is the maximum allowed without restriction.
            max_day_trades_in_window: PDT_DAY_TRADE_THRESHOLD - 1,
            min_equity: PDT_MIN_EQUITY,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            window_days: PDT_DEFAULT_WINDOW_DAYS,
            max_day_trades_in_window: u32::MAX,
            min_equity: Decimal::ZERO,
        }
    }
}

impl Default for PdtPolicy {
    fn default() -> Self {
        Self::finra_defaults()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DayTradeLedger {
    /// Day-trade count per exchange-local date. Pruned to the window.
    day_trade_counts: BTreeMap<NaiveDate, u32>,

    /// Set once the rolling count exceeds the policy limit. Cleared only by
    /// [`DayTradeLedger::clear_flag`].
    flagged_pdt: bool,

    /// Last date each open position was opened or extended.
    opened_on: BTreeMap<SecurityId, NaiveDate>,
}

impl DayTradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged_pdt
    }

    pub fn clear_flag(&mut self) {
        self.flagged_pdt = false;
    }

    /// Rolling day-trade count ending at `today`.
    pub fn window_count(&self, today: NaiveDate, window_days: u32) -> u32 {
        rolling_count(&self.day_trade_counts, today, window_days)
    }

    /// Whether reducing `security` on `today` would be a day trade.
    pub fn would_be_day_trade(&self, security: SecurityId, today: NaiveDate) -> bool {
        self.opened_on.get(&security) == Some(&today)
    }

    /// Update from an applied fill. Returns `true` if it was a day trade.
    pub fn record_fill(
        &mut self,
        policy: &PdtPolicy,
        security: SecurityId,
        today: NaiveDate,
        change: &HoldingChange,
        remaining_quantity: Decimal,
    ) -> bool {
        let day_trade =
            change.closed_quantity > Decimal::ZERO && self.would_be_day_trade(security, today);
        if day_trade {
            self.record_day_trade(policy, today);
        }

        if remaining_quantity.is_zero() {
            self.opened_on.remove(&security);
        } else if change.opened_quantity > Decimal::ZERO {
            self.opened_on.insert(security, today);
        }

        prune_old_days(&mut self.day_trade_counts, today, policy.window_days);
        day_trade
    }

    /// Count a day trade on `today` and flag the account if the rolling
    /// count exceeds the limit.
    pub fn record_day_trade(&mut self, policy: &PdtPolicy, today: NaiveDate) {
        *self.day_trade_counts.entry(today).or_insert(0) += 1;
        if rolling_count(&self.day_trade_counts, today, policy.window_days)
            > policy.max_day_trades_in_window
        {
            self.flagged_pdt = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdtInput {
    pub today: NaiveDate,
    pub equity: Decimal,
    /// The prospective order would close a position opened today.
    pub is_day_trade: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdtDecision {
    pub trading_allowed: bool,
    pub reason: PdtReason,
    pub window_day_trade_count: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum PdtReason {
    EnforcementDisabled,
    AllowedWithinLimit,
    AllowedNotDayTrade,
    /// Flagged, but equity is at or above the minimum.
    AllowedFlaggedWithMinEquity,
    BlockedWouldExceedLimit,
    BlockedFlaggedBelowMinEquity,
}

impl PdtReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PdtReason::EnforcementDisabled => "PDT_ENFORCEMENT_DISABLED",
            PdtReason::AllowedWithinLimit => "PDT_ALLOWED_WITHIN_LIMIT",
            PdtReason::AllowedNotDayTrade => "PDT_ALLOWED_NOT_DAY_TRADE",
            PdtReason::AllowedFlaggedWithMinEquity => "PDT_ALLOWED_FLAGGED_WITH_MIN_EQUITY",
            PdtReason::BlockedWouldExceedLimit => "PDT_BLOCKED_WOULD_EXCEED_LIMIT",
            PdtReason::BlockedFlaggedBelowMinEquity => "PDT_BLOCKED_FLAGGED_BELOW_MIN_EQUITY",
        }
    }
}

/// Pure: does not mutate the ledger.
pub fn evaluate_pdt(policy: &PdtPolicy, ledger: &DayTradeLedger, input: &PdtInput) -> PdtDecision {
    let window_count = ledger.window_count(input.today, policy.window_days);
    let decision = |trading_allowed, reason| PdtDecision {
        trading_allowed,
        reason,
        window_day_trade_count: window_count,
    };

    if !policy.enabled {
        return decision(true, PdtReason::EnforcementDisabled);
    }

    if ledger.flagged_pdt {
        if input.equity < policy.min_equity {
            return decision(false, PdtReason::BlockedFlaggedBelowMinEquity);
        }
        return decision(true, PdtReason::AllowedFlaggedWithMinEquity);
    }

    if !input.is_day_trade {
        return decision(true, PdtReason::AllowedNotDayTrade);
    }

    if window_count.saturating_add(1) > policy.max_day_trades_in_window
        && input.equity < policy.min_equity
    {
        return decision(false, PdtReason::BlockedWouldExceedLimit);
    }

    decision(true, PdtReason::AllowedWithinLimit)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// First date still inside a window of `window_days` business days ending
/// at `today`.
fn window_floor(today: NaiveDate, window_days: u32) -> NaiveDate {
    let mut floor = today;
    let mut remaining = window_days.saturating_sub(1);
    while remaining > 0 {
        floor -= Duration::days(1);
        if is_weekday(floor) {
            remaining -= 1;
        }
    }
    floor
}

fn rolling_count(counts: &BTreeMap<NaiveDate, u32>, today: NaiveDate, window_days: u32) -> u32 {
    if window_days == 0 {
        return 0;
    }
    counts
        .range(window_floor(today, window_days)..=today)
        .map(|(_, &v)| v)
        .sum()
}

fn prune_old_days(counts: &mut BTreeMap<NaiveDate, u32>, today: NaiveDate, window_days: u32) {
    if window_days == 0 {
        counts.clear();
        return;
    }
    let floor = window_floor(today, window_days);
    counts.retain(|&d, _| d >= floor);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
