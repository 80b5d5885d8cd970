//! Settlement models and the unsettled-cash queue.
//!
//! Immediate settlement credits the cash book as the fill is applied.
//! Delayed settlement parks positive proceeds in the queue until the
//! settlement instant; debits always hit the cash book at once.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::cash::CashBook;
use crate::error::PortfolioError;
use crate::market::Market;
use crate::types::CashAmount;

/// Upper bound on roll-forward attempts when a candidate settlement instant
/// does not land after the fill (a week of non-business days is plenty).
const MAX_SETTLEMENT_ROLLS: u32 = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementModel {
    Immediate,
    /// Proceeds settle at the next `time_of_day` (exchange-local) that is at
    /// least `days` days after the fill date.
    Delayed { days: u32, time_of_day: NaiveTime },
}

impl SettlementModel {
    pub fn is_immediate(&self) -> bool {
        matches!(self, SettlementModel::Immediate)
    }

    /// When proceeds from a fill at `fill_time` become settled cash.
    ///
    /// `None` means immediately. Errors if no instant strictly after the
    /// fill can be found.
    pub fn settlement_time(
        &self,
        fill_time: DateTime<Utc>,
        market: &Market,
    ) -> Result<Option<DateTime<Utc>>, PortfolioError> {
        let (days, time_of_day) = match self {
            SettlementModel::Immediate => return Ok(None),
            SettlementModel::Delayed { days, time_of_day } => (*days, *time_of_day),
        };

        let mut date = market.add_business_days(market.local_date(fill_time), days);
        for _ in 0..MAX_SETTLEMENT_ROLLS {
            let candidate = local_to_utc(market, date, time_of_day)?;
            if candidate > fill_time {
                return Ok(Some(candidate));
            }
            date = market.next_business_day(date);
        }
        Err(PortfolioError::scheduling(format!(
            "no settlement instant after {fill_time} within {MAX_SETTLEMENT_ROLLS} days"
        )))
    }
}

fn local_to_utc(
    market: &Market,
    date: NaiveDate,
    time_of_day: NaiveTime,
) -> Result<DateTime<Utc>, PortfolioError> {
    let naive = date.and_time(time_of_day);
    let resolved = match market.time_zone.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        // Spring-forward gap: the wall clock skips this hour.
        LocalResult::None => market
            .time_zone
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest(),
    };
    resolved
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| {
            PortfolioError::scheduling(format!(
                "{naive} does not exist in {}",
                market.time_zone.name()
            ))
        })
}

/// Cash proceeds waiting to settle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnsettledCashAmount {
    pub settlement_time_utc: DateTime<Utc>,
    pub amount: CashAmount,
}

/// Pending settlements ordered by settlement instant, then arrival.
#[derive(Clone, Debug, Default)]
pub struct UnsettledCashQueue {
    entries: BTreeMap<(DateTime<Utc>, u64), UnsettledCashAmount>,
    next_seq: u64,
    last_scan: Option<DateTime<Utc>>,
}

impl UnsettledCashQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pending: UnsettledCashAmount) {
        let key = (pending.settlement_time_utc, self.next_seq);
        self.next_seq += 1;
        self.entries.insert(key, pending);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnsettledCashAmount> {
        self.entries.values()
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.last_scan
    }

    /// Remove and return everything due at or before `now`.
    ///
    /// Scanning twice with the same `now` returns nothing the second time.
    /// A `now` earlier than the previous scan is rejected.
    pub fn drain_due(&mut self, now: DateTime<Utc>) -> Result<Vec<UnsettledCashAmount>, PortfolioError> {
        if let Some(prev) = self.last_scan {
            if now < prev {
                return Err(PortfolioError::scheduling(format!(
                    "settlement scan at {now} precedes previous scan at {prev}"
                )));
            }
        }
        self.last_scan = Some(now);

        let due: Vec<(DateTime<Utc>, u64)> = self
            .entries
            .range(..=(now, u64::MAX))
            .map(|(k, _)| *k)
            .collect();
        Ok(due
            .into_iter()
            .filter_map(|k| self.entries.remove(&k))
            .collect())
    }

    /// Pending amount per currency.
    pub fn totals_by_currency(&self) -> BTreeMap<String, Decimal> {
        let mut out = BTreeMap::new();
        for e in self.entries.values() {
            *out.entry(e.amount.currency.clone()).or_insert(Decimal::ZERO) += e.amount.amount;
        }
        out
    }

    /// Pending amount expressed in the account currency.
    pub fn total_value_in_account_currency(
        &self,
        cash_book: &CashBook,
    ) -> Result<Decimal, PortfolioError> {
        let mut total = Decimal::ZERO;
        for (ccy, amount) in self.totals_by_currency() {
            if !amount.is_zero() {
                total += cash_book.convert_to_account_currency(amount, &ccy)?;
            }
        }
        Ok(total)
    }
}
