//! Exchange calendars.
//!
//! Each market carries its time zone, regular session hours and the
//! settlement convention cash accounts use there. Settlement dates and
//! day-trade days are computed in exchange-local time.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::settlement::SettlementModel;

/// Regular session hours in exchange-local time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Saturdays and Sundays are closed and do not count as business days.
    pub weekdays_only: bool,
}

impl MarketHours {
    /// 24/7 session (crypto-style).
    pub fn always_open() -> Self {
        Self {
            open: NaiveTime::MIN,
            close: NaiveTime::MIN,
            weekdays_only: false,
        }
    }

    pub fn is_always_open(&self) -> bool {
        self.open == self.close && !self.weekdays_only
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Market {
    pub name: String,
    #[serde(serialize_with = "serialize_tz")]
    pub time_zone: Tz,
    pub hours: MarketHours,
    /// Settlement applied to cash-account securities listed here.
    pub cash_settlement: SettlementModel,
}

fn serialize_tz<S: serde::Serializer>(tz: &Tz, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(tz.name())
}

impl Market {
    pub fn new<S: Into<String>>(
        name: S,
        time_zone: Tz,
        hours: MarketHours,
        cash_settlement: SettlementModel,
    ) -> Self {
        Self {
            name: name.into().trim().to_ascii_lowercase(),
            time_zone,
            hours,
            cash_settlement,
        }
    }

    /// US equities: New York, 09:30-16:00 weekdays, cash proceeds settle
    /// the next business day at 08:00.
    pub fn usa() -> Self {
        Self::new(
            "usa",
            chrono_tz::America::New_York,
            MarketHours {
                open: hms(9, 30),
                close: hms(16, 0),
                weekdays_only: true,
            },
            SettlementModel::Delayed {
                days: 1,
                time_of_day: hms(8, 0),
            },
        )
    }

    /// Always-open venue in UTC with immediate settlement.
    pub fn crypto() -> Self {
        Self::new(
            "crypto",
            chrono_tz::UTC,
            MarketHours::always_open(),
            SettlementModel::Immediate,
        )
    }

    pub fn local_date(&self, utc: DateTime<Utc>) -> NaiveDate {
        utc.with_timezone(&self.time_zone).date_naive()
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !self.hours.weekdays_only || is_weekday(date)
    }

    /// Whether the regular session is open at `utc`.
    pub fn is_open(&self, utc: DateTime<Utc>) -> bool {
        if self.hours.is_always_open() {
            return true;
        }
        let local = utc.with_timezone(&self.time_zone);
        if !self.is_business_day(local.date_naive()) {
            return false;
        }
        let t = local.time();
        if self.hours.open <= self.hours.close {
            t >= self.hours.open && t < self.hours.close
        } else {
            // Session wraps midnight.
            t >= self.hours.open || t < self.hours.close
        }
    }

    /// The date `days` business days after `date`.
    pub fn add_business_days(&self, date: NaiveDate, days: u32) -> NaiveDate {
        let mut d = date;
        let mut remaining = days;
        while remaining > 0 {
            d += Duration::days(1);
            if self.is_business_day(d) {
                remaining -= 1;
            }
        }
        d
    }

    /// The next business day strictly after `date`.
    pub fn next_business_day(&self, date: NaiveDate) -> NaiveDate {
        self.add_business_days(date, 1)
    }
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn hms(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

/// Markets keyed by lowercase name.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MarketRegistry {
    markets: BTreeMap<String, Market>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `usa` and `crypto`.
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.insert(Market::usa());
        r.insert(Market::crypto());
        r
    }

    /// Insert or replace a market definition.
    pub fn insert(&mut self, market: Market) {
        self.markets.insert(market.name.clone(), market);
    }

    pub fn get(&self, name: &str) -> Option<&Market> {
        self.markets.get(&name.trim().to_ascii_lowercase())
    }

    pub fn require(&self, name: &str) -> Result<&Market, PortfolioError> {
        self.get(name)
            .ok_or_else(|| PortfolioError::invalid_config(format!("unknown market: {name}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Market> {
        self.markets.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn usa_session_is_evaluated_in_new_york_time() {
        let m = Market::usa();
        // 2024-03-06 is a Wednesday; 14:00 UTC = 09:00 EST (closed).
        assert!(!m.is_open(utc(2024, 3, 6, 14, 0)));
        // 15:00 UTC = 10:00 EST (open).
        assert!(m.is_open(utc(2024, 3, 6, 15, 0)));
        // 21:00 UTC = 16:00 EST (closed at the bell).
        assert!(!m.is_open(utc(2024, 3, 6, 21, 0)));
        // Saturday.
        assert!(!m.is_open(utc(2024, 3, 9, 15, 0)));
    }

    #[test]
    fn crypto_never_closes() {
        let m = Market::crypto();
        assert!(m.is_open(utc(2024, 3, 9, 3, 0)));
    }

    #[test]
    fn business_days_skip_weekends() {
        let m = Market::usa();
        let fri = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        assert_eq!(
            m.add_business_days(fri, 1),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
        let c = Market::crypto();
        assert_eq!(
            c.add_business_days(fri, 1),
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
        );
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let r = MarketRegistry::with_defaults();
        assert!(r.get("USA").is_some());
        assert!(r.require("nowhere").is_err());
    }
}
