use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::margin_call::MarginCallExecution;
use crate::types::Symbol;

/// Errors surfaced by portfolio accounting and buying-power evaluation.
///
/// Insufficient buying power is never an error: it is reported through
/// the result structs of [`crate::BuyingPowerModel`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortfolioError {
    /// A fill or request referenced a symbol that was never added.
    UnknownSecurity { symbol: Symbol },
    /// No usable conversion rate exists between two currencies.
    UnresolvableCurrencyConversion { from: String, to: String },
    /// Fill payload violates an accounting precondition.
    InvalidFill { fill_id: String, detail: String },
    /// Settlement time could not be computed or time moved backwards.
    SettlementScheduling { detail: String },
    /// Parameters rejected when a model or security is configured.
    InvalidConfiguration { detail: String },
    /// A margin call left the account under-margined after all liquid
    /// holdings were exhausted. `execution` holds whatever was submitted,
    /// including liquidations the brokerage refused.
    MarginCallUnresolved {
        deficit: Decimal,
        as_of: Option<DateTime<Utc>>,
        execution: Box<MarginCallExecution>,
    },
}

impl PortfolioError {
    pub(crate) fn invalid_config<S: Into<String>>(detail: S) -> Self {
        Self::InvalidConfiguration {
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_fill<I: Into<String>, S: Into<String>>(fill_id: I, detail: S) -> Self {
        Self::InvalidFill {
            fill_id: fill_id.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn scheduling<S: Into<String>>(detail: S) -> Self {
        Self::SettlementScheduling {
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for PortfolioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSecurity { symbol } => {
                write!(f, "unknown security: {symbol} has not been added")
            }
            Self::UnresolvableCurrencyConversion { from, to } => {
                write!(f, "no conversion rate available from {from} to {to}")
            }
            Self::InvalidFill { fill_id, detail } => {
                write!(f, "invalid fill {fill_id}: {detail}")
            }
            Self::SettlementScheduling { detail } => {
                write!(f, "settlement scheduling: {detail}")
            }
            Self::InvalidConfiguration { detail } => {
                write!(f, "invalid configuration: {detail}")
            }
            Self::MarginCallUnresolved {
                deficit,
                as_of,
                execution,
            } => {
                match as_of {
                    Some(t) => write!(f, "margin call unresolved at {t}: deficit of {deficit} remains")?,
                    None => write!(f, "margin call unresolved: deficit of {deficit} remains")?,
                }
                if execution.tickets.is_empty() {
                    write!(f, " with no liquid holdings left to sell")
                } else {
                    write!(
                        f,
                        " after {} of {} liquidation orders filled",
                        execution.filled(),
                        execution.tickets.len()
                    )
                }
            }
        }
    }
}

impl std::error::Error for PortfolioError {}
