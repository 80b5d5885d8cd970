//! Fee models.
//!
//! Fees are quoted in the security's quote currency and are always
//! non-negative. Every variant is non-decreasing in |quantity|, which the
//! order-quantity solver relies on.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeModel {
    /// No commissions.
    #[default]
    Zero,
    /// Fixed fee per unit with a per-order floor, optionally capped at a
    /// fraction of the order's notional.
    PerUnit {
        per_unit: Decimal,
        minimum: Decimal,
        #[serde(default)]
        maximum_percent: Option<Decimal>,
    },
    /// Fraction of notional with a per-order floor.
    Percent { rate: Decimal, minimum: Decimal },
}

impl FeeModel {
    /// Fee for an order of `quantity` units at `price`, in quote currency.
    pub fn order_fee(&self, quantity: Decimal, price: Decimal, multiplier: Decimal) -> Decimal {
        let units = quantity.abs();
        if units.is_zero() {
            return Decimal::ZERO;
        }
        let notional = units * price.abs() * multiplier;
        let fee = match self {
            FeeModel::Zero => Decimal::ZERO,
            FeeModel::PerUnit {
                per_unit,
                minimum,
                maximum_percent,
            } => {
                let fee = (units * per_unit).max(*minimum);
                match maximum_percent {
                    Some(pct) => fee.min(notional * pct),
                    None => fee,
                }
            }
            FeeModel::Percent { rate, minimum } => (notional * rate).max(*minimum),
        };
        fee.max(Decimal::ZERO)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FeeModel::Zero => "Zero",
            FeeModel::PerUnit { .. } => "PerUnit",
            FeeModel::Percent { .. } => "Percent",
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let non_negative = |label: &str, v: &Decimal| {
            if *v < Decimal::ZERO {
                Err(format!("fee model {label} must be >= 0, got {v}"))
            } else {
                Ok(())
            }
        };
        match self {
            FeeModel::Zero => Ok(()),
            FeeModel::PerUnit {
                per_unit,
                minimum,
                maximum_percent,
            } => {
                non_negative("per_unit", per_unit)?;
                non_negative("minimum", minimum)?;
                if let Some(p) = maximum_percent {
                    non_negative("maximum_percent", p)?;
                }
                Ok(())
            }
            FeeModel::Percent { rate, minimum } => {
                non_negative("rate", rate)?;
                non_negative("minimum", minimum)
            }
        }
    }
}
