//! Margin call detection, liquidation sizing and execution.
//!
//! When reserved margin exceeds portfolio value (`margin_remaining < 0`) the
//! model sizes market orders that cut the largest positions first until the
//! projected margin remaining is back at or above zero.
//!
//! Liquidation order is deterministic: descending |notional|, ties by
//! ascending symbol.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{info, warn};

use crate::account::SharedAccount;
use crate::error::PortfolioError;
use crate::orders::{OrderProcessor, OrderStatus, OrderTicket, SubmitOrderRequest};
use crate::portfolio::PortfolioView;
use crate::security::Security;

/// Warn once margin remaining drops to this fraction of portfolio value.
pub const DEFAULT_MARGIN_WARNING_THRESHOLD: Decimal = dec!(0.05);

/// Tag carried by every liquidation order.
pub const MARGIN_CALL_TAG: &str = "Margin Call";

const MAX_SIZING_ITERATIONS: u32 = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarginCallModel {
    /// Fraction of TPV under which a warning is raised.
    pub warning_threshold: Decimal,
    /// Deficits up to this fraction of TPV only warn when the caller asks
    /// for warnings only.
    pub liquidation_tolerance: Decimal,
}

impl Default for MarginCallModel {
    fn default() -> Self {
        Self {
            warning_threshold: DEFAULT_MARGIN_WARNING_THRESHOLD,
            liquidation_tolerance: Decimal::ZERO,
        }
    }
}

/// A sized liquidation with its projected effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarginCallOrder {
    pub request: SubmitOrderRequest,
    /// |quantity| × unit value, account currency.
    pub notional_reduction: Decimal,
    /// Reserved margin released net of the estimated fee.
    pub margin_released: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarginCallPlan {
    pub orders: Vec<MarginCallOrder>,
    pub issue_warning: bool,
    pub margin_remaining: Decimal,
    /// Deficit left after sizing every liquid holding. `None` when the
    /// orders are projected to cover it (or no call is due).
    pub unresolved_deficit: Option<Decimal>,
}

impl MarginCallPlan {
    pub fn requests(&self) -> Vec<SubmitOrderRequest> {
        self.orders.iter().map(|o| o.request.clone()).collect()
    }

    pub fn is_margin_call(&self) -> bool {
        !self.orders.is_empty() || self.unresolved_deficit.is_some()
    }
}

/// A liquidation that did not fill.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarginCallFailure {
    pub request: SubmitOrderRequest,
    pub status: OrderStatus,
    pub reason: String,
}

/// Every submitted liquidation ticket, filled or not, with the margin left
/// once they were all processed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarginCallExecution {
    pub tickets: Vec<OrderTicket>,
    pub failures: Vec<MarginCallFailure>,
    /// Requests not submitted because margin was already restored.
    pub skipped: usize,
    pub margin_remaining_after: Decimal,
}

impl MarginCallExecution {
    /// Nothing submitted.
    pub fn empty(margin_remaining: Decimal) -> Self {
        Self {
            tickets: Vec::new(),
            failures: Vec::new(),
            skipped: 0,
            margin_remaining_after: margin_remaining,
        }
    }

    /// Tickets that ended `Filled`.
    pub fn filled(&self) -> usize {
        self.tickets
            .iter()
            .filter(|t| t.status == OrderStatus::Filled)
            .count()
    }

    pub fn is_resolved(&self) -> bool {
        self.margin_remaining_after >= Decimal::ZERO
    }

    /// `Err(MarginCallUnresolved)` if the account is still under-margined.
    /// The error keeps this execution so callers still see what was tried.
    pub fn into_result(self, as_of: Option<DateTime<Utc>>) -> Result<Self, PortfolioError> {
        if self.is_resolved() {
            Ok(self)
        } else {
            Err(PortfolioError::MarginCallUnresolved {
                deficit: -self.margin_remaining_after,
                as_of,
                execution: Box::new(self),
            })
        }
    }
}

impl MarginCallModel {
    pub fn validate(&self) -> Result<(), PortfolioError> {
        for (label, v) in [
            ("warning threshold", self.warning_threshold),
            ("liquidation tolerance", self.liquidation_tolerance),
        ] {
            if v < Decimal::ZERO || v >= Decimal::ONE {
                return Err(PortfolioError::invalid_config(format!(
                    "margin call {label} must be in [0, 1), got {v}"
                )));
            }
        }
        Ok(())
    }

    /// Scan invested holdings and size liquidations for any deficit.
    ///
    /// Fails rather than guess when portfolio value cannot be resolved.
    pub fn get_margin_call_orders(
        &self,
        view: &PortfolioView<'_>,
        issue_warning_only: bool,
    ) -> Result<MarginCallPlan, PortfolioError> {
        let tpv = view.total_portfolio_value()?;
        let remaining = tpv - view.total_margin_used();
        let invested = view.invested().next().is_some();
        let issue_warning = invested && remaining <= tpv.max(Decimal::ZERO) * self.warning_threshold;

        let mut plan = MarginCallPlan {
            orders: Vec::new(),
            issue_warning,
            margin_remaining: remaining,
            unresolved_deficit: None,
        };
        if remaining >= Decimal::ZERO {
            return Ok(plan);
        }

        let deficit = -remaining;
        if issue_warning_only && deficit <= tpv.max(Decimal::ZERO) * self.liquidation_tolerance {
            return Ok(plan);
        }

        let mut candidates: Vec<(&Security, Decimal, Decimal)> = Vec::new();
        for (s, h) in view.invested() {
            let notional = view.holding_value(s)?.abs();
            if notional > Decimal::ZERO {
                candidates.push((s, h.quantity(), notional));
            }
        }
        candidates.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.symbol().cmp(b.0.symbol())));

        let mut left = deficit;
        for (security, held, _) in candidates {
            if left <= Decimal::ZERO {
                break;
            }
            let Some(order) = size_liquidation(view, security, held, left) else {
                continue;
            };
            left -= order.margin_released;
            plan.orders.push(order);
        }

        if left > Decimal::ZERO {
            plan.unresolved_deficit = Some(left);
        }
        Ok(plan)
    }

    /// Submit liquidations in order until margin is restored.
    ///
    /// The account lock is never held across a submission. Orders that do
    /// not fill are reported in `failures`.
    pub fn execute_margin_call(
        &self,
        account: &SharedAccount,
        processor: &dyn OrderProcessor,
        orders: Vec<SubmitOrderRequest>,
    ) -> Result<MarginCallExecution, PortfolioError> {
        let mut exec = MarginCallExecution::empty(account.read().margin_remaining()?);

        let total = orders.len();
        for (i, request) in orders.into_iter().enumerate() {
            if account.read().margin_remaining()? >= Decimal::ZERO {
                exec.skipped = total - i;
                break;
            }
            let ticket = processor.process(request.clone());
            if ticket.status != OrderStatus::Filled {
                let reason = ticket
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("liquidation ended {:?}", ticket.status));
                warn!(
                    symbol = %request.symbol,
                    quantity = %request.quantity,
                    status = ?ticket.status,
                    reason = %reason,
                    "margin call liquidation did not fill"
                );
                exec.failures.push(MarginCallFailure {
                    request,
                    status: ticket.status,
                    reason,
                });
            }
            exec.tickets.push(ticket);
        }

        exec.margin_remaining_after = account.read().margin_remaining()?;
        info!(
            submitted = exec.tickets.len(),
            filled = exec.filled(),
            failed = exec.failures.len(),
            skipped = exec.skipped,
            margin_remaining = %exec.margin_remaining_after,
            "margin call executed"
        );
        Ok(exec)
    }
}

/// Smallest lot-multiple reduction of `held` whose released margin, net of
/// fees, covers `deficit`; the whole position if nothing smaller does.
fn size_liquidation(
    view: &PortfolioView<'_>,
    security: &Security,
    held: Decimal,
    deficit: Decimal,
) -> Option<MarginCallOrder> {
    let rate = view.conversion_rate(security)?;
    let unit = view.unit_value(security);
    let reserved = security
        .buying_power_model()
        .reserved_buying_power_for_position(view, security)
        .absolute_used_buying_power;
    if unit <= Decimal::ZERO || reserved <= Decimal::ZERO {
        return None;
    }
    let per_unit_release = reserved / held.abs();
    let lot = security.lot_size();
    let released = |qty: Decimal| qty * per_unit_release - security.order_fee(qty) * rate;

    let whole_lots = (held.abs() / lot).floor();
    let mut lots = (deficit / (lot * per_unit_release)).ceil().max(Decimal::ONE);
    let quantity = if lots > whole_lots || released(whole_lots * lot) < deficit {
        held.abs()
    } else {
        // Fees can leave the first estimate a lot or two short.
        let mut steps = 0;
        while released(lots * lot) < deficit && lots < whole_lots && steps < MAX_SIZING_ITERATIONS {
            lots += Decimal::ONE;
            steps += 1;
        }
        if released(lots * lot) < deficit {
            held.abs()
        } else {
            lots * lot
        }
    };

    let now = view.now().unwrap_or_else(|| {
        security
            .last_update()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    });
    Some(MarginCallOrder {
        request: SubmitOrderRequest::market(security.symbol().clone(), -held.signum() * quantity, now)
            .with_tag(MARGIN_CALL_TAG),
        notional_reduction: quantity * unit,
        margin_released: released(quantity),
    })
}
