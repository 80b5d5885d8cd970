//! Ticket state machine.
//!
//! # Design
//!
//! Every lifecycle event for an order is applied through
//! [`TicketRecord::apply`], which enforces two invariants:
//!
//! 1. **Legal transitions only.** Illegal events return
//!    [`TicketTransitionError`] and leave the ticket untouched.
//! 2. **Idempotent replay.** An event carrying an id that was already
//!    applied is a silent no-op.
//!
//! ```text
//!   New ──Submit──► Submitted ──Fill(part)──► PartiallyFilled ──Fill(rest)──► Filled
//!    │                 │                          │
//!    └──Reject──► Invalid ◄──Reject──┘            └──Cancel──► Canceled
//!                      └──Cancel──► Canceled
//! ```
//!
//! A fill that would take the cumulative quantity past the order quantity
//! is illegal.

use std::collections::HashSet;

use mdk_portfolio::{OrderStatus, OrderTicket, SubmitOrderRequest};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// TicketEvent
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketEvent {
    /// Accepted by the brokerage.
    Submit,
    /// An execution of `quantity` units (signed like the order) at `price`.
    Fill { quantity: Decimal, price: Decimal },
    Cancel { reason: Option<String> },
    /// Refused by validation or by the brokerage.
    Reject { reason: String },
}

// ---------------------------------------------------------------------------
// TicketTransitionError
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketTransitionError {
    pub order_id: u64,
    pub from: OrderStatus,
    pub event: String,
}

impl std::fmt::Display for TicketTransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal ticket transition for order {}: {} + {}",
            self.order_id,
            self.from.as_str(),
            self.event
        )
    }
}

impl std::error::Error for TicketTransitionError {}

// ---------------------------------------------------------------------------
// TicketRecord
// ---------------------------------------------------------------------------

/// Mutable state behind an [`OrderTicket`].
#[derive(Clone, Debug)]
pub struct TicketRecord {
    pub order_id: u64,
    pub request: SubmitOrderRequest,
    pub status: OrderStatus,
    pub quantity_filled: Decimal,
    pub average_fill_price: Decimal,
    pub message: Option<String>,
    pub broker_order_id: Option<String>,
    applied: HashSet<String>,
}

impl TicketRecord {
    pub fn new(order_id: u64, request: SubmitOrderRequest) -> Self {
        Self {
            order_id,
            request,
            status: OrderStatus::New,
            quantity_filled: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            message: None,
            broker_order_id: None,
            applied: HashSet::new(),
        }
    }

    pub fn has_applied(&self, event_id: &str) -> bool {
        self.applied.contains(event_id)
    }

    /// Check an event without applying it.
    pub fn check(&self, event: &TicketEvent) -> Result<(), TicketTransitionError> {
        self.next_status(event).map(|_| ())
    }

    /// Apply `event`. A duplicate `event_id` returns `Ok(false)` without
    /// changing anything; an applied event returns `Ok(true)`.
    pub fn apply(
        &mut self,
        event: &TicketEvent,
        event_id: Option<&str>,
    ) -> Result<bool, TicketTransitionError> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(false);
            }
        }

        let next = self.next_status(event)?;
        match event {
            TicketEvent::Fill { quantity, price } => {
                let filled = self.quantity_filled + quantity;
                if !filled.is_zero() {
                    self.average_fill_price = (self.average_fill_price * self.quantity_filled
                        + price * quantity)
                        / filled;
                }
                self.quantity_filled = filled;
            }
            TicketEvent::Cancel { reason } => self.message = reason.clone(),
            TicketEvent::Reject { reason } => self.message = Some(reason.clone()),
            TicketEvent::Submit => {}
        }
        self.status = next;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }
        Ok(true)
    }

    pub fn to_ticket(&self) -> OrderTicket {
        OrderTicket {
            order_id: self.order_id,
            request: self.request.clone(),
            status: self.status,
            quantity_filled: self.quantity_filled,
            average_fill_price: self.average_fill_price,
            message: self.message.clone(),
        }
    }

    fn next_status(&self, event: &TicketEvent) -> Result<OrderStatus, TicketTransitionError> {
        use OrderStatus::*;

        let next = match (self.status, event) {
            (New, TicketEvent::Submit) => Submitted,
            // Resubmission acknowledgements are harmless.
            (Submitted | PartiallyFilled, TicketEvent::Submit) => self.status,

            (Submitted | PartiallyFilled, TicketEvent::Fill { quantity, .. }) => {
                let ordered = self.request.quantity;
                let same_side = quantity.signum() == ordered.signum() && !quantity.is_zero();
                let filled = self.quantity_filled + quantity;
                if !same_side || filled.abs() > ordered.abs() {
                    return Err(self.illegal(event));
                }
                if filled == ordered {
                    Filled
                } else {
                    PartiallyFilled
                }
            }

            (New | Submitted | PartiallyFilled, TicketEvent::Cancel { .. }) => Canceled,
            (New | Submitted | PartiallyFilled, TicketEvent::Reject { .. }) => Invalid,

            _ => return Err(self.illegal(event)),
        };
        Ok(next)
    }

    fn illegal(&self, event: &TicketEvent) -> TicketTransitionError {
        TicketTransitionError {
            order_id: self.order_id,
            from: self.status,
            event: format!("{event:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mdk_portfolio::Symbol;
    use rust_decimal_macros::dec;

    fn record(qty: Decimal) -> TicketRecord {
        TicketRecord::new(
            1,
            SubmitOrderRequest::market(
                Symbol::new("AAPL"),
                qty,
                Utc.with_ymd_and_hms(2024, 3, 6, 15, 0, 0).unwrap(),
            ),
        )
    }

    fn fill(quantity: Decimal, price: Decimal) -> TicketEvent {
        TicketEvent::Fill { quantity, price }
    }

    #[test]
    fn partial_then_full_fill_averages_price() {
        let mut t = record(dec!(100));
        t.apply(&TicketEvent::Submit, None).unwrap();
        t.apply(&fill(dec!(60), dec!(10)), Some("f1")).unwrap();
        assert_eq!(t.status, OrderStatus::PartiallyFilled);
        t.apply(&fill(dec!(40), dec!(11)), Some("f2")).unwrap();
        assert_eq!(t.status, OrderStatus::Filled);
        assert_eq!(t.quantity_filled, dec!(100));
        assert_eq!(t.average_fill_price, dec!(10.4));
        assert!(t.status.is_terminal());
    }

    #[test]
    fn replayed_fill_is_ignored() {
        let mut t = record(dec!(-100));
        t.apply(&TicketEvent::Submit, None).unwrap();
        assert!(t.apply(&fill(dec!(-50), dec!(10)), Some("f1")).unwrap());
        assert!(!t.apply(&fill(dec!(-50), dec!(10)), Some("f1")).unwrap());
        assert_eq!(t.quantity_filled, dec!(-50));
        assert_eq!(t.status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn overfill_and_wrong_side_are_illegal() {
        let mut t = record(dec!(100));
        t.apply(&TicketEvent::Submit, None).unwrap();
        assert!(t.apply(&fill(dec!(101), dec!(10)), Some("f1")).is_err());
        assert!(t.apply(&fill(dec!(-1), dec!(10)), Some("f2")).is_err());
        assert_eq!(t.quantity_filled, dec!(0));
        assert_eq!(t.status, OrderStatus::Submitted);
    }

    #[test]
    fn fill_before_submit_is_illegal() {
        let t = record(dec!(10));
        let err = t.check(&fill(dec!(10), dec!(1))).unwrap_err();
        assert_eq!(err.from, OrderStatus::New);
    }

    #[test]
    fn terminal_states_reject_further_events() {
        let mut t = record(dec!(10));
        t.apply(&TicketEvent::Submit, None).unwrap();
        t.apply(&TicketEvent::Cancel { reason: None }, None).unwrap();
        assert_eq!(t.status, OrderStatus::Canceled);
        assert!(t.apply(&fill(dec!(10), dec!(1)), Some("late")).is_err());

        let mut r = record(dec!(10));
        r.apply(
            &TicketEvent::Reject {
                reason: "no price".to_string(),
            },
            None,
        )
        .unwrap();
        assert_eq!(r.status, OrderStatus::Invalid);
        assert_eq!(r.to_ticket().message.as_deref(), Some("no price"));
    }
}
