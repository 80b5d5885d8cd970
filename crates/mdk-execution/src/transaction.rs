//! SecurityTransactionManager: the single path from order request to
//! brokerage and from brokerage fill back into the portfolio.
//!
//! Lock discipline:
//! - the account lock is never held while the brokerage is called
//! - when both are needed, the ticket lock is taken before the account lock

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use mdk_portfolio::{
    Fill, MarginCallExecution, OrderProcessor, OrderTicket, OrderType, PortfolioError,
    SharedAccount, SubmitOrderRequest,
};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::brokerage::{BrokerageAdapter, BrokerageOrder, OrderEvent};
use crate::error::TransactionError;
use crate::targets::{targets_to_order_requests, PortfolioTarget};
use crate::ticket::{TicketEvent, TicketRecord};

pub struct SecurityTransactionManager<B: BrokerageAdapter> {
    account: SharedAccount,
    brokerage: B,
    tickets: Mutex<BTreeMap<u64, TicketRecord>>,
    next_order_id: AtomicU64,
}

impl<B: BrokerageAdapter> SecurityTransactionManager<B> {
    pub fn new(account: SharedAccount, brokerage: B) -> Self {
        Self {
            account,
            brokerage,
            tickets: Mutex::new(BTreeMap::new()),
            next_order_id: AtomicU64::new(1),
        }
    }

    pub fn account(&self) -> &SharedAccount {
        &self.account
    }

    pub fn brokerage(&self) -> &B {
        &self.brokerage
    }

    fn tickets_guard(&self) -> MutexGuard<'_, BTreeMap<u64, TicketRecord>> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Validate, check buying power, and send `request` to the brokerage.
    ///
    /// Never fails: refused orders come back as `Invalid` tickets with the
    /// reason in `message`.
    pub fn submit(&self, request: SubmitOrderRequest) -> OrderTicket {
        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let mut record = TicketRecord::new(order_id, request.clone());

        if let Some(reason) = self.pre_trade_rejection(&request) {
            warn!(
                order_id,
                symbol = %request.symbol,
                quantity = %request.quantity,
                reason = %reason,
                "order rejected before submission"
            );
            if let Err(e) = record.apply(&TicketEvent::Reject { reason }, None) {
                error!(error = %e, "ticket rejection failed");
            }
            let ticket = record.to_ticket();
            self.tickets_guard().insert(order_id, record);
            return ticket;
        }

        if let Err(e) = record.apply(&TicketEvent::Submit, None) {
            error!(error = %e, "ticket submission failed");
        }
        let fallback = record.to_ticket();
        self.tickets_guard().insert(order_id, record);

        let order = BrokerageOrder {
            order_id,
            symbol: request.symbol.clone(),
            quantity: request.quantity,
            order_type: request.order_type.clone(),
            tag: request.tag.clone(),
            time: request.time,
        };
        debug!(order_id, symbol = %order.symbol, quantity = %order.quantity, "submitting order");

        match self.brokerage.submit_order(&order) {
            Err(e) => {
                let reason = format!("brokerage refused order: {e}");
                warn!(order_id, reason = %reason, "order rejected by brokerage");
                if let Err(e) = self.apply_order_event(order_id, OrderEvent::Rejected { reason }) {
                    error!(order_id, error = %e, "could not record brokerage rejection");
                }
            }
            Ok(resp) => {
                if let Some(record) = self.tickets_guard().get_mut(&order_id) {
                    record.broker_order_id = Some(resp.broker_order_id);
                }
                for event in resp.events {
                    if let Err(e) = self.apply_order_event(order_id, event) {
                        error!(order_id, error = %e, "brokerage event could not be applied");
                    }
                }
            }
        }

        self.ticket(order_id).unwrap_or(fallback)
    }

    /// Reason to refuse `request` before it reaches the brokerage.
    fn pre_trade_rejection(&self, request: &SubmitOrderRequest) -> Option<String> {
        let account = self.account.read();
        let security = match account.security(&request.symbol) {
            Ok(s) => s,
            Err(e) => return Some(e.to_string()),
        };
        if request.quantity.is_zero() {
            return Some("order quantity must not be zero".to_string());
        }
        let lot = security.lot_size();
        if !(request.quantity % lot).is_zero() {
            return Some(format!(
                "order quantity {} is not a multiple of the lot size {} for {}",
                request.quantity,
                lot,
                request.symbol
            ));
        }
        if let OrderType::Limit { limit_price } = request.order_type {
            if limit_price <= Decimal::ZERO {
                return Some(format!("limit price must be > 0, got {limit_price}"));
            }
        }
        if !security.has_data() {
            return Some(format!("{} has no market data yet", request.symbol));
        }
        match account.has_sufficient_buying_power_for_order(&request.symbol, request.quantity) {
            Ok(check) if check.is_sufficient => None,
            Ok(check) => Some(
                check
                    .reason
                    .unwrap_or_else(|| "insufficient buying power".to_string()),
            ),
            Err(e) => Some(e.to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Event intake
    // -----------------------------------------------------------------------

    /// Apply a brokerage event to the ticket and, for fills, to the
    /// portfolio. Fill ids already applied are ignored.
    pub fn apply_order_event(
        &self,
        order_id: u64,
        event: OrderEvent,
    ) -> Result<OrderTicket, TransactionError> {
        let mut tickets = self.tickets_guard();
        let record = tickets
            .get_mut(&order_id)
            .ok_or(TransactionError::UnknownOrder { order_id })?;

        match event {
            OrderEvent::Fill(fill) => {
                if record.has_applied(&fill.fill_id) {
                    debug!(order_id, fill_id = %fill.fill_id, "duplicate fill ignored");
                    return Ok(record.to_ticket());
                }
                let ticket_event = TicketEvent::Fill {
                    quantity: fill.quantity,
                    price: fill.price,
                };
                record.check(&ticket_event)?;
                let portfolio_fill = Fill::new(
                    fill.fill_id.clone(),
                    order_id,
                    record.request.symbol.clone(),
                    fill.quantity,
                    fill.price,
                    fill.fee,
                    fill.time,
                );
                self.account.write().process_fill(&portfolio_fill)?;
                record.apply(&ticket_event, Some(&fill.fill_id))?;
                info!(
                    order_id,
                    fill_id = %fill.fill_id,
                    symbol = %record.request.symbol,
                    quantity = %fill.quantity,
                    price = %fill.price,
                    status = record.status.as_str(),
                    "order event: fill"
                );
            }
            OrderEvent::Canceled { reason } => {
                record.apply(&TicketEvent::Cancel { reason }, None)?;
                info!(order_id, "order event: canceled");
            }
            OrderEvent::Rejected { reason } => {
                record.apply(&TicketEvent::Reject { reason }, None)?;
                info!(order_id, "order event: rejected");
            }
        }
        Ok(record.to_ticket())
    }

    /// Ask the brokerage to cancel an open order.
    pub fn cancel(&self, order_id: u64) -> Result<OrderTicket, TransactionError> {
        let broker_order_id = {
            let tickets = self.tickets_guard();
            let record = tickets
                .get(&order_id)
                .ok_or(TransactionError::UnknownOrder { order_id })?;
            record.check(&TicketEvent::Cancel { reason: None })?;
            record.broker_order_id.clone()
        };

        let events = match broker_order_id {
            Some(id) => self
                .brokerage
                .cancel_order(&id)
                .map_err(|e| TransactionError::Brokerage {
                    order_id,
                    message: e.to_string(),
                })?,
            None => vec![OrderEvent::Canceled {
                reason: Some("canceled before reaching the brokerage".to_string()),
            }],
        };

        let mut last = None;
        for event in events {
            last = Some(self.apply_order_event(order_id, event)?);
        }
        match last {
            Some(ticket) => Ok(ticket),
            None => self
                .ticket(order_id)
                .ok_or(TransactionError::UnknownOrder { order_id }),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn ticket(&self, order_id: u64) -> Option<OrderTicket> {
        self.tickets_guard().get(&order_id).map(TicketRecord::to_ticket)
    }

    /// Every ticket in order-id order.
    pub fn tickets(&self) -> Vec<OrderTicket> {
        self.tickets_guard()
            .values()
            .map(TicketRecord::to_ticket)
            .collect()
    }

    pub fn open_tickets(&self) -> Vec<OrderTicket> {
        self.tickets_guard()
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(TicketRecord::to_ticket)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Portfolio-level operations
    // -----------------------------------------------------------------------

    /// Size and submit orders that move each target's holding to its share
    /// of portfolio value.
    pub fn set_holdings(
        &self,
        targets: &[PortfolioTarget],
        liquidate_others: bool,
        time: DateTime<Utc>,
    ) -> Result<Vec<OrderTicket>, PortfolioError> {
        let orders = {
            let account = self.account.read();
            targets_to_order_requests(&account, targets, liquidate_others, time)?
        };
        for (symbol, reason) in &orders.skipped {
            warn!(symbol = %symbol, reason = %reason, "target not sized");
        }
        Ok(orders
            .requests
            .into_iter()
            .map(|r| self.submit(r))
            .collect())
    }

    /// Scan for a margin call and liquidate if one is due.
    ///
    /// `Ok(None)`: nothing to liquidate. `Err(MarginCallUnresolved)`: the
    /// account is still under-margined after every order was tried; the
    /// error carries the submitted tickets and their failures.
    pub fn check_margin(
        &self,
        issue_warning_only: bool,
    ) -> Result<Option<MarginCallExecution>, PortfolioError> {
        let (plan, model) = {
            let account = self.account.read();
            (
                account.margin_call_orders(issue_warning_only)?,
                account.margin_call_model().clone(),
            )
        };

        if plan.issue_warning {
            warn!(margin_remaining = %plan.margin_remaining, "margin warning");
        }
        if plan.orders.is_empty() {
            return match plan.unresolved_deficit {
                Some(deficit) => {
                    let as_of = self.account.read().now();
                    error!(deficit = %deficit, "margin call with nothing left to liquidate");
                    Err(PortfolioError::MarginCallUnresolved {
                        deficit,
                        as_of,
                        execution: Box::new(MarginCallExecution::empty(plan.margin_remaining)),
                    })
                }
                None => Ok(None),
            };
        }

        info!(
            orders = plan.orders.len(),
            margin_remaining = %plan.margin_remaining,
            projected_unresolved = ?plan.unresolved_deficit,
            "margin call"
        );
        let exec = model.execute_margin_call(&self.account, self, plan.requests())?;
        let as_of = self.account.read().now();
        match exec.into_result(as_of) {
            Ok(exec) => Ok(Some(exec)),
            Err(e) => {
                error!(error = %e, "margin call unresolved");
                Err(e)
            }
        }
    }
}

impl<B: BrokerageAdapter> OrderProcessor for SecurityTransactionManager<B> {
    fn process(&self, request: SubmitOrderRequest) -> OrderTicket {
        self.submit(request)
    }
}
