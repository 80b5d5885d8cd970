//! Deterministic in-memory paper brokerage.
//!
//! - Market orders fill in full at the security's last price on submission
//! - Marketable limit orders fill the same way; the rest wait for `sweep`
//! - `broker_order_id` is `paper:{order_id}`
//! - Fill ids are UUIDv5 over `(order_id, fill_seq)`. No RNG, no clock.
//! - Fees come from the security's fee model, in its quote currency

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use mdk_execution::{
    BrokerageAdapter, BrokerageFill, BrokerageOrder, BrokerageResult, BrokerageSubmitResponse,
    OrderEvent,
};
use mdk_portfolio::{CashAmount, OrderType, SharedAccount};
use rust_decimal::Decimal;
use uuid::Uuid;

pub struct PaperBrokerage {
    account: SharedAccount,
    /// Open limit orders keyed by broker order id.
    resting: Mutex<BTreeMap<String, BrokerageOrder>>,
    fill_seq: AtomicU64,
}

impl PaperBrokerage {
    pub fn new(account: SharedAccount) -> Self {
        Self {
            account,
            resting: Mutex::new(BTreeMap::new()),
            fill_seq: AtomicU64::new(1),
        }
    }

    fn resting_guard(&self) -> MutexGuard<'_, BTreeMap<String, BrokerageOrder>> {
        self.resting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Broker ids of orders still waiting for their limit.
    pub fn resting_orders(&self) -> Vec<String> {
        self.resting_guard().keys().cloned().collect()
    }

    /// Fill every resting order whose limit the current price satisfies.
    ///
    /// Returns `(order_id, event)` pairs in broker-id order for the caller
    /// to feed back through the transaction manager.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<(u64, OrderEvent)> {
        let mut resting = self.resting_guard();
        let mut out = Vec::new();
        let mut done = Vec::new();
        for (broker_id, order) in resting.iter() {
            if let Ok(Some(fill)) = self.try_fill(order, now) {
                out.push((order.order_id, OrderEvent::Fill(fill)));
                done.push(broker_id.clone());
            }
        }
        for id in done {
            resting.remove(&id);
        }
        out
    }

    /// A full fill at the last price, or `None` when a limit is not met.
    fn try_fill(
        &self,
        order: &BrokerageOrder,
        time: DateTime<Utc>,
    ) -> BrokerageResult<Option<BrokerageFill>> {
        let account = self.account.read();
        let security = account.security(&order.symbol)?;
        if !security.has_data() {
            return Err(format!("no price for {}", order.symbol).into());
        }
        let price = security.price();
        if let OrderType::Limit { limit_price } = order.order_type {
            if !marketable(order.quantity, limit_price, price) {
                return Ok(None);
            }
        }
        let fee = CashAmount::new(security.order_fee(order.quantity), security.quote_currency());
        let seq = self.fill_seq.fetch_add(1, Ordering::SeqCst);
        Ok(Some(BrokerageFill {
            fill_id: derive_fill_id(order.order_id, seq).to_string(),
            quantity: order.quantity,
            price,
            fee,
            time,
        }))
    }
}

impl BrokerageAdapter for PaperBrokerage {
    fn submit_order(&self, order: &BrokerageOrder) -> BrokerageResult<BrokerageSubmitResponse> {
        let broker_order_id = format!("paper:{}", order.order_id);
        let events = match self.try_fill(order, order.time)? {
            Some(fill) => vec![OrderEvent::Fill(fill)],
            None => {
                self.resting_guard()
                    .insert(broker_order_id.clone(), order.clone());
                Vec::new()
            }
        };
        Ok(BrokerageSubmitResponse {
            broker_order_id,
            events,
        })
    }

    fn cancel_order(&self, broker_order_id: &str) -> BrokerageResult<Vec<OrderEvent>> {
        match self.resting_guard().remove(broker_order_id) {
            Some(_) => Ok(vec![OrderEvent::Canceled { reason: None }]),
            None => Err(format!("no open paper order {broker_order_id}").into()),
        }
    }
}

fn marketable(quantity: Decimal, limit_price: Decimal, price: Decimal) -> bool {
    if quantity > Decimal::ZERO {
        price <= limit_price
    } else {
        price >= limit_price
    }
}

fn derive_fill_id(order_id: u64, seq: u64) -> Uuid {
    let data = format!("mdk-paper.fill.v1|{order_id}|{seq}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, data.as_bytes())
}
