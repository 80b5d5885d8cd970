//! Brokerage boundary.
//!
//! `BrokerageAdapter` is the only way orders leave the process. The
//! transaction manager calls it with no account lock held; adapters may
//! block, retry, or report fills synchronously in the submit response.

use chrono::{DateTime, Utc};
use mdk_portfolio::{CashAmount, OrderType, Symbol};
use rust_decimal::Decimal;
use serde::Serialize;

/// Convenience alias used by every adapter method.
pub type BrokerageResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Order as the brokerage sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrokerageOrder {
    pub order_id: u64,
    pub symbol: Symbol,
    /// Signed: positive buys, negative sells.
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub tag: String,
    pub time: DateTime<Utc>,
}

/// One execution reported by the brokerage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrokerageFill {
    /// Unique per execution; redelivery with the same id is ignored.
    pub fill_id: String,
    /// Signed, same sign as the order.
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: CashAmount,
    pub time: DateTime<Utc>,
}

/// Lifecycle event for a submitted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderEvent {
    Fill(BrokerageFill),
    Canceled { reason: Option<String> },
    Rejected { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BrokerageSubmitResponse {
    pub broker_order_id: String,
    /// Events the brokerage already knows about (immediate fills,
    /// rejections). Later events arrive through
    /// `SecurityTransactionManager::apply_order_event`.
    pub events: Vec<OrderEvent>,
}

// ---------------------------------------------------------------------------
// BrokerageAdapter trait
// ---------------------------------------------------------------------------

/// Implemented by paper and live brokerages.
pub trait BrokerageAdapter: Send + Sync {
    fn submit_order(&self, order: &BrokerageOrder) -> BrokerageResult<BrokerageSubmitResponse>;

    /// Cancel by broker id. Returns the events caused by the cancel,
    /// normally a single `Canceled`.
    fn cancel_order(&self, broker_order_id: &str) -> BrokerageResult<Vec<OrderEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBrokerage {
        submitted: Mutex<Vec<u64>>,
    }

    impl BrokerageAdapter for RecordingBrokerage {
        fn submit_order(&self, order: &BrokerageOrder) -> BrokerageResult<BrokerageSubmitResponse> {
            self.submitted
                .lock()
                .map_err(|e| e.to_string())?
                .push(order.order_id);
            Ok(BrokerageSubmitResponse {
                broker_order_id: format!("broker-{}", order.order_id),
                events: Vec::new(),
            })
        }

        fn cancel_order(&self, _broker_order_id: &str) -> BrokerageResult<Vec<OrderEvent>> {
            Ok(vec![OrderEvent::Canceled { reason: None }])
        }
    }

    #[test]
    fn adapter_is_object_safe_and_records_submissions() {
        let broker = RecordingBrokerage::default();
        let adapter: &dyn BrokerageAdapter = &broker;
        let resp = adapter
            .submit_order(&BrokerageOrder {
                order_id: 7,
                symbol: Symbol::new("AAPL"),
                quantity: dec!(10),
                order_type: OrderType::Market,
                tag: String::new(),
                time: Utc.with_ymd_and_hms(2024, 3, 6, 15, 0, 0).unwrap(),
            })
            .unwrap();
        assert_eq!(resp.broker_order_id, "broker-7");
        assert_eq!(*broker.submitted.lock().unwrap(), vec![7]);
        assert_eq!(
            adapter.cancel_order("broker-7").unwrap(),
            vec![OrderEvent::Canceled { reason: None }]
        );
    }
}
