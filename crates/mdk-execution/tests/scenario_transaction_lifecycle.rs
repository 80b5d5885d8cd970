use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use mdk_execution::{
    BrokerageAdapter, BrokerageFill, BrokerageOrder, BrokerageResult, BrokerageSubmitResponse,
    OrderEvent, SecurityTransactionManager, TransactionError,
};
use mdk_portfolio::{
    Account, BuyingPowerModel, CashAmount, OrderStatus, SecurityDefinition, SharedAccount,
    SubmitOrderRequest, Symbol,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn utc(m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 15, m, 0).unwrap()
}

/// Accepts every order; fills it in full at `price` when `immediate`.
struct TestBrokerage {
    immediate: bool,
    price: Mutex<Decimal>,
    submitted: Mutex<Vec<u64>>,
    next_fill: AtomicU64,
}

impl TestBrokerage {
    fn new(immediate: bool, price: Decimal) -> Self {
        Self {
            immediate,
            price: Mutex::new(price),
            submitted: Mutex::new(Vec::new()),
            next_fill: AtomicU64::new(1),
        }
    }

    fn submitted(&self) -> Vec<u64> {
        self.submitted.lock().unwrap().clone()
    }
}

impl BrokerageAdapter for TestBrokerage {
    fn submit_order(&self, order: &BrokerageOrder) -> BrokerageResult<BrokerageSubmitResponse> {
        self.submitted.lock().unwrap().push(order.order_id);
        let mut events = Vec::new();
        if self.immediate {
            let n = self.next_fill.fetch_add(1, Ordering::SeqCst);
            events.push(OrderEvent::Fill(BrokerageFill {
                fill_id: format!("exec-{n}"),
                quantity: order.quantity,
                price: *self.price.lock().unwrap(),
                fee: CashAmount::zero("USD"),
                time: order.time,
            }));
        }
        Ok(BrokerageSubmitResponse {
            broker_order_id: format!("B{}", order.order_id),
            events,
        })
    }

    fn cancel_order(&self, _broker_order_id: &str) -> BrokerageResult<Vec<OrderEvent>> {
        Ok(vec![OrderEvent::Canceled {
            reason: Some("user request".to_string()),
        }])
    }
}

struct DownBrokerage;

impl BrokerageAdapter for DownBrokerage {
    fn submit_order(&self, _order: &BrokerageOrder) -> BrokerageResult<BrokerageSubmitResponse> {
        Err("connection refused".into())
    }

    fn cancel_order(&self, _broker_order_id: &str) -> BrokerageResult<Vec<OrderEvent>> {
        Err("connection refused".into())
    }
}

fn cash_account() -> SharedAccount {
    let mut acct = Account::new("USD");
    acct.set_cash("USD", dec!(10000), dec!(1)).unwrap();
    acct.add_security(SecurityDefinition::equity("SPY", BuyingPowerModel::cash()))
        .unwrap();
    acct.add_security(
        SecurityDefinition::equity("ES", BuyingPowerModel::cash()).with_lot_size(dec!(5)),
    )
    .unwrap();
    acct.set_price(&Symbol::new("SPY"), dec!(50), utc(0)).unwrap();
    acct.set_price(&Symbol::new("ES"), dec!(10), utc(0)).unwrap();
    SharedAccount::new(acct)
}

fn fill(id: &str, qty: Decimal, price: Decimal) -> OrderEvent {
    OrderEvent::Fill(BrokerageFill {
        fill_id: id.to_string(),
        quantity: qty,
        price,
        fee: CashAmount::zero("USD"),
        time: utc(1),
    })
}

#[test]
fn scenario_unaffordable_order_never_reaches_the_brokerage() {
    let account = cash_account();
    let stm = SecurityTransactionManager::new(account.clone(), TestBrokerage::new(true, dec!(50)));
    let spy = Symbol::new("SPY");

    let first = stm.submit(SubmitOrderRequest::market(spy.clone(), dec!(100), utc(0)));
    assert_eq!(first.status, OrderStatus::Filled);
    assert_eq!(first.average_fill_price, dec!(50));
    assert_eq!(account.read().holding_quantity(&spy), dec!(100));

    account.write().set_price(&spy, dec!(60), utc(1)).unwrap();
    *stm.brokerage().price.lock().unwrap() = dec!(60);

    let second = stm.submit(SubmitOrderRequest::market(spy.clone(), dec!(100), utc(1)));
    assert_eq!(second.status, OrderStatus::Invalid);
    assert!(second
        .message
        .as_deref()
        .unwrap()
        .contains("Insufficient buying power"));

    assert_eq!(stm.brokerage().submitted(), vec![first.order_id]);
    assert_eq!(account.read().holding_quantity(&spy), dec!(100));
    assert_eq!(stm.tickets().len(), 2);
}

#[test]
fn scenario_pre_trade_validation() {
    let account = cash_account();
    let stm = SecurityTransactionManager::new(account, TestBrokerage::new(true, dec!(10)));

    let odd_lot = stm.submit(SubmitOrderRequest::market(Symbol::new("ES"), dec!(7), utc(0)));
    assert_eq!(odd_lot.status, OrderStatus::Invalid);
    assert!(odd_lot.message.unwrap().contains("lot size"));

    let unknown = stm.submit(SubmitOrderRequest::market(Symbol::new("XYZ"), dec!(1), utc(0)));
    assert_eq!(unknown.status, OrderStatus::Invalid);

    let zero = stm.submit(SubmitOrderRequest::market(Symbol::new("SPY"), dec!(0), utc(0)));
    assert_eq!(zero.status, OrderStatus::Invalid);

    let round_lot = stm.submit(SubmitOrderRequest::market(Symbol::new("ES"), dec!(10), utc(0)));
    assert_eq!(round_lot.status, OrderStatus::Filled);
    assert_eq!(stm.brokerage().submitted().len(), 1);
}

#[test]
fn scenario_deferred_partial_fills_apply_exactly_once() {
    let account = cash_account();
    let stm = SecurityTransactionManager::new(account.clone(), TestBrokerage::new(false, dec!(50)));
    let spy = Symbol::new("SPY");

    let ticket = stm.submit(SubmitOrderRequest::market(spy.clone(), dec!(100), utc(0)));
    assert_eq!(ticket.status, OrderStatus::Submitted);
    assert_eq!(stm.open_tickets().len(), 1);
    let id = ticket.order_id;

    let t = stm.apply_order_event(id, fill("x1", dec!(60), dec!(50))).unwrap();
    assert_eq!(t.status, OrderStatus::PartiallyFilled);

    // Redelivered execution report.
    let t = stm.apply_order_event(id, fill("x1", dec!(60), dec!(50))).unwrap();
    assert_eq!(t.quantity_filled, dec!(60));
    assert_eq!(account.read().holding_quantity(&spy), dec!(60));

    let t = stm.apply_order_event(id, fill("x2", dec!(40), dec!(51))).unwrap();
    assert_eq!(t.status, OrderStatus::Filled);
    assert_eq!(t.average_fill_price, dec!(50.4));
    assert_eq!(account.read().holding_quantity(&spy), dec!(100));
    assert!(stm.open_tickets().is_empty());

    // A late execution on a filled order is refused and never booked.
    let err = stm
        .apply_order_event(id, fill("x3", dec!(1), dec!(50)))
        .unwrap_err();
    assert!(matches!(err, TransactionError::Transition(_)));
    assert_eq!(account.read().holding_quantity(&spy), dec!(100));
    assert!(account.read().verify_integrity().is_empty());
}

#[test]
fn scenario_cancel_open_order() {
    let account = cash_account();
    let stm = SecurityTransactionManager::new(account, TestBrokerage::new(false, dec!(50)));
    let ticket = stm.submit(SubmitOrderRequest::market(Symbol::new("SPY"), dec!(10), utc(0)));

    let canceled = stm.cancel(ticket.order_id).unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(canceled.message.as_deref(), Some("user request"));

    assert!(matches!(
        stm.cancel(ticket.order_id),
        Err(TransactionError::Transition(_))
    ));
    assert!(matches!(
        stm.cancel(999),
        Err(TransactionError::UnknownOrder { order_id: 999 })
    ));
}

#[test]
fn scenario_brokerage_failure_marks_ticket_invalid() {
    let account = cash_account();
    let stm = SecurityTransactionManager::new(account.clone(), DownBrokerage);
    let t = stm.submit(SubmitOrderRequest::market(Symbol::new("SPY"), dec!(10), utc(0)));
    assert_eq!(t.status, OrderStatus::Invalid);
    assert!(t.message.unwrap().contains("connection refused"));
    assert_eq!(account.read().holding_quantity(&Symbol::new("SPY")), dec!(0));
}
