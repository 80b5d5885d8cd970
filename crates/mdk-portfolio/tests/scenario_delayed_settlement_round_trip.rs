use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use mdk_portfolio::{
    Account, BuyingPowerModel, CashAmount, Fill, FillOutcome, PortfolioError, SecurityDefinition,
    SettlementModel, Symbol,
};
use rust_decimal_macros::dec;

fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
}

fn t2_at_four() -> SettlementModel {
    SettlementModel::Delayed {
        days: 2,
        time_of_day: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
    }
}

/// Buys 100 @ 50 then sells them @ 55 on Wednesday 2024-03-06.
fn account_with_unsettled_sale() -> (Account, Symbol) {
    let mut acct = Account::new("USD");
    acct.set_cash("USD", dec!(10000), dec!(1)).unwrap();
    acct.add_security(
        SecurityDefinition::equity("SPY", BuyingPowerModel::cash()).with_settlement(t2_at_four()),
    )
    .unwrap();
    let spy = Symbol::new("SPY");

    acct.set_price(&spy, dec!(50), utc(6, 15, 0)).unwrap();
    acct.process_fill(&Fill::new(
        "buy-1",
        1,
        spy.clone(),
        dec!(100),
        dec!(50),
        CashAmount::zero("USD"),
        utc(6, 15, 0),
    ))
    .unwrap();

    acct.set_price(&spy, dec!(55), utc(6, 16, 0)).unwrap();
    let outcome = acct
        .process_fill(&Fill::new(
            "sell-1",
            2,
            spy.clone(),
            dec!(-100),
            dec!(55),
            CashAmount::zero("USD"),
            utc(6, 16, 0),
        ))
        .unwrap();

    // Friday 16:00 New York (EST) = 21:00 UTC.
    match outcome {
        FillOutcome::Applied(a) => {
            assert_eq!(a.settlement_time, Some(utc(8, 21, 0)));
            assert_eq!(a.cash_delta, dec!(5500));
            assert_eq!(a.realized_profit, dec!(500));
        }
        FillOutcome::Duplicate => panic!("fresh fill reported as duplicate"),
    }
    (acct, spy)
}

#[test]
fn scenario_proceeds_appear_only_at_settlement() {
    let (mut acct, _spy) = account_with_unsettled_sale();
    let usd = |a: &Account| a.portfolio().cash_book().get("USD").unwrap().amount();

    // Debit applied at once, credit parked.
    assert_eq!(usd(&acct), dec!(5000));
    assert_eq!(acct.portfolio().unsettled().len(), 1);
    // Unsettled cash still counts toward portfolio value.
    assert_eq!(acct.total_portfolio_value().unwrap(), dec!(10500));

    // One minute early: nothing moves.
    let early = acct.scan_for_cash_settlement(utc(8, 20, 59)).unwrap();
    assert!(early.is_empty());
    assert_eq!(usd(&acct), dec!(5000));

    // At the settlement instant the exact amount lands.
    let settled = acct.scan_for_cash_settlement(utc(8, 21, 0)).unwrap();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].amount.amount, dec!(5500));
    assert_eq!(usd(&acct), dec!(10500));
    assert!(acct.portfolio().unsettled().is_empty());
    assert_eq!(acct.total_portfolio_value().unwrap(), dec!(10500));
}

#[test]
fn scenario_scan_is_idempotent_for_the_same_instant() {
    let (mut acct, _spy) = account_with_unsettled_sale();
    let now = utc(11, 14, 0);

    acct.scan_for_cash_settlement(now).unwrap();
    let after_first = acct.portfolio().cash_book().clone();

    let second = acct.scan_for_cash_settlement(now).unwrap();
    assert!(second.is_empty());
    assert_eq!(acct.portfolio().cash_book(), &after_first);
}

#[test]
fn scenario_scan_cannot_move_backwards() {
    let (mut acct, _spy) = account_with_unsettled_sale();
    acct.scan_for_cash_settlement(utc(7, 12, 0)).unwrap();
    let err = acct.scan_for_cash_settlement(utc(7, 11, 0)).unwrap_err();
    assert!(matches!(err, PortfolioError::SettlementScheduling { .. }));
    // The pending sale is untouched.
    assert_eq!(acct.portfolio().unsettled().len(), 1);
}

#[test]
fn scenario_unsettled_proceeds_are_not_buying_power() {
    let (acct, spy) = account_with_unsettled_sale();
    // 5,000 settled; 5,500 pending. 60 shares @ 55 = 3,300 ok; 95 = 5,225 not.
    assert!(
        acct.has_sufficient_buying_power_for_order(&spy, dec!(60))
            .unwrap()
            .is_sufficient
    );
    assert!(
        !acct
            .has_sufficient_buying_power_for_order(&spy, dec!(95))
            .unwrap()
            .is_sufficient
    );
}
