use chrono::{DateTime, TimeZone, Utc};
use mdk_backtest::{BacktestEngine, BacktestError, PriceTick, ScriptedOrder};
use mdk_config::{load_layered_yaml_from_strings, EngineConfig};
use mdk_portfolio::{OrderStatus, Symbol, MARGIN_CALL_TAG};
use rust_decimal_macros::dec;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn engine(yaml: &str) -> BacktestEngine {
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let cfg = EngineConfig::from_loaded(&loaded).unwrap();
    BacktestEngine::new(cfg.build_account().unwrap(), cfg.backtest.clone())
        .with_config_hash(&loaded.config_hash)
}

const CASH_DESK: &str = r#"
account:
  cash: [{currency: USD, amount: 10000}]
securities:
  - symbol: SPY
"#;

const MARGIN_DESK: &str = r#"
account:
  cash: [{currency: USD, amount: 15000}]
securities:
  - symbol: SPY
    buying_power: {kind: margin, leverage: 2}
    required_free_buying_power_percent: 0
  - symbol: QQQ
    buying_power: {kind: margin, leverage: 2}
    required_free_buying_power_percent: 0
"#;

#[test]
fn scenario_cash_proceeds_settle_next_business_day() {
    // GIVEN a cash account on the usa market (T+1 at 08:00 New York)
    let bt = engine(CASH_DESK);
    let prices = vec![
        PriceTick::new(at(6, 15), "SPY", dec!(50)),
        PriceTick::new(at(6, 18), "SPY", dec!(55)),
        PriceTick::new(at(7, 14), "SPY", dec!(55)),
    ];
    let orders = vec![
        ScriptedOrder::market(at(6, 15), "SPY", dec!(100)),
        ScriptedOrder::market(at(6, 18), "SPY", dec!(-100)),
        // Proceeds are still unsettled: refused.
        ScriptedOrder::market(at(6, 18), "SPY", dec!(150)),
        // After settlement: affordable.
        ScriptedOrder::market(at(7, 14), "SPY", dec!(150)),
    ];

    // WHEN the scenario is replayed
    let report = bt.run(&prices, &orders).unwrap();

    // THEN
    assert!(!report.halted);
    assert_eq!(report.steps, 3);
    let statuses: Vec<OrderStatus> = report.tickets.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::Filled,
            OrderStatus::Filled,
            OrderStatus::Invalid,
            OrderStatus::Filled
        ]
    );
    assert!(report.tickets[2]
        .message
        .as_deref()
        .unwrap()
        .contains("Insufficient buying power"));

    // Thursday 08:00 EST is 13:00 UTC; settled by the 14:00 step.
    assert_eq!(report.settlements.len(), 1);
    assert_eq!(report.settlements[0].time, at(7, 14));
    assert_eq!(report.settlements[0].amount, dec!(5500));

    // Unsettled cash still counts toward portfolio value.
    assert_eq!(report.equity_curve[1].total_portfolio_value, dec!(10500));

    let snap = &report.final_snapshot;
    assert_eq!(snap.total_portfolio_value, dec!(10500));
    assert_eq!(snap.total_realized_profit, dec!(500));
    assert_eq!(snap.holdings.len(), 1);
    assert_eq!(snap.holdings[0].quantity, dec!(150));
    assert!(snap.unsettled.is_empty());
    assert!(report.integrity_violations.is_empty());
}

#[test]
fn scenario_order_at_the_settlement_instant_spends_the_proceeds() {
    let bt = engine(CASH_DESK);
    let prices = vec![
        PriceTick::new(at(6, 15), "SPY", dec!(50)),
        PriceTick::new(at(6, 18), "SPY", dec!(55)),
        PriceTick::new(at(7, 13), "SPY", dec!(55)),
    ];
    let orders = vec![
        ScriptedOrder::market(at(6, 15), "SPY", dec!(100)),
        ScriptedOrder::market(at(6, 18), "SPY", dec!(-100)),
        // 8,250 needs the 5,500 that settles at this very step.
        ScriptedOrder::market(at(7, 13), "SPY", dec!(150)),
    ];

    let report = bt.run(&prices, &orders).unwrap();

    assert_eq!(report.settlements.len(), 1);
    assert_eq!(report.settlements[0].time, at(7, 13));
    let last = report.tickets.last().unwrap();
    assert_eq!(last.status, OrderStatus::Filled, "{:?}", last.message);
    assert_eq!(report.final_snapshot.holdings[0].quantity, dec!(150));
}

#[test]
fn scenario_margin_call_liquidates_and_run_continues() {
    let bt = engine(MARGIN_DESK);
    let prices = vec![
        PriceTick::new(at(6, 15), "SPY", dec!(50)),
        PriceTick::new(at(6, 15), "QQQ", dec!(100)),
        PriceTick::new(at(6, 16), "SPY", dec!(20)),
        PriceTick::new(at(6, 17), "SPY", dec!(21)),
    ];
    let orders = vec![
        ScriptedOrder::market(at(6, 15), "SPY", dec!(400)),
        ScriptedOrder::market(at(6, 15), "QQQ", dec!(100)),
    ];

    let report = bt.run(&prices, &orders).unwrap();

    assert!(!report.halted);
    assert_eq!(report.steps, 3);
    assert_eq!(report.margin_calls.len(), 1);
    let call = &report.margin_calls[0];
    assert_eq!(call.time, at(6, 16));
    assert!(call.resolved);
    assert_eq!(call.orders_filled, 2);

    let liquidations: Vec<_> = report
        .tickets
        .iter()
        .filter(|t| t.request.tag == MARGIN_CALL_TAG)
        .collect();
    assert_eq!(liquidations.len(), 2);

    let acct = bt.account().read();
    assert_eq!(acct.holding_quantity(&Symbol::new("QQQ")), dec!(0));
    assert_eq!(acct.holding_quantity(&Symbol::new("SPY")), dec!(300));
    assert!(acct.margin_remaining().unwrap() >= dec!(0));
}

#[test]
fn scenario_unresolved_margin_call_halts_the_run() {
    let yaml = r#"
account:
  cash: [{currency: USD, amount: 10000}]
securities:
  - symbol: SPY
    buying_power: {kind: margin, leverage: 2}
    required_free_buying_power_percent: 0
"#;
    let prices = vec![
        PriceTick::new(at(6, 15), "SPY", dec!(50)),
        PriceTick::new(at(6, 16), "SPY", dec!(10)),
        PriceTick::new(at(6, 17), "SPY", dec!(12)),
    ];
    let orders = vec![ScriptedOrder::market(at(6, 15), "SPY", dec!(400))];

    let report = engine(yaml).run(&prices, &orders).unwrap();
    assert!(report.halted);
    assert_eq!(report.steps, 2);
    assert!(report
        .halt_reason
        .as_deref()
        .unwrap()
        .starts_with("MARGIN_CALL_UNRESOLVED deficit="));
    assert_eq!(report.margin_calls.len(), 1);
    let call = &report.margin_calls[0];
    assert_eq!(call.unresolved_deficit, Some(dec!(6000)));
    // The liquidation itself filled; it just was not enough.
    assert_eq!(call.orders_filled, 1);
    assert_eq!(call.orders_failed, 0);
    assert!(call.failures.is_empty());
    assert_eq!(report.final_snapshot.total_portfolio_value, dec!(-6000));

    // Same scenario with halting disabled keeps going and re-reports.
    let lenient = format!("{yaml}\nbacktest:\n  halt_on_unresolved_margin_call: false\n");
    let report = engine(&lenient).run(&prices, &orders).unwrap();
    assert!(!report.halted);
    assert_eq!(report.steps, 3);
    assert_eq!(report.margin_calls.len(), 2);
    assert!(report.margin_calls.iter().all(|c| !c.resolved));
}

#[test]
fn scenario_limit_order_rests_until_price_reaches_it() {
    let bt = engine(MARGIN_DESK);
    let prices = vec![
        PriceTick::new(at(6, 15), "SPY", dec!(50)),
        PriceTick::new(at(6, 16), "SPY", dec!(46)),
        PriceTick::new(at(6, 17), "SPY", dec!(44)),
    ];
    let orders = vec![ScriptedOrder::limit(at(6, 15), "SPY", dec!(10), dec!(45))];

    let report = bt.run(&prices, &orders).unwrap();
    assert_eq!(report.tickets.len(), 1);
    let t = &report.tickets[0];
    assert_eq!(t.status, OrderStatus::Filled);
    assert_eq!(t.average_fill_price, dec!(44));
    assert!(bt.manager().brokerage().resting_orders().is_empty());
}

#[test]
fn scenario_targets_are_sized_by_buying_power() {
    let bt = engine(
        r#"
account:
  cash: [{currency: USD, amount: 10000}]
securities:
  - symbol: SPY
    buying_power: {kind: margin, leverage: 2}
    required_free_buying_power_percent: 0
"#,
    );
    let prices = vec![PriceTick::new(at(6, 15), "SPY", dec!(50))];
    let orders = vec![
        ScriptedOrder::target(at(6, 15), "SPY", dec!(0.5)),
        ScriptedOrder::target(at(6, 15), "NOPE", dec!(0.5)),
    ];

    let report = bt.run(&prices, &orders).unwrap();
    assert_eq!(report.tickets.len(), 1);
    assert_eq!(report.tickets[0].quantity_filled, dec!(200));
    assert_eq!(report.skipped_targets.len(), 1);
    assert_eq!(report.skipped_targets[0].symbol, Symbol::new("NOPE"));
}

#[test]
fn scenario_conversion_feed_prices_and_unknown_symbols() {
    let yaml = r#"
account:
  cash:
    - {currency: USD, amount: 10000}
    - {currency: EUR, amount: 1000, rate: 1.1}
  conversions:
    - {currency: EUR, symbol: EURUSD}
"#;
    let report = engine(yaml)
        .run(&[PriceTick::new(at(6, 15), "EURUSD", dec!(1.2))], &[])
        .unwrap();
    assert_eq!(report.final_snapshot.total_portfolio_value, dec!(11200));

    let err = engine(yaml)
        .run(&[PriceTick::new(at(6, 15), "XYZ", dec!(1))], &[])
        .unwrap_err();
    assert_eq!(
        err,
        BacktestError::UnknownSymbol {
            symbol: Symbol::new("XYZ"),
            time: at(6, 15),
        }
    );
}

#[test]
fn scenario_replay_is_deterministic() {
    let prices = vec![
        PriceTick::new(at(6, 15), "SPY", dec!(50)),
        PriceTick::new(at(6, 15), "QQQ", dec!(100)),
        PriceTick::new(at(6, 16), "SPY", dec!(20)),
    ];
    let orders = vec![
        ScriptedOrder::market(at(6, 15), "SPY", dec!(400)),
        ScriptedOrder::market(at(6, 15), "QQQ", dec!(100)),
    ];

    let a = engine(MARGIN_DESK).run(&prices, &orders).unwrap();
    let b = engine(MARGIN_DESK).run(&prices, &orders).unwrap();
    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );

    // A different config yields a different run id.
    let c = engine(CASH_DESK).run(&prices[..1], &[]).unwrap();
    assert_ne!(a.run_id, c.run_id);
}
