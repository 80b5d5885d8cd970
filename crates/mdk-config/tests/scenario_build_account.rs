use chrono::NaiveTime;
use mdk_config::{load_layered_yaml_from_strings, EngineConfig};
use mdk_portfolio::{BuyingPowerKind, DataValue, FeeModel, SettlementModel, Symbol};
use rust_decimal_macros::dec;

const DESK_YAML: &str = r#"
account:
  currency: usd
  cash:
    - currency: USD
      amount: 100000
    - currency: EUR
      amount: 1000
      rate: "1.10"
  conversions:
    - currency: EUR
      symbol: EURUSD
markets:
  - name: Xetra
    time_zone: Europe/Berlin
    open: "09:00:00"
    close: "17:30:00"
    settlement:
      kind: delayed
      days: 2
      time_of_day: "12:00:00"
securities:
  - symbol: SPY
    fees:
      kind: per_unit
      per_unit: "0.005"
      minimum: 1
  - symbol: QQQ
    settlement:
      kind: immediate
  - symbol: SAP
    market: xetra
    quote_currency: EUR
    buying_power:
      kind: margin
      leverage: 2
      maintenance_leverage: "1.5"
    data:
      sector: Technology
      beta: 1.2
  - symbol: ES
    lot_size: 5
    multiplier: 50
    buying_power:
      kind: pattern_day_trading
    required_free_buying_power_percent: 0
margin_call:
  liquidation_tolerance: "0.01"
pdt:
  min_equity: 30000
"#;

fn desk() -> EngineConfig {
    let loaded = load_layered_yaml_from_strings(&[DESK_YAML]).unwrap();
    EngineConfig::from_loaded(&loaded).unwrap()
}

#[test]
fn scenario_desk_config_builds_a_funded_account() {
    let acct = desk().build_account().unwrap();

    assert_eq!(acct.account_currency(), "USD");
    assert_eq!(acct.total_portfolio_value().unwrap(), dec!(101100));
    assert_eq!(acct.securities().len(), 4);

    // Custom market registered next to the defaults.
    let xetra = acct.markets().get("xetra").unwrap();
    assert_eq!(xetra.time_zone, chrono_tz::Europe::Berlin);
    assert!(xetra.hours.weekdays_only);
    assert!(acct.markets().get("usa").is_some());

    // Cash security on usa picks up the market's delayed settlement.
    let spy = acct.security(&Symbol::new("SPY")).unwrap();
    assert!(!spy.settlement_model().is_immediate());
    assert!(spy.buying_power_model().is_cash());
    assert_eq!(
        spy.fee_model(),
        &FeeModel::PerUnit {
            per_unit: dec!(0.005),
            minimum: dec!(1),
            maximum_percent: None,
        }
    );

    // Explicit override wins.
    let qqq = acct.security(&Symbol::new("QQQ")).unwrap();
    assert_eq!(qqq.settlement_model(), &SettlementModel::Immediate);

    let sap = acct.security(&Symbol::new("SAP")).unwrap();
    assert_eq!(sap.quote_currency(), "EUR");
    assert_eq!(sap.market().name, "xetra");
    assert_eq!(
        sap.buying_power_model().kind(),
        &BuyingPowerKind::Margin {
            leverage: dec!(2),
            maintenance_leverage: dec!(1.5),
        }
    );
    assert_eq!(sap.settlement_model(), &SettlementModel::Immediate);
    assert_eq!(
        sap.data().value("sector").and_then(DataValue::as_text),
        Some("Technology")
    );
    assert_eq!(
        sap.data().value("beta").and_then(DataValue::as_decimal),
        Some(dec!(1.2))
    );
    assert!(spy.data().values().is_empty());

    let es = acct.security(&Symbol::new("ES")).unwrap();
    assert_eq!(es.lot_size(), dec!(5));
    assert_eq!(es.multiplier(), dec!(50));
    assert_eq!(es.buying_power_model().required_free_buying_power_percent(), dec!(0));
    assert_eq!(
        es.buying_power_model().kind(),
        &BuyingPowerKind::PatternDayTrading {
            intraday_leverage: dec!(4),
            overnight_leverage: dec!(2),
        }
    );

    assert_eq!(acct.margin_call_model().liquidation_tolerance, dec!(0.01));
    assert_eq!(acct.margin_call_model().warning_threshold, dec!(0.05));

    let view = acct.view();
    let pdt = view.pdt_policy();
    assert_eq!(pdt.min_equity, dec!(30000));
    assert!(pdt.enabled);
    assert_eq!(pdt.window_days, 5);
}

#[test]
fn scenario_conversion_feed_from_config_drives_rates() {
    let mut acct = desk().build_account().unwrap();
    acct.set_conversion_price(&Symbol::new("EURUSD"), dec!(1.2));
    assert_eq!(acct.total_portfolio_value().unwrap(), dec!(101200));
}

#[test]
fn scenario_market_settlement_time_of_day_parses() {
    let cfg = desk();
    let market = cfg.markets[0].to_market().unwrap();
    assert_eq!(
        market.cash_settlement,
        SettlementModel::Delayed {
            days: 2,
            time_of_day: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        }
    );
}

#[test]
fn scenario_bad_configs_are_rejected_with_context() {
    let cases: &[(&str, &str)] = &[
        (
            "account: {cash: [{currency: EUR, amount: 10}]}",
            "rate is required",
        ),
        (
            "account: {cash: [{currency: EUR, amount: 10, rate: 0}]}",
            "conversion rate for EUR must be > 0",
        ),
        ("securities: [{symbol: SPY, market: nyse}]", "unknown market"),
        (
            "markets: [{name: x, time_zone: Mars/Olympus, open: \"09:00:00\", close: \"17:00:00\"}]",
            "unknown time zone",
        ),
        (
            "securities: [{symbol: SPY, lot_size: 0}]",
            "lot size must be > 0",
        ),
        (
            "securities: [{symbol: T, quote_currency: JPY}]",
            "security T",
        ),
        (
            "securities: [{symbol: SPY, buying_power: {kind: margin, leverage: 0}}]",
            "security SPY",
        ),
    ];

    for (yaml, needle) in cases {
        let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
        let cfg = EngineConfig::from_loaded(&loaded).unwrap();
        let err = cfg.build_account().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains(needle), "{yaml}: {msg}");
    }
}

#[test]
fn scenario_wrong_shape_fails_to_deserialize() {
    let loaded =
        load_layered_yaml_from_strings(&["securities: [{symbol: SPY, buying_power: {kind: futures}}]"])
            .unwrap();
    let err = EngineConfig::from_loaded(&loaded).unwrap_err();
    assert!(err.to_string().contains("invalid engine config"));
}

#[test]
fn scenario_empty_config_gives_empty_usd_account() {
    let loaded = load_layered_yaml_from_strings(&["{}"]).unwrap();
    let cfg = EngineConfig::from_loaded(&loaded).unwrap();
    assert!(cfg.backtest.halt_on_unresolved_margin_call);
    assert!(!cfg.backtest.issue_warning_only);
    let acct = cfg.build_account().unwrap();
    assert_eq!(acct.account_currency(), "USD");
    assert_eq!(acct.total_portfolio_value().unwrap(), dec!(0));
}
