use mdk_backtest::{load_orders_csv, load_prices_csv, BacktestEngine};
use mdk_config::{load_layered_yaml_from_strings, EngineConfig};
use mdk_portfolio::OrderStatus;
use rust_decimal_macros::dec;

#[test]
fn scenario_csv_files_drive_a_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let prices_path = dir.path().join("prices.csv");
    let orders_path = dir.path().join("orders.csv");
    std::fs::write(
        &prices_path,
        "ts,symbol,price\n\
         2024-03-06T15:00:00Z,SPY,50\n\
         2024-03-06T16:00:00Z,SPY,52.5\n",
    )
    .unwrap();
    std::fs::write(
        &orders_path,
        "ts,symbol,quantity,limit_price,target,tag\n\
         2024-03-06T15:00:00Z,SPY,40,,,open\n\
         2024-03-06T16:00:00Z,SPY,-40,52,,close\n",
    )
    .unwrap();

    let loaded = load_layered_yaml_from_strings(&[r#"
account:
  cash: [{currency: USD, amount: 5000}]
securities:
  - symbol: SPY
    buying_power: {kind: margin, leverage: 1}
"#])
    .unwrap();
    let cfg = EngineConfig::from_loaded(&loaded).unwrap();
    let bt = BacktestEngine::new(cfg.build_account().unwrap(), cfg.backtest.clone())
        .with_config_hash(&loaded.config_hash);

    let prices = load_prices_csv(&prices_path).unwrap();
    let orders = load_orders_csv(&orders_path).unwrap();
    let report = bt.run(&prices, &orders).unwrap();

    assert_eq!(report.tickets.len(), 2);
    assert!(report
        .tickets
        .iter()
        .all(|t| t.status == OrderStatus::Filled));
    assert_eq!(report.tickets[0].request.tag, "open");
    // Marketable sell limit fills at the last price, not the limit.
    assert_eq!(report.tickets[1].average_fill_price, dec!(52.5));
    assert_eq!(report.final_snapshot.total_realized_profit, dec!(100));
    assert_eq!(report.final_snapshot.total_portfolio_value, dec!(5100));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["steps"], 2);
    assert!(json["final_snapshot"]["holdings"].is_array());
}

#[test]
fn scenario_missing_csv_names_the_path() {
    let err = load_prices_csv("/definitely/not/here.csv").unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here.csv"));
}
