use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mdk_config::BacktestConfig;
use mdk_execution::{PortfolioTarget, SecurityTransactionManager};
use mdk_portfolio::{Account, PortfolioError, SharedAccount, SubmitOrderRequest, Symbol};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::paper::PaperBrokerage;
use crate::types::{
    BacktestReport, EquityPoint, MarginCallRecord, OrderInstruction, PriceTick, ScriptedOrder,
    SettlementRecord, SkippedTarget,
};

/// Backtest error variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BacktestError {
    /// A price for a symbol that is neither a security nor a conversion feed.
    UnknownSymbol { symbol: Symbol, time: DateTime<Utc> },
    Portfolio(PortfolioError),
}

impl core::fmt::Display for BacktestError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BacktestError::UnknownSymbol { symbol, time } => {
                write!(f, "price for unknown symbol {} at {}", symbol, time)
            }
            BacktestError::Portfolio(e) => write!(f, "portfolio: {}", e),
        }
    }
}

impl std::error::Error for BacktestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BacktestError::Portfolio(e) => Some(e),
            BacktestError::UnknownSymbol { .. } => None,
        }
    }
}

impl From<PortfolioError> for BacktestError {
    fn from(e: PortfolioError) -> Self {
        BacktestError::Portfolio(e)
    }
}

#[derive(Default)]
struct Step<'a> {
    prices: Vec<&'a PriceTick>,
    orders: Vec<&'a ScriptedOrder>,
}

/// Deterministic time-step replay over one account.
///
/// Pipeline per timestamp: PRICES -> SETTLEMENT -> RESTING FILLS -> ORDERS
/// -> MARGIN CALL -> EQUITY POINT
pub struct BacktestEngine {
    settings: BacktestConfig,
    manager: SecurityTransactionManager<PaperBrokerage>,
    config_hash: String,
}

impl BacktestEngine {
    pub fn new(account: Account, settings: BacktestConfig) -> Self {
        let shared = SharedAccount::new(account);
        let brokerage = PaperBrokerage::new(shared.clone());
        Self {
            settings,
            manager: SecurityTransactionManager::new(shared, brokerage),
            config_hash: String::new(),
        }
    }

    /// Hash of the configuration the account was built from; feeds the run id.
    pub fn with_config_hash(mut self, config_hash: &str) -> Self {
        self.config_hash = config_hash.to_string();
        self
    }

    pub fn account(&self) -> &SharedAccount {
        self.manager.account()
    }

    pub fn manager(&self) -> &SecurityTransactionManager<PaperBrokerage> {
        &self.manager
    }

    /// Replay `prices` and `orders`. Inputs need not be pre-grouped; events
    /// that share a timestamp keep their relative order.
    pub fn run(
        &self,
        prices: &[PriceTick],
        orders: &[ScriptedOrder],
    ) -> Result<BacktestReport, BacktestError> {
        let mut steps: BTreeMap<DateTime<Utc>, Step<'_>> = BTreeMap::new();
        for p in prices {
            steps.entry(p.time).or_default().prices.push(p);
        }
        for o in orders {
            steps.entry(o.time).or_default().orders.push(o);
        }

        let mut halted = false;
        let mut halt_reason = None;
        let mut steps_run = 0usize;
        let mut skipped_targets = Vec::new();
        let mut settlements = Vec::new();
        let mut margin_calls = Vec::new();
        let mut equity_curve = Vec::new();

        for (time, step) in &steps {
            let time = *time;
            steps_run += 1;

            // 1. Prices
            self.apply_prices(time, &step.prices)?;

            // 2. Settlement: proceeds due by now are spendable this step
            let settled = self.account().write().scan_for_cash_settlement(time)?;
            settlements.extend(settled.into_iter().map(|s| SettlementRecord {
                time,
                currency: s.amount.currency,
                amount: s.amount.amount,
            }));

            // 3. Resting limit orders that the new prices reach
            for (order_id, event) in self.manager.brokerage().sweep(time) {
                if let Err(e) = self.manager.apply_order_event(order_id, event) {
                    warn!(order_id, error = %e, "resting fill could not be applied");
                }
            }

            // 4. Scripted orders
            for order in &step.orders {
                self.submit_scripted(order, &mut skipped_targets);
            }

            // 5. Margin call
            match self.manager.check_margin(self.settings.issue_warning_only) {
                Ok(None) => {}
                Ok(Some(exec)) => {
                    margin_calls.push(MarginCallRecord::from_execution(time, &exec, None))
                }
                Err(PortfolioError::MarginCallUnresolved {
                    deficit, execution, ..
                }) => {
                    margin_calls.push(MarginCallRecord::from_execution(
                        time,
                        &execution,
                        Some(deficit),
                    ));
                    if self.settings.halt_on_unresolved_margin_call {
                        halted = true;
                        halt_reason = Some(format!(
                            "MARGIN_CALL_UNRESOLVED deficit={deficit} at {time}"
                        ));
                    }
                }
                Err(e) => return Err(e.into()),
            }

            // 6. Equity point
            {
                let account = self.account().read();
                equity_curve.push(EquityPoint {
                    time,
                    total_portfolio_value: account.total_portfolio_value()?,
                    margin_remaining: account.margin_remaining()?,
                });
            }

            if halted {
                break;
            }
        }

        let tickets = self.manager.tickets();
        let account = self.account().read();
        let integrity_violations = account.verify_integrity();
        if !integrity_violations.is_empty() {
            warn!(symbols = ?integrity_violations, "holdings disagree with journal replay");
        }
        let report = BacktestReport {
            run_id: derive_run_id(&self.config_hash, prices.len(), orders.len()).to_string(),
            halted,
            halt_reason,
            steps: steps_run,
            tickets,
            skipped_targets,
            settlements,
            margin_calls,
            equity_curve,
            integrity_violations,
            final_snapshot: account.snapshot()?,
        };
        info!(
            run_id = %report.run_id,
            steps = report.steps,
            tickets = report.tickets.len(),
            halted = report.halted,
            tpv = %report.final_snapshot.total_portfolio_value,
            "backtest finished"
        );
        Ok(report)
    }

    fn apply_prices(&self, time: DateTime<Utc>, prices: &[&PriceTick]) -> Result<(), BacktestError> {
        let mut account = self.account().write();
        account.set_time(time);
        for tick in prices {
            if account.securities().by_symbol(&tick.symbol).is_some() {
                account.set_price(&tick.symbol, tick.price, time)?;
            } else if account.set_conversion_price(&tick.symbol, tick.price) == 0 {
                return Err(BacktestError::UnknownSymbol {
                    symbol: tick.symbol.clone(),
                    time,
                });
            }
        }
        Ok(())
    }

    fn submit_scripted(&self, order: &ScriptedOrder, skipped: &mut Vec<SkippedTarget>) {
        match &order.instruction {
            OrderInstruction::Quantity {
                quantity,
                limit_price,
            } => {
                let request = match limit_price {
                    Some(limit) => {
                        SubmitOrderRequest::limit(order.symbol.clone(), *quantity, *limit, order.time)
                    }
                    None => SubmitOrderRequest::market(order.symbol.clone(), *quantity, order.time),
                };
                let request = match &order.tag {
                    Some(tag) => request.with_tag(tag.as_str()),
                    None => request,
                };
                let ticket = self.manager.submit(request);
                debug!(
                    order_id = ticket.order_id,
                    status = ticket.status.as_str(),
                    "scripted order"
                );
            }
            OrderInstruction::Target { target } => {
                let targets = [PortfolioTarget::new(order.symbol.clone(), *target)];
                if let Err(e) = self.manager.set_holdings(&targets, false, order.time) {
                    warn!(symbol = %order.symbol, error = %e, "target skipped");
                    skipped.push(SkippedTarget {
                        time: order.time,
                        symbol: order.symbol.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

/// No RNG: UUIDv5 over the config hash and input sizes.
fn derive_run_id(config_hash: &str, prices: usize, orders: usize) -> Uuid {
    let data = format!("mdk-backtest.run.v1|{config_hash}|{prices}|{orders}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, data.as_bytes())
}
