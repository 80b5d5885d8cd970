use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mdk_portfolio::{Account, PortfolioError, SubmitOrderRequest, Symbol};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;

/// Tag carried by orders generated from portfolio targets.
pub const SET_HOLDINGS_TAG: &str = "Set Holdings";

/// Desired share of total portfolio value for one security. Negative is
/// short.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortfolioTarget {
    pub symbol: Symbol,
    pub target: Decimal,
}

impl PortfolioTarget {
    pub fn new<S: Into<Symbol>>(symbol: S, target: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            target,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetOrders {
    pub requests: Vec<SubmitOrderRequest>,
    /// Targets the solver could not size, with its reason.
    pub skipped: Vec<(Symbol, String)>,
}

/// Convert portfolio targets into market orders sized by each security's
/// buying power model.
///
/// Rules:
/// - Duplicate targets: last one wins
/// - `liquidate_others`: invested securities without a target go to zero
/// - Orders that shrink a position come first so they free margin before
///   the increases are sent; ties keep symbol order
/// - No broker calls; the account is only read
pub fn targets_to_order_requests(
    account: &Account,
    targets: &[PortfolioTarget],
    liquidate_others: bool,
    time: DateTime<Utc>,
) -> Result<TargetOrders, PortfolioError> {
    let mut wanted: BTreeMap<Symbol, Decimal> = BTreeMap::new();
    for t in targets {
        wanted.insert(t.symbol.clone(), t.target);
    }
    if liquidate_others {
        for (security, _) in account.view().invested() {
            wanted
                .entry(security.symbol().clone())
                .or_insert(Decimal::ZERO);
        }
    }

    let mut out = TargetOrders::default();
    let mut reducing = Vec::new();
    let mut increasing = Vec::new();
    for (symbol, target) in wanted {
        let sized = account.maximum_order_quantity_for_target_buying_power(&symbol, target, true)?;
        if sized.is_error {
            out.skipped
                .push((symbol, sized.reason.unwrap_or_default()));
            continue;
        }
        if sized.quantity.is_zero() {
            continue;
        }
        let held = account.holding_quantity(&symbol);
        let reduces = !held.is_zero() && held.signum() != sized.quantity.signum();
        let request = SubmitOrderRequest::market(symbol, sized.quantity, time)
            .with_tag(SET_HOLDINGS_TAG);
        if reduces {
            reducing.push(request);
        } else {
            increasing.push(request);
        }
    }
    out.requests = reducing;
    out.requests.extend(increasing);
    Ok(out)
}
