use mdk_portfolio::PortfolioError;

use crate::ticket::TicketTransitionError;

/// Errors from event intake and cancellation.
///
/// Rejected submissions are not errors: they come back as `Invalid`
/// tickets carrying the reason.
#[derive(Debug)]
pub enum TransactionError {
    UnknownOrder { order_id: u64 },
    Transition(TicketTransitionError),
    Portfolio(PortfolioError),
    Brokerage { order_id: u64, message: String },
}

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOrder { order_id } => write!(f, "unknown order id {order_id}"),
            Self::Transition(e) => write!(f, "{e}"),
            Self::Portfolio(e) => write!(f, "portfolio rejected event: {e}"),
            Self::Brokerage { order_id, message } => {
                write!(f, "brokerage error for order {order_id}: {message}")
            }
        }
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transition(e) => Some(e),
            Self::Portfolio(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TicketTransitionError> for TransactionError {
    fn from(e: TicketTransitionError) -> Self {
        Self::Transition(e)
    }
}

impl From<PortfolioError> for TransactionError {
    fn from(e: PortfolioError) -> Self {
        Self::Portfolio(e)
    }
}
