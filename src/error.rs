use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every failure the pipeline can surface.
///
/// Variants map one-to-one onto [`ErrorKind`], which is what callers match on
/// when they need to branch programmatically instead of reading the message.
#[derive(Error, Debug)]
pub enum TradeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0} is not configured")]
    Unconfigured(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Current price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("Signal {0} is already executed")]
    AlreadyExecuted(String),

    #[error("Position {0} is not open")]
    NotOpen(String),

    #[error("No available {0} balance")]
    NoBalance(String),

    #[error("Trade quantity {quantity:.8} is less than the minimum allowed {min_quantity:.8} for {symbol}")]
    BelowMinimumQuantity {
        symbol: String,
        quantity: f64,
        min_quantity: f64,
    },

    #[error("Insufficient margin: required {required:.2}, available {available:.2}")]
    InsufficientMargin { required: f64, available: f64 },

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("No open position found on the exchange for {0}")]
    NoOpenPosition(String),

    #[error("Failed to close position: {0}")]
    CloseOrderFailed(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Entry order filled but ledger is incomplete for position {position_id} ({transaction_id}): {reason}")]
    PartialExecution {
        position_id: String,
        transaction_id: String,
        reason: String,
    },

    #[error("Exchange position closed (order {order_id} at {close_price}) but ledger still shows position {position_id} open: {reason}")]
    PartialClose {
        position_id: String,
        order_id: String,
        close_price: f64,
        reason: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Flat, serializable classification of [`TradeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InputValidation,
    NotFound,
    Unconfigured,
    UpstreamError,
    Timeout,
    PriceUnavailable,
    AlreadyExecuted,
    NotOpen,
    NoBalance,
    BelowMinimumQuantity,
    InsufficientMargin,
    OrderRejected,
    NoOpenPosition,
    CloseOrderFailed,
    MalformedOutput,
    PartialExecution,
    PartialClose,
    PersistenceError,
}

impl TradeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TradeError::InvalidInput(_) => ErrorKind::InputValidation,
            TradeError::NotFound(_) => ErrorKind::NotFound,
            TradeError::Unconfigured(_) => ErrorKind::Unconfigured,
            TradeError::Upstream(_) => ErrorKind::UpstreamError,
            TradeError::Timeout(_) => ErrorKind::Timeout,
            TradeError::PriceUnavailable(_) => ErrorKind::PriceUnavailable,
            TradeError::AlreadyExecuted(_) => ErrorKind::AlreadyExecuted,
            TradeError::NotOpen(_) => ErrorKind::NotOpen,
            TradeError::NoBalance(_) => ErrorKind::NoBalance,
            TradeError::BelowMinimumQuantity { .. } => ErrorKind::BelowMinimumQuantity,
            TradeError::InsufficientMargin { .. } => ErrorKind::InsufficientMargin,
            TradeError::OrderRejected(_) => ErrorKind::OrderRejected,
            TradeError::NoOpenPosition(_) => ErrorKind::NoOpenPosition,
            TradeError::CloseOrderFailed(_) => ErrorKind::CloseOrderFailed,
            TradeError::MalformedOutput(_) => ErrorKind::MalformedOutput,
            TradeError::PartialExecution { .. } => ErrorKind::PartialExecution,
            TradeError::PartialClose { .. } => ErrorKind::PartialClose,
            TradeError::Persistence(_) => ErrorKind::PersistenceError,
        }
    }

    /// True for failures of an external collaborator (network, timeout, bad payload).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            TradeError::Upstream(_) | TradeError::Timeout(_) | TradeError::MalformedOutput(_)
        )
    }
}

impl From<reqwest::Error> for TradeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TradeError::Timeout(e.to_string())
        } else {
            TradeError::Upstream(e.to_string())
        }
    }
}

impl From<sqlx::Error> for TradeError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => TradeError::NotFound("record".to_string()),
            other => TradeError::Persistence(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for TradeError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        TradeError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for TradeError {
    fn from(e: serde_json::Error) -> Self {
        TradeError::MalformedOutput(e.to_string())
    }
}
