//! Application-wide error types.

use thiserror::Error;

use crate::types::OrderState;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date {value:?}: expected DD Mon YYYY")]
    InvalidDate { value: String },

    #[error("Invalid number in {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown offering: {0}")]
    UnknownOffering(String),

    #[error("Data source error: {0}")]
    Adapter(String),

    #[error("Order {0} does not exist")]
    OrderNotFound(i64),

    #[error("Order {order_id} is not in paid state (found {state:?})")]
    OrderNotPaid { order_id: i64, state: OrderState },

    #[error("Order {0} has a confirmed refund that was never withdrawn")]
    RefundPendingWithdrawal(i64),

    #[error("Transaction submission failed: {0}")]
    Submission(String),

    #[error("Transaction {0} failed on chain")]
    TransactionFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl AnalyzerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
