//! Ledger gateway: the payment-processor contract and passport record as
//! the saga sees them.

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::OrderState;

/// Gas limit for every payment-processor call.
pub const PROCESSING_GAS_LIMIT: u64 = 100_000;

/// Reason string attached to refunds issued after a failed analysis.
pub const REFUND_REASON: &str = "error";

/// A mutating payment-processor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorCall {
    /// Capture the payment for a settled order.
    ProcessPayment { order_id: i64 },
    /// Mark the order refunded.
    RefundPayment { order_id: i64, reason: String },
    /// Release a confirmed refund to the payer.
    WithdrawRefund { order_id: i64 },
}

impl ProcessorCall {
    pub fn method(&self) -> &'static str {
        match self {
            Self::ProcessPayment { .. } => "processPayment",
            Self::RefundPayment { .. } => "refundPayment",
            Self::WithdrawRefund { .. } => "withdrawRefund",
        }
    }

    pub fn order_id(&self) -> i64 {
        match self {
            Self::ProcessPayment { order_id }
            | Self::RefundPayment { order_id, .. }
            | Self::WithdrawRefund { order_id } => *order_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: String,
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Submit a processor call. Returns the transaction hash.
    async fn submit_call(&self, call: &ProcessorCall, gas_limit: u64) -> Result<String>;

    /// Write `payload` to the passport's key-value slot `key`.
    async fn write_record(&self, passport: &str, key: [u8; 32], payload: &[u8]) -> Result<String>;

    /// `Ok(None)` while the transaction is not yet visible.
    async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>>;

    async fn order_state(&self, order_id: i64) -> Result<OrderState>;
}
