//! JSON-RPC ledger gateway.
//!
//! Receipts come straight from the node (`eth_getTransactionReceipt`).
//! Contract interaction goes through the contract gateway, which holds the
//! processor and passport bindings and signs on behalf of the merchant
//! account.
//!
//! ## Resilience
//!
//! * Reads (receipts, order state) back off exponentially on transport
//!   errors, rate limiting and soft RPC errors, up to [`MAX_READ_ATTEMPTS`].
//! * Submissions are sent exactly once. A failed submission is reported,
//!   never re-sent, so a call cannot land twice.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::{AnalyzerError, Result};
use crate::ledger::{LedgerGateway, ProcessorCall, Receipt, ReceiptStatus};
use crate::types::OrderState;

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_READ_ATTEMPTS: u32 = 5;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RawReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
}

pub struct RpcLedger {
    client: Client,
    node_url: String,
    gateway_url: String,
    merchant: String,
    processor: String,
}

impl RpcLedger {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            node_url: config.ledger_rpc_url.clone(),
            gateway_url: config.contract_gateway_url.clone(),
            merchant: config.merchant_address.clone(),
            processor: config.payment_processor_address.clone(),
        }
    }

    /// One request, no retry.
    async fn send(&self, url: &str, method: &str, params: Value) -> Result<Option<Value>> {
        let body: RpcResponse = self
            .client
            .post(url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = body.error {
            return Err(AnalyzerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result)
    }

    async fn read(&self, url: &str, method: &str, params: Value) -> Result<Option<Value>> {
        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 1;

        loop {
            match self.send(url, method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(AnalyzerError::Rpc { code, message }) if is_hard_error(code) => {
                    return Err(AnalyzerError::Rpc { code, message });
                }
                Err(e) if attempt < MAX_READ_ATTEMPTS => {
                    warn!("{method} failed (attempt {attempt}, retry in {backoff}s): {e}");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn submit(&self, method: &str, params: Value) -> Result<String> {
        let result = self
            .send(&self.gateway_url, method, params)
            .await
            .map_err(|e| AnalyzerError::Submission(format!("{method}: {e}")))?;
        let hash = result
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| AnalyzerError::Submission(format!("{method}: no transaction hash")))?;
        debug!("{method} accepted as {hash}");
        Ok(hash.to_string())
    }
}

#[async_trait]
impl LedgerGateway for RpcLedger {
    async fn submit_call(&self, call: &ProcessorCall, gas_limit: u64) -> Result<String> {
        let params = processor_params(&self.merchant, &self.processor, call, gas_limit);
        self.submit(&format!("processor_{}", call.method()), params)
            .await
    }

    async fn write_record(&self, passport: &str, key: [u8; 32], payload: &[u8]) -> Result<String> {
        let params = json!([{
            "from": self.merchant,
            "to": passport,
            "key": format!("0x{}", hex::encode(key)),
            "data": format!("0x{}", hex::encode(payload)),
        }]);
        self.submit("passport_writeTxData", params).await
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        match self
            .read(&self.node_url, "eth_getTransactionReceipt", json!([tx_hash]))
            .await?
        {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => parse_receipt(tx_hash, serde_json::from_value(raw)?).map(Some),
        }
    }

    async fn order_state(&self, order_id: i64) -> Result<OrderState> {
        let result = self
            .read(
                &self.gateway_url,
                "processor_orderState",
                json!([{ "to": self.processor, "orderId": order_id }]),
            )
            .await?
            .ok_or_else(|| AnalyzerError::Adapter("empty orderState result".to_string()))?;
        let code = match &result {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => parse_quantity(s).ok(),
            _ => None,
        }
        .and_then(|c| u8::try_from(c).ok())
        .ok_or_else(|| AnalyzerError::Adapter(format!("unexpected order state {result}")))?;
        OrderState::from_code(code)
    }
}

/// -32600 / -32601 / -32602 cannot succeed on retry.
fn is_hard_error(code: i64) -> bool {
    matches!(code, -32600 | -32601 | -32602)
}

/// Fee parameters are always zero; the gas limit is fixed by the caller.
fn processor_params(merchant: &str, processor: &str, call: &ProcessorCall, gas_limit: u64) -> Value {
    let args = match call {
        ProcessorCall::ProcessPayment { order_id } => json!([order_id, 0, 0, "0"]),
        ProcessorCall::RefundPayment { order_id, reason } => json!([order_id, 0, 0, "0", reason]),
        ProcessorCall::WithdrawRefund { order_id } => json!([order_id]),
    };
    json!([{
        "from": merchant,
        "to": processor,
        "gas": format!("0x{gas_limit:x}"),
        "method": call.method(),
        "args": args,
    }])
}

fn parse_receipt(tx_hash: &str, raw: RawReceipt) -> Result<Receipt> {
    let status = match raw.status.as_deref().map(parse_quantity).transpose()? {
        Some(1) => ReceiptStatus::Success,
        Some(_) => ReceiptStatus::Failed,
        None => {
            return Err(AnalyzerError::Adapter(format!(
                "receipt for {tx_hash} has no status"
            )))
        }
    };
    Ok(Receipt {
        tx_hash: raw.transaction_hash.unwrap_or_else(|| tx_hash.to_string()),
        status,
        block_number: raw.block_number.as_deref().map(parse_quantity).transpose()?,
    })
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|_| AnalyzerError::InvalidNumber {
        field: "quantity",
        value: s.to_string(),
    })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
