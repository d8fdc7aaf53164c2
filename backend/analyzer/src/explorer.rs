//! Etherscan-compatible explorer client.
//!
//! Every endpoint answers with the same envelope: `status`, `message` and a
//! `result` that is either the payload or an error string. An empty history
//! is reported as `"No transactions found"` and maps to an empty page.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::{AnalyzerError, Result};
use crate::sources::{AccountTx, ChainExplorer, TokenTransfer};

const NO_TRANSACTIONS: &str = "No transactions found";

#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Value,
}

pub struct EtherscanClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl EtherscanClient {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    async fn fetch(&self, query: &[(&str, String)]) -> Result<Envelope> {
        let envelope = self
            .client
            .get(&self.base_url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope)
    }

    async fn account_list(
        &self,
        action: &str,
        address: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<AccountTx>> {
        debug!("Explorer {action} for {address}, page {page}");
        let envelope = self
            .fetch(&[
                ("module", "account".to_string()),
                ("action", action.to_string()),
                ("address", address.to_string()),
                ("startblock", "0".to_string()),
                ("endblock", "99999999".to_string()),
                ("page", page.to_string()),
                ("offset", page_size.to_string()),
                ("sort", "asc".to_string()),
            ])
            .await?;
        decode_list(envelope)
    }
}

#[async_trait]
impl ChainExplorer for EtherscanClient {
    async fn external_txs(&self, address: &str, page: u32, page_size: u32) -> Result<Vec<AccountTx>> {
        self.account_list("txlist", address, page, page_size).await
    }

    async fn internal_txs(&self, address: &str, page: u32, page_size: u32) -> Result<Vec<AccountTx>> {
        self.account_list("txlistinternal", address, page, page_size)
            .await
    }

    async fn token_transfers(
        &self,
        token: &str,
        holder: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<TokenTransfer>> {
        debug!("Explorer tokentx for {token}, page {page}");
        let mut query = vec![
            ("module", "account".to_string()),
            ("action", "tokentx".to_string()),
            ("contractaddress", token.to_string()),
            ("page", page.to_string()),
            ("offset", page_size.to_string()),
            ("sort", "asc".to_string()),
        ];
        if let Some(holder) = holder {
            query.push(("address", holder.to_string()));
        }
        decode_list(self.fetch(&query).await?)
    }

    async fn balance(&self, address: &str) -> Result<String> {
        let envelope = self
            .fetch(&[
                ("module", "account".to_string()),
                ("action", "balance".to_string()),
                ("address", address.to_string()),
                ("tag", "latest".to_string()),
            ])
            .await?;
        decode_balance(envelope)
    }
}

fn decode_list<T: DeserializeOwned>(envelope: Envelope) -> Result<Vec<T>> {
    if envelope.message == NO_TRANSACTIONS {
        return Ok(Vec::new());
    }
    match envelope.result {
        Value::Array(_) => Ok(serde_json::from_value(envelope.result)?),
        Value::String(reason) => Err(AnalyzerError::Adapter(format!(
            "explorer: {} ({reason})",
            envelope.message
        ))),
        other => Err(AnalyzerError::Adapter(format!(
            "explorer: unexpected result {other}"
        ))),
    }
}

fn decode_balance(envelope: Envelope) -> Result<String> {
    match (envelope.status.as_str(), envelope.result) {
        ("1", Value::String(balance)) => Ok(balance),
        (_, result) => Err(AnalyzerError::Adapter(format!(
            "explorer balance: {} ({result})",
            envelope.message
        ))),
    }
}
