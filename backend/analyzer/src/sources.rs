//! Boundary traits for the market and chain data sources.
//!
//! The reconciliation engine only sees these traits; the HTTP clients live
//! in [`crate::explorer`], [`crate::rates`] and [`crate::rating`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::{AnalyzerError, Result};
use crate::types::RatingSnapshot;

/// Page size for full account/token history walks.
pub const MAX_PAGE_SIZE: u32 = 10_000;
/// Page size for the single-page majority-vote lookups.
pub const VOTE_PAGE_SIZE: u32 = 200;

/// One account-level transaction (external or internal) from the explorer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountTx {
    #[serde(rename = "timeStamp")]
    pub time_stamp: String,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    #[serde(rename = "isError")]
    pub is_error: String,
}

impl AccountTx {
    pub fn errored(&self) -> bool {
        self.is_error == "1"
    }
}

/// One token transfer from the explorer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenTransfer {
    #[serde(rename = "timeStamp")]
    pub time_stamp: String,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
}

/// One periodic sample of the settlement asset's rate.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateSample {
    pub date: i64,
    #[serde(rename = "weightedAverage")]
    pub weighted_average: f64,
}

#[async_trait]
pub trait RatingSource: Send + Sync {
    /// Claimed figures for the named offering.
    async fn snapshot(&self, ico_name: &str) -> Result<RatingSnapshot>;
}

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Time-ordered samples covering `[start, end]` (unix seconds).
    async fn samples(&self, start: i64, end: i64) -> Result<Vec<RateSample>>;
}

#[async_trait]
pub trait ChainExplorer: Send + Sync {
    async fn external_txs(&self, address: &str, page: u32, page_size: u32) -> Result<Vec<AccountTx>>;

    async fn internal_txs(&self, address: &str, page: u32, page_size: u32) -> Result<Vec<AccountTx>>;

    /// Transfers of `token`, optionally restricted to those touching `holder`.
    async fn token_transfers(
        &self,
        token: &str,
        holder: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<TokenTransfer>>;

    /// Current balance in the smallest unit, as the explorer reports it.
    async fn balance(&self, address: &str) -> Result<String>;
}

/// The set of data sources one reconciliation run reads from.
#[derive(Clone)]
pub struct DataSources {
    pub rating: Arc<dyn RatingSource>,
    pub rates: Arc<dyn RateSource>,
    pub explorer: Arc<dyn ChainExplorer>,
}

pub fn parse_f64(field: &'static str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| AnalyzerError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

pub fn parse_i64(field: &'static str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| AnalyzerError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}
