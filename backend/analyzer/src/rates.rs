//! Chart-data client for the settlement asset's rate.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::errors::{AnalyzerError, Result};
use crate::sources::{RateSample, RateSource};

const CURRENCY_PAIR: &str = "USDT_ETH";
/// Two-hour candles.
const PERIOD_SECS: u32 = 7_200;

pub struct ChartDataClient {
    client: Client,
    base_url: String,
}

impl ChartDataClient {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl RateSource for ChartDataClient {
    async fn samples(&self, start: i64, end: i64) -> Result<Vec<RateSample>> {
        debug!("Fetching {CURRENCY_PAIR} chart data {start}..{end}");
        let body: Value = self
            .client
            .get(&self.base_url)
            .query(&[
                ("command", "returnChartData".to_string()),
                ("currencyPair", CURRENCY_PAIR.to_string()),
                ("start", start.to_string()),
                ("end", end.to_string()),
                ("period", PERIOD_SECS.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        decode_samples(body)
    }
}

/// The feed answers `{"error": "..."}` instead of an array on bad input.
fn decode_samples(body: Value) -> Result<Vec<RateSample>> {
    if let Some(reason) = body.get("error").and_then(Value::as_str) {
        return Err(AnalyzerError::Adapter(format!("rate feed: {reason}")));
    }
    Ok(serde_json::from_value(body)?)
}
