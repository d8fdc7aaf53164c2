//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{AnalyzerError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Ledger node JSON-RPC endpoint, used for transaction receipts
    pub ledger_rpc_url: String,
    /// Contract gateway JSON-RPC endpoint (processor and passport calls)
    pub contract_gateway_url: String,
    /// Account that signs every processor and passport call
    pub merchant_address: String,
    /// Payment processor contract address
    pub payment_processor_address: String,
    /// Path to the SQLite database file holding the saga journal
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Seconds between receipt polls while waiting for a confirmation
    pub confirmation_poll_secs: u64,
    /// Upper bound on one settlement, after which it is cancelled
    pub saga_timeout_secs: u64,
    /// Etherscan-compatible explorer API base URL
    pub explorer_api_url: String,
    pub explorer_api_key: String,
    /// Chart-data endpoint for the settlement asset's rate
    pub rate_feed_url: String,
    /// Rating site base URL; the offering name is appended as a path segment
    pub rating_site_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            ledger_rpc_url: env_var("LEDGER_RPC_URL")
                .unwrap_or_else(|_| "http://localhost:8545".to_string()),
            contract_gateway_url: env_var("CONTRACT_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8546".to_string()),
            merchant_address: env_var("MERCHANT_ADDRESS").map_err(|_| {
                AnalyzerError::Config("MERCHANT_ADDRESS environment variable is required".to_string())
            })?,
            payment_processor_address: env_var("PAYMENT_PROCESSOR_ADDRESS").map_err(|_| {
                AnalyzerError::Config(
                    "PAYMENT_PROCESSOR_ADDRESS environment variable is required".to_string(),
                )
            })?,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./ico_analyzer.db?mode=rwc".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| AnalyzerError::Config("Invalid API_PORT".to_string()))?,
            confirmation_poll_secs: env_var("CONFIRMATION_POLL_SECS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map_err(|_| AnalyzerError::Config("Invalid CONFIRMATION_POLL_SECS".to_string()))?,
            saga_timeout_secs: env_var("SAGA_TIMEOUT_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .map_err(|_| AnalyzerError::Config("Invalid SAGA_TIMEOUT_SECS".to_string()))?,
            explorer_api_url: env_var("EXPLORER_API_URL")
                .unwrap_or_else(|_| "https://api.etherscan.io/api".to_string()),
            explorer_api_key: env_var("EXPLORER_API_KEY")
                .unwrap_or_else(|_| "YourApiKeyToken".to_string()),
            rate_feed_url: env_var("RATE_FEED_URL")
                .unwrap_or_else(|_| "https://poloniex.com/public".to_string()),
            rating_site_url: env_var("RATING_SITE_URL")
                .unwrap_or_else(|_| "https://icorating.com/ico".to_string()),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.confirmation_poll_secs)
    }

    pub fn saga_timeout(&self) -> Duration {
        Duration::from_secs(self.saga_timeout_secs)
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AnalyzerError::Config(format!("Missing env var: {key}")))
}
