//! ICO analyzer — entry point.
//!
//! Serves a small Axum REST API. Each `POST /analyze` runs the settlement
//! saga for one paid order: the offering's claimed figures are reconciled
//! against chain and market data, then the order is either captured (with
//! the findings written to the caller's passport) or refunded.

mod api;
mod config;
mod db;
mod errors;
mod explorer;
mod ledger;
mod rates;
mod rating;
mod reconcile;
mod rpc;
mod saga;
mod sources;
mod types;
mod waiter;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use explorer::EtherscanClient;
use rates::ChartDataClient;
use rating::RatingSiteClient;
use reconcile::Reconciler;
use rpc::RpcLedger;
use saga::{SagaConfig, SettlementSaga};
use sources::DataSources;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // SQLite pool for the settlement journal.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared by every outbound adapter.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    // ─── Data sources and ledger ──────────────────────────
    let sources = DataSources {
        rating: Arc::new(RatingSiteClient::new(
            client.clone(),
            config.rating_site_url.clone(),
        )),
        rates: Arc::new(ChartDataClient::new(
            client.clone(),
            config.rate_feed_url.clone(),
        )),
        explorer: Arc::new(EtherscanClient::new(
            client.clone(),
            config.explorer_api_url.clone(),
            config.explorer_api_key.clone(),
        )),
    };
    let ledger = Arc::new(RpcLedger::new(client, &config));

    let saga = SettlementSaga::new(
        ledger,
        Reconciler::new(sources),
        SagaConfig {
            poll_interval: config.poll_interval(),
        },
    )
    .with_journal(pool);

    // ─── REST API ─────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let api_state = Arc::new(api::ApiState {
        saga: Arc::new(saga),
        saga_timeout: config.saga_timeout(),
        shutdown: shutdown.clone(),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/analyze", post(api::analyze))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down; cancelling in-flight settlements");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
