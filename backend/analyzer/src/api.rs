//! Axum REST API handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::saga::{SagaFailure, SagaOutcome, SettlementSaga};
use crate::types::AnalysisRequest;
use crate::waiter::deadline_token;

#[derive(Clone)]
pub struct ApiState {
    pub saga: Arc<SettlementSaga>,
    /// Upper bound on one settlement.
    pub saga_timeout: Duration,
    /// Cancelled on shutdown; every in-flight settlement derives from it.
    pub shutdown: CancellationToken,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub status: &'static str,
    pub order_id: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passport_tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdraw_tx: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /analyze`
///
/// Runs the settlement saga for the order in the request body and reports
/// whether it was settled or refunded.
pub async fn analyze(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejection_response(rejection),
    };
    let order_id = request.metadata.order_id;
    let token_address = request.metadata.token_contract_address.clone();
    let payment_tx = request.metadata.tx_hash.clone();
    info!(order_id, "Analysis requested for token {token_address}");

    let cancel = deadline_token(&state.shutdown, state.saga_timeout);
    let result = state.saga.run(request, &cancel).await;
    // Stops the deadline timer.
    cancel.cancel();

    match result {
        Ok(outcome) => outcome_response(order_id, &token_address, &payment_tx, outcome),
        Err(failure) => failure_response(failure),
    }
}

fn rejection_response(rejection: JsonRejection) -> Response {
    let status = match rejection {
        JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    warn!("Rejected analysis request: {}", rejection.body_text());
    (
        status,
        Json(ErrorResponse {
            error: rejection.body_text(),
        }),
    )
        .into_response()
}

fn outcome_response(
    order_id: i64,
    token_address: &str,
    payment_tx: &str,
    outcome: SagaOutcome,
) -> Response {
    let body = match outcome {
        SagaOutcome::Settled {
            passport_tx,
            capture_tx,
            ..
        } => AnalyzeResponse {
            status: "SETTLED",
            order_id,
            message: format!(
                "ICO analysis successfully done for token address : {token_address} \
                 for which payment is done by txn : {payment_tx}"
            ),
            passport_tx: Some(passport_tx),
            capture_tx: Some(capture_tx),
            refund_tx: None,
            withdraw_tx: None,
        },
        SagaOutcome::Refunded {
            refund_tx,
            withdraw_tx,
            reason,
        } => AnalyzeResponse {
            status: "REFUNDED",
            order_id,
            message: format!("ICO analysis for token address : {token_address} was refunded: {reason}"),
            passport_tx: None,
            capture_tx: None,
            refund_tx: Some(refund_tx),
            withdraw_tx: Some(withdraw_tx),
        },
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn failure_response(failure: SagaFailure) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: failure.to_string(),
        }),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
