//! Settlement saga for one paid analysis order.
//!
//! ```text
//! Verifying ──► Analyzing ──► Committing ──► Settled
//!     │             │            (passport, then capture)
//!     ▼             └──► Compensating ──► Refunded
//!   Failed               (refund, then withdraw)
//! ```
//!
//! Every mutating ledger call is confirmed before the next one is issued,
//! and nothing is submitted once the cancellation token has fired.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::{self, SagaStep};
use crate::errors::{AnalyzerError, Result};
use crate::ledger::{LedgerGateway, ProcessorCall, PROCESSING_GAS_LIMIT, REFUND_REASON};
use crate::reconcile::{Prior, Reconciler};
use crate::types::{passport_key, AnalysisRequest, IcoMetadata, OrderState, PassportRecord};
use crate::waiter::{self, DEFAULT_POLL_INTERVAL};

#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Interval between receipt polls while waiting for confirmation.
    pub poll_interval: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStage {
    Verifying,
    Analyzing,
    Committing,
    Compensating,
}

/// Where a failed settlement stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The order could not be verified as paid. Nothing was submitted.
    Precondition,
    /// Passport write or capture failed. No compensation is attempted.
    Commit,
    /// The refund call failed.
    Refund,
    /// The refund is confirmed but its withdrawal failed.
    Withdraw,
    /// A wait was cancelled. Nothing further was submitted.
    Cancelled,
}

#[derive(Debug, Error)]
#[error("settlement of order {order_id} failed ({kind:?}): {source}")]
pub struct SagaFailure {
    pub order_id: i64,
    pub kind: FailureKind,
    #[source]
    pub source: AnalyzerError,
}

#[derive(Debug, Clone)]
pub enum SagaOutcome {
    Settled {
        passport_tx: String,
        capture_tx: String,
        record: Box<PassportRecord>,
    },
    Refunded {
        refund_tx: String,
        withdraw_tx: String,
        reason: String,
    },
}

pub struct SettlementSaga {
    ledger: Arc<dyn LedgerGateway>,
    reconciler: Reconciler,
    journal: Option<SqlitePool>,
    config: SagaConfig,
}

impl SettlementSaga {
    pub fn new(ledger: Arc<dyn LedgerGateway>, reconciler: Reconciler, config: SagaConfig) -> Self {
        Self {
            ledger,
            reconciler,
            journal: None,
            config,
        }
    }

    pub fn with_journal(mut self, pool: SqlitePool) -> Self {
        self.journal = Some(pool);
        self
    }

    /// Settle one order end to end.
    pub async fn run(
        &self,
        request: AnalysisRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<SagaOutcome, SagaFailure> {
        let AnalysisRequest {
            mut metadata,
            ico_info,
            calculated_data,
        } = request;
        let order_id = metadata.order_id;

        self.enter(order_id, SagaStage::Verifying);
        self.verify(&metadata, cancel)
            .await
            .map_err(|e| failure(order_id, FailureKind::Precondition, e))?;

        self.enter(order_id, SagaStage::Analyzing);
        let prior = ico_info.map(|rating| Prior {
            rating,
            calculated: calculated_data.unwrap_or_default(),
        });
        let analysis = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(failure(order_id, FailureKind::Cancelled, AnalyzerError::Cancelled));
            }
            analysis = self.reconciler.reconcile(&mut metadata, prior) => analysis,
        };

        match analysis {
            Ok((result, rating)) if result.passed() => {
                self.enter(order_id, SagaStage::Committing);
                let record = PassportRecord {
                    metadata,
                    ico_info: rating,
                    calculated_data: result,
                };
                self.commit(record, cancel)
                    .await
                    .map_err(|e| failure(order_id, FailureKind::Commit, e))
            }
            Ok(_) => {
                warn!(order_id, "Reconciliation checks failed; refunding");
                self.enter(order_id, SagaStage::Compensating);
                self.compensate(order_id, "reconciliation checks failed".to_string(), cancel)
                    .await
            }
            Err(e) => {
                warn!(order_id, "Reconciliation aborted: {e}; refunding");
                self.enter(order_id, SagaStage::Compensating);
                self.compensate(order_id, e.to_string(), cancel).await
            }
        }
    }

    /// Confirm the inbound payment, then require the order to be paid.
    async fn verify(&self, metadata: &IcoMetadata, cancel: &CancellationToken) -> Result<()> {
        if metadata.tx_hash.is_empty() {
            return Err(AnalyzerError::InvalidInput("txHash is required".to_string()));
        }
        if metadata.passport_address.is_empty() {
            return Err(AnalyzerError::InvalidInput(
                "passportAddress is required".to_string(),
            ));
        }
        let order_id = metadata.order_id;

        self.confirm(&metadata.tx_hash, cancel).await?;

        match waiter::cancellable(cancel, self.ledger.order_state(order_id)).await? {
            OrderState::Paid => {
                self.journal(order_id, SagaStep::PaymentVerified, &metadata.tx_hash)
                    .await;
                Ok(())
            }
            OrderState::Null => Err(AnalyzerError::OrderNotFound(order_id)),
            state => {
                if self.refund_left_unwithdrawn(order_id).await {
                    return Err(AnalyzerError::RefundPendingWithdrawal(order_id));
                }
                Err(AnalyzerError::OrderNotPaid { order_id, state })
            }
        }
    }

    /// Write the passport, then capture the payment.
    async fn commit(
        &self,
        record: PassportRecord,
        cancel: &CancellationToken,
    ) -> Result<SagaOutcome> {
        let order_id = record.metadata.order_id;
        let payload = record.to_bytes()?;

        ensure_live(cancel)?;
        let passport_tx = self
            .ledger
            .write_record(&record.metadata.passport_address, passport_key(), &payload)
            .await?;
        info!(order_id, %passport_tx, "Passport write submitted ({} bytes)", payload.len());
        self.confirm(&passport_tx, cancel).await?;
        self.journal(order_id, SagaStep::PassportWritten, &passport_tx)
            .await;

        let capture_tx = self
            .submit(ProcessorCall::ProcessPayment { order_id }, cancel)
            .await?;
        self.confirm(&capture_tx, cancel).await?;
        self.journal(order_id, SagaStep::PaymentCaptured, &capture_tx)
            .await;

        info!(order_id, %passport_tx, %capture_tx, "Order settled");
        Ok(SagaOutcome::Settled {
            passport_tx,
            capture_tx,
            record: Box::new(record),
        })
    }

    /// Refund, then release the refund to the payer.
    async fn compensate(
        &self,
        order_id: i64,
        reason: String,
        cancel: &CancellationToken,
    ) -> std::result::Result<SagaOutcome, SagaFailure> {
        let refund = ProcessorCall::RefundPayment {
            order_id,
            reason: REFUND_REASON.to_string(),
        };
        let refund_tx = async {
            let tx = self.submit(refund, cancel).await?;
            self.confirm(&tx, cancel).await?;
            Ok::<_, AnalyzerError>(tx)
        }
        .await
        .map_err(|e| failure(order_id, FailureKind::Refund, e))?;
        self.journal(order_id, SagaStep::RefundConfirmed, &refund_tx)
            .await;

        let withdraw_tx = async {
            let tx = self
                .submit(ProcessorCall::WithdrawRefund { order_id }, cancel)
                .await?;
            self.confirm(&tx, cancel).await?;
            Ok::<_, AnalyzerError>(tx)
        }
        .await
        .map_err(|e| failure(order_id, FailureKind::Withdraw, e))?;
        self.journal(order_id, SagaStep::RefundWithdrawn, &withdraw_tx)
            .await;

        info!(order_id, %refund_tx, %withdraw_tx, "Order refunded");
        Ok(SagaOutcome::Refunded {
            refund_tx,
            withdraw_tx,
            reason,
        })
    }

    async fn submit(&self, call: ProcessorCall, cancel: &CancellationToken) -> Result<String> {
        ensure_live(cancel)?;
        let tx = self
            .ledger
            .submit_call(&call, PROCESSING_GAS_LIMIT)
            .await?;
        info!(order_id = call.order_id(), %tx, "{} submitted", call.method());
        Ok(tx)
    }

    async fn confirm(&self, tx_hash: &str, cancel: &CancellationToken) -> Result<()> {
        waiter::wait_for_confirmation(
            self.ledger.as_ref(),
            tx_hash,
            self.config.poll_interval,
            cancel,
        )
        .await
    }

    /// Journal reads never fail the settlement; an unreadable journal counts
    /// as no pending refund.
    async fn refund_left_unwithdrawn(&self, order_id: i64) -> bool {
        let Some(pool) = &self.journal else {
            return false;
        };
        match db::last_step(pool, order_id).await {
            Ok(entry) => matches!(entry, Some(e) if e.step == SagaStep::RefundConfirmed),
            Err(e) => {
                error!(order_id, "Failed to read journal: {e}");
                false
            }
        }
    }

    /// Journal writes never fail the settlement; the ledger stays authoritative.
    async fn journal(&self, order_id: i64, step: SagaStep, tx_hash: &str) {
        if let Some(pool) = &self.journal {
            if let Err(e) = db::record_step(pool, order_id, step, Some(tx_hash)).await {
                error!(order_id, "Failed to journal {}: {e}", step.as_str());
            }
        }
    }

    fn enter(&self, order_id: i64, stage: SagaStage) {
        info!(order_id, ?stage, "Settlement stage");
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AnalyzerError::Cancelled);
    }
    Ok(())
}

fn failure(order_id: i64, kind: FailureKind, source: AnalyzerError) -> SagaFailure {
    let kind = if source.is_cancelled() {
        FailureKind::Cancelled
    } else {
        kind
    };
    error!(order_id, ?kind, "Settlement failed: {source}");
    SagaFailure {
        order_id,
        kind,
        source,
    }
}
