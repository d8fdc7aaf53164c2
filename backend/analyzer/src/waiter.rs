//! Blocks until a submitted transaction is final, fails, or the caller
//! cancels.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{AnalyzerError, Result};
use crate::ledger::{LedgerGateway, ReceiptStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Poll for `tx_hash`'s receipt every `interval` until it lands.
///
/// A missing receipt is retried indefinitely; a failed receipt or a
/// gateway error is terminal. Only `cancel` bounds the wait, and it
/// interrupts a receipt read that is still in flight.
pub async fn wait_for_confirmation(
    ledger: &dyn LedgerGateway,
    tx_hash: &str,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    info!("Waiting for transaction {tx_hash}");
    let mut polls = 0u64;
    loop {
        let poll = async {
            tokio::time::sleep(interval).await;
            ledger.receipt(tx_hash).await
        };
        let receipt = match cancellable(cancel, poll).await {
            Err(AnalyzerError::Cancelled) => {
                warn!("Wait for {tx_hash} cancelled after {polls} polls");
                return Err(AnalyzerError::Cancelled);
            }
            other => other?,
        };

        polls += 1;
        match receipt {
            None => {
                debug!("Transaction {tx_hash} not yet visible (poll {polls})");
            }
            Some(receipt) if receipt.status == ReceiptStatus::Success => {
                info!(
                    "Transaction {tx_hash} confirmed in block {:?}",
                    receipt.block_number
                );
                return Ok(());
            }
            Some(_) => {
                return Err(AnalyzerError::TransactionFailed(tx_hash.to_string()));
            }
        }
    }
}

/// Run `fut` unless `cancel` fires first; an in-flight call is dropped.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AnalyzerError::Cancelled),
        result = fut => result,
    }
}

/// Child of `parent` that is additionally cancelled once `timeout` elapses.
pub fn deadline_token(parent: &CancellationToken, timeout: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(timeout) => timer.cancel(),
        }
    });
    token
}
