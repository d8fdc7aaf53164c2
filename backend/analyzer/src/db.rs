//! Database layer: migrations and the settlement journal.
//!
//! The journal keeps one row per order holding the last step whose
//! transaction was confirmed, so an interrupted settlement can be told
//! apart from one that never started.

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::{AnalyzerError, Result};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Every connection to an in-memory database gets its own copy.
    let options = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = options.connect(&url).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// A settlement step whose transaction has been confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    PaymentVerified,
    PassportWritten,
    PaymentCaptured,
    RefundConfirmed,
    RefundWithdrawn,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentVerified => "payment_verified",
            Self::PassportWritten => "passport_written",
            Self::PaymentCaptured => "payment_captured",
            Self::RefundConfirmed => "refund_confirmed",
            Self::RefundWithdrawn => "refund_withdrawn",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "payment_verified" => Ok(Self::PaymentVerified),
            "passport_written" => Ok(Self::PassportWritten),
            "payment_captured" => Ok(Self::PaymentCaptured),
            "refund_confirmed" => Ok(Self::RefundConfirmed),
            "refund_withdrawn" => Ok(Self::RefundWithdrawn),
            other => Err(AnalyzerError::Database(sqlx::Error::Decode(
                format!("unknown journal step {other:?}").into(),
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub order_id: i64,
    pub step: SagaStep,
    pub tx_hash: Option<String>,
}

/// Record `step` as the order's last confirmed step.
pub async fn record_step(
    pool: &SqlitePool,
    order_id: i64,
    step: SagaStep,
    tx_hash: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO saga_journal (order_id, last_step, tx_hash, updated_at)
        VALUES (?1, ?2, ?3, strftime('%s', 'now'))
        ON CONFLICT(order_id) DO UPDATE SET
            last_step  = excluded.last_step,
            tx_hash    = excluded.tx_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(order_id)
    .bind(step.as_str())
    .bind(tx_hash)
    .execute(pool)
    .await?;
    Ok(())
}

/// Read back the order's last confirmed step, if any.
pub async fn last_step(pool: &SqlitePool, order_id: i64) -> Result<Option<JournalEntry>> {
    let row: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT last_step, tx_hash FROM saga_journal WHERE order_id = ?1")
            .bind(order_id)
            .fetch_optional(pool)
            .await?;
    row.map(|(step, tx_hash)| {
        Ok(JournalEntry {
            order_id,
            step: SagaStep::parse(&step)?,
            tx_hash,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn journal_keeps_latest_step_per_order() {
        let pool = init_pool("sqlite::memory:").await.unwrap();

        assert_eq!(last_step(&pool, 7).await.unwrap(), None);

        record_step(&pool, 7, SagaStep::PaymentVerified, Some("0xpay"))
            .await
            .unwrap();
        record_step(&pool, 7, SagaStep::RefundConfirmed, Some("0xrefund"))
            .await
            .unwrap();
        record_step(&pool, 8, SagaStep::PassportWritten, None)
            .await
            .unwrap();

        let entry = last_step(&pool, 7).await.unwrap().unwrap();
        assert_eq!(entry.step, SagaStep::RefundConfirmed);
        assert_eq!(entry.tx_hash.as_deref(), Some("0xrefund"));
        assert_eq!(
            last_step(&pool, 8).await.unwrap().unwrap().step,
            SagaStep::PassportWritten
        );
    }

    #[test]
    fn step_names_round_trip() {
        for step in [
            SagaStep::PaymentVerified,
            SagaStep::PassportWritten,
            SagaStep::PaymentCaptured,
            SagaStep::RefundConfirmed,
            SagaStep::RefundWithdrawn,
        ] {
            assert_eq!(SagaStep::parse(step.as_str()).unwrap(), step);
        }
        assert!(SagaStep::parse("bogus").is_err());
    }
}
