//! Failed-attempt counters keyed by normalized account key.
//!
//! `increment` must be atomic per key. The Postgres store does it with a single
//! upsert; the in-memory store holds one lock across read-modify-write.
//!
//! [`CounterStore::record_failure`] also folds the threshold reset into the
//! same per-key step, so exactly one caller sees the count cross the threshold
//! and failures arriving right after it are counted toward the next cycle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;

/// One failure counted against a threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureCount {
    /// Count including this failure, before any reset.
    pub attempts: u32,
    /// The count reached the threshold and was stored back as 0.
    pub triggered: bool,
}

impl FailureCount {
    fn new(attempts: u32, threshold: u32) -> Self {
        Self {
            attempts,
            triggered: attempts >= threshold,
        }
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add one to the counter (absent counts as 0) and return the new value.
    async fn increment(&self, key: &str) -> Result<u32>;

    /// Set the counter back to 0.
    async fn reset(&self, key: &str) -> Result<()>;

    /// Increment and, if the new count reaches `threshold`, reset to 0 in the
    /// same atomic step.
    async fn record_failure(&self, key: &str, threshold: u32) -> Result<FailureCount>;
}

#[derive(Clone, Debug)]
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn increment(&self, key: &str) -> Result<u32> {
        increment_row(&self.pool, key).await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        reset_row(&self.pool, key).await
    }

    async fn record_failure(&self, key: &str, threshold: u32) -> Result<FailureCount> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin login attempt transaction")?;

        // The upsert locks the row until commit, so a concurrent failure for
        // the same key waits and then sees the reset value.
        let count = FailureCount::new(increment_row(&mut *tx, key).await?, threshold);

        if count.triggered {
            reset_row(&mut *tx, key).await?;
        }

        tx.commit()
            .await
            .context("commit login attempt transaction")?;

        Ok(count)
    }
}

async fn increment_row<'e, E>(executor: E, key: &str) -> Result<u32>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = r"
        INSERT INTO login_attempts (account_key, failed_count, updated_at)
        VALUES ($1, 1, NOW())
        ON CONFLICT (account_key)
        DO UPDATE SET failed_count = login_attempts.failed_count + 1, updated_at = NOW()
        RETURNING failed_count
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(key)
        .fetch_one(executor)
        .instrument(span)
        .await
        .context("failed to increment login attempts")?;

    let count: i32 = row.get("failed_count");
    u32::try_from(count).context("negative login attempt count")
}

async fn reset_row<'e, E>(executor: E, key: &str) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = r"
        UPDATE login_attempts
        SET failed_count = 0, updated_at = NOW()
        WHERE account_key = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    // No row means the account never failed, which already reads as zero.
    sqlx::query(query)
        .bind(key)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to reset login attempts")?;

    Ok(())
}

/// Process-local counters for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counts: Mutex<HashMap<String, u32>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value without modifying it.
    pub async fn get(&self, key: &str) -> u32 {
        self.counts.lock().await.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<u32> {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let mut counts = self.counts.lock().await;
        if let Some(count) = counts.get_mut(key) {
            *count = 0;
        }
        Ok(())
    }

    async fn record_failure(&self, key: &str, threshold: u32) -> Result<FailureCount> {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(key.to_string()).or_insert(0);
        let failure = FailureCount::new(count.saturating_add(1), threshold);
        *count = if failure.triggered { 0 } else { failure.attempts };
        Ok(failure)
    }
}
