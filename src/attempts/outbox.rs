//! Pending in-app warnings, one per recipient, read at most once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::Instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingMessage {
    pub recipient_id: String,
    pub body: String,
    /// Unix seconds when the message was (last) written.
    pub created_at: i64,
}

#[async_trait]
pub trait MessageOutbox: Send + Sync {
    /// Store the message for `recipient_id`, replacing any unread one.
    async fn put(&self, recipient_id: &str, body: &str) -> Result<()>;

    /// Remove and return the pending message, or `None` if there is none.
    ///
    /// Check and delete happen in one step so concurrent readers cannot both win.
    async fn take_once(&self, recipient_id: &str) -> Result<Option<PendingMessage>>;
}

#[derive(Clone, Debug)]
pub struct PgMessageOutbox {
    pool: PgPool,
}

impl PgMessageOutbox {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageOutbox for PgMessageOutbox {
    async fn put(&self, recipient_id: &str, body: &str) -> Result<()> {
        let query = r"
            INSERT INTO pending_messages (recipient_id, body, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (recipient_id)
            DO UPDATE SET body = EXCLUDED.body, created_at = EXCLUDED.created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(recipient_id)
            .bind(body)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store pending message")?;

        Ok(())
    }

    async fn take_once(&self, recipient_id: &str) -> Result<Option<PendingMessage>> {
        let query = r"
            DELETE FROM pending_messages
            WHERE recipient_id = $1
            RETURNING recipient_id, body, EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(recipient_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to take pending message")?;

        Ok(row.map(|row| PendingMessage {
            recipient_id: row.get("recipient_id"),
            body: row.get("body"),
            created_at: row.get("created_at"),
        }))
    }
}

/// Process-local outbox for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryMessageOutbox {
    messages: Mutex<HashMap<String, PendingMessage>>,
}

impl MemoryMessageOutbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

#[async_trait]
impl MessageOutbox for MemoryMessageOutbox {
    async fn put(&self, recipient_id: &str, body: &str) -> Result<()> {
        let message = PendingMessage {
            recipient_id: recipient_id.to_string(),
            body: body.to_string(),
            created_at: unix_now(),
        };
        self.messages
            .lock()
            .await
            .insert(recipient_id.to_string(), message);
        Ok(())
    }

    async fn take_once(&self, recipient_id: &str) -> Result<Option<PendingMessage>> {
        Ok(self.messages.lock().await.remove(recipient_id))
    }
}
