//! ProcessedLedger: the durable dedup ledger over Postgres.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use keywatch_engine::{DedupLedger, LedgerStats};

/// Dedup ledger backed by the `processed_messages` table. The atomicity of
/// `insert_if_absent` is the composite primary key's, so it holds across
/// processes, restarts, and replicas.
#[derive(Clone)]
pub struct ProcessedLedger {
    pool: PgPool,
}

impl ProcessedLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete records older than `retention`. Returns how many went. Not
    /// scheduled by the runtime; hosts call it on their own cadence.
    pub async fn prune_older_than(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention)?;
        let result = sqlx::query("DELETE FROM processed_messages WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DedupLedger for ProcessedLedger {
    async fn contains(&self, chat_id: i64, message_id: i64) -> Result<bool> {
        let (exists,) = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS (SELECT 1 FROM processed_messages WHERE chat_id = $1 AND message_id = $2)",
        )
        .bind(chat_id)
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_if_absent(&self, chat_id: i64, message_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_messages (chat_id, message_id)
            VALUES ($1, $2)
            ON CONFLICT (chat_id, message_id) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<LedgerStats> {
        let (total, last_24h) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE processed_at > now() - INTERVAL '24 hours')
            FROM processed_messages
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(LedgerStats { total, last_24h })
    }
}
