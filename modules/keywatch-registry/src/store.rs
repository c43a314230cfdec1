//! RegistryStore: the subscription registry, backed by Postgres.
//!
//! The command collaborator writes through the CRUD surface; the engine's
//! reconciler reads one consistent snapshot through `RegistryReader`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use keywatch_common::{normalize_keyword, ChatInfo, RequestSnapshot, RequestSummary};
use keywatch_engine::RegistryReader;

// ---------------------------------------------------------------------------
// RegistryStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RegistryStore {
    pool: PgPool,
}

impl RegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a subscriber or refresh its display metadata.
    pub async fn upsert_subscriber(
        &self,
        subscriber_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscribers (subscriber_id, username, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subscriber_id) DO UPDATE
            SET username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name
            "#,
        )
        .bind(subscriber_id)
        .bind(username)
        .bind(first_name)
        .bind(last_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Create a search request, active from the start.
    pub async fn create_request(&self, subscriber_id: i64, title: Option<&str>) -> Result<i64> {
        let (request_id,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO search_requests (subscriber_id, title)
            VALUES ($1, $2)
            RETURNING request_id
            "#,
        )
        .bind(subscriber_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(request_id)
    }

    /// Attach keywords to a request. Input is normalized the same way the
    /// matcher normalizes; entries that normalize to nothing are skipped,
    /// as are keywords the request already has. Returns how many were added.
    pub async fn add_keywords(&self, request_id: i64, keywords: &[String]) -> Result<usize> {
        let mut added = 0;
        for raw in keywords {
            let Some(keyword) = normalize_keyword(raw) else {
                continue;
            };
            let result = sqlx::query(
                r#"
                INSERT INTO request_keywords (request_id, keyword)
                VALUES ($1, $2)
                ON CONFLICT (request_id, keyword) DO NOTHING
                "#,
            )
            .bind(request_id)
            .bind(&keyword)
            .execute(&self.pool)
            .await?;
            added += result.rows_affected() as usize;
        }
        Ok(added)
    }

    /// Bind a chat to a request, upserting the chat row itself so the
    /// freshest handle and title win. Idempotent per (request, chat).
    pub async fn bind_chat(
        &self,
        request_id: i64,
        chat_id: i64,
        handle: Option<&str>,
        title: Option<&str>,
    ) -> Result<()> {
        let handle = handle.map(|h| h.trim_start_matches('@'));
        sqlx::query(
            r#"
            INSERT INTO chat_groups (chat_id, handle, title, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (chat_id) DO UPDATE
            SET handle = EXCLUDED.handle,
                title = EXCLUDED.title,
                updated_at = now()
            "#,
        )
        .bind(chat_id)
        .bind(handle)
        .bind(title)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO request_chats (request_id, chat_id)
            VALUES ($1, $2)
            ON CONFLICT (request_id, chat_id) DO NOTHING
            "#,
        )
        .bind(request_id)
        .bind(chat_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip a request's active flag. Returns false when the request does
    /// not exist.
    pub async fn set_request_active(&self, request_id: i64, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE search_requests SET active = $2 WHERE request_id = $1")
            .bind(request_id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a request; keywords and chat bindings cascade away. Returns
    /// false when the request does not exist.
    pub async fn delete_request(&self, request_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM search_requests WHERE request_id = $1")
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// A subscriber's requests with keyword and chat counts, newest first.
    pub async fn requests_for_subscriber(&self, subscriber_id: i64) -> Result<Vec<RequestSummary>> {
        let rows = sqlx::query_as::<_, (i64, Option<String>, bool, DateTime<Utc>, i64, i64)>(
            r#"
            SELECT
                sr.request_id,
                sr.title,
                sr.active,
                sr.created_at,
                (SELECT COUNT(*) FROM request_keywords k WHERE k.request_id = sr.request_id),
                (SELECT COUNT(*) FROM request_chats rc WHERE rc.request_id = sr.request_id)
            FROM search_requests sr
            WHERE sr.subscriber_id = $1
            ORDER BY sr.created_at DESC, sr.request_id DESC
            "#,
        )
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(request_id, title, active, created_at, keyword_count, chat_count)| {
                    RequestSummary {
                        request_id,
                        title,
                        active,
                        created_at,
                        keyword_count,
                        chat_count,
                    }
                },
            )
            .collect())
    }
}

// ---------------------------------------------------------------------------
// RegistryReader
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    request_id: i64,
    subscriber_id: i64,
    title: Option<String>,
    keywords: Json<Vec<String>>,
    chats: Json<Vec<ChatInfo>>,
}

#[async_trait]
impl RegistryReader for RegistryStore {
    /// One statement, one MVCC snapshot: keywords in insertion order, chats
    /// with their current handle and title, requests ascending by id.
    async fn active_requests(&self) -> Result<Vec<RequestSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT
                sr.request_id,
                sr.subscriber_id,
                sr.title,
                COALESCE(
                    (SELECT json_agg(k.keyword ORDER BY k.keyword_id)
                     FROM request_keywords k
                     WHERE k.request_id = sr.request_id),
                    '[]'::json
                ) AS keywords,
                COALESCE(
                    (SELECT json_agg(
                                jsonb_build_object(
                                    'chat_id', cg.chat_id,
                                    'handle', cg.handle,
                                    'title', cg.title
                                )
                                ORDER BY rc.chat_id)
                     FROM request_chats rc
                     JOIN chat_groups cg ON cg.chat_id = rc.chat_id
                     WHERE rc.request_id = sr.request_id),
                    '[]'::json
                ) AS chats
            FROM search_requests sr
            WHERE sr.active
            ORDER BY sr.request_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RequestSnapshot {
                request_id: row.request_id,
                subscriber_id: row.subscriber_id,
                title: row.title,
                keywords: row.keywords.0,
                chats: row.chats.0,
            })
            .collect())
    }
}
