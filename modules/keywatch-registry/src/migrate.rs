use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

/// Run idempotent schema migrations: tables, then indexes.
/// Safe to call on every startup.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("running registry schema migrations");

    let tables = [
        r#"
        CREATE TABLE IF NOT EXISTS subscribers (
            subscriber_id BIGINT       PRIMARY KEY,
            username      TEXT,
            first_name    TEXT,
            last_name     TEXT,
            created_at    TIMESTAMPTZ  NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS chat_groups (
            chat_id     BIGINT       PRIMARY KEY,
            handle      TEXT,
            title       TEXT,
            created_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ  NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS search_requests (
            request_id    BIGSERIAL    PRIMARY KEY,
            subscriber_id BIGINT       NOT NULL REFERENCES subscribers(subscriber_id) ON DELETE CASCADE,
            title         TEXT,
            active        BOOLEAN      NOT NULL DEFAULT TRUE,
            created_at    TIMESTAMPTZ  NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS request_keywords (
            keyword_id  BIGSERIAL  PRIMARY KEY,
            request_id  BIGINT     NOT NULL REFERENCES search_requests(request_id) ON DELETE CASCADE,
            keyword     TEXT       NOT NULL,
            UNIQUE (request_id, keyword)
        )
        "#,
        // ON UPDATE CASCADE lets the fix-chat-ids tool rewrite a chat id in
        // chat_groups and have the bindings follow.
        r#"
        CREATE TABLE IF NOT EXISTS request_chats (
            request_id  BIGINT  NOT NULL REFERENCES search_requests(request_id) ON DELETE CASCADE,
            chat_id     BIGINT  NOT NULL REFERENCES chat_groups(chat_id) ON UPDATE CASCADE,
            PRIMARY KEY (request_id, chat_id)
        )
        "#,
        // The dedup ledger. The composite primary key is the uniqueness
        // guarantee insert_if_absent relies on.
        r#"
        CREATE TABLE IF NOT EXISTS processed_messages (
            chat_id      BIGINT       NOT NULL,
            message_id   BIGINT       NOT NULL,
            processed_at TIMESTAMPTZ  NOT NULL DEFAULT now(),
            PRIMARY KEY (chat_id, message_id)
        )
        "#,
    ];

    for statement in &tables {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("tables ensured");

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_search_requests_subscriber ON search_requests (subscriber_id)",
        "CREATE INDEX IF NOT EXISTS idx_request_chats_chat ON request_chats (chat_id)",
        "CREATE INDEX IF NOT EXISTS idx_processed_messages_at ON processed_messages (processed_at)",
    ];

    for statement in &indexes {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("indexes ensured");

    Ok(())
}
