//! Rewrites legacy positive chat ids into the supergroup form.
//!
//! Early bindings stored the transport's raw positive group id; supergroup
//! events arrive under the prefixed negative form, so those rows never
//! match. Dry run by default.
//!
//! Usage: cargo run --bin fix_chat_ids [-- --apply]

use anyhow::{bail, Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keywatch_common::supergroup_form;

#[derive(Parser)]
#[command(
    name = "fix-chat-ids",
    about = "Rewrite legacy positive chat ids to the supergroup form"
)]
struct Cli {
    /// Apply the rewrites. Without this flag, only list what would change.
    #[arg(long)]
    apply: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    let rows = sqlx::query_as::<_, (i64, Option<String>, Option<String>)>(
        r#"
        SELECT chat_id, handle, title
        FROM chat_groups
        WHERE chat_id > 0
        ORDER BY chat_id
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if rows.is_empty() {
        info!("no chats need fixing");
        return Ok(());
    }

    for (chat_id, handle, title) in &rows {
        info!(
            old_id = chat_id,
            new_id = supergroup_form(*chat_id),
            handle = handle.as_deref().unwrap_or("-"),
            title = title.as_deref().unwrap_or("-"),
            "pending rewrite"
        );
    }

    if !cli.apply {
        info!(chats = rows.len(), "dry run, pass --apply to write");
        return Ok(());
    }

    let mut fixed = 0_usize;
    let mut failed = 0_usize;
    for (chat_id, _, _) in &rows {
        let new_id = supergroup_form(*chat_id);
        // request_chats rows follow via ON UPDATE CASCADE.
        let result =
            sqlx::query("UPDATE chat_groups SET chat_id = $1, updated_at = now() WHERE chat_id = $2")
                .bind(new_id)
                .bind(*chat_id)
                .execute(&pool)
                .await;
        match result {
            Ok(_) => {
                info!(old_id = chat_id, new_id, "rewritten");
                fixed += 1;
            }
            Err(e) => {
                // Usually the supergroup form already has its own row; that
                // pair needs a manual merge.
                warn!(error = %e, old_id = chat_id, new_id, "rewrite failed, skipping");
                failed += 1;
            }
        }
    }

    info!(fixed, failed, "done");
    if failed > 0 {
        bail!("{failed} chat(s) could not be rewritten");
    }
    Ok(())
}
