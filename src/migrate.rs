use anyhow::{Context, Result};
use sqlx::SqlitePool;

/// Create the tables the pipelines need. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Uploaded documents and their indexing state
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            filename TEXT NOT NULL,
            upload_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'indexed', 'failed')),
            chunk_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create documents table")?;

    // Per-user counters, created lazily on first increment
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_stats (
            user_id INTEGER PRIMARY KEY,
            files_uploaded_count INTEGER NOT NULL DEFAULT 0,
            questions_asked_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create user_stats table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_user_status ON documents(user_id, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
