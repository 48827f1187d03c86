//! Relational persistence for documents and usage counters.
//!
//! The pipelines depend only on the [`DocumentStore`] and [`UsageStore`]
//! traits. [`SqliteStore`] implements both over the tables created by
//! [`crate::migrate::run_migrations`].
//!
//! # Counter semantics
//!
//! Every increment is a single `INSERT ... ON CONFLICT DO UPDATE SET n = n + 1`
//! statement, so concurrent requests never lose an update. The files-uploaded
//! counter is bumped inside [`DocumentStore::mark_indexed`], in the same
//! transaction that flips the document to `indexed`, and only when the row
//! actually changed state. Marking a document twice counts it once.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor, SqlitePool};

use crate::error::{RagError, Result};
use crate::models::{Document, DocumentStatus, SystemStats, UsageStats};

/// Document metadata, as seen by the ingestion and answer pipelines.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new `pending` document and return it with its assigned id.
    async fn create_document(&self, user_id: i64, filename: &str) -> Result<Document>;

    /// Number of the user's documents that are fully indexed.
    async fn get_document_count(&self, user_id: i64) -> Result<i64>;

    /// The user's documents, newest first.
    async fn list_documents(&self, user_id: i64) -> Result<Vec<Document>>;

    /// Ids of the user's `indexed` documents. Only chunks of these
    /// documents may be used to answer questions.
    async fn indexed_document_ids(&self, user_id: i64) -> Result<HashSet<i64>>;

    /// Move a document that is not yet indexed to `failed`.
    ///
    /// Returns `false` when the document is already indexed (or missing).
    async fn mark_failed(&self, document_id: i64) -> Result<bool>;

    /// Mark a document `indexed` and count the upload for its owner.
    ///
    /// Returns `true` when this call performed the transition, `false` when
    /// the document was already indexed (or does not exist), in which case
    /// no counter changes.
    async fn mark_indexed(&self, document_id: i64, chunk_count: usize) -> Result<bool>;
}

/// Per-user activity counters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn increment_files_uploaded(&self, user_id: i64) -> Result<()>;

    async fn increment_questions_asked(&self, user_id: i64) -> Result<()>;

    /// Counters for one user; all zero if the user has no row yet.
    async fn get_user_stats(&self, user_id: i64) -> Result<UsageStats>;

    async fn get_system_stats(&self) -> Result<SystemStats>;

    /// Counters of every user that has a row, ordered by user id.
    async fn list_user_stats(&self) -> Result<Vec<UsageStats>>;
}

/// SQLite implementation of both store traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let upload_date: String = row.try_get("upload_date")?;
    let upload_date = DateTime::parse_from_rfc3339(&upload_date)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| RagError::Storage(sqlx::Error::Decode(Box::new(e))))?;

    let status: String = row.try_get("status")?;
    let status = DocumentStatus::parse(&status).ok_or_else(|| {
        RagError::Storage(sqlx::Error::Decode(
            format!("unknown document status '{}'", status).into(),
        ))
    })?;

    Ok(Document {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        filename: row.try_get("filename")?,
        upload_date,
        status,
        chunk_count: row.try_get("chunk_count")?,
    })
}

async fn bump_files_uploaded<'e>(executor: impl SqliteExecutor<'e>, user_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_stats (user_id, files_uploaded_count, questions_asked_count)
        VALUES (?, 1, 0)
        ON CONFLICT(user_id) DO UPDATE SET files_uploaded_count = files_uploaded_count + 1
        "#,
    )
    .bind(user_id)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document(&self, user_id: i64, filename: &str) -> Result<Document> {
        let now = Utc::now();
        let upload_date = now.to_rfc3339_opts(SecondsFormat::Secs, true);

        let row = sqlx::query(
            r#"
            INSERT INTO documents (user_id, filename, upload_date, status, chunk_count)
            VALUES (?, ?, ?, 'pending', 0)
            RETURNING id, user_id, filename, upload_date, status, chunk_count
            "#,
        )
        .bind(user_id)
        .bind(filename)
        .bind(&upload_date)
        .fetch_one(&self.pool)
        .await?;

        row_to_document(&row)
    }

    async fn get_document_count(&self, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE user_id = ? AND status = 'indexed'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_documents(&self, user_id: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, filename, upload_date, status, chunk_count
            FROM documents
            WHERE user_id = ?
            ORDER BY upload_date DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn indexed_document_ids(&self, user_id: i64) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE user_id = ? AND status = 'indexed'",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn mark_failed(&self, document_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'failed' WHERE id = ? AND status != 'indexed'",
        )
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_indexed(&self, document_id: i64, chunk_count: usize) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let owner: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE documents
            SET status = 'indexed', chunk_count = ?
            WHERE id = ? AND status != 'indexed'
            RETURNING user_id
            "#,
        )
        .bind(chunk_count as i64)
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = owner else {
            tx.rollback().await?;
            return Ok(false);
        };

        bump_files_uploaded(&mut *tx, user_id).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn increment_files_uploaded(&self, user_id: i64) -> Result<()> {
        bump_files_uploaded(&self.pool, user_id).await
    }

    async fn increment_questions_asked(&self, user_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_stats (user_id, files_uploaded_count, questions_asked_count)
            VALUES (?, 0, 1)
            ON CONFLICT(user_id) DO UPDATE SET questions_asked_count = questions_asked_count + 1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user_stats(&self, user_id: i64) -> Result<UsageStats> {
        let row = sqlx::query(
            "SELECT files_uploaded_count, questions_asked_count FROM user_stats WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => UsageStats {
                user_id,
                files_uploaded_count: row.try_get("files_uploaded_count")?,
                questions_asked_count: row.try_get("questions_asked_count")?,
            },
            None => UsageStats {
                user_id,
                ..UsageStats::default()
            },
        })
    }

    async fn get_system_stats(&self) -> Result<SystemStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_users,
                COALESCE(SUM(files_uploaded_count), 0) AS total_documents,
                COALESCE(SUM(questions_asked_count), 0) AS total_questions
            FROM user_stats
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStats {
            total_users: row.try_get("total_users")?,
            total_documents: row.try_get("total_documents")?,
            total_questions: row.try_get("total_questions")?,
        })
    }

    async fn list_user_stats(&self) -> Result<Vec<UsageStats>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, files_uploaded_count, questions_asked_count
            FROM user_stats
            ORDER BY user_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(UsageStats {
                    user_id: row.try_get("user_id")?,
                    files_uploaded_count: row.try_get("files_uploaded_count")?,
                    questions_asked_count: row.try_get("questions_asked_count")?,
                })
            })
            .collect()
    }
}
