//! Usage statistics and document listings for the CLI.
//!
//! Reads straight from the relational store, so neither command needs the
//! embedding, index, or LLM credentials.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::Document;
use crate::store::{DocumentStore, SqliteStore, UsageStore};

/// Print one user's counters, or system totals when `user_id` is `None`.
pub async fn run_stats(config: &Config, user_id: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    println!("docqa usage stats");
    println!("===================");
    println!();
    println!("  Database:    {}", config.db.path.display());

    match user_id {
        Some(user_id) => {
            let stats = store.get_user_stats(user_id).await?;
            let indexed = store.get_document_count(user_id).await?;
            println!("  User:        {}", user_id);
            println!("  Uploaded:    {}", stats.files_uploaded_count);
            println!("  Indexed:     {}", indexed);
            println!("  Questions:   {}", stats.questions_asked_count);
        }
        None => {
            let stats = store.get_system_stats().await?;
            println!("  Users:       {}", stats.total_users);
            println!("  Documents:   {}", stats.total_documents);
            println!("  Questions:   {}", stats.total_questions);

            let users = store.list_user_stats().await?;
            if !users.is_empty() {
                println!();
                println!("  {:>8}  {:>8}  {:>9}", "USER", "UPLOADS", "QUESTIONS");
                for u in users {
                    println!(
                        "  {:>8}  {:>8}  {:>9}",
                        u.user_id, u.files_uploaded_count, u.questions_asked_count
                    );
                }
            }
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Print a user's documents, newest first.
pub async fn run_documents(config: &Config, user_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let docs = store.list_documents(user_id).await?;

    if docs.is_empty() {
        println!("No documents for user {}.", user_id);
    } else {
        print_documents(&docs);
    }

    pool.close().await;
    Ok(())
}

fn print_documents(docs: &[Document]) {
    println!(
        "  {:>6}  {:<36} {:<8} {:>6}   {}",
        "ID", "FILENAME", "STATUS", "CHUNKS", "UPLOADED"
    );
    println!("  {}", "-".repeat(76));
    for d in docs {
        println!(
            "  {:>6}  {:<36} {:<8} {:>6}   {}",
            d.id,
            truncate(&d.filename, 36),
            d.status.as_str(),
            d.chunk_count,
            format_ts_relative(d.upload_date.timestamp())
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
