//! Process-level service handles.
//!
//! Built once by the entry point and shared behind `Arc`. Each external
//! client owns its own connection pool; the SQLite pool is shared by the
//! document and usage stores.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::answer::AnswerSynthesizer;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::index::{create_index, VectorIndex};
use crate::ingest::IngestionPipeline;
use crate::llm::{create_chat_model, ChatModel};
use crate::migrate;
use crate::retry::RetryPolicy;
use crate::store::{DocumentStore, SqliteStore, UsageStore};

#[derive(Clone)]
pub struct Services {
    pub documents: Arc<dyn DocumentStore>,
    pub usage: Arc<dyn UsageStore>,
    pub ingestion: Arc<IngestionPipeline>,
    pub answers: Arc<AnswerSynthesizer>,
}

impl Services {
    /// Connect to the database, run migrations and build every client named
    /// in the config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let retry = RetryPolicy::from(&config.retry);
        let embedder = create_embedder(&config.embedding, retry)?;
        let index = create_index(&config.index, retry)?;
        let chat = create_chat_model(&config.llm, retry)?;

        Ok(Self::assemble(config, store.clone(), store, embedder, index, chat))
    }

    /// Wire the pipelines from already-built parts.
    pub fn assemble(
        config: &Config,
        documents: Arc<dyn DocumentStore>,
        usage: Arc<dyn UsageStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        let ingestion = IngestionPipeline::new(
            embedder.clone(),
            index.clone(),
            documents.clone(),
            config.chunking,
            config.embedding.concurrency,
        );
        let answers = AnswerSynthesizer::new(
            embedder,
            index,
            chat,
            documents.clone(),
            usage.clone(),
            config.retrieval,
        );

        Self {
            documents,
            usage,
            ingestion: Arc::new(ingestion),
            answers: Arc::new(answers),
        }
    }
}

/// Reject the in-memory index for one-shot CLI commands.
///
/// Each CLI command is its own process, so vectors written by `docqa upload`
/// into a memory index are gone before `docqa ask` runs while the document
/// stays `indexed` in SQLite. `docqa serve` keeps one index for its lifetime
/// and may use it.
pub fn require_persistent_index(config: &Config) -> Result<()> {
    if config.index.provider == "memory" {
        bail!(
            "index.provider \"memory\" does not persist between CLI commands; \
             set [index] provider = \"pinecone\" or use `docqa serve`"
        );
    }
    Ok(())
}
