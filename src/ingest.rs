//! Ingestion pipeline orchestration.
//!
//! Takes one upload from extracted text to searchable vectors:
//!
//! ```text
//! chunk → create document (pending) → embed (bounded concurrency)
//!       → upsert (commit point) → mark indexed + count upload
//! ```
//!
//! A document only becomes `indexed` after every one of its records has been
//! written to the vector index. Any failure after the document row exists
//! marks it `failed` and removes the records that may have been written.
//! The user's upload count only moves on success.
//!
//! Dropping the future returned by [`IngestionPipeline::ingest`] (for example
//! when a request deadline passes) abandons in-flight calls. The document's
//! cleanup guard then runs the same cleanup on a spawned task, so a
//! cancelled upload ends up `failed` rather than `pending`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, error, info, warn};

use crate::chunk::chunk_with;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::extract::{extract_text, DocumentFormat};
use crate::index::VectorIndex;
use crate::models::{Chunk, ChunkMetadata, Document, DocumentStatus, VectorRecord};
use crate::services::{require_persistent_index, Services};
use crate::store::DocumentStore;

/// Outcome of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// The document as stored after indexing.
    pub document: Document,
    pub chunks: usize,
    pub vectors_upserted: usize,
}

pub struct IngestionPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentStore>,
    chunking: ChunkingConfig,
    concurrency: usize,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentStore>,
        chunking: ChunkingConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            documents,
            chunking,
            concurrency: concurrency.max(1),
        }
    }

    /// Extract text from an uploaded file and ingest it.
    ///
    /// The format comes from the filename extension. Unsupported or
    /// unreadable files are rejected before any document record is created.
    pub async fn ingest_file(
        &self,
        user_id: i64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestReport> {
        validate_upload(user_id, filename)?;
        let format = DocumentFormat::from_filename(filename)?;

        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, format))
            .await
            .map_err(|e| RagError::Extraction(format!("extraction task failed: {}", e)))??;

        debug!(user_id, filename, format = format.as_str(), text_len = text.len(), "text extracted");
        self.ingest(user_id, filename, &text).await
    }

    /// Ingest already-extracted text for `user_id`.
    pub async fn ingest(&self, user_id: i64, filename: &str, text: &str) -> Result<IngestReport> {
        validate_upload(user_id, filename)?;
        let chunks = chunk_with(&self.chunking, text)?;

        let document = self.documents.create_document(user_id, filename).await?;
        info!(
            document_id = document.id,
            user_id,
            filename,
            chunk_count = chunks.len(),
            "ingesting document"
        );

        let mut guard = IngestGuard::new(self.documents.clone(), self.index.clone(), &document);

        let records = match self.embed_chunks(&document, &chunks).await {
            Ok(records) => records,
            Err(e) => return Err(guard.abandon(e).await),
        };
        guard.written = records.iter().map(|r| r.id.clone()).collect();

        if !records.is_empty() {
            if let Err(e) = self.index.upsert(&records).await {
                return Err(guard.abandon(e).await);
            }
        }

        match self.documents.mark_indexed(document.id, chunks.len()).await {
            Ok(true) => {}
            Ok(false) => warn!(document_id = document.id, "document was already indexed"),
            Err(e) => return Err(guard.abandon(e).await),
        }
        guard.disarm();

        info!(
            document_id = document.id,
            user_id,
            chunk_count = chunks.len(),
            vectors = records.len(),
            "document indexed"
        );

        Ok(IngestReport {
            document: Document {
                status: DocumentStatus::Indexed,
                chunk_count: chunks.len() as i64,
                ..document
            },
            chunks: chunks.len(),
            vectors_upserted: records.len(),
        })
    }

    /// Embed every chunk, at most `concurrency` calls in flight, keeping chunk order.
    async fn embed_chunks(&self, document: &Document, chunks: &[Chunk]) -> Result<Vec<VectorRecord>> {
        // Futures are built before streaming so the whole future stays `Send`.
        let calls: Vec<_> = chunks
            .iter()
            .map(|chunk| self.embedder.embed(&chunk.text))
            .collect();
        let vectors: Vec<Vec<f32>> = stream::iter(calls)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, values)| {
                let metadata = ChunkMetadata::new(
                    document.user_id,
                    document.id,
                    document.filename.as_str(),
                    chunk.text.as_str(),
                )?;
                Ok(VectorRecord::new(chunk.chunk_index, values, metadata))
            })
            .collect()
    }
}

/// Cleanup owed by an ingestion that created a document but has not finished.
///
/// Error paths call [`abandon`](IngestGuard::abandon), which cleans up inline.
/// If the ingestion future is dropped while the guard is armed, `Drop` runs
/// the same cleanup on a spawned task.
struct IngestGuard {
    documents: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    document_id: i64,
    user_id: i64,
    /// Record ids that may already be in the index.
    written: Vec<String>,
    armed: bool,
}

impl IngestGuard {
    fn new(documents: Arc<dyn DocumentStore>, index: Arc<dyn VectorIndex>, document: &Document) -> Self {
        Self {
            documents,
            index,
            document_id: document.id,
            user_id: document.user_id,
            written: Vec::new(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    /// Log `err`, clean up, and hand the error back.
    async fn abandon(mut self, err: RagError) -> RagError {
        self.armed = false;
        error!(
            document_id = self.document_id,
            user_id = self.user_id,
            stage = err.stage().map(|s| s.as_str()).unwrap_or("input"),
            error = %err,
            "ingestion failed"
        );
        cleanup(
            self.documents.as_ref(),
            self.index.as_ref(),
            self.document_id,
            &self.written,
        )
        .await;
        err
    }
}

impl Drop for IngestGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            document_id = self.document_id,
            user_id = self.user_id,
            "ingestion cancelled"
        );

        let documents = self.documents.clone();
        let index = self.index.clone();
        let document_id = self.document_id;
        let written = std::mem::take(&mut self.written);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    cleanup(documents.as_ref(), index.as_ref(), document_id, &written).await;
                });
            }
            Err(_) => warn!(document_id, "no runtime to clean up cancelled ingestion"),
        }
    }
}

/// Mark the document failed and remove records that may have been written.
///
/// Records are only removed when the document was not already indexed.
/// Problems are logged, never returned.
async fn cleanup(
    documents: &dyn DocumentStore,
    index: &dyn VectorIndex,
    document_id: i64,
    written: &[String],
) {
    match documents.mark_failed(document_id).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => warn!(document_id, error = %e, "could not mark document failed"),
    }

    if !written.is_empty() {
        if let Err(e) = index.delete(written).await {
            warn!(
                document_id,
                records = written.len(),
                error = %e,
                "could not remove records of failed document"
            );
        }
    }
}

fn validate_upload(user_id: i64, filename: &str) -> Result<()> {
    if user_id <= 0 {
        return Err(RagError::InvalidInput(format!(
            "user_id must be positive, got {}",
            user_id
        )));
    }
    if filename.trim().is_empty() {
        return Err(RagError::InvalidInput("filename must not be empty".into()));
    }
    Ok(())
}

/// CLI entry point: ingest a local file on behalf of `user_id` and print a summary.
pub async fn run_upload(config: &Config, user_id: i64, path: &Path) -> anyhow::Result<()> {
    require_persistent_index(config)?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid file path: {}", path.display()))?
        .to_string();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read upload: {}", path.display()))?;

    let services = Services::from_config(config).await?;
    let report = services
        .ingestion
        .ingest_file(user_id, &filename, bytes)
        .await?;

    println!("upload {}", filename);
    println!("  document id: {}", report.document.id);
    println!("  user: {}", report.document.user_id);
    println!("  chunks: {}", report.chunks);
    println!("  vectors upserted: {}", report.vectors_upserted);
    println!("  status: {}", report.document.status.as_str());
    println!("ok");
    Ok(())
}
