//! Core data models used throughout docqa.
//!
//! These types represent the documents, chunks, vector records, and usage
//! counters that flow through the ingestion and answer pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, Result};

/// Namespace for deterministic vector record ids.
const RECORD_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b8e_93d4_4a57_b1e0_7c52_d8a9_3e41);

/// Indexing state of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Metadata written, vectors not yet committed.
    Pending,
    /// Every chunk is in the vector index.
    Indexed,
    /// Embedding or upsert failed; the document is not queryable.
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "indexed" => Some(DocumentStatus::Indexed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// An uploaded file, as recorded in the relational store.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub status: DocumentStatus,
    pub chunk_count: i64,
}

/// A window of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_index: usize,
    pub text: String,
}

/// Metadata stored next to every vector. Tenant isolation relies on `user_id`.
///
/// Build it with [`ChunkMetadata::new`]; every reader of index responses
/// goes through it too.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMetadata {
    pub user_id: i64,
    pub document_id: i64,
    pub filename: String,
    pub chunk: String,
}

impl ChunkMetadata {
    pub fn new(
        user_id: i64,
        document_id: i64,
        filename: impl Into<String>,
        chunk: impl Into<String>,
    ) -> Result<Self> {
        let filename = filename.into();
        if user_id <= 0 {
            return Err(RagError::InvalidInput(format!(
                "user_id must be positive, got {}",
                user_id
            )));
        }
        if document_id <= 0 {
            return Err(RagError::InvalidInput(format!(
                "document_id must be positive, got {}",
                document_id
            )));
        }
        if filename.trim().is_empty() {
            return Err(RagError::InvalidInput("filename must not be empty".into()));
        }
        Ok(Self {
            user_id,
            document_id,
            filename,
            chunk: chunk.into(),
        })
    }
}

/// The unit stored in a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl VectorRecord {
    /// Build the record for chunk `chunk_index` of `metadata.document_id`.
    pub fn new(chunk_index: usize, values: Vec<f32>, metadata: ChunkMetadata) -> Self {
        Self {
            id: record_id(metadata.document_id, chunk_index),
            values,
            metadata,
        }
    }
}

/// Deterministic record id for a (document, chunk) pair, so that re-sending
/// the same batch overwrites instead of duplicating.
pub fn record_id(document_id: i64, chunk_index: usize) -> String {
    let name = format!("document:{}:chunk:{}", document_id, chunk_index);
    Uuid::new_v5(&RECORD_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// Restricts a vector query to one tenant's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantFilter {
    pub user_id: i64,
}

impl TenantFilter {
    pub fn user(user_id: i64) -> Self {
        Self { user_id }
    }

    pub fn allows(&self, metadata: &ChunkMetadata) -> bool {
        metadata.user_id == self.user_id
    }
}

/// A ranked hit returned by a vector index query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Per-user activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub user_id: i64,
    pub files_uploaded_count: i64,
    pub questions_asked_count: i64,
}

/// Totals across all users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SystemStats {
    pub total_users: i64,
    pub total_documents: i64,
    pub total_questions: i64,
}
