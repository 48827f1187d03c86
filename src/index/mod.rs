//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only way the pipelines reach the
//! similarity store. Queries take a mandatory [`TenantFilter`]; there is no
//! unfiltered query in the API.
//!
//! Backends:
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"memory"` | [`memory::MemoryIndex`], in-process brute-force cosine search |
//! | `"pinecone"` | [`pinecone::PineconeIndex`], Pinecone data-plane REST API |
//!
//! Implementations must be `Send + Sync` to be shared across requests.

pub mod memory;
pub mod pinecone;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::error::Result;
use crate::models::{QueryMatch, TenantFilter, VectorRecord};
use crate::retry::RetryPolicy;

/// A similarity search store holding [`VectorRecord`]s.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or overwrite records by id |
/// | [`query`](VectorIndex::query) | Nearest neighbours within one tenant |
/// | [`delete`](VectorIndex::delete) | Remove records by id |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Write all `records`. Any record not written fails the whole call.
    ///
    /// Records with an id already present are overwritten, so sending the
    /// same batch twice leaves one copy of each record.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Return at most `top_k` records owned by `filter.user_id`, ordered by
    /// descending similarity to `vector`.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: TenantFilter,
    ) -> Result<Vec<QueryMatch>>;

    /// Remove records by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;
}

/// Create the [`VectorIndex`] selected by `index.provider`.
pub fn create_index(config: &IndexConfig, retry: RetryPolicy) -> anyhow::Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryIndex::new())),
        "pinecone" => Ok(Arc::new(pinecone::PineconeIndex::new(config, retry)?)),
        other => bail!("Unknown index provider: {}", other),
    }
}
