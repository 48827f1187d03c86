//! In-memory [`VectorIndex`] for tests and single-process deployments.
//!
//! Records live in a `HashMap` keyed by id behind `std::sync::RwLock`.
//! Queries are brute-force cosine similarity over the caller's records.
//! Nothing survives a restart.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result, Stage};
use crate::models::{QueryMatch, TenantFilter, VectorRecord};

use super::VectorIndex;

/// In-memory vector index.
pub struct MemoryIndex {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of a record by id.
    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.records.read().ok()?.get(id).cloned()
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned(stage: Stage) -> RagError {
    RagError::upstream(stage, "memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut stored = self.records.write().map_err(|_| poisoned(Stage::Upsert))?;
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: TenantFilter,
    ) -> Result<Vec<QueryMatch>> {
        let stored = self.records.read().map_err(|_| poisoned(Stage::Query))?;
        let mut matches: Vec<QueryMatch> = stored
            .values()
            .filter(|r| filter.allows(&r.metadata))
            .map(|r| QueryMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut stored = self.records.write().map_err(|_| poisoned(Stage::Upsert))?;
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }
}
