//! Pinecone [`VectorIndex`] backend over the data-plane REST API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | upsert | `POST {host}/vectors/upsert` |
//! | query | `POST {host}/query` with `filter = {"user_id": {"$eq": id}}` |
//! | delete | `POST {host}/vectors/delete` |
//!
//! Upserts are split into `index.upsert_batch_size` records per request. Each
//! request is checked against the `upsertedCount` Pinecone reports; a short
//! count is treated as a transient failure and the batch is re-sent, which is
//! safe because record ids are deterministic.
//!
//! The API key is read from the environment variable named by
//! `index.api_key_env` (default `PINECONE_API_KEY`).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::IndexConfig;
use crate::error::{self, RagError, Result, Stage};
use crate::models::{ChunkMetadata, QueryMatch, TenantFilter, VectorRecord};
use crate::retry::RetryPolicy;

use super::VectorIndex;

const API_VERSION: &str = "2024-07";

pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: Option<String>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl PineconeIndex {
    pub fn new(config: &IndexConfig, retry: RetryPolicy) -> anyhow::Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| anyhow::anyhow!("index.host required for Pinecone provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self::with_client(
            client,
            host,
            api_key,
            config.namespace.clone(),
            config.upsert_batch_size,
            retry,
        ))
    }

    /// Build from parts. `host` may omit the scheme, as the Pinecone console shows it.
    pub fn with_client(
        client: reqwest::Client,
        host: impl Into<String>,
        api_key: impl Into<String>,
        namespace: Option<String>,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        let host = host.into();
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            namespace,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    async fn post(&self, stage: Stage, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| error::from_reqwest(stage, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(error::from_status(stage, "Pinecone", status, &body_text));
        }

        response
            .json()
            .await
            .map_err(|e| error::from_reqwest(stage, e))
    }

    async fn upsert_batch(&self, batch: &[VectorRecord]) -> Result<()> {
        let body = upsert_body(batch, self.namespace.as_deref());
        let resp = self.post(Stage::Upsert, "/vectors/upsert", &body).await?;
        let upserted: UpsertResponse = serde_json::from_value(resp)
            .map_err(|e| RagError::upstream(Stage::Upsert, format!("invalid upsert response: {}", e)))?;

        if upserted.upserted_count != batch.len() as u64 {
            return Err(RagError::transient(
                Stage::Upsert,
                format!(
                    "partial upsert: {} of {} records written",
                    upserted.upserted_count,
                    batch.len()
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a ChunkMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: u64,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Deserialize)]
struct RawMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

fn upsert_body(records: &[VectorRecord], namespace: Option<&str>) -> serde_json::Value {
    let vectors: Vec<PineconeVector<'_>> = records
        .iter()
        .map(|r| PineconeVector {
            id: &r.id,
            values: &r.values,
            metadata: &r.metadata,
        })
        .collect();
    let mut body = json!({ "vectors": vectors });
    if let Some(ns) = namespace {
        body["namespace"] = json!(ns);
    }
    body
}

fn query_body(vector: &[f32], top_k: usize, filter: TenantFilter, namespace: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "vector": vector,
        "topK": top_k,
        "filter": { "user_id": { "$eq": filter.user_id } },
        "includeMetadata": true,
        "includeValues": false,
    });
    if let Some(ns) = namespace {
        body["namespace"] = json!(ns);
    }
    body
}

/// Pinecone returns numeric metadata as floats (`7.0`), so ids are read leniently.
/// Values are checked by [`ChunkMetadata::new`] like any other record.
fn parse_metadata(value: &serde_json::Value) -> Option<ChunkMetadata> {
    let int_field = |name: &str| {
        let v = value.get(name)?;
        v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
    };
    ChunkMetadata::new(
        int_field("user_id")?,
        int_field("document_id")?,
        value.get("filename")?.as_str()?,
        value.get("chunk")?.as_str()?,
    )
    .ok()
}

fn parse_query_response(json: serde_json::Value, top_k: usize) -> Result<Vec<QueryMatch>> {
    let resp: QueryResponse = serde_json::from_value(json)
        .map_err(|e| RagError::upstream(Stage::Query, format!("invalid query response: {}", e)))?;

    let mut matches = Vec::with_capacity(resp.matches.len());
    for m in resp.matches {
        let metadata = m.metadata.as_ref().and_then(parse_metadata).ok_or_else(|| {
            RagError::upstream(
                Stage::Query,
                format!("match {} is missing required metadata", m.id),
            )
        })?;
        matches.push(QueryMatch {
            id: m.id,
            score: m.score,
            metadata,
        });
    }
    matches.truncate(top_k);
    Ok(matches)
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        for batch in records.chunks(self.batch_size) {
            debug!(records = batch.len(), "pinecone upsert");
            self.retry
                .run("pinecone upsert", || self.upsert_batch(batch))
                .await?;
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: TenantFilter,
    ) -> Result<Vec<QueryMatch>> {
        let body = query_body(vector, top_k, filter, self.namespace.as_deref());
        debug!(user_id = filter.user_id, top_k, "pinecone query");
        let json = self
            .retry
            .run("pinecone query", || self.post(Stage::Query, "/query", &body))
            .await?;
        parse_query_response(json, top_k)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        for batch in ids.chunks(self.batch_size) {
            let mut body = json!({ "ids": batch });
            if let Some(ns) = &self.namespace {
                body["namespace"] = json!(ns);
            }
            self.retry
                .run("pinecone delete", || self.post(Stage::Upsert, "/vectors/delete", &body))
                .await?;
        }
        Ok(())
    }
}
