//! Wire-level tests for the HTTP clients against local mock servers.
//!
//! Each test starts an axum app on an ephemeral port that plays the part of
//! the embedding API, Pinecone, or the chat completions API, and records what
//! it was sent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use docqa::config::{EmbeddingConfig, LlmConfig};
use docqa::embedding::{Embedder, OpenAIEmbedder};
use docqa::error::{RagError, Stage};
use docqa::index::pinecone::PineconeIndex;
use docqa::index::VectorIndex;
use docqa::llm::{ChatModel, OpenAIChat};
use docqa::models::{ChunkMetadata, TenantFilter, VectorRecord};
use docqa::retry::RetryPolicy;

#[derive(Default)]
struct Mock {
    calls: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
    headers: Mutex<Vec<HeaderMap>>,
}

impl Mock {
    fn record(&self, headers: HeaderMap, body: Value) -> usize {
        self.headers.lock().unwrap().push(headers);
        self.bodies.lock().unwrap().push(body);
        self.calls.fetch_add(1, Ordering::SeqCst)
    }
}

type MockState = State<Arc<Mock>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn records(n: usize) -> Vec<VectorRecord> {
    (0..n)
        .map(|i| {
            let meta = ChunkMetadata::new(7, 70, "doc.pdf", format!("chunk {}", i)).unwrap();
            VectorRecord::new(i, vec![i as f32, 1.0], meta)
        })
        .collect()
}

// ============ Embeddings ============

async fn embeddings_rate_limited_once(
    State(mock): MockState,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if mock.record(headers, body) == 0 {
        return (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response();
    }
    Json(json!({
        "object": "list",
        "data": [{ "object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3] }],
        "model": "text-embedding-3-small"
    }))
    .into_response()
}

async fn embeddings_bad_request(
    State(mock): MockState,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record(headers, body);
    (StatusCode::BAD_REQUEST, "input too long").into_response()
}

fn embedding_config(url: &str) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("text-embedding-3-small".to_string()),
        url: Some(url.to_string()),
        ..EmbeddingConfig::default()
    }
}

#[tokio::test]
async fn embedder_retries_rate_limit_then_succeeds() {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/v1/embeddings", post(embeddings_rate_limited_once))
        .with_state(mock.clone());
    let base = serve(app).await;

    let embedder = OpenAIEmbedder::with_api_key(
        &embedding_config(&format!("{}/v1", base)),
        "test-key",
        fast_retry(),
    )
    .unwrap();

    let vector = embedder.embed("hello").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 2);

    let headers = mock.headers.lock().unwrap();
    assert_eq!(headers[0]["authorization"], "Bearer test-key");
    let bodies = mock.bodies.lock().unwrap();
    assert_eq!(bodies[0]["model"], "text-embedding-3-small");
    assert_eq!(bodies[0]["input"], json!(["hello"]));
}

#[tokio::test]
async fn embedder_does_not_retry_client_errors() {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/embeddings", post(embeddings_bad_request))
        .with_state(mock.clone());
    let base = serve(app).await;

    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config(&base), "test-key", fast_retry()).unwrap();

    let err = embedder.embed("hello").await.unwrap_err();
    assert!(matches!(err, RagError::Upstream { stage: Stage::Embed, .. }));
    assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn embedder_gives_up_when_unreachable() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let retry = RetryPolicy {
        max_retries: 1,
        ..fast_retry()
    };
    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config(&format!("http://{}", addr)), "k", retry)
            .unwrap();

    let err = embedder.embed("hello").await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.stage(), Some(Stage::Embed));
}

// ============ Pinecone ============

async fn pinecone_upsert(
    State(mock): MockState,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let n = body["vectors"].as_array().map(|v| v.len()).unwrap_or(0);
    let call = mock.record(headers, body);
    // The very first batch is only half written.
    let written = if call == 0 { n / 2 } else { n };
    Json(json!({ "upsertedCount": written })).into_response()
}

async fn pinecone_query(
    State(mock): MockState,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record(headers, body);
    Json(json!({
        "matches": [
            { "id": "r1", "score": 0.92, "metadata": { "user_id": 7.0, "document_id": 70.0, "filename": "doc.pdf", "chunk": "chunk 0" } },
            { "id": "r2", "score": 0.31, "metadata": { "user_id": 7.0, "document_id": 70.0, "filename": "doc.pdf", "chunk": "chunk 1" } }
        ],
        "namespace": "tenant-docs"
    }))
    .into_response()
}

async fn pinecone_delete(
    State(mock): MockState,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record(headers, body);
    Json(json!({})).into_response()
}

fn pinecone(base: &str) -> PineconeIndex {
    PineconeIndex::with_client(
        reqwest::Client::new(),
        base,
        "pc-key",
        Some("tenant-docs".to_string()),
        2,
        fast_retry(),
    )
}

#[tokio::test]
async fn pinecone_upsert_batches_and_resends_partial_writes() {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/vectors/upsert", post(pinecone_upsert))
        .with_state(mock.clone());
    let base = serve(app).await;

    pinecone(&base).upsert(&records(5)).await.unwrap();

    // Batches of 2, 2, 1 plus one resend of the short first batch.
    assert_eq!(mock.calls.load(Ordering::SeqCst), 4);
    let bodies = mock.bodies.lock().unwrap();
    let sizes: Vec<usize> = bodies
        .iter()
        .map(|b| b["vectors"].as_array().unwrap().len())
        .collect();
    assert_eq!(sizes, vec![2, 2, 2, 1]);
    assert_eq!(bodies[0]["vectors"], bodies[1]["vectors"]);
    assert_eq!(bodies[0]["namespace"], "tenant-docs");
    assert_eq!(bodies[0]["vectors"][0]["metadata"]["user_id"], 7);

    let headers = mock.headers.lock().unwrap();
    assert_eq!(headers[0]["api-key"], "pc-key");
}

#[tokio::test]
async fn pinecone_query_sends_tenant_filter() {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/query", post(pinecone_query))
        .with_state(mock.clone());
    let base = serve(app).await;

    let matches = pinecone(&base)
        .query(&[0.5, 0.5], 1, TenantFilter::user(7))
        .await
        .unwrap();

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "r1");
    assert_eq!(matches[0].metadata.user_id, 7);
    assert_eq!(matches[0].metadata.chunk, "chunk 0");

    let body = mock.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["filter"], json!({ "user_id": { "$eq": 7 } }));
    assert_eq!(body["topK"], 1);
    assert_eq!(body["includeMetadata"], true);
}

#[tokio::test]
async fn pinecone_delete_sends_ids() {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/vectors/delete", post(pinecone_delete))
        .with_state(mock.clone());
    let base = serve(app).await;

    let ids: Vec<String> = records(3).into_iter().map(|r| r.id).collect();
    pinecone(&base).delete(&ids).await.unwrap();

    let bodies = mock.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["ids"], json!([ids[0], ids[1]]));
    assert_eq!(bodies[1]["ids"], json!([ids[2]]));
}

// ============ Chat completions ============

async fn chat_unavailable_once(
    State(mock): MockState,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if mock.record(headers, body) == 0 {
        return (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response();
    }
    Json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": "X is a type of Y." }, "finish_reason": "stop" }
        ]
    }))
    .into_response()
}

async fn chat_unauthorized(
    State(mock): MockState,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record(headers, body);
    (StatusCode::UNAUTHORIZED, "invalid api key").into_response()
}

fn llm_config(url: &str) -> LlmConfig {
    LlmConfig {
        provider: "openai".to_string(),
        url: url.to_string(),
        ..LlmConfig::default()
    }
}

#[tokio::test]
async fn chat_retries_server_errors() {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/openai/v1/chat/completions", post(chat_unavailable_once))
        .with_state(mock.clone());
    let base = serve(app).await;

    let chat = OpenAIChat::with_api_key(
        &llm_config(&format!("{}/openai/v1/", base)),
        "groq-key",
        fast_retry(),
    )
    .unwrap();

    let answer = chat.complete("What is X?").await.unwrap();
    assert_eq!(answer, "X is a type of Y.");
    assert_eq!(mock.calls.load(Ordering::SeqCst), 2);

    let body = mock.bodies.lock().unwrap()[1].clone();
    assert_eq!(body["model"], "llama-3.3-70b-versatile");
    assert_eq!(
        body["messages"],
        json!([{ "role": "user", "content": "What is X?" }])
    );
    assert_eq!(mock.headers.lock().unwrap()[1]["authorization"], "Bearer groq-key");
}

#[tokio::test]
async fn chat_auth_failure_is_not_retried() {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/chat/completions", post(chat_unauthorized))
        .with_state(mock.clone());
    let base = serve(app).await;

    let chat = OpenAIChat::with_api_key(&llm_config(&base), "bad", fast_retry()).unwrap();

    let err = chat.complete("q").await.unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(err.stage(), Some(Stage::Complete));
    assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
}
