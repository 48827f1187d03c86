//! HTTP API tests: the real router on an ephemeral port, driven with reqwest.
//!
//! External services are fakes; the SQLite store is a temp file.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;

use docqa::answer::NO_DOCUMENTS_MESSAGE;
use docqa::config::Config;
use docqa::embedding::Embedder;
use docqa::error::{RagError, Result, Stage};
use docqa::index::memory::MemoryIndex;
use docqa::llm::ChatModel;
use docqa::server::router;
use docqa::services::Services;
use docqa::store::SqliteStore;
use docqa::{db, migrate};

struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; 27];
        for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
            v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
        }
        v[26] = 1.0;
        Ok(v)
    }
}

#[derive(Clone, Copy)]
enum ChatBehavior {
    /// Reply with the line after `Context:`.
    Echo,
    Unavailable,
    Slow,
}

struct ScriptedChat(ChatBehavior);

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        match self.0 {
            ChatBehavior::Echo => Ok(prompt
                .split("Context:\n")
                .nth(1)
                .and_then(|rest| rest.lines().next())
                .unwrap_or_default()
                .to_string()),
            ChatBehavior::Unavailable => Err(RagError::transient(
                Stage::Complete,
                "upstream 503 from https://internal.example/llm",
            )),
            ChatBehavior::Slow => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".to_string())
            }
        }
    }
}

struct TestServer {
    _dir: TempDir,
    base: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(chat: ChatBehavior) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_db_path(dir.path().join("docqa.sqlite"));
        config.server.request_timeout_secs = 1;

        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let store = Arc::new(SqliteStore::new(pool));

        let services = Services::assemble(
            &config,
            store.clone(),
            store,
            Arc::new(LetterEmbedder),
            Arc::new(MemoryIndex::new()),
            Arc::new(ScriptedChat(chat)),
        );
        let app = router(services, &config.server);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            _dir: dir,
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn upload(&self, user: i64, filename: &str, bytes: Vec<u8>) -> reqwest::Response {
        self.client
            .post(self.url("/upload"))
            .query(&[("filename", filename)])
            .header("X-User-Id", user.to_string())
            .body(bytes)
            .send()
            .await
            .unwrap()
    }

    async fn ask(&self, user: i64, query: &str) -> reqwest::Response {
        self.client
            .post(self.url("/ask"))
            .header("X-User-Id", user.to_string())
            .json(&json!({ "query": query }))
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, user: i64, path: &str, role: Option<&str>) -> reqwest::Response {
        let mut req = self.client.get(self.url(path)).header("X-User-Id", user.to_string());
        if let Some(role) = role {
            req = req.header("X-User-Role", role);
        }
        req.send().await.unwrap()
    }
}

fn docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

async fn error_code(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.unwrap();
    body["error"]["code"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn health_needs_no_identity() {
    let server = TestServer::start(ChatBehavior::Echo).await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_user_header_is_unauthorized() {
    let server = TestServer::start(ChatBehavior::Echo).await;
    let resp = server.client.get(server.url("/documents")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(resp).await, "unauthorized");

    let resp = server
        .client
        .get(server.url("/documents"))
        .header("X-User-Id", "not-a-number")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn upload_then_ask_round_trip() {
    let server = TestServer::start(ChatBehavior::Echo).await;

    let resp = server.upload(1, "facts.docx", docx_with_text("X is a type of Y.")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let doc: Value = resp.json().await.unwrap();
    assert_eq!(doc["status"], "indexed");
    assert_eq!(doc["filename"], "facts.docx");
    assert_eq!(doc["chunk_count"], 1);

    let resp = server.get(1, "/documents", None).await;
    let list: Value = resp.json().await.unwrap();
    assert_eq!(list["documents"].as_array().unwrap().len(), 1);

    let resp = server.ask(1, "What is X?").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["answer"], "X is a type of Y.");

    let stats: Value = server.get(1, "/stats/me", None).await.json().await.unwrap();
    assert_eq!(stats["files_uploaded_count"], 1);
    assert_eq!(stats["questions_asked_count"], 1);
}

#[tokio::test]
async fn other_users_see_nothing() {
    let server = TestServer::start(ChatBehavior::Echo).await;
    server.upload(1, "facts.docx", docx_with_text("X is a type of Y.")).await;

    let list: Value = server.get(2, "/documents", None).await.json().await.unwrap();
    assert!(list["documents"].as_array().unwrap().is_empty());

    let body: Value = server.ask(2, "What is X?").await.json().await.unwrap();
    assert_eq!(body["answer"], NO_DOCUMENTS_MESSAGE);
}

#[tokio::test]
async fn upload_rejections() {
    let server = TestServer::start(ChatBehavior::Echo).await;

    let resp = server.upload(1, "notes.txt", b"hello".to_vec()).await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(error_code(resp).await, "unsupported_format");

    let resp = server.upload(1, "broken.docx", b"not a zip".to_vec()).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(resp).await, "extraction_failed");

    let resp = server
        .client
        .post(server.url("/upload"))
        .header("X-User-Id", "1")
        .body(docx_with_text("x"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let list: Value = server.get(1, "/documents", None).await.json().await.unwrap();
    assert!(list["documents"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_query_is_bad_request() {
    let server = TestServer::start(ChatBehavior::Echo).await;
    let resp = server.ask(1, "  ").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(resp).await, "bad_request");
}

#[tokio::test]
async fn admin_stats_require_admin_role() {
    let server = TestServer::start(ChatBehavior::Echo).await;
    server.upload(1, "a.docx", docx_with_text("alpha")).await;
    server.upload(2, "b.docx", docx_with_text("beta")).await;

    let resp = server.get(1, "/admin/stats", None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = server.get(1, "/admin/stats", Some("admin")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let stats: Value = resp.json().await.unwrap();
    assert_eq!(stats["total_users"], 2);
    assert_eq!(stats["total_documents"], 2);
    assert_eq!(stats["total_questions"], 0);
}

#[tokio::test]
async fn admin_stats_list_users_in_id_order() {
    let server = TestServer::start(ChatBehavior::Echo).await;
    server.upload(9, "z.docx", docx_with_text("zeta")).await;
    server.upload(3, "c.docx", docx_with_text("gamma")).await;
    server.upload(3, "d.docx", docx_with_text("delta")).await;
    server.ask(3, "gamma?").await;

    let stats: Value = server
        .get(1, "/admin/stats", Some("admin"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(
        stats["user_stats"],
        json!([
            { "user_id": 3, "files_uploaded_count": 2, "questions_asked_count": 1 },
            { "user_id": 9, "files_uploaded_count": 1, "questions_asked_count": 0 }
        ])
    );
    assert_eq!(stats["total_documents"], 3);
}

#[tokio::test]
async fn exhausted_llm_is_service_unavailable() {
    let server = TestServer::start(ChatBehavior::Unavailable).await;
    server.upload(1, "a.docx", docx_with_text("alpha")).await;

    let resp = server.ask(1, "alpha?").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "service_unavailable");
    assert!(!body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("internal.example"));

    let stats: Value = server.get(1, "/stats/me", None).await.json().await.unwrap();
    assert_eq!(stats["questions_asked_count"], 0);
}

#[tokio::test]
async fn slow_pipeline_times_out() {
    let server = TestServer::start(ChatBehavior::Slow).await;
    server.upload(1, "a.docx", docx_with_text("alpha")).await;

    let resp = server.ask(1, "alpha?").await;
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(error_code(resp).await, "timeout");
}
