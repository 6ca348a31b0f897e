//! Shared fixtures: scripted inference backends, a recording HTTP target
//! and SQLite-backed stores in temporary directories.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use api_harness::config::Config;
use api_harness::db;
use api_harness::inference::{
    InferenceBackend, InferenceError, InferenceRequest, Provider,
};
use api_harness::migrate;
use api_harness::sqlite_store::SqliteStore;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

// ─── Scripted inference backend ─────────────────────────────────────

pub enum Reply {
    Text(String),
    Status(u16),
    NoResponse,
}

/// Plays back replies in order; the last one repeats once the script runs out.
pub struct ScriptedBackend {
    provider: Provider,
    script: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<String>>,
    calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Self::for_provider(Provider::Gemini, replies)
    }

    pub fn for_provider(provider: Provider, replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            script: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        })
    }

    pub fn text(reply: impl Into<String>) -> Arc<Self> {
        Self::new(vec![Reply::Text(reply.into())])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, _request: &InferenceRequest) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => reply,
            None => match self.last.lock().unwrap().clone() {
                Some(text) => Reply::Text(text),
                None => Reply::NoResponse,
            },
        };
        match reply {
            Reply::Text(text) => {
                *self.last.lock().unwrap() = Some(text.clone());
                Ok(text)
            }
            Reply::Status(status) => Err(InferenceError::Http {
                provider: self.provider,
                status,
                body: format!("scripted {}", status),
            }),
            Reply::NoResponse => Err(InferenceError::NoResponse {
                provider: self.provider,
                message: "connection reset".to_string(),
            }),
        }
    }
}

// ─── Recording HTTP target ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

type Captured = Arc<Mutex<Vec<CapturedRequest>>>;

/// A fake target API that records every request.
///
/// | Path | Response |
/// |------|----------|
/// | `/login` | `{"token": "T1"}` |
/// | `/oauth/token` | `{"access_token": "AT"}` |
/// | `/users` | two users |
/// | `/fail` | 500 |
/// | `/secure` | 401 unless header `token: T1` |
/// | `/text` | plain text |
/// | anything else | 404 |
pub struct TargetServer {
    pub addr: SocketAddr,
    captured: Captured,
}

impl TargetServer {
    pub async fn start() -> Self {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .fallback(record_and_respond)
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, captured }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().unwrap().clone()
    }
}

async fn record_and_respond(
    State(captured): State<Captured>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = CapturedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
            .collect(),
        body: serde_json::from_slice(&body).ok(),
    };
    let authorized = request.header("token") == Some("T1");
    captured.lock().unwrap().push(request);

    match uri.path() {
        "/login" => Json(json!({ "token": "T1", "expires_in": 3600 })).into_response(),
        "/oauth/token" => Json(json!({ "access_token": "AT" })).into_response(),
        "/users" => Json(json!([{ "id": 1 }, { "id": 2 }])).into_response(),
        "/fail" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "boom" })),
        )
            .into_response(),
        "/secure" if authorized => Json(json!({ "items": [1, 2, 3] })).into_response(),
        "/secure" => (StatusCode::UNAUTHORIZED, "missing token").into_response(),
        "/text" => "plain text body".into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

// ─── SQLite fixtures ────────────────────────────────────────────────

/// Config pointing at a fresh database in `tmp`, with no inference keys.
pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data").join("apih.sqlite");
    config.server.bind = "127.0.0.1:0".to_string();
    config.inference.gemini.api_key_env = "APIH_TEST_UNSET_GEMINI_KEY".to_string();
    config.inference.openai.api_key_env = "APIH_TEST_UNSET_OPENAI_KEY".to_string();
    config.inference.retry_base_delay_ms = 0;
    config.file_store.poll_interval_ms = 1;
    config
}

pub async fn sqlite_store(config: &Config) -> Arc<SqliteStore> {
    let pool = db::connect(config).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

/// The catalog reply used throughout the tests, pointed at `base_url`.
pub fn users_catalog(base_url: &str) -> String {
    format!(
        r#"```json
{{"apis":[{{"name":"Users API","base_url":"{}","auth_type":"basic","endpoints":[{{"method":"GET","path":"/users","parameters":[]}}]}}]}}
```"#,
        base_url
    )
}
