//! Analysis pipeline and inference dispatch, end to end over SQLite.

mod common;

use std::sync::Arc;
use std::time::Duration;

use api_harness::analyzer;
use api_harness::file_store::{FileState, FileStore, FileStoreError, UploadedFile};
use api_harness::inference::{
    Dispatcher, InferenceError, InferenceSettings, Provider, RetryPolicy,
};
use api_harness::pipeline::{AnalysisOutcome, Pipeline};
use api_harness_core::models::{AuthType, DocumentStatus};
use api_harness_core::store::CatalogStore;
use async_trait::async_trait;
use common::{sqlite_store, test_config, users_catalog, Reply, ScriptedBackend};
use tempfile::TempDir;

fn dispatcher(backend: Arc<ScriptedBackend>) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(RetryPolicy::new(2, Duration::ZERO)).with_backend(backend))
}

/// A file store whose uploads never leave `PROCESSING`.
struct StuckFileStore {
    deleted: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl FileStore for StuckFileStore {
    async fn upload(
        &self,
        _bytes: &[u8],
        display_name: &str,
        _mime_type: &str,
    ) -> Result<UploadedFile, FileStoreError> {
        Ok(UploadedFile {
            name: format!("files/{}", display_name),
            uri: format!("https://files.example/{}", display_name),
        })
    }

    async fn status(&self, _name: &str) -> Result<FileState, FileStoreError> {
        Ok(FileState::Processing)
    }

    async fn delete(&self, name: &str) -> Result<(), FileStoreError> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_document_analyzed_to_completed() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = sqlite_store(&config).await;
    let backend = ScriptedBackend::text(
        r#"{"apis":[{"name":"Users API","base_url":"https://x","auth_type":"basic","endpoints":[{"method":"GET","path":"/users","parameters":[]}]}]}"#,
    );
    let pipeline = Pipeline::new(
        store.clone(),
        dispatcher(backend.clone()),
        Arc::new(api_harness::file_store::InlineFileStore),
        Duration::from_millis(1),
        3,
    );

    let ingested = pipeline
        .ingest(
            "project-1",
            "users.md",
            Some("text/markdown"),
            b"GET /users list users, Basic Auth",
            InferenceSettings::default(),
        )
        .await
        .unwrap();
    assert_eq!(ingested.document.status, DocumentStatus::Analyzed);

    let outcome = ingested.ticket.unwrap().wait().await.unwrap();
    assert_eq!(
        outcome,
        AnalysisOutcome::Completed {
            document_id: ingested.document.id.clone(),
            api_count: 1
        }
    );

    let doc = store.get_document(&ingested.document.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert!(doc.error_message.is_none());

    let apis = store.list_document_apis(&doc.id).await.unwrap();
    assert_eq!(apis.len(), 1);
    assert_eq!(apis[0].name, "Users API");
    assert_eq!(apis[0].auth_type, AuthType::Basic);
    assert_eq!(apis[0].project_id, "project-1");

    let endpoints = store.list_endpoints(&apis[0].id).await.unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].method, "GET");
    assert_eq!(endpoints[0].path, "/users");
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_analysis_failure_then_retry_completes() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = sqlite_store(&config).await;
    let backend = ScriptedBackend::new(vec![
        Reply::Text("Sorry, I cannot help with that.".into()),
        Reply::Text(users_catalog("https://x")),
    ]);
    let pipeline = Pipeline::new(
        store.clone(),
        dispatcher(backend),
        Arc::new(api_harness::file_store::InlineFileStore),
        Duration::from_millis(1),
        3,
    );

    let ingested = pipeline
        .ingest("p", "a.md", None, b"docs", InferenceSettings::default())
        .await
        .unwrap();
    let outcome = ingested.ticket.unwrap().wait().await.unwrap();
    assert!(matches!(outcome, AnalysisOutcome::Failed { .. }));

    let doc = store.get_document(&ingested.document.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Error);
    assert!(doc.error_message.as_deref().unwrap().contains("no structured output"));
    assert!(store.list_document_apis(&doc.id).await.unwrap().is_empty());

    let (_, ticket) = pipeline
        .retry(&doc.id, InferenceSettings::default())
        .await
        .unwrap();
    assert_eq!(ticket.wait().await.unwrap().status(), DocumentStatus::Completed);
    assert_eq!(store.list_document_apis(&doc.id).await.unwrap().len(), 1);

    // Completed is terminal.
    assert!(pipeline
        .retry(&doc.id, InferenceSettings::default())
        .await
        .is_err());
}

#[tokio::test]
async fn test_stranded_analyzed_document_can_be_retried() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = sqlite_store(&config).await;

    // Simulate a process that died after staging: document left in `analyzed`.
    let doc = store
        .create_document(api_harness_core::models::NewDocument {
            project_id: "p".into(),
            filename: "a.md".into(),
            mime_type: "text/markdown".into(),
            content: "GET /users".into(),
            content_hash: "h".into(),
        })
        .await
        .unwrap();
    store
        .transition_document(&doc.id, DocumentStatus::Analyzed, None)
        .await
        .unwrap();

    let pipeline = Pipeline::new(
        store.clone(),
        dispatcher(ScriptedBackend::text(users_catalog("https://x"))),
        Arc::new(api_harness::file_store::InlineFileStore),
        Duration::from_millis(1),
        3,
    );
    let (_, ticket) = pipeline
        .retry(&doc.id, InferenceSettings::default())
        .await
        .unwrap();
    assert_eq!(ticket.wait().await.unwrap().status(), DocumentStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_file_poll_timeout_marks_document_error() {
    let store = Arc::new(api_harness_core::store::memory::InMemoryStore::new());
    let files = Arc::new(StuckFileStore {
        deleted: std::sync::Mutex::new(Vec::new()),
    });
    let backend = ScriptedBackend::text(users_catalog("https://x"));
    let pipeline = Pipeline::new(
        store.clone(),
        dispatcher(backend.clone()),
        files.clone(),
        Duration::from_secs(2),
        5,
    );

    let ingested = pipeline
        .ingest("p", "guide.md", None, b"GET /users", InferenceSettings::default())
        .await
        .unwrap();
    assert!(ingested.ticket.is_none());
    assert_eq!(ingested.document.status, DocumentStatus::Error);
    assert!(ingested
        .document
        .error_message
        .as_deref()
        .unwrap()
        .contains("not active after 5"));
    assert_eq!(files.deleted.lock().unwrap().as_slice(), ["files/guide.md"]);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispatcher_retries_503_with_linear_backoff() {
    let backend = ScriptedBackend::new(vec![
        Reply::Status(503),
        Reply::Status(503),
        Reply::Text(r#"{"ok": true}"#.into()),
    ]);
    let base = Duration::from_secs(2);
    let dispatcher = Dispatcher::new(RetryPolicy::new(2, base)).with_backend(backend.clone());

    let start = tokio::time::Instant::now();
    let value = dispatcher
        .infer_json("p", "c", &InferenceSettings::default(), None)
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(value["ok"], true);
    assert_eq!(backend.calls(), 3);
    // base × 1 + base × 2
    assert!(elapsed >= base * 3, "elapsed {:?}", elapsed);
    assert!(elapsed < base * 4, "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_dispatcher_gives_up_after_max_retries() {
    let backend = ScriptedBackend::new(vec![
        Reply::NoResponse,
        Reply::Status(502),
        Reply::Status(504),
        Reply::Text("{}".into()),
    ]);
    let dispatcher =
        Dispatcher::new(RetryPolicy::new(2, Duration::from_secs(2))).with_backend(backend.clone());

    let err = dispatcher
        .infer_text("p", "c", &InferenceSettings::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::Http { status: 504, .. }));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dispatcher_does_not_retry_401() {
    let backend = ScriptedBackend::new(vec![Reply::Status(401), Reply::Text("{}".into())]);
    let dispatcher =
        Dispatcher::new(RetryPolicy::new(2, Duration::from_secs(2))).with_backend(backend.clone());

    let start = tokio::time::Instant::now();
    let err = dispatcher
        .infer_text("p", "c", &InferenceSettings::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, InferenceError::Http { status: 401, .. }));
    assert_eq!(backend.calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn test_provider_hint_routes_to_backend() {
    let gemini = ScriptedBackend::for_provider(Provider::Gemini, vec![Reply::Text("{\"from\":\"gemini\"}".into())]);
    let openai = ScriptedBackend::for_provider(Provider::OpenAi, vec![Reply::Text("{\"from\":\"openai\"}".into())]);
    let dispatcher = Dispatcher::new(RetryPolicy::default())
        .with_backend(gemini.clone())
        .with_backend(openai.clone());

    let openai_settings = InferenceSettings {
        provider: Some("openai".into()),
        model: None,
    };
    let v = dispatcher.infer_json("p", "c", &openai_settings, None).await.unwrap();
    assert_eq!(v["from"], "openai");

    let unknown = InferenceSettings {
        provider: Some("unknown-vendor".into()),
        model: None,
    };
    let v = dispatcher.infer_json("p", "c", &unknown, None).await.unwrap();
    assert_eq!(v["from"], "gemini");
}

#[tokio::test]
async fn test_missing_backend_is_not_configured() {
    let dispatcher = Dispatcher::new(RetryPolicy::default());
    let err = dispatcher
        .infer_text("p", "c", &InferenceSettings::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::NotConfigured { provider: Provider::Gemini }));
}

#[tokio::test]
async fn test_analyzer_recovers_fenced_catalog() {
    let reply = format!("Here you go!\n{}\nAnything else?", users_catalog("https://x"));
    let dispatcher = dispatcher(ScriptedBackend::text(reply));
    let catalog = analyzer::analyze(
        &dispatcher,
        "GET /users",
        "text/markdown",
        &InferenceSettings::default(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(catalog.apis.len(), 1);
    assert_eq!(catalog.apis[0].endpoints[0].path, "/users");
}
