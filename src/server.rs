//! HTTP server.
//!
//! A thin JSON layer over the pipeline, the catalog store and the
//! execution engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/projects/{project_id}/documents/upload` | Ingest a document, analysis runs in the background (202) |
//! | `GET`  | `/documents/{id}` | Document with its current status |
//! | `POST` | `/documents/{id}/retry` | Re-run analysis of a failed or stranded document (202) |
//! | `GET`  | `/documents/{id}/apis` | Discovered APIs with endpoints |
//! | `GET`  | `/apis/{id}` | One API with endpoints and configuration |
//! | `POST` | `/apis/{id}/configure` | Upsert credentials |
//! | `POST` | `/apis/{id}/test` | Test the active configuration |
//! | `POST` | `/apis/{id}/execute` | Single (`endpoint_id`) or batch (`endpoint_ids` / `endpoints`) execution |
//! | `POST` | `/apis/{id}/auto-execute` | Run every endpoint with token chaining |
//! | `GET`  | `/apis/{id}/executions` | Recent execution records |
//! | `DELETE` | `/apis/{id}` | Delete an API (`?force=true` when executions exist) |
//! | `POST` | `/projects/{project_id}/insights` | Business insights over captured data |
//! | `POST` | `/projects/{project_id}/dashboards/suggest` | Dashboard suggestions over captured data |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "API not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use api_harness_core::models::{Credentials, DiscoveredApi, Endpoint, TransitionError};

use crate::config::Config;
use crate::context::AppContext;
use crate::execution::auto::infer_parameters;
use crate::execution::{AutoExecuteError, BatchItem, TrustPolicy};
use crate::extract::ExtractError;
use crate::inference::InferenceSettings;
use crate::insights;
use crate::pipeline::PipelineError;

/// Bytes of captured data handed to the insight prompts.
const INSIGHT_DATA_CHARS: usize = 50_000;

/// Starts the HTTP server on `[server].bind`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = AppContext::open(config).await?;
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("API harness listening on http://{}", bind_addr);

    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

/// Build the router over an existing context.
pub fn router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/projects/{project_id}/documents/upload",
            post(handle_upload),
        )
        .route("/documents/{id}", get(handle_get_document))
        .route("/documents/{id}/retry", post(handle_retry))
        .route("/documents/{id}/apis", get(handle_document_apis))
        .route("/apis/{id}", get(handle_get_api).delete(handle_delete_api))
        .route("/apis/{id}/configure", post(handle_configure))
        .route("/apis/{id}/test", post(handle_test))
        .route("/apis/{id}/execute", post(handle_execute))
        .route("/apis/{id}/auto-execute", post(handle_auto_execute))
        .route("/apis/{id}/executions", get(handle_executions))
        .route("/projects/{project_id}/insights", post(handle_insights))
        .route(
            "/projects/{project_id}/dashboards/suggest",
            post(handle_dashboards),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Map component errors onto the HTTP error contract.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        if err.downcast_ref::<ExtractError>().is_some()
            || err.downcast_ref::<AutoExecuteError>().is_some()
        {
            return bad_request(message);
        }
        if err.downcast_ref::<TransitionError>().is_some() {
            return conflict(message);
        }
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::DocumentNotFound(_)) => not_found(message),
            Some(PipelineError::AlreadyQueued(_)) => conflict(message),
            _ => {
                error!(error = %message, "request failed");
                internal(message)
            }
        }
    }
}

/// Parse an optional JSON body; an empty body yields `T::default()`.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| bad_request(format!("invalid JSON body: {}", e)))
}

async fn load_api(ctx: &AppContext, id: &str) -> Result<DiscoveredApi, AppError> {
    ctx.store
        .get_api(id)
        .await?
        .ok_or_else(|| not_found(format!("API not found: {}", id)))
}

/// Fetch an endpoint and check it belongs to `api`.
async fn load_endpoint(
    ctx: &AppContext,
    api: &DiscoveredApi,
    endpoint_id: &str,
) -> Result<Endpoint, AppError> {
    match ctx.store.get_endpoint(endpoint_id).await? {
        Some(endpoint) if endpoint.api_id == api.id => Ok(endpoint),
        _ => Err(not_found(format!(
            "endpoint {} not found on API {}",
            endpoint_id, api.id
        ))),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_base64: Option<String>,
    #[serde(default)]
    settings: InferenceSettings,
}

async fn handle_upload(
    State(ctx): State<AppContext>,
    Path(project_id): Path<String>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if req.filename.trim().is_empty() {
        return Err(bad_request("filename must not be empty"));
    }
    let bytes = match (req.content_base64, req.content) {
        (Some(b64), _) => STANDARD
            .decode(b64.trim())
            .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?,
        (None, Some(text)) => text.into_bytes(),
        (None, None) => return Err(bad_request("one of content or content_base64 is required")),
    };

    let ingested = ctx
        .pipeline
        .ingest(
            &project_id,
            &req.filename,
            req.mime_type.as_deref(),
            &bytes,
            req.settings,
        )
        .await?;

    // The ticket is dropped: completion is observed by re-fetching the document.
    let status = match ingested.ticket {
        Some(_) => "analyzing",
        None => ingested.document.status.as_str(),
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": status, "document": ingested.document })),
    ))
}

async fn handle_get_document(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let document = ctx
        .store
        .get_document(&id)
        .await?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))?;
    Ok(Json(json!({ "document": document })))
}

#[derive(Deserialize, Default)]
struct RetryRequest {
    #[serde(default)]
    settings: InferenceSettings,
}

async fn handle_retry(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req: RetryRequest = optional_body(&body)?;
    let (document, _ticket) = ctx.pipeline.retry(&id, req.settings).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "analyzing", "document": document })),
    ))
}

#[derive(Serialize)]
struct ApiView {
    #[serde(flatten)]
    api: DiscoveredApi,
    endpoints: Vec<Endpoint>,
}

async fn handle_document_apis(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if ctx.store.get_document(&id).await?.is_none() {
        return Err(not_found(format!("document not found: {}", id)));
    }
    let mut apis = Vec::new();
    for api in ctx.store.list_document_apis(&id).await? {
        let endpoints = ctx.store.list_endpoints(&api.id).await?;
        apis.push(ApiView { api, endpoints });
    }
    Ok(Json(json!({ "apis": apis })))
}

// ============ APIs ============

async fn handle_get_api(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let api = load_api(&ctx, &id).await?;
    let endpoints = ctx.store.list_endpoints(&id).await?;
    let config = ctx.store.get_active_configuration(&id).await?;
    Ok(Json(
        json!({ "api": api, "endpoints": endpoints, "config": config }),
    ))
}

#[derive(Deserialize)]
struct ConfigureRequest {
    credentials: Credentials,
}

async fn handle_configure(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<ConfigureRequest>,
) -> Result<Json<Value>, AppError> {
    load_api(&ctx, &id).await?;
    let config = ctx
        .store
        .upsert_configuration(&id, &req.credentials)
        .await?;
    info!(api_id = %id, "configuration saved");
    Ok(Json(json!({ "config": config })))
}

#[derive(Deserialize, Default)]
struct TrustRequest {
    #[serde(default)]
    trust: Option<TrustPolicy>,
}

async fn handle_test(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let req: TrustRequest = optional_body(&body)?;
    let api = load_api(&ctx, &id).await?;
    if ctx.store.get_active_configuration(&id).await?.is_none() {
        return Err(bad_request(format!("API {} has no active configuration", id)));
    }
    let credentials = ctx.effective_credentials(&api).await?;
    let trust = req.trust.unwrap_or_else(|| ctx.engine.default_trust());

    let (_status, result) = ctx
        .engine
        .test_configuration(&api, &credentials, trust)
        .await?;
    let config = ctx.store.get_active_configuration(&id).await?;
    Ok(Json(json!({ "config": config, "results": [result] })))
}

#[derive(Deserialize)]
struct BatchEntry {
    endpoint_id: String,
    #[serde(default)]
    parameters: Map<String, Value>,
}

#[derive(Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    endpoint_id: Option<String>,
    #[serde(default)]
    endpoint_ids: Option<Vec<String>>,
    #[serde(default)]
    endpoints: Option<Vec<BatchEntry>>,
    #[serde(default)]
    parameters: Map<String, Value>,
    /// Overrides stored credentials key by key.
    #[serde(default)]
    credentials: Option<Credentials>,
    #[serde(default)]
    trust: Option<TrustPolicy>,
}

/// Inferred values first, explicit request values on top.
fn merge_parameters(
    endpoint: &Endpoint,
    credentials: &Credentials,
    explicit: Map<String, Value>,
) -> Map<String, Value> {
    let mut params = infer_parameters(&endpoint.parameters, credentials);
    params.extend(explicit);
    params
}

async fn handle_execute(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<Value>, AppError> {
    let api = load_api(&ctx, &id).await?;
    let stored = ctx.effective_credentials(&api).await?;
    let credentials = match &req.credentials {
        Some(overrides) => overrides.merged_over(&stored),
        None => stored,
    };
    let trust = req.trust.unwrap_or_else(|| ctx.engine.default_trust());

    let entries: Vec<BatchEntry> = match (req.endpoint_id, req.endpoint_ids, req.endpoints) {
        (Some(endpoint_id), None, None) => {
            let endpoint = load_endpoint(&ctx, &api, &endpoint_id).await?;
            let parameters = merge_parameters(&endpoint, &credentials, req.parameters);
            let result = ctx
                .engine
                .execute(&api, &endpoint, &credentials, parameters, trust)
                .await;
            return Ok(Json(json!({ "results": [result] })));
        }
        (None, Some(ids), None) => ids
            .into_iter()
            .map(|endpoint_id| BatchEntry {
                endpoint_id,
                parameters: req.parameters.clone(),
            })
            .collect(),
        (None, None, Some(entries)) => entries,
        _ => {
            return Err(bad_request(
                "exactly one of endpoint_id, endpoint_ids or endpoints is required",
            ))
        }
    };

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let endpoint = load_endpoint(&ctx, &api, &entry.endpoint_id).await?;
        let parameters = merge_parameters(&endpoint, &credentials, entry.parameters);
        items.push(BatchItem {
            endpoint,
            parameters,
        });
    }
    let results = ctx.engine.batch(&api, &items, &credentials, trust).await;
    Ok(Json(json!({ "results": results })))
}

async fn handle_auto_execute(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let req: TrustRequest = optional_body(&body)?;
    let api = load_api(&ctx, &id).await?;
    let credentials = ctx.effective_credentials(&api).await?;
    let trust = req.trust.unwrap_or_else(|| ctx.engine.default_trust());

    let report = ctx.engine.auto_execute(&api, &credentials, trust).await?;
    Ok(Json(
        json!({ "results": report.results, "summary": report.summary }),
    ))
}

#[derive(Deserialize)]
struct ExecutionsQuery {
    #[serde(default = "default_executions_limit")]
    limit: i64,
}

fn default_executions_limit() -> i64 {
    50
}

async fn handle_executions(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(q): Query<ExecutionsQuery>,
) -> Result<Json<Value>, AppError> {
    load_api(&ctx, &id).await?;
    let executions = ctx.store.list_executions(&id, q.limit.clamp(1, 500)).await?;
    Ok(Json(json!({ "executions": executions })))
}

#[derive(Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    force: bool,
}

async fn handle_delete_api(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> Result<Json<Value>, AppError> {
    load_api(&ctx, &id).await?;
    let endpoints = ctx.store.count_endpoints(&id).await?;
    let configurations = ctx.store.count_configurations(&id).await?;
    let executions = ctx.store.count_executions(&id).await?;

    if executions > 0 && !q.force {
        return Err(conflict(format!(
            "API {} has {} execution records; pass force=true to delete them",
            id, executions
        )));
    }
    ctx.store.delete_api(&id).await?;
    info!(api_id = %id, endpoints, configurations, executions, "API deleted");
    Ok(Json(json!({
        "deleted": true,
        "endpoints": endpoints,
        "configurations": configurations,
        "executions": executions,
    })))
}

// ============ Insights ============

#[derive(Deserialize, Default)]
struct InsightRequest {
    #[serde(default)]
    settings: InferenceSettings,
    #[serde(default)]
    limit: Option<i64>,
}

async fn project_data(
    ctx: &AppContext,
    project_id: &str,
    limit: Option<i64>,
) -> Result<String, AppError> {
    let records = ctx
        .store
        .list_project_executions(project_id, limit.unwrap_or(50).clamp(1, 500))
        .await?;
    let data = insights::collect_data(&records, INSIGHT_DATA_CHARS);
    if data.is_empty() {
        return Err(bad_request(format!(
            "project {} has no successful executions to analyze",
            project_id
        )));
    }
    Ok(data)
}

async fn handle_insights(
    State(ctx): State<AppContext>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let req: InsightRequest = optional_body(&body)?;
    let data = project_data(&ctx, &project_id, req.limit).await?;
    let report = insights::generate_insights(&ctx.dispatcher, &data, &req.settings)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "insights": report })))
}

async fn handle_dashboards(
    State(ctx): State<AppContext>,
    Path(project_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let req: InsightRequest = optional_body(&body)?;
    let data = project_data(&ctx, &project_id, req.limit).await?;
    let suggestions = insights::suggest_dashboards(&ctx.dispatcher, &data, &req.settings)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "dashboards": suggestions.dashboards })))
}
