//! The execution engine: sends requests to discovered APIs and records
//! every call.
//!
//! Failures of any kind (transport, non-2xx status, unreadable body) come
//! back as an [`ExecutionResult`] with `error` set; they never surface as
//! `Err`. Each call persists exactly one execution record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};
use url::Url;

use api_harness_core::models::{
    Credentials, DiscoveredApi, Endpoint, ExecutionStatus, NewExecution, TestStatus,
};
use api_harness_core::store::CatalogStore;

use super::auth::AuthScheme;
use super::auto::infer_parameters;
use super::request::build_request;
use crate::config::ExecutionConfig;

/// Whether to verify TLS certificates of the target API.
///
/// `AcceptInvalidCerts` only has an effect on `https` URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustPolicy {
    #[default]
    Verify,
    AcceptInvalidCerts,
}

/// Which HTTP client a call goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientKind {
    Verifying,
    Insecure,
}

/// Certificate checks are only relaxed for `https` targets, and only when asked.
fn client_kind(trust: TrustPolicy, url: &Url) -> ClientKind {
    match trust {
        TrustPolicy::AcceptInvalidCerts if url.scheme() == "https" => ClientKind::Insecure,
        _ => ClientKind::Verifying,
    }
}

/// Outcome of one endpoint call. Exactly one of `data` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub endpoint_id: String,
    pub method: String,
    pub path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub record_count: i64,
    /// Id of the persisted execution record, when persistence succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

/// One entry of a batch run.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub endpoint: Endpoint,
    pub parameters: Map<String, Value>,
}

/// What came back from the wire (or why nothing did).
struct CallOutcome {
    status_code: Option<u16>,
    payload: Value,
    error: Option<String>,
}

pub struct ExecutionEngine {
    store: Arc<dyn CatalogStore>,
    client: reqwest::Client,
    insecure_client: reqwest::Client,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn CatalogStore>, config: ExecutionConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let insecure_client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            store,
            client,
            insecure_client,
            config,
        })
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Trust policy used when a caller does not choose one.
    pub fn default_trust(&self) -> TrustPolicy {
        if self.config.accept_invalid_certs {
            TrustPolicy::AcceptInvalidCerts
        } else {
            TrustPolicy::Verify
        }
    }

    /// Execute one endpoint with credentials resolved from the API's auth type.
    pub async fn execute(
        &self,
        api: &DiscoveredApi,
        endpoint: &Endpoint,
        credentials: &Credentials,
        parameters: Map<String, Value>,
        trust: TrustPolicy,
    ) -> ExecutionResult {
        let auth = AuthScheme::resolve(api.auth_type, credentials, &self.config);
        self.execute_with_auth(api, endpoint, &auth, parameters, trust)
            .await
    }

    /// Execute endpoints one after another with shared credentials.
    /// A failing endpoint does not stop the batch.
    pub async fn batch(
        &self,
        api: &DiscoveredApi,
        items: &[BatchItem],
        credentials: &Credentials,
        trust: TrustPolicy,
    ) -> Vec<ExecutionResult> {
        let auth = AuthScheme::resolve(api.auth_type, credentials, &self.config);
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(
                self.execute_with_auth(api, &item.endpoint, &auth, item.parameters.clone(), trust)
                    .await,
            );
        }
        results
    }

    /// Call a representative endpoint with `credentials` and record the
    /// verdict on the API's configuration.
    ///
    /// Picks the first `GET` endpoint not categorised `auth`, or the first
    /// endpoint when there is none.
    pub async fn test_configuration(
        &self,
        api: &DiscoveredApi,
        credentials: &Credentials,
        trust: TrustPolicy,
    ) -> Result<(TestStatus, ExecutionResult)> {
        let endpoints = self.store.list_endpoints(&api.id).await?;
        let endpoint = endpoints
            .iter()
            .find(|e| e.method == "GET" && !e.is_auth())
            .or_else(|| endpoints.first())
            .ok_or_else(|| anyhow::anyhow!("API {} has no endpoints to test", api.id))?;

        let parameters = infer_parameters(&endpoint.parameters, credentials);
        let result = self
            .execute(api, endpoint, credentials, parameters, trust)
            .await;
        let status = if result.success {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        self.store.set_test_status(&api.id, status).await?;
        Ok((status, result))
    }

    fn client_for(&self, trust: TrustPolicy, url: &Url) -> &reqwest::Client {
        match client_kind(trust, url) {
            ClientKind::Verifying => &self.client,
            ClientKind::Insecure => &self.insecure_client,
        }
    }

    pub(crate) async fn execute_with_auth(
        &self,
        api: &DiscoveredApi,
        endpoint: &Endpoint,
        auth: &AuthScheme,
        parameters: Map<String, Value>,
        trust: TrustPolicy,
    ) -> ExecutionResult {
        if endpoint.api_id != api.id {
            return ExecutionResult {
                endpoint_id: endpoint.id.clone(),
                method: endpoint.method.clone(),
                path: endpoint.path.clone(),
                success: false,
                status_code: None,
                duration_ms: 0,
                data: None,
                error: Some(format!(
                    "endpoint {} does not belong to API {}",
                    endpoint.id, api.id
                )),
                record_count: 0,
                execution_id: None,
            };
        }

        let started = Instant::now();
        let outcome = self.send(api, endpoint, auth, &parameters, trust).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let success = outcome.error.is_none();
        let count = if success {
            record_count(&outcome.payload)
        } else {
            0
        };
        info!(
            api_id = %api.id,
            endpoint_id = %endpoint.id,
            method = %endpoint.method,
            status_code = outcome.status_code,
            duration_ms,
            success,
            "endpoint executed"
        );

        let execution_id = match self
            .store
            .insert_execution(NewExecution {
                api_id: api.id.clone(),
                endpoint_id: endpoint.id.clone(),
                project_id: api.project_id.clone(),
                status: if success {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Error
                },
                status_code: outcome.status_code,
                duration_ms,
                response_payload: outcome.payload.clone(),
                error: outcome.error.clone(),
                record_count: count,
            })
            .await
        {
            Ok(record) => Some(record.id),
            Err(err) => {
                error!(endpoint_id = %endpoint.id, error = %err, "failed to persist execution record");
                None
            }
        };

        ExecutionResult {
            endpoint_id: endpoint.id.clone(),
            method: endpoint.method.clone(),
            path: endpoint.path.clone(),
            success,
            status_code: outcome.status_code,
            duration_ms,
            data: success.then_some(outcome.payload),
            error: outcome.error,
            record_count: count,
            execution_id,
        }
    }

    async fn send(
        &self,
        api: &DiscoveredApi,
        endpoint: &Endpoint,
        auth: &AuthScheme,
        parameters: &Map<String, Value>,
        trust: TrustPolicy,
    ) -> CallOutcome {
        let failed = |message: String| CallOutcome {
            status_code: None,
            payload: Value::Null,
            error: Some(message),
        };

        let prepared = match build_request(
            &api.base_url,
            &endpoint.path,
            &endpoint.method,
            &auth.parts(),
            parameters,
        ) {
            Ok(p) => p,
            Err(err) => return failed(err.to_string()),
        };

        let client = self.client_for(trust, &prepared.url);

        let mut builder = client.request(prepared.method, prepared.url);
        for (name, value) in &prepared.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &prepared.body {
            builder = builder.body(body.to_string());
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(err) => return failed(format!("request failed: {}", err)),
        };
        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(err) => {
                return CallOutcome {
                    status_code: Some(status.as_u16()),
                    payload: Value::Null,
                    error: Some(format!("failed to read response body: {}", err)),
                }
            }
        };
        let payload = parse_body(text);

        if status.is_success() {
            CallOutcome {
                status_code: Some(status.as_u16()),
                payload,
                error: None,
            }
        } else {
            let summary = match &payload {
                Value::String(s) => s.chars().take(300).collect::<String>(),
                Value::Null => String::new(),
                other => other.to_string().chars().take(300).collect(),
            };
            CallOutcome {
                status_code: Some(status.as_u16()),
                payload,
                error: Some(format!("HTTP {}: {}", status.as_u16(), summary)),
            }
        }
    }
}

/// JSON when the body parses, raw text otherwise, `null` when empty.
fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Number of records a successful payload carries.
pub fn record_count(payload: &Value) -> i64 {
    match payload {
        Value::Null => 0,
        Value::Array(items) => items.len() as i64,
        Value::Object(map) => ["data", "items", "results", "records"]
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_array()))
            .map(|items| items.len() as i64)
            .unwrap_or(1),
        _ => 1,
    }
}
