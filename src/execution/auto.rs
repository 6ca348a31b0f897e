//! Autonomous multi-step execution with token chaining.
//!
//! Runs every endpoint of an auto-executable API in catalog order on one
//! task. A token found in the response of a successful `auth` endpoint
//! replaces all other auth for the rest of the run. Parameters are filled
//! from, in order: `auto_value`, `example`, then credential name matching.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use api_harness_core::models::{Credentials, DiscoveredApi, Parameter};

use super::auth::{AuthScheme, USERNAME_KEYS};
use super::engine::{ExecutionEngine, ExecutionResult, TrustPolicy};

/// Response fields searched for a session token, highest priority first.
const TOKEN_FIELDS: &[&str] = &["token", "access_token", "accessToken"];

#[derive(Debug, thiserror::Error)]
pub enum AutoExecuteError {
    #[error("API {0} is not marked auto-executable")]
    NotAutoExecutable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoExecuteSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub token_acquired: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoExecuteReport {
    pub results: Vec<ExecutionResult>,
    pub summary: AutoExecuteSummary,
}

/// Value for a declared parameter, if one can be inferred.
pub fn infer_value(param: &Parameter, credentials: &Credentials) -> Option<Value> {
    let declared = |v: &Option<Value>| v.as_ref().filter(|v| !v.is_null()).cloned();
    declared(&param.auto_value)
        .or_else(|| declared(&param.example))
        .or_else(|| credential_for(&param.name, credentials).map(Value::String))
}

fn credential_for(name: &str, credentials: &Credentials) -> Option<String> {
    match name.to_ascii_lowercase().as_str() {
        "username" | "user" | "login" => credentials.first_of(USERNAME_KEYS),
        "password" | "value" => credentials.first_of(&["password", "value"]),
        "granttype" | "grant_type" => Some("password".to_string()),
        "ticket" => credentials.get_str("ticket"),
        _ => credentials.get_str(name),
    }
}

/// Fill every declared parameter that can be inferred.
pub fn infer_parameters(params: &[Parameter], credentials: &Credentials) -> Map<String, Value> {
    params
        .iter()
        .filter_map(|p| infer_value(p, credentials).map(|v| (p.name.clone(), v)))
        .collect()
}

/// Session token carried at the top level of a response body.
pub fn extract_token(payload: &Value) -> Option<String> {
    TOKEN_FIELDS.iter().find_map(|field| {
        payload
            .get(*field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

impl ExecutionEngine {
    /// Execute every endpoint of `api` in catalog order.
    pub async fn auto_execute(
        &self,
        api: &DiscoveredApi,
        credentials: &Credentials,
        trust: TrustPolicy,
    ) -> Result<AutoExecuteReport> {
        if !api.auto_executable {
            return Err(AutoExecuteError::NotAutoExecutable(api.id.clone()).into());
        }

        let endpoints = self.store().list_endpoints(&api.id).await?;
        let base_auth = AuthScheme::resolve(api.auth_type, credentials, self.config());
        let mut auth_token: Option<String> = None;
        let mut results = Vec::with_capacity(endpoints.len());

        info!(api_id = %api.id, endpoints = endpoints.len(), "auto-execute started");
        for endpoint in &endpoints {
            let auth = match &auth_token {
                Some(token) => AuthScheme::session(token.clone(), self.config()),
                None => base_auth.clone(),
            };
            let parameters = infer_parameters(&endpoint.parameters, credentials);
            let result = self
                .execute_with_auth(api, endpoint, &auth, parameters, trust)
                .await;

            if endpoint.is_auth() {
                match result.data.as_ref().and_then(extract_token) {
                    Some(token) => {
                        info!(api_id = %api.id, endpoint_id = %endpoint.id, "session token captured");
                        auth_token = Some(token);
                    }
                    None => {
                        warn!(api_id = %api.id, endpoint_id = %endpoint.id, "auth endpoint returned no token")
                    }
                }
            }
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let summary = AutoExecuteSummary {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            token_acquired: auth_token.is_some(),
        };
        info!(
            api_id = %api.id,
            total = summary.total,
            succeeded = summary.succeeded,
            "auto-execute finished"
        );
        Ok(AutoExecuteReport { results, summary })
    }
}
