//! Catalog data models.
//!
//! These types represent the documents, discovered APIs, endpoints,
//! credentials and execution records that flow between the analysis
//! pipeline and the execution engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============ Document ============

/// Lifecycle state of an ingested document.
///
/// Legal moves: `processing → analyzed → completed`, and
/// `processing | analyzed → error`. `completed` and `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Processing,
    Analyzed,
    Completed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Analyzed => "analyzed",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(DocumentStatus::Processing),
            "analyzed" => Some(DocumentStatus::Analyzed),
            "completed" => Some(DocumentStatus::Completed),
            "error" => Some(DocumentStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Error)
    }

    /// Whether the forward state machine allows moving to `next`.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Processing, Analyzed) | (Analyzed, Completed) | (Processing, Error) | (Analyzed, Error)
        )
    }

    /// Validate a forward transition.
    pub fn transition(self, next: DocumentStatus) -> Result<DocumentStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    /// Re-enter analysis through the explicit retry trigger.
    ///
    /// Only failed documents, or documents stranded in `analyzed`, can be
    /// reopened. This is not part of the forward state machine.
    pub fn reopen(self) -> Result<DocumentStatus, TransitionError> {
        match self {
            DocumentStatus::Error | DocumentStatus::Analyzed => Ok(DocumentStatus::Analyzed),
            other => Err(TransitionError {
                from: other,
                to: DocumentStatus::Analyzed,
            }),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected document status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal document status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

/// A source document owned by a project.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub project_id: String,
    pub filename: String,
    pub mime_type: String,
    /// Extracted plain text. Omitted from JSON responses.
    #[serde(skip_serializing)]
    pub content: String,
    pub content_hash: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    /// Name of the uploaded copy in the inference file store, once known.
    pub remote_name: Option<String>,
    pub remote_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a document. New documents always start in `processing`.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub project_id: String,
    pub filename: String,
    pub mime_type: String,
    pub content: String,
    pub content_hash: String,
}

// ============ Auth ============

/// Authentication style declared by a discovered API.
///
/// Free-form strings coming back from a model are folded onto the closest
/// variant; anything unrecognised becomes [`AuthType::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Bearer,
    ApiKey,
    Token,
    Ticket,
    OAuth,
    Custom,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::Basic => "basic",
            AuthType::Bearer => "bearer",
            AuthType::ApiKey => "api_key",
            AuthType::Token => "token",
            AuthType::Ticket => "ticket",
            AuthType::OAuth => "oauth",
            AuthType::Custom => "custom",
        }
    }

    pub fn parse_lenient(s: &str) -> AuthType {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "" | "none" | "no_auth" | "public" => AuthType::None,
            "basic" | "basic_auth" | "http_basic" => AuthType::Basic,
            "bearer" | "bearer_token" | "jwt" => AuthType::Bearer,
            "api_key" | "apikey" | "key" => AuthType::ApiKey,
            "token" | "session_token" => AuthType::Token,
            "ticket" => AuthType::Ticket,
            "oauth" | "oauth2" | "oauth_2" | "oauth2.0" => AuthType::OAuth,
            _ => AuthType::Custom,
        }
    }
}

impl From<String> for AuthType {
    fn from(s: String) -> Self {
        AuthType::parse_lenient(&s)
    }
}

impl From<AuthType> for String {
    fn from(a: AuthType) -> Self {
        a.as_str().to_string()
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credentials blob: a flat JSON object of secrets and hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub Map<String, Value>);

impl Credentials {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value for `key`. Numbers and booleans are stringified;
    /// empty strings count as absent.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// First present value among `keys`, in order.
    pub fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.get_str(k))
    }

    /// Overlay `self` on top of `base`; keys in `self` win.
    pub fn merged_over(&self, base: &Credentials) -> Credentials {
        let mut out = base.0.clone();
        for (k, v) in &self.0 {
            out.insert(k.clone(), v.clone());
        }
        Credentials(out)
    }
}

impl From<Map<String, Value>> for Credentials {
    fn from(map: Map<String, Value>) -> Self {
        Credentials(map)
    }
}

// ============ Catalog ============

/// Model output often carries `null` for fields it has nothing to say about;
/// read it as the field's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A declared endpoint parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub required: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub param_type: Option<String>,
    /// Where the parameter goes (`query`, `body`, `path`, `header`), when stated.
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_value: Option<Value>,
}

/// An endpoint as extracted from a document, before persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEndpoint {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub business_value: Option<String>,
}

/// A persisted endpoint. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub id: String,
    pub api_id: String,
    /// Catalog order within the API.
    pub position: i64,
    pub method: String,
    pub path: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub parameters: Vec<Parameter>,
    pub business_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn is_auth(&self) -> bool {
        self.category
            .as_deref()
            .is_some_and(|c| c.trim().eq_ignore_ascii_case("auth"))
    }
}

/// An API surface as extracted from a document, before persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewApi {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub base_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub auth_type: AuthType,
    /// Free-form guidance on how to authenticate (text or object).
    #[serde(default)]
    pub auth_details: Option<Value>,
    #[serde(default)]
    pub business_value: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub use_cases: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub auto_executable: bool,
    /// Sample credentials found in the documentation, if any.
    #[serde(default, deserialize_with = "null_as_default")]
    pub credentials: Credentials,
    #[serde(default, deserialize_with = "null_as_default")]
    pub endpoints: Vec<NewEndpoint>,
}

/// A persisted API surface discovered in a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredApi {
    pub id: String,
    pub project_id: String,
    pub document_id: String,
    pub name: String,
    pub description: Option<String>,
    pub base_url: String,
    pub auth_type: AuthType,
    pub auth_details: Option<Value>,
    pub business_value: Option<String>,
    pub use_cases: Vec<String>,
    pub auto_executable: bool,
    #[serde(skip_serializing)]
    pub extracted_credentials: Credentials,
    pub created_at: DateTime<Utc>,
}

impl DiscoveredApi {
    /// Materialise an extracted API under fresh identifiers.
    pub fn from_new(
        id: String,
        project_id: &str,
        document_id: &str,
        api: &NewApi,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project_id: project_id.to_string(),
            document_id: document_id.to_string(),
            name: api.name.clone(),
            description: api.description.clone(),
            base_url: api.base_url.clone(),
            auth_type: api.auth_type,
            auth_details: api.auth_details.clone(),
            business_value: api.business_value.clone(),
            use_cases: api.use_cases.clone(),
            auto_executable: api.auto_executable,
            extracted_credentials: api.credentials.clone(),
            created_at,
        }
    }
}

impl Endpoint {
    pub fn from_new(
        id: String,
        api_id: &str,
        position: i64,
        ep: &NewEndpoint,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            api_id: api_id.to_string(),
            position,
            method: ep.method.trim().to_ascii_uppercase(),
            path: ep.path.clone(),
            description: ep.description.clone(),
            category: ep.category.clone(),
            parameters: ep.parameters.clone(),
            business_value: ep.business_value.clone(),
            created_at,
        }
    }
}

// ============ Configuration ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Untested,
    Passed,
    Failed,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Untested => "untested",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "untested" => Some(TestStatus::Untested),
            "passed" => Some(TestStatus::Passed),
            "failed" => Some(TestStatus::Failed),
            _ => None,
        }
    }
}

/// Credentials for one discovered API. At most one per API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiConfiguration {
    pub id: String,
    pub api_id: String,
    #[serde(skip_serializing)]
    pub credentials: Credentials,
    pub is_active: bool,
    pub test_status: TestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============ Executions ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ExecutionStatus::Success),
            "error" => Some(ExecutionStatus::Error),
            _ => None,
        }
    }
}

/// Input for an append-only execution record.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub api_id: String,
    pub endpoint_id: String,
    pub project_id: String,
    pub status: ExecutionStatus,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub response_payload: Value,
    pub error: Option<String>,
    pub record_count: i64,
}

/// One endpoint invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub api_id: String,
    pub endpoint_id: String,
    pub project_id: String,
    pub status: ExecutionStatus,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub response_payload: Value,
    pub error: Option<String>,
    pub record_count: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use DocumentStatus::*;

    #[test]
    fn forward_transitions_only() {
        let all = [Processing, Analyzed, Completed, Error];
        let allowed = [
            (Processing, Analyzed),
            (Analyzed, Completed),
            (Processing, Error),
            (Analyzed, Error),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn terminal_states_reject_transitions() {
        assert!(Completed.transition(Error).is_err());
        assert!(Error.transition(Completed).is_err());
        assert!(Completed.transition(Analyzed).is_err());
    }

    #[test]
    fn reopen_only_from_error_or_analyzed() {
        assert_eq!(Error.reopen().unwrap(), Analyzed);
        assert_eq!(Analyzed.reopen().unwrap(), Analyzed);
        assert!(Completed.reopen().is_err());
        assert!(Processing.reopen().is_err());
    }

    #[test]
    fn auth_type_lenient_parsing() {
        assert_eq!(AuthType::parse_lenient("Basic"), AuthType::Basic);
        assert_eq!(AuthType::parse_lenient("API-Key"), AuthType::ApiKey);
        assert_eq!(AuthType::parse_lenient("oauth2"), AuthType::OAuth);
        assert_eq!(AuthType::parse_lenient(""), AuthType::None);
        assert_eq!(AuthType::parse_lenient("hmac-signature"), AuthType::Custom);
    }

    #[test]
    fn auth_type_serde_uses_wire_names() {
        let parsed: AuthType = serde_json::from_str("\"api_key\"").unwrap();
        assert_eq!(parsed, AuthType::ApiKey);
        assert_eq!(serde_json::to_string(&AuthType::Ticket).unwrap(), "\"ticket\"");
    }

    #[test]
    fn credentials_lookup_and_merge() {
        let mut base = Credentials::new();
        base.insert("username", "docs-user");
        base.insert("port", 8080);
        let mut over = Credentials::new();
        over.insert("username", "real-user");
        over.insert("password", "");

        let merged = over.merged_over(&base);
        assert_eq!(merged.get_str("username").as_deref(), Some("real-user"));
        assert_eq!(merged.get_str("port").as_deref(), Some("8080"));
        assert_eq!(merged.get_str("password"), None);
        assert_eq!(
            merged.first_of(&["userName", "username"]).as_deref(),
            Some("real-user")
        );
    }

    #[test]
    fn new_api_tolerates_missing_fields() {
        let api: NewApi = serde_json::from_str(
            r#"{"name":"Users API","base_url":"https://x","auth_type":"basic",
                "endpoints":[{"method":"GET","path":"/users"}]}"#,
        )
        .unwrap();
        assert_eq!(api.auth_type, AuthType::Basic);
        assert_eq!(api.endpoints.len(), 1);
        assert!(api.endpoints[0].parameters.is_empty());
        assert!(api.credentials.is_empty());
    }

    #[test]
    fn auth_category_is_case_insensitive() {
        let ep = Endpoint {
            id: "e".into(),
            api_id: "a".into(),
            position: 0,
            method: "POST".into(),
            path: "/login".into(),
            description: None,
            category: Some(" Auth ".into()),
            parameters: vec![],
            business_value: None,
            created_at: Utc::now(),
        };
        assert!(ep.is_auth());
    }
}
