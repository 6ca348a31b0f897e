//! Request building: URL, path templates, query string or JSON body, auth.

use reqwest::Method;
use serde_json::{Map, Value};
use url::Url;

use super::auth::AuthParts;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),
}

/// A fully-resolved outgoing request.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// JSON body; always `None` for `GET` and `HEAD`.
    pub body: Option<Value>,
}

/// Render a parameter value for a URL.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitute a `{name}` or `:name` path segment from `params`.
fn template_name(segment: &str) -> Option<&str> {
    if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        return Some(inner);
    }
    segment.strip_prefix(':').filter(|s| !s.is_empty())
}

pub fn build_request(
    base_url: &str,
    path: &str,
    method: &str,
    auth: &AuthParts,
    params: &Map<String, Value>,
) -> Result<PreparedRequest, RequestError> {
    let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| RequestError::InvalidMethod(method.to_string()))?;

    let mut remaining = params.clone();
    let (path_part, inline_query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };

    let absolute = path_part.starts_with("http://") || path_part.starts_with("https://");
    let mut url = if absolute {
        Url::parse(path_part)
    } else {
        Url::parse(base_url.trim())
    }
    .map_err(|e| RequestError::InvalidBaseUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;

    if !absolute {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| RequestError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "cannot be a base".to_string(),
            })?;
        segments.pop_if_empty();
        for segment in path_part.split('/').filter(|s| !s.is_empty()) {
            match template_name(segment).and_then(|name| remaining.remove(name)) {
                Some(value) => segments.push(&value_to_string(&value)),
                None => segments.push(segment),
            };
        }
    }

    if let Some(q) = inline_query {
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(q.as_bytes())
            .into_owned()
            .collect();
        url.query_pairs_mut().extend_pairs(pairs);
    }

    let query_params = method == Method::GET || method == Method::HEAD;
    if query_params {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &remaining {
            match value {
                Value::Array(items) => {
                    for item in items {
                        pairs.append_pair(key, &value_to_string(item));
                    }
                }
                other => {
                    pairs.append_pair(key, &value_to_string(other));
                }
            }
        }
    }
    if !auth.query.is_empty() {
        url.query_pairs_mut().extend_pairs(auth.query.iter());
    }
    if url.query() == Some("") {
        url.set_query(None);
    }

    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Accept".to_string(), "application/json".to_string()),
    ];
    headers.extend(auth.headers.iter().cloned());

    let body = (!query_params && !remaining.is_empty()).then(|| Value::Object(remaining));

    Ok(PreparedRequest {
        method,
        url,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn get_parameters_go_to_query_string() {
        let req = build_request(
            "https://api.example.com/v1",
            "/users",
            "get",
            &AuthParts::default(),
            &params(json!({"page": 2, "q": "a b"})),
        )
        .unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url.path(), "/v1/users");
        assert_eq!(req.url.query(), Some("page=2&q=a+b"));
        assert!(req.body.is_none());
    }

    #[test]
    fn post_parameters_form_json_body() {
        let req = build_request(
            "https://api.example.com/",
            "/login",
            "POST",
            &AuthParts::default(),
            &params(json!({"username": "a", "password": "b"})),
        )
        .unwrap();
        assert_eq!(req.url.as_str(), "https://api.example.com/login");
        assert_eq!(req.body.unwrap(), json!({"username": "a", "password": "b"}));
    }

    #[test]
    fn path_templates_consume_parameters() {
        let req = build_request(
            "https://h",
            "/users/{id}/orders/:order",
            "DELETE",
            &AuthParts::default(),
            &params(json!({"id": 7, "order": "x/y", "reason": "dup"})),
        )
        .unwrap();
        assert_eq!(req.url.path(), "/users/7/orders/x%2Fy");
        assert_eq!(req.body.unwrap(), json!({"reason": "dup"}));
    }

    #[test]
    fn ticket_query_applies_to_every_method() {
        let auth = AuthParts {
            headers: vec![],
            query: vec![("ticket".into(), "T".into())],
        };
        let req = build_request("http://h", "/r", "POST", &auth, &Map::new()).unwrap();
        assert_eq!(req.url.query(), Some("ticket=T"));
        assert!(req.body.is_none());
    }

    #[test]
    fn json_content_type_always_present() {
        let auth = AuthParts {
            headers: vec![("Authorization".into(), "Basic YTpi".into())],
            query: vec![],
        };
        let req = build_request("http://h", "/r", "GET", &auth, &Map::new()).unwrap();
        assert!(req
            .headers
            .contains(&("Content-Type".to_string(), "application/json".to_string())));
        assert!(req
            .headers
            .contains(&("Authorization".to_string(), "Basic YTpi".to_string())));
        assert_eq!(req.url.query(), None);
    }

    #[test]
    fn invalid_inputs_are_errors() {
        assert!(matches!(
            build_request("not a url", "/x", "GET", &AuthParts::default(), &Map::new()),
            Err(RequestError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            build_request("http://h", "/x", "GE T", &AuthParts::default(), &Map::new()),
            Err(RequestError::InvalidMethod(_))
        ));
    }
}
