//! Authentication schemes for outgoing API calls.
//!
//! [`AuthScheme::resolve`] turns an API's declared auth type plus a
//! credentials blob into a concrete scheme, and [`AuthScheme::parts`]
//! renders it as headers and query parameters. Missing credentials resolve
//! to [`AuthScheme::None`]; the target API then rejects the call on its own.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use api_harness_core::models::{AuthType, Credentials};

use crate::config::ExecutionConfig;

pub(crate) const USERNAME_KEYS: &[&str] = &["username", "userName", "user", "login"];
const PASSWORD_KEYS: &[&str] = &["password", "pass", "secret"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    None,
    Basic { username: String, password: String },
    Bearer(String),
    /// Raw token in a custom header.
    Token { header: String, value: String },
    ApiKey { header: String, value: String },
    /// Secret sent as a query parameter instead of a header.
    Ticket { param: String, value: String },
    OAuth(String),
    Custom(Vec<(String, String)>),
    /// Token captured earlier in an auto-execute run. Overrides everything else.
    Session { header: String, value: String },
}

/// Rendered authentication material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthParts {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl AuthScheme {
    pub fn resolve(
        auth_type: AuthType,
        credentials: &Credentials,
        config: &ExecutionConfig,
    ) -> AuthScheme {
        let header_name = credentials.get_str("header_name");
        let scheme = match auth_type {
            AuthType::None => None,
            AuthType::Basic => credentials.first_of(USERNAME_KEYS).map(|username| {
                AuthScheme::Basic {
                    username,
                    password: credentials.first_of(PASSWORD_KEYS).unwrap_or_default(),
                }
            }),
            AuthType::Bearer => credentials
                .first_of(&["token", "access_token", "accessToken", "bearer_token", "api_key"])
                .map(AuthScheme::Bearer),
            AuthType::OAuth => credentials
                .first_of(&["access_token", "accessToken", "token"])
                .map(AuthScheme::OAuth),
            AuthType::Token => credentials
                .first_of(&["token", "session_token", "access_token", "accessToken", "value"])
                .map(|value| AuthScheme::Token {
                    header: header_name.unwrap_or_else(|| config.token_header.clone()),
                    value,
                }),
            AuthType::ApiKey => credentials
                .first_of(&["api_key", "apiKey", "key", "token", "value"])
                .map(|value| AuthScheme::ApiKey {
                    header: header_name.unwrap_or_else(|| config.api_key_header.clone()),
                    value,
                }),
            AuthType::Ticket => credentials
                .first_of(&["ticket", "token", "value"])
                .map(|value| AuthScheme::Ticket {
                    param: credentials
                        .get_str("ticket_param")
                        .unwrap_or_else(|| config.ticket_param.clone()),
                    value,
                }),
            AuthType::Custom => {
                let mut headers: Vec<(String, String)> = credentials
                    .get("headers")
                    .and_then(|h| h.as_object())
                    .map(|h| {
                        h.iter()
                            .filter_map(|(k, v)| {
                                let value = match v {
                                    serde_json::Value::String(s) => s.clone(),
                                    serde_json::Value::Null => return None,
                                    other => other.to_string(),
                                };
                                Some((k.clone(), value))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                if let (Some(name), Some(value)) = (header_name, credentials.get_str("value")) {
                    headers.push((name, value));
                }
                (!headers.is_empty()).then_some(AuthScheme::Custom(headers))
            }
        };
        scheme.unwrap_or(AuthScheme::None)
    }

    /// Scheme for a token captured during an auto-execute run.
    pub fn session(token: String, config: &ExecutionConfig) -> AuthScheme {
        AuthScheme::Session {
            header: config.token_header.clone(),
            value: token,
        }
    }

    pub fn parts(&self) -> AuthParts {
        match self {
            AuthScheme::None => AuthParts::default(),
            AuthScheme::Basic { username, password } => AuthParts::header(
                "Authorization",
                format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password))),
            ),
            AuthScheme::Bearer(token) | AuthScheme::OAuth(token) => {
                AuthParts::header("Authorization", format!("Bearer {}", token))
            }
            AuthScheme::Token { header, value }
            | AuthScheme::ApiKey { header, value }
            | AuthScheme::Session { header, value } => AuthParts::header(header, value.clone()),
            AuthScheme::Ticket { param, value } => AuthParts {
                headers: Vec::new(),
                query: vec![(param.clone(), value.clone())],
            },
            AuthScheme::Custom(headers) => AuthParts {
                headers: headers.clone(),
                query: Vec::new(),
            },
        }
    }
}

impl AuthParts {
    fn header(name: impl Into<String>, value: String) -> Self {
        Self {
            headers: vec![(name.into(), value)],
            query: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn creds(v: serde_json::Value) -> Credentials {
        serde_json::from_value(v).unwrap()
    }

    fn config() -> ExecutionConfig {
        ExecutionConfig::default()
    }

    #[test]
    fn basic_encodes_user_and_password() {
        let scheme = AuthScheme::resolve(
            AuthType::Basic,
            &creds(json!({"username": "a", "password": "b"})),
            &config(),
        );
        assert_eq!(
            scheme.parts().headers,
            vec![("Authorization".to_string(), "Basic YTpi".to_string())]
        );
    }

    #[test]
    fn basic_accepts_camel_case_username() {
        let scheme = AuthScheme::resolve(
            AuthType::Basic,
            &creds(json!({"userName": "a", "password": "b"})),
            &config(),
        );
        assert!(matches!(scheme, AuthScheme::Basic { .. }));
    }

    #[test]
    fn ticket_goes_to_query_not_headers() {
        let parts = AuthScheme::resolve(
            AuthType::Ticket,
            &creds(json!({"ticket": "T-9"})),
            &config(),
        )
        .parts();
        assert!(parts.headers.is_empty());
        assert_eq!(parts.query, vec![("ticket".to_string(), "T-9".to_string())]);
    }

    #[test]
    fn api_key_uses_configured_or_declared_header() {
        let default = AuthScheme::resolve(AuthType::ApiKey, &creds(json!({"api_key": "k"})), &config());
        assert_eq!(default.parts().headers[0].0, "X-API-Key");

        let declared = AuthScheme::resolve(
            AuthType::ApiKey,
            &creds(json!({"api_key": "k", "header_name": "X-Auth"})),
            &config(),
        );
        assert_eq!(declared.parts().headers[0], ("X-Auth".to_string(), "k".to_string()));
    }

    #[test]
    fn token_uses_custom_header() {
        let parts = AuthScheme::resolve(AuthType::Token, &creds(json!({"token": "abc"})), &config())
            .parts();
        assert_eq!(parts.headers, vec![("token".to_string(), "abc".to_string())]);
    }

    #[test]
    fn bearer_and_oauth_use_authorization() {
        for t in [AuthType::Bearer, AuthType::OAuth] {
            let parts = AuthScheme::resolve(t, &creds(json!({"access_token": "z"})), &config()).parts();
            assert_eq!(parts.headers[0].1, "Bearer z");
        }
    }

    #[test]
    fn missing_credentials_produce_no_auth() {
        for t in [
            AuthType::Basic,
            AuthType::Bearer,
            AuthType::Token,
            AuthType::ApiKey,
            AuthType::Ticket,
            AuthType::OAuth,
            AuthType::Custom,
        ] {
            assert_eq!(AuthScheme::resolve(t, &Credentials::new(), &config()).parts(), AuthParts::default());
        }
    }

    #[test]
    fn custom_headers_are_copied() {
        let parts = AuthScheme::resolve(
            AuthType::Custom,
            &creds(json!({"headers": {"X-Tenant": "acme", "X-Retries": 3}})),
            &config(),
        )
        .parts();
        assert!(parts.headers.contains(&("X-Tenant".to_string(), "acme".to_string())));
        assert!(parts.headers.contains(&("X-Retries".to_string(), "3".to_string())));
    }
}
