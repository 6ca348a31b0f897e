//! Inference dispatch over interchangeable generative-AI backends.
//!
//! Defines the [`InferenceBackend`] trait and the [`Dispatcher`] that
//! routes every model call in the system:
//! - **[`gemini::GeminiBackend`]** (the default backend)
//! - **[`openai::OpenAiBackend`]** (any OpenAI-compatible chat completions API)
//!
//! Backends are explicit dependencies handed to the dispatcher at
//! construction, so tests substitute scripted stubs.
//!
//! # Provider Selection
//!
//! A string hint from project settings picks the backend. An unset hint
//! falls back to the configured default provider; an unknown hint falls
//! back to Gemini.
//!
//! # Retry Strategy
//!
//! - No response at all (connect/timeout/aborted) → retry
//! - Backend overloaded, HTTP 502/503/504 → retry
//! - Anything else (400, 401, 403, 404, malformed body) → fail immediately
//! - Backoff is linear: `base_delay × attempt` (2s, 4s with the defaults)
//!
//! # Output Normalisation
//!
//! [`Dispatcher::infer_json`] expects exactly one JSON object in the model
//! text, possibly fenced, and fails with
//! [`InferenceError::NoStructuredOutput`] when there is none.

pub mod gemini;
pub mod openai;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use api_harness_core::structured::{self, NoStructuredOutput};

use crate::config::InferenceConfig;

/// Known inference providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    OpenAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        }
    }

    pub fn parse(s: &str) -> Option<Provider> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Some(Provider::Gemini),
            "openai" | "gpt" => Some(Provider::OpenAi),
            _ => None,
        }
    }

    /// Resolve a settings hint; unknown values select Gemini.
    pub fn resolve(hint: &str) -> Provider {
        Provider::parse(hint).unwrap_or(Provider::Gemini)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-project inference preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceSettings {
    #[serde(default, alias = "ai_provider")]
    pub provider: Option<String>,
    #[serde(default, alias = "ai_model")]
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the backend for a JSON response body when it supports it.
    pub json_output: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 8192,
            json_output: true,
        }
    }
}

/// Content previously uploaded to the backend's file store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub uri: String,
    pub mime_type: String,
}

/// A single generation call as seen by a backend.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    pub content: String,
    pub file: Option<FileRef>,
    pub options: GenerationOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("no response from {provider}: {message}")]
    NoResponse { provider: Provider, message: String },

    #[error("{provider} is overloaded: {message}")]
    Overloaded { provider: Provider, message: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("invalid response from {provider}: {message}")]
    InvalidResponse { provider: Provider, message: String },

    #[error("{provider} backend is not configured")]
    NotConfigured { provider: Provider },

    #[error(transparent)]
    NoStructuredOutput(#[from] NoStructuredOutput),
}

impl InferenceError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::NoResponse { .. } | InferenceError::Overloaded { .. } => true,
            InferenceError::Http { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

/// Map a non-2xx backend response onto the error taxonomy.
pub(crate) fn classify_http_failure(provider: Provider, status: u16, body: String) -> InferenceError {
    let lowered = body.to_ascii_lowercase();
    if status == 503 || lowered.contains("overloaded") || lowered.contains("\"unavailable\"") {
        return InferenceError::Overloaded {
            provider,
            message: truncate_for_log(&body),
        };
    }
    InferenceError::Http {
        provider,
        status,
        body: truncate_for_log(&body),
    }
}

/// Map a transport-level failure (nothing usable came back).
pub(crate) fn transport_failure(provider: Provider, err: reqwest::Error) -> InferenceError {
    InferenceError::NoResponse {
        provider,
        message: err.to_string(),
    }
}

fn truncate_for_log(s: &str) -> String {
    const MAX: usize = 500;
    if s.len() <= MAX {
        return s.to_string();
    }
    let mut end = MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// A generative model backend.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn provider(&self) -> Provider;

    /// Model used when settings do not name one.
    fn default_model(&self) -> &str;

    /// Run one generation call. No retries happen at this level.
    async fn generate(&self, request: &InferenceRequest) -> Result<String, InferenceError>;
}

/// Bounded linear backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Wait before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(2))
    }
}

/// Routes inference calls to a backend with retry and output normalisation.
pub struct Dispatcher {
    backends: HashMap<Provider, Arc<dyn InferenceBackend>>,
    default_provider: Provider,
    retry: RetryPolicy,
    options: GenerationOptions,
    max_content_chars: usize,
}

impl Dispatcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            backends: HashMap::new(),
            default_provider: Provider::Gemini,
            retry,
            options: GenerationOptions::default(),
            max_content_chars: 200_000,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backends.insert(backend.provider(), backend);
        self
    }

    pub fn with_default_provider(mut self, provider: Provider) -> Self {
        self.default_provider = provider;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_content_chars(mut self, max_chars: usize) -> Self {
        self.max_content_chars = max_chars;
        self
    }

    /// Build a dispatcher with every backend whose API key is present.
    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut dispatcher = Dispatcher::new(RetryPolicy::new(
            config.max_retries,
            config.retry_base_delay(),
        ))
        .with_default_provider(Provider::resolve(&config.default_provider))
        .with_options(GenerationOptions {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            json_output: true,
        })
        .with_max_content_chars(config.max_content_chars);

        if let Some(key) = config.gemini.api_key() {
            dispatcher = dispatcher.with_backend(Arc::new(gemini::GeminiBackend::new(
                &config.gemini,
                key,
                timeout,
            )?));
        }
        if let Some(key) = config.openai.api_key() {
            dispatcher = dispatcher.with_backend(Arc::new(openai::OpenAiBackend::new(
                &config.openai,
                key,
                timeout,
            )?));
        }
        if dispatcher.backends.is_empty() {
            warn!(
                gemini_key = %config.gemini.api_key_env,
                openai_key = %config.openai.api_key_env,
                "no inference backend has an API key; analysis calls will fail"
            );
        }
        Ok(dispatcher)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// The provider a settings hint resolves to.
    pub fn resolve_provider(&self, settings: &InferenceSettings) -> Provider {
        match settings.provider.as_deref() {
            None | Some("") => self.default_provider,
            Some(hint) => Provider::resolve(hint),
        }
    }

    fn backend(&self, provider: Provider) -> Result<&Arc<dyn InferenceBackend>, InferenceError> {
        self.backends
            .get(&provider)
            .ok_or(InferenceError::NotConfigured { provider })
    }

    /// Run a prompt over `content` and return the raw model text.
    pub async fn infer_text(
        &self,
        prompt: &str,
        content: &str,
        settings: &InferenceSettings,
        file: Option<&FileRef>,
    ) -> Result<String, InferenceError> {
        let provider = self.resolve_provider(settings);
        let backend = self.backend(provider)?;
        let model = settings
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| backend.default_model().to_string());

        let request = InferenceRequest {
            model,
            prompt: prompt.to_string(),
            content: truncate_chars(content, self.max_content_chars).to_string(),
            file: file.cloned(),
            options: self.options.clone(),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(%provider, model = %request.model, attempt, "inference call");
            match backend.generate(&request).await {
                Ok(text) => {
                    if attempt > 1 {
                        info!(%provider, attempt, "inference succeeded after retry");
                    }
                    return Ok(text);
                }
                Err(err) if err.is_transient() && attempt <= self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        %provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient inference failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(%provider, attempt, error = %err, "inference failed");
                    return Err(err);
                }
            }
        }
    }

    /// Run a prompt and recover the single JSON object from the reply.
    pub async fn infer_json(
        &self,
        prompt: &str,
        content: &str,
        settings: &InferenceSettings,
        file: Option<&FileRef>,
    ) -> Result<Value, InferenceError> {
        let text = self.infer_text(prompt, content, settings, file).await?;
        Ok(structured::extract_json_object(&text)?)
    }

    /// Like [`infer_json`](Self::infer_json), deserialized into `T`.
    pub async fn infer_typed<T: DeserializeOwned>(
        &self,
        prompt: &str,
        content: &str,
        settings: &InferenceSettings,
        file: Option<&FileRef>,
    ) -> Result<T, InferenceError> {
        let text = self.infer_text(prompt, content, settings, file).await?;
        Ok(structured::extract_typed(&text)?)
    }
}
