//! OpenAI-compatible chat completions backend.
//!
//! File references are not supported by this API; content is always sent
//! inline as the user message.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    classify_http_failure, transport_failure, InferenceBackend, InferenceError, InferenceRequest,
    Provider,
};
use crate::config::BackendConfig;

pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

fn build_body(request: &InferenceRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": [
            { "role": "system", "content": request.prompt },
            { "role": "user", "content": request.content },
        ],
        "temperature": request.options.temperature,
        "max_tokens": request.options.max_output_tokens,
    });
    if request.options.json_output {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

fn parse_response(json: &Value) -> Result<String, InferenceError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| InferenceError::InvalidResponse {
            provider: Provider::OpenAi,
            message: "missing choices[0].message.content".to_string(),
        })
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&build_body(request))
            .send()
            .await
            .map_err(|e| transport_failure(Provider::OpenAi, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_failure(Provider::OpenAi, e))?;

        if !status.is_success() {
            return Err(classify_http_failure(Provider::OpenAi, status.as_u16(), body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| InferenceError::InvalidResponse {
            provider: Provider::OpenAi,
            message: e.to_string(),
        })?;
        parse_response(&json)
    }
}
