//! Google Gemini backend (`generateContent`).

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    classify_http_failure, transport_failure, InferenceBackend, InferenceError, InferenceRequest,
    Provider,
};
use crate::config::BackendConfig;

pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiBackend {
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
    let mut parts = vec![json!({ "text": request.prompt })];
    match &request.file {
        Some(file) => parts.push(json!({
            "file_data": { "mime_type": file.mime_type, "file_uri": file.uri }
        })),
        None => parts.push(json!({ "text": request.content })),
    }

    let mut generation_config = json!({
        "temperature": request.options.temperature,
        "maxOutputTokens": request.options.max_output_tokens,
    });
    if request.options.json_output {
        generation_config["responseMimeType"] = json!("application/json");
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    })
}

/// Concatenate the text parts of the first candidate.
fn parse_response(json: &Value) -> Result<String, InferenceError> {
    let invalid = |message: String| InferenceError::InvalidResponse {
        provider: Provider::Gemini,
        message,
    };

    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates");
            invalid(format!("empty response ({})", reason))
        })?;

    let parts = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| invalid("candidate has no content parts".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.trim().is_empty() {
        return Err(invalid("candidate text is empty".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl InferenceBackend for GeminiBackend {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_body(request))
            .send()
            .await
            .map_err(|e| transport_failure(Provider::Gemini, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_failure(Provider::Gemini, e))?;

        if !status.is_success() {
            return Err(classify_http_failure(Provider::Gemini, status.as_u16(), body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| InferenceError::InvalidResponse {
            provider: Provider::Gemini,
            message: e.to_string(),
        })?;
        parse_response(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{FileRef, GenerationOptions};

    fn request(file: Option<FileRef>) -> InferenceRequest {
        InferenceRequest {
            model: "gemini-1.5-flash".into(),
            prompt: "extract".into(),
            content: "GET /users".into(),
            file,
            options: GenerationOptions::default(),
        }
    }

    #[test]
    fn inline_content_when_no_file() {
        let body = build_body(&request(None));
        assert_eq!(body["contents"][0]["parts"][1]["text"], "GET /users");
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn file_reference_replaces_inline_content() {
        let body = build_body(&request(Some(FileRef {
            uri: "https://files/abc".into(),
            mime_type: "application/pdf".into(),
        })));
        let part = &body["contents"][0]["parts"][1];
        assert_eq!(part["file_data"]["file_uri"], "https://files/abc");
        assert!(part.get("text").is_none());
    }

    #[test]
    fn parses_candidate_text() {
        let json = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"apis\":" }, { "text": "[]}" }] } }]
        });
        assert_eq!(parse_response(&json).unwrap(), "{\"apis\":[]}");
    }

    #[test]
    fn blocked_prompt_is_invalid_response() {
        let json = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = parse_response(&json).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
        assert!(!err.is_transient());
    }
}
