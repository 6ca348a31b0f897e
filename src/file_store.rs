//! External file store used to stage document content for inference.
//!
//! Uploaded content is processed asynchronously by the remote service and
//! only becomes usable once it reports `ACTIVE`. [`wait_until_active`]
//! polls with a fixed interval and a bounded number of attempts.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Remote processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Processing,
    Active,
    Failed,
}

impl FileState {
    pub fn parse(s: &str) -> FileState {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => FileState::Active,
            "FAILED" => FileState::Failed,
            _ => FileState::Processing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Store-specific handle used for status and delete.
    pub name: String,
    /// URI an inference backend can reference. Empty for inline storage.
    pub uri: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("file store request failed: {0}")]
    Transport(String),
    #[error("file store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid file store response: {0}")]
    InvalidResponse(String),
    #[error("file {name} failed remote processing")]
    Failed { name: String },
    #[error("file {name} not active after {attempts} status checks")]
    Timeout { name: String, attempts: u32 },
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn upload(
        &self,
        bytes: &[u8],
        display_name: &str,
        mime_type: &str,
    ) -> Result<UploadedFile, FileStoreError>;

    async fn status(&self, name: &str) -> Result<FileState, FileStoreError>;

    async fn delete(&self, name: &str) -> Result<(), FileStoreError>;
}

/// Poll `name` until it is active, fails, or `max_attempts` checks pass.
pub async fn wait_until_active(
    store: &dyn FileStore,
    name: &str,
    interval: Duration,
    max_attempts: u32,
) -> Result<(), FileStoreError> {
    for attempt in 1..=max_attempts {
        match store.status(name).await? {
            FileState::Active => return Ok(()),
            FileState::Failed => {
                return Err(FileStoreError::Failed {
                    name: name.to_string(),
                })
            }
            FileState::Processing => {
                debug!(file = name, attempt, "file still processing");
                if attempt < max_attempts {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
    Err(FileStoreError::Timeout {
        name: name.to_string(),
        attempts: max_attempts,
    })
}

// ============ Inline ============

/// No remote service: content stays local and is immediately active.
#[derive(Debug, Default, Clone)]
pub struct InlineFileStore;

#[async_trait]
impl FileStore for InlineFileStore {
    async fn upload(
        &self,
        _bytes: &[u8],
        display_name: &str,
        _mime_type: &str,
    ) -> Result<UploadedFile, FileStoreError> {
        Ok(UploadedFile {
            name: format!("inline/{}", display_name),
            uri: String::new(),
        })
    }

    async fn status(&self, _name: &str) -> Result<FileState, FileStoreError> {
        Ok(FileState::Active)
    }

    async fn delete(&self, _name: &str) -> Result<(), FileStoreError> {
        Ok(())
    }
}

// ============ Gemini Files API ============

/// Gemini Files API using the resumable upload protocol.
pub struct GeminiFileStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

impl GeminiFileStore {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, FileStoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FileStoreError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

fn transport(err: reqwest::Error) -> FileStoreError {
    FileStoreError::Transport(err.to_string())
}

#[async_trait]
impl FileStore for GeminiFileStore {
    async fn upload(
        &self,
        bytes: &[u8],
        display_name: &str,
        mime_type: &str,
    ) -> Result<UploadedFile, FileStoreError> {
        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(transport)?;
        let start = Self::check(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| FileStoreError::InvalidResponse("missing upload URL".to_string()))?
            .to_string();

        let finish = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", 0)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(transport)?;
        let finish = Self::check(finish).await?;

        let parsed: UploadResponse = finish
            .json()
            .await
            .map_err(|e| FileStoreError::InvalidResponse(e.to_string()))?;
        Ok(UploadedFile {
            name: parsed.file.name,
            uri: parsed.file.uri,
        })
    }

    async fn status(&self, name: &str) -> Result<FileState, FileStoreError> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport)?;
        let file: RemoteFile = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| FileStoreError::InvalidResponse(e.to_string()))?;
        Ok(file
            .state
            .as_deref()
            .map(FileState::parse)
            .unwrap_or(FileState::Processing))
    }

    async fn delete(&self, name: &str) -> Result<(), FileStoreError> {
        let response = self
            .client
            .delete(format!("{}/v1beta/{}", self.base_url, name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await?;
        Ok(())
    }
}
