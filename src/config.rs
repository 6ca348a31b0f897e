use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::inference::Provider;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub file_store: FileStoreConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default = "default_gemini")]
    pub gemini: BackendConfig,
    #[serde(default = "default_openai")]
    pub openai: BackendConfig,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout_secs: default_inference_timeout_secs(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_content_chars: default_max_content_chars(),
            gemini: default_gemini(),
            openai: default_openai(),
        }
    }
}

impl InferenceConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Connection settings for one inference backend.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable that holds the API key.
    pub api_key_env: String,
}

impl BackendConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    2000
}
fn default_inference_timeout_secs() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_max_content_chars() -> usize {
    200_000
}
fn default_gemini() -> BackendConfig {
    BackendConfig {
        model: "gemini-1.5-flash".to_string(),
        base_url: "https://generativelanguage.googleapis.com".to_string(),
        api_key_env: "GEMINI_API_KEY".to_string(),
    }
}
fn default_openai() -> BackendConfig {
    BackendConfig {
        model: "gpt-4o-mini".to_string(),
        base_url: "https://api.openai.com".to_string(),
        api_key_env: "OPENAI_API_KEY".to_string(),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileStoreConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl FileStoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_max_poll_attempts() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    #[serde(default = "default_execution_timeout_secs")]
    pub timeout_secs: u64,
    /// Trust self-signed certificates on HTTPS targets. Off unless set.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Header that carries a session token captured during auto-execute.
    #[serde(default = "default_token_header")]
    pub token_header: String,
    /// Query parameter used for ticket-style auth.
    #[serde(default = "default_ticket_param")]
    pub ticket_param: String,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_execution_timeout_secs(),
            accept_invalid_certs: false,
            token_header: default_token_header(),
            ticket_param: default_ticket_param(),
            api_key_header: default_api_key_header(),
        }
    }
}

fn default_execution_timeout_secs() -> u64 {
    30
}
fn default_token_header() -> String {
    "token".to_string()
}
fn default_ticket_param() -> String {
    "ticket".to_string()
}
fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

impl Config {
    /// A configuration usable without a file: local database, defaults everywhere.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/apih.sqlite"),
            },
            server: ServerConfig {
                bind: "127.0.0.1:7341".to_string(),
            },
            inference: InferenceConfig::default(),
            file_store: FileStoreConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if Provider::parse(&config.inference.default_provider).is_none() {
        anyhow::bail!(
            "Unknown inference provider: '{}'. Must be gemini or openai.",
            config.inference.default_provider
        );
    }

    if config.inference.max_retries > 10 {
        anyhow::bail!("inference.max_retries must be <= 10");
    }

    if config.file_store.max_poll_attempts == 0 {
        anyhow::bail!("file_store.max_poll_attempts must be >= 1");
    }

    if config.file_store.poll_interval_ms == 0 {
        anyhow::bail!("file_store.poll_interval_ms must be > 0");
    }

    if config.execution.token_header.trim().is_empty() {
        anyhow::bail!("execution.token_header must not be empty");
    }

    Ok(())
}
