//! Application wiring shared by the CLI and the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use api_harness_core::models::{Credentials, DiscoveredApi};
use api_harness_core::store::CatalogStore;

use crate::config::Config;
use crate::db;
use crate::execution::ExecutionEngine;
use crate::file_store::{FileStore, GeminiFileStore, InlineFileStore};
use crate::inference::Dispatcher;
use crate::migrate;
use crate::pipeline::Pipeline;
use crate::sqlite_store::SqliteStore;

/// Every long-lived component, built once per process.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn CatalogStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub pipeline: Arc<Pipeline>,
    pub engine: Arc<ExecutionEngine>,
}

impl AppContext {
    /// Open the database (migrating it) and build all components from config.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let store: Arc<dyn CatalogStore> = Arc::new(SqliteStore::new(pool));

        let dispatcher = Arc::new(Dispatcher::from_config(&config.inference)?);

        let files: Arc<dyn FileStore> = match config.inference.gemini.api_key() {
            Some(key) => {
                info!("staging documents in the Gemini file store");
                Arc::new(GeminiFileStore::new(
                    &config.inference.gemini.base_url,
                    key,
                    Duration::from_secs(config.inference.timeout_secs),
                )?)
            }
            None => Arc::new(InlineFileStore),
        };

        Self::from_parts(config, store, dispatcher, files)
    }

    /// Assemble a context from explicit components. Must run inside a tokio
    /// runtime because it starts the analysis worker.
    pub fn from_parts(
        config: &Config,
        store: Arc<dyn CatalogStore>,
        dispatcher: Arc<Dispatcher>,
        files: Arc<dyn FileStore>,
    ) -> Result<Self> {
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            dispatcher.clone(),
            files,
            config.file_store.poll_interval(),
            config.file_store.max_poll_attempts,
        ));
        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            config.execution.clone(),
        )?);
        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            dispatcher,
            pipeline,
            engine,
        })
    }

    /// Credentials for calling `api`: the active configuration layered over
    /// credentials extracted from the documentation.
    pub async fn effective_credentials(&self, api: &DiscoveredApi) -> Result<Credentials> {
        let configured = self
            .store
            .get_active_configuration(&api.id)
            .await?
            .map(|c| c.credentials)
            .unwrap_or_default();
        Ok(configured.merged_over(&api.extracted_credentials))
    }
}
