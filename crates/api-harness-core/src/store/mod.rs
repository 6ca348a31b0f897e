//! Storage abstraction for the API catalog.
//!
//! The [`CatalogStore`] trait defines every persistence operation the
//! analysis pipeline and execution engine need, enabling pluggable
//! backends (SQLite in the main crate, [`memory::InMemoryStore`] here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ApiConfiguration, Credentials, DiscoveredApi, Document, DocumentStatus, Endpoint,
    ExecutionRecord, NewApi, NewDocument, NewExecution, TestStatus,
};

/// Abstract storage backend for documents, catalogs, configurations and
/// execution records.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_document`](CatalogStore::create_document) | Insert a document in `processing` |
/// | [`transition_document`](CatalogStore::transition_document) | Forward status change (validated) |
/// | [`reopen_document`](CatalogStore::reopen_document) | Explicit retry re-entry |
/// | [`replace_catalog`](CatalogStore::replace_catalog) | Atomically swap a document's APIs + endpoints |
/// | [`upsert_configuration`](CatalogStore::upsert_configuration) | One active configuration per API |
/// | [`insert_execution`](CatalogStore::insert_execution) | Append an execution record |
/// | `count_*` | Dependency checks before destructive deletes |
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_document(&self, doc: NewDocument) -> Result<Document>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Record where the document's raw content was uploaded for inference.
    async fn set_document_remote(&self, id: &str, name: &str, uri: &str) -> Result<()>;

    /// Move a document forward along its state machine.
    ///
    /// Fails with [`TransitionError`](crate::models::TransitionError) for
    /// any move the state machine does not allow. `error_message` is stored
    /// when moving to `error` and cleared otherwise.
    async fn transition_document(
        &self,
        id: &str,
        to: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<Document>;

    /// Put a failed (or stranded) document back into `analyzed` for a retry.
    async fn reopen_document(&self, id: &str) -> Result<Document>;

    /// Replace every API and endpoint previously extracted from `document_id`
    /// with `apis`, all-or-nothing.
    ///
    /// Fails without changing anything when the current catalog already has
    /// execution records; those are never removed by re-extraction.
    async fn replace_catalog(&self, document_id: &str, apis: &[NewApi])
        -> Result<Vec<DiscoveredApi>>;

    async fn list_document_apis(&self, document_id: &str) -> Result<Vec<DiscoveredApi>>;

    async fn list_project_apis(&self, project_id: &str) -> Result<Vec<DiscoveredApi>>;

    async fn get_api(&self, id: &str) -> Result<Option<DiscoveredApi>>;

    /// Endpoints of an API in catalog order.
    async fn list_endpoints(&self, api_id: &str) -> Result<Vec<Endpoint>>;

    async fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>>;

    /// Insert or replace the configuration for `api_id` (last write wins).
    /// The stored configuration is active and `untested`.
    async fn upsert_configuration(
        &self,
        api_id: &str,
        credentials: &Credentials,
    ) -> Result<ApiConfiguration>;

    async fn get_active_configuration(&self, api_id: &str) -> Result<Option<ApiConfiguration>>;

    async fn set_test_status(&self, api_id: &str, status: TestStatus) -> Result<()>;

    /// Append an execution record. The endpoint must belong to an API of
    /// the record's project.
    async fn insert_execution(&self, record: NewExecution) -> Result<ExecutionRecord>;

    /// Most recent executions for an API, newest first.
    async fn list_executions(&self, api_id: &str, limit: i64) -> Result<Vec<ExecutionRecord>>;

    /// Most recent executions across a project, newest first.
    async fn list_project_executions(
        &self,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>>;

    async fn count_endpoints(&self, api_id: &str) -> Result<i64>;

    async fn count_configurations(&self, api_id: &str) -> Result<i64>;

    async fn count_executions(&self, api_id: &str) -> Result<i64>;

    /// Delete an API with its endpoints, configuration and execution records.
    async fn delete_api(&self, api_id: &str) -> Result<()>;
}
