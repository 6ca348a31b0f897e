//! In-memory [`CatalogStore`] implementation for tests and embedding in other hosts.
//!
//! All state lives behind a single `std::sync::RwLock`, so every trait
//! operation (including [`replace_catalog`](CatalogStore::replace_catalog))
//! is atomic with respect to other callers.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    ApiConfiguration, Credentials, DiscoveredApi, Document, DocumentStatus, Endpoint,
    ExecutionRecord, NewApi, NewDocument, NewExecution, TestStatus,
};

use super::CatalogStore;

#[derive(Default)]
struct Inner {
    documents: Vec<Document>,
    apis: Vec<DiscoveredApi>,
    endpoints: Vec<Endpoint>,
    configurations: Vec<ApiConfiguration>,
    executions: Vec<ExecutionRecord>,
}

/// In-memory catalog store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn newest_first(mut records: Vec<ExecutionRecord>, limit: i64) -> Vec<ExecutionRecord> {
    // Insertion order is chronological; reverse keeps ties stable.
    records.reverse();
    records.truncate(limit.max(0) as usize);
    records
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn create_document(&self, doc: NewDocument) -> Result<Document> {
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            project_id: doc.project_id,
            filename: doc.filename,
            mime_type: doc.mime_type,
            content: doc.content,
            content_hash: doc.content_hash,
            status: DocumentStatus::Processing,
            error_message: None,
            remote_name: None,
            remote_uri: None,
            created_at: now,
            updated_at: now,
        };
        self.write()?.documents.push(document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn set_document_remote(&self, id: &str, name: &str, uri: &str) -> Result<()> {
        let mut inner = self.write()?;
        let doc = inner
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        doc.remote_name = Some(name.to_string());
        doc.remote_uri = Some(uri.to_string());
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_document(
        &self,
        id: &str,
        to: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<Document> {
        let mut inner = self.write()?;
        let doc = inner
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        doc.status = doc.status.transition(to)?;
        doc.error_message = if to == DocumentStatus::Error {
            error_message.map(str::to_string)
        } else {
            None
        };
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn reopen_document(&self, id: &str) -> Result<Document> {
        let mut inner = self.write()?;
        let doc = inner
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        doc.status = doc.status.reopen()?;
        doc.error_message = None;
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn replace_catalog(
        &self,
        document_id: &str,
        apis: &[NewApi],
    ) -> Result<Vec<DiscoveredApi>> {
        let mut inner = self.write()?;
        let project_id = inner
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .map(|d| d.project_id.clone())
            .ok_or_else(|| anyhow!("document not found: {}", document_id))?;

        let stale: Vec<String> = inner
            .apis
            .iter()
            .filter(|a| a.document_id == document_id)
            .map(|a| a.id.clone())
            .collect();
        let executed = inner
            .executions
            .iter()
            .filter(|r| stale.contains(&r.api_id))
            .count();
        if executed > 0 {
            bail!(
                "catalog of document {} has {} execution records; delete its APIs before re-extracting",
                document_id,
                executed
            );
        }
        inner.apis.retain(|a| a.document_id != document_id);
        inner.endpoints.retain(|e| !stale.contains(&e.api_id));
        inner.configurations.retain(|c| !stale.contains(&c.api_id));

        let now = Utc::now();
        let mut created = Vec::with_capacity(apis.len());
        for api in apis {
            let stored = DiscoveredApi::from_new(
                Uuid::new_v4().to_string(),
                &project_id,
                document_id,
                api,
                now,
            );
            for (position, ep) in api.endpoints.iter().enumerate() {
                inner.endpoints.push(Endpoint::from_new(
                    Uuid::new_v4().to_string(),
                    &stored.id,
                    position as i64,
                    ep,
                    now,
                ));
            }
            inner.apis.push(stored.clone());
            created.push(stored);
        }
        Ok(created)
    }

    async fn list_document_apis(&self, document_id: &str) -> Result<Vec<DiscoveredApi>> {
        Ok(self
            .read()?
            .apis
            .iter()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn list_project_apis(&self, project_id: &str) -> Result<Vec<DiscoveredApi>> {
        Ok(self
            .read()?
            .apis
            .iter()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn get_api(&self, id: &str) -> Result<Option<DiscoveredApi>> {
        Ok(self.read()?.apis.iter().find(|a| a.id == id).cloned())
    }

    async fn list_endpoints(&self, api_id: &str) -> Result<Vec<Endpoint>> {
        let mut endpoints: Vec<Endpoint> = self
            .read()?
            .endpoints
            .iter()
            .filter(|e| e.api_id == api_id)
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| e.position);
        Ok(endpoints)
    }

    async fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>> {
        Ok(self.read()?.endpoints.iter().find(|e| e.id == id).cloned())
    }

    async fn upsert_configuration(
        &self,
        api_id: &str,
        credentials: &Credentials,
    ) -> Result<ApiConfiguration> {
        let mut inner = self.write()?;
        if !inner.apis.iter().any(|a| a.id == api_id) {
            bail!("api not found: {}", api_id);
        }
        let now = Utc::now();
        if let Some(existing) = inner.configurations.iter_mut().find(|c| c.api_id == api_id) {
            existing.credentials = credentials.clone();
            existing.is_active = true;
            existing.test_status = TestStatus::Untested;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let config = ApiConfiguration {
            id: Uuid::new_v4().to_string(),
            api_id: api_id.to_string(),
            credentials: credentials.clone(),
            is_active: true,
            test_status: TestStatus::Untested,
            created_at: now,
            updated_at: now,
        };
        inner.configurations.push(config.clone());
        Ok(config)
    }

    async fn get_active_configuration(&self, api_id: &str) -> Result<Option<ApiConfiguration>> {
        Ok(self
            .read()?
            .configurations
            .iter()
            .find(|c| c.api_id == api_id && c.is_active)
            .cloned())
    }

    async fn set_test_status(&self, api_id: &str, status: TestStatus) -> Result<()> {
        let mut inner = self.write()?;
        let config = inner
            .configurations
            .iter_mut()
            .find(|c| c.api_id == api_id)
            .ok_or_else(|| anyhow!("no configuration for api: {}", api_id))?;
        config.test_status = status;
        config.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_execution(&self, record: NewExecution) -> Result<ExecutionRecord> {
        let mut inner = self.write()?;
        let endpoint_api = inner
            .endpoints
            .iter()
            .find(|e| e.id == record.endpoint_id)
            .map(|e| e.api_id.clone())
            .ok_or_else(|| anyhow!("endpoint not found: {}", record.endpoint_id))?;
        let owner = inner
            .apis
            .iter()
            .find(|a| a.id == endpoint_api)
            .ok_or_else(|| anyhow!("api not found: {}", endpoint_api))?;
        if owner.id != record.api_id || owner.project_id != record.project_id {
            bail!(
                "endpoint {} does not belong to api {} in project {}",
                record.endpoint_id,
                record.api_id,
                record.project_id
            );
        }

        let stored = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            api_id: record.api_id,
            endpoint_id: record.endpoint_id,
            project_id: record.project_id,
            status: record.status,
            status_code: record.status_code,
            duration_ms: record.duration_ms,
            response_payload: record.response_payload,
            error: record.error,
            record_count: record.record_count,
            created_at: Utc::now(),
        };
        inner.executions.push(stored.clone());
        Ok(stored)
    }

    async fn list_executions(&self, api_id: &str, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let records = self
            .read()?
            .executions
            .iter()
            .filter(|r| r.api_id == api_id)
            .cloned()
            .collect();
        Ok(newest_first(records, limit))
    }

    async fn list_project_executions(
        &self,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        let records = self
            .read()?
            .executions
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        Ok(newest_first(records, limit))
    }

    async fn count_endpoints(&self, api_id: &str) -> Result<i64> {
        Ok(self.read()?.endpoints.iter().filter(|e| e.api_id == api_id).count() as i64)
    }

    async fn count_configurations(&self, api_id: &str) -> Result<i64> {
        Ok(self
            .read()?
            .configurations
            .iter()
            .filter(|c| c.api_id == api_id)
            .count() as i64)
    }

    async fn count_executions(&self, api_id: &str) -> Result<i64> {
        Ok(self.read()?.executions.iter().filter(|r| r.api_id == api_id).count() as i64)
    }

    async fn delete_api(&self, api_id: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner.apis.retain(|a| a.id != api_id);
        inner.endpoints.retain(|e| e.api_id != api_id);
        inner.configurations.retain(|c| c.api_id != api_id);
        inner.executions.retain(|r| r.api_id != api_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthType, ExecutionStatus, NewEndpoint, TransitionError};

    fn new_doc() -> NewDocument {
        NewDocument {
            project_id: "p1".into(),
            filename: "users.md".into(),
            mime_type: "text/markdown".into(),
            content: "GET /users list users, Basic Auth".into(),
            content_hash: "h".into(),
        }
    }

    fn users_api() -> NewApi {
        NewApi {
            name: "Users API".into(),
            base_url: "https://x".into(),
            auth_type: AuthType::Basic,
            endpoints: vec![
                NewEndpoint {
                    method: "post".into(),
                    path: "/login".into(),
                    category: Some("auth".into()),
                    ..Default::default()
                },
                NewEndpoint {
                    method: "GET".into(),
                    path: "/users".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn document_transitions_are_validated() {
        let store = InMemoryStore::new();
        let doc = store.create_document(new_doc()).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);

        let err = store
            .transition_document(&doc.id, DocumentStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<TransitionError>().is_some());

        store
            .transition_document(&doc.id, DocumentStatus::Analyzed, None)
            .await
            .unwrap();
        let failed = store
            .transition_document(&doc.id, DocumentStatus::Error, Some("boom"))
            .await
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        let reopened = store.reopen_document(&doc.id).await.unwrap();
        assert_eq!(reopened.status, DocumentStatus::Analyzed);
        assert!(reopened.error_message.is_none());
    }

    #[tokio::test]
    async fn replace_catalog_swaps_previous_extraction() {
        let store = InMemoryStore::new();
        let doc = store.create_document(new_doc()).await.unwrap();

        let first = store.replace_catalog(&doc.id, &[users_api()]).await.unwrap();
        assert_eq!(store.count_endpoints(&first[0].id).await.unwrap(), 2);

        let second = store
            .replace_catalog(&doc.id, &[users_api(), users_api()])
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(store.list_document_apis(&doc.id).await.unwrap().len(), 2);
        assert_eq!(store.count_endpoints(&first[0].id).await.unwrap(), 0);

        let endpoints = store.list_endpoints(&second[0].id).await.unwrap();
        assert_eq!(endpoints[0].path, "/login");
        assert_eq!(endpoints[0].method, "POST");
        assert_eq!(endpoints[1].position, 1);
    }

    #[tokio::test]
    async fn upsert_configuration_keeps_one_row() {
        let store = InMemoryStore::new();
        let doc = store.create_document(new_doc()).await.unwrap();
        let api = store.replace_catalog(&doc.id, &[users_api()]).await.unwrap()[0].clone();

        let mut creds = Credentials::new();
        creds.insert("username", "a");
        let first = store.upsert_configuration(&api.id, &creds).await.unwrap();
        creds.insert("username", "b");
        let second = store.upsert_configuration(&api.id, &creds).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.count_configurations(&api.id).await.unwrap(), 1);
        let active = store.get_active_configuration(&api.id).await.unwrap().unwrap();
        assert_eq!(active.credentials.get_str("username").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn executions_must_match_endpoint_owner() {
        let store = InMemoryStore::new();
        let doc = store.create_document(new_doc()).await.unwrap();
        let api = store.replace_catalog(&doc.id, &[users_api()]).await.unwrap()[0].clone();
        let endpoint = store.list_endpoints(&api.id).await.unwrap()[1].clone();

        let record = |project: &str| NewExecution {
            api_id: api.id.clone(),
            endpoint_id: endpoint.id.clone(),
            project_id: project.to_string(),
            status: ExecutionStatus::Success,
            status_code: Some(200),
            duration_ms: 5,
            response_payload: serde_json::json!([]),
            error: None,
            record_count: 0,
        };

        assert!(store.insert_execution(record("other")).await.is_err());
        store.insert_execution(record("p1")).await.unwrap();
        assert_eq!(store.count_executions(&api.id).await.unwrap(), 1);

        // Execution history pins the catalog until its APIs are deleted.
        let err = store
            .replace_catalog(&doc.id, &[users_api()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("execution records"));
        assert!(store.get_api(&api.id).await.unwrap().is_some());
        assert_eq!(store.count_executions(&api.id).await.unwrap(), 1);

        store.delete_api(&api.id).await.unwrap();
        assert_eq!(store.count_executions(&api.id).await.unwrap(), 0);
        assert!(store.get_api(&api.id).await.unwrap().is_none());
    }
}
