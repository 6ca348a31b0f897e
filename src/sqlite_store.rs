//! SQLite-backed [`CatalogStore`] implementation.
//!
//! JSON-shaped fields (parameters, credentials, auth details, response
//! payloads) are stored as TEXT columns and decoded on read. Timestamps are
//! stored as Unix milliseconds.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use api_harness_core::models::{
    ApiConfiguration, AuthType, Credentials, DiscoveredApi, Document, DocumentStatus, Endpoint,
    ExecutionRecord, ExecutionStatus, NewApi, NewDocument, NewExecution, TestStatus,
};
use api_harness_core::store::CatalogStore;

/// SQLite implementation of the [`CatalogStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_default()
}

fn decode_json<T: serde::de::DeserializeOwned + Default>(raw: Option<String>) -> Result<T> {
    match raw {
        Some(s) if !s.is_empty() => serde_json::from_str(&s).context("corrupt JSON column"),
        _ => Ok(T::default()),
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.try_get("status")?;
    Ok(Document {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        filename: row.try_get("filename")?,
        mime_type: row.try_get("mime_type")?,
        content: row.try_get("content")?,
        content_hash: row.try_get("content_hash")?,
        status: DocumentStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown document status: {}", status))?,
        error_message: row.try_get("error_message")?,
        remote_name: row.try_get("remote_name")?,
        remote_uri: row.try_get("remote_uri")?,
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
    })
}

fn api_from_row(row: &SqliteRow) -> Result<DiscoveredApi> {
    let auth_type: String = row.try_get("auth_type")?;
    let auth_details: Option<String> = row.try_get("auth_details_json")?;
    let auto_executable: i64 = row.try_get("auto_executable")?;
    Ok(DiscoveredApi {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        document_id: row.try_get("document_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        base_url: row.try_get("base_url")?,
        auth_type: AuthType::parse_lenient(&auth_type),
        auth_details: auth_details
            .map(|s| serde_json::from_str::<Value>(&s))
            .transpose()?,
        business_value: row.try_get("business_value")?,
        use_cases: decode_json(row.try_get("use_cases_json")?)?,
        auto_executable: auto_executable != 0,
        extracted_credentials: decode_json(row.try_get("credentials_json")?)?,
        created_at: from_ts(row.try_get("created_at")?),
    })
}

fn endpoint_from_row(row: &SqliteRow) -> Result<Endpoint> {
    Ok(Endpoint {
        id: row.try_get("id")?,
        api_id: row.try_get("api_id")?,
        position: row.try_get("position")?,
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        parameters: decode_json(row.try_get("parameters_json")?)?,
        business_value: row.try_get("business_value")?,
        created_at: from_ts(row.try_get("created_at")?),
    })
}

fn configuration_from_row(row: &SqliteRow) -> Result<ApiConfiguration> {
    let test_status: String = row.try_get("test_status")?;
    let is_active: i64 = row.try_get("is_active")?;
    Ok(ApiConfiguration {
        id: row.try_get("id")?,
        api_id: row.try_get("api_id")?,
        credentials: decode_json::<Credentials>(row.try_get("credentials_json")?)?,
        is_active: is_active != 0,
        test_status: TestStatus::parse(&test_status).unwrap_or(TestStatus::Untested),
        created_at: from_ts(row.try_get("created_at")?),
        updated_at: from_ts(row.try_get("updated_at")?),
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<ExecutionRecord> {
    let status: String = row.try_get("status")?;
    let status_code: Option<i64> = row.try_get("status_code")?;
    let duration_ms: i64 = row.try_get("duration_ms")?;
    let response: String = row.try_get("response_json")?;
    Ok(ExecutionRecord {
        id: row.try_get("id")?,
        api_id: row.try_get("api_id")?,
        endpoint_id: row.try_get("endpoint_id")?,
        project_id: row.try_get("project_id")?,
        status: ExecutionStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown execution status: {}", status))?,
        status_code: status_code.and_then(|c| u16::try_from(c).ok()),
        duration_ms: duration_ms.max(0) as u64,
        response_payload: serde_json::from_str(&response).unwrap_or(Value::String(response)),
        error: row.try_get("error")?,
        record_count: row.try_get("record_count")?,
        created_at: from_ts(row.try_get("created_at")?),
    })
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn create_document(&self, doc: NewDocument) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let now = to_ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO documents (id, project_id, filename, mime_type, content, content_hash,
                                   status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'processing', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&doc.project_id)
        .bind(&doc.filename)
        .bind(&doc.mime_type)
        .bind(&doc.content)
        .bind(&doc.content_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_document(&id)
            .await?
            .ok_or_else(|| anyhow!("document vanished after insert: {}", id))
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn set_document_remote(&self, id: &str, name: &str, uri: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET remote_name = ?, remote_uri = ?, updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(uri)
        .bind(to_ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document not found: {}", id);
        }
        Ok(())
    }

    async fn transition_document(
        &self,
        id: &str,
        to: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<Document> {
        let current = self
            .get_document(id)
            .await?
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        let next = current.status.transition(to)?;
        let message = if next == DocumentStatus::Error {
            error_message
        } else {
            None
        };

        // Guard on the observed status so concurrent writers cannot skip a state.
        let result = sqlx::query(
            "UPDATE documents SET status = ?, error_message = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(message)
        .bind(to_ts(Utc::now()))
        .bind(id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document {} changed status concurrently", id);
        }

        self.get_document(id)
            .await?
            .ok_or_else(|| anyhow!("document not found: {}", id))
    }

    async fn reopen_document(&self, id: &str) -> Result<Document> {
        let current = self
            .get_document(id)
            .await?
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        let next = current.status.reopen()?;

        let result = sqlx::query(
            "UPDATE documents SET status = ?, error_message = NULL, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(to_ts(Utc::now()))
        .bind(id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document {} changed status concurrently", id);
        }

        self.get_document(id)
            .await?
            .ok_or_else(|| anyhow!("document not found: {}", id))
    }

    async fn replace_catalog(
        &self,
        document_id: &str,
        apis: &[NewApi],
    ) -> Result<Vec<DiscoveredApi>> {
        let project_id: String = sqlx::query_scalar("SELECT project_id FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("document not found: {}", document_id))?;

        let mut tx = self.pool.begin().await?;

        let executed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM execution_records WHERE api_id IN (SELECT id FROM discovered_apis WHERE document_id = ?)",
        )
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;
        if executed > 0 {
            bail!(
                "catalog of document {} has {} execution records; delete its APIs before re-extracting",
                document_id,
                executed
            );
        }

        for table in ["api_configurations", "endpoints"] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE api_id IN (SELECT id FROM discovered_apis WHERE document_id = ?)",
                table
            ))
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM discovered_apis WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

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
            sqlx::query(
                r#"
                INSERT INTO discovered_apis (id, project_id, document_id, name, description,
                    base_url, auth_type, auth_details_json, business_value, use_cases_json,
                    auto_executable, credentials_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&stored.id)
            .bind(&stored.project_id)
            .bind(&stored.document_id)
            .bind(&stored.name)
            .bind(&stored.description)
            .bind(&stored.base_url)
            .bind(stored.auth_type.as_str())
            .bind(
                stored
                    .auth_details
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(&stored.business_value)
            .bind(serde_json::to_string(&stored.use_cases)?)
            .bind(stored.auto_executable as i64)
            .bind(serde_json::to_string(&stored.extracted_credentials)?)
            .bind(to_ts(now))
            .execute(&mut *tx)
            .await?;

            for (position, ep) in api.endpoints.iter().enumerate() {
                let endpoint = Endpoint::from_new(
                    Uuid::new_v4().to_string(),
                    &stored.id,
                    position as i64,
                    ep,
                    now,
                );
                sqlx::query(
                    r#"
                    INSERT INTO endpoints (id, api_id, position, method, path, description,
                        category, parameters_json, business_value, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&endpoint.id)
                .bind(&endpoint.api_id)
                .bind(endpoint.position)
                .bind(&endpoint.method)
                .bind(&endpoint.path)
                .bind(&endpoint.description)
                .bind(&endpoint.category)
                .bind(serde_json::to_string(&endpoint.parameters)?)
                .bind(&endpoint.business_value)
                .bind(to_ts(now))
                .execute(&mut *tx)
                .await?;
            }
            created.push(stored);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn list_document_apis(&self, document_id: &str) -> Result<Vec<DiscoveredApi>> {
        let rows = sqlx::query(
            "SELECT * FROM discovered_apis WHERE document_id = ? ORDER BY created_at, rowid",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(api_from_row).collect()
    }

    async fn list_project_apis(&self, project_id: &str) -> Result<Vec<DiscoveredApi>> {
        let rows = sqlx::query(
            "SELECT * FROM discovered_apis WHERE project_id = ? ORDER BY created_at, rowid",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(api_from_row).collect()
    }

    async fn get_api(&self, id: &str) -> Result<Option<DiscoveredApi>> {
        let row = sqlx::query("SELECT * FROM discovered_apis WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(api_from_row).transpose()
    }

    async fn list_endpoints(&self, api_id: &str) -> Result<Vec<Endpoint>> {
        let rows = sqlx::query("SELECT * FROM endpoints WHERE api_id = ? ORDER BY position")
            .bind(api_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(endpoint_from_row).collect()
    }

    async fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>> {
        let row = sqlx::query("SELECT * FROM endpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(endpoint_from_row).transpose()
    }

    async fn upsert_configuration(
        &self,
        api_id: &str,
        credentials: &Credentials,
    ) -> Result<ApiConfiguration> {
        let now = to_ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO api_configurations (id, api_id, credentials_json, is_active, test_status,
                                            created_at, updated_at)
            VALUES (?, ?, ?, 1, 'untested', ?, ?)
            ON CONFLICT(api_id) DO UPDATE SET
                credentials_json = excluded.credentials_json,
                is_active = 1,
                test_status = 'untested',
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(api_id)
        .bind(serde_json::to_string(credentials)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_active_configuration(api_id)
            .await?
            .ok_or_else(|| anyhow!("configuration vanished after upsert: {}", api_id))
    }

    async fn get_active_configuration(&self, api_id: &str) -> Result<Option<ApiConfiguration>> {
        let row =
            sqlx::query("SELECT * FROM api_configurations WHERE api_id = ? AND is_active = 1")
                .bind(api_id)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(configuration_from_row).transpose()
    }

    async fn set_test_status(&self, api_id: &str, status: TestStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE api_configurations SET test_status = ?, updated_at = ? WHERE api_id = ?",
        )
        .bind(status.as_str())
        .bind(to_ts(Utc::now()))
        .bind(api_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("no configuration for api: {}", api_id);
        }
        Ok(())
    }

    async fn insert_execution(&self, record: NewExecution) -> Result<ExecutionRecord> {
        let owner: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT a.id, a.project_id FROM endpoints e
            JOIN discovered_apis a ON a.id = e.api_id
            WHERE e.id = ?
            "#,
        )
        .bind(&record.endpoint_id)
        .fetch_optional(&self.pool)
        .await?;
        match owner {
            Some((api_id, project_id))
                if api_id == record.api_id && project_id == record.project_id => {}
            _ => bail!(
                "endpoint {} does not belong to api {} in project {}",
                record.endpoint_id,
                record.api_id,
                record.project_id
            ),
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO execution_records (id, api_id, endpoint_id, project_id, status, status_code,
                duration_ms, response_json, error, record_count, created_at, seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM execution_records))
            "#,
        )
        .bind(&id)
        .bind(&record.api_id)
        .bind(&record.endpoint_id)
        .bind(&record.project_id)
        .bind(record.status.as_str())
        .bind(record.status_code.map(i64::from))
        .bind(record.duration_ms as i64)
        .bind(serde_json::to_string(&record.response_payload)?)
        .bind(&record.error)
        .bind(record.record_count)
        .bind(to_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM execution_records WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        execution_from_row(&row)
    }

    async fn list_executions(&self, api_id: &str, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_records WHERE api_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(api_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(execution_from_row).collect()
    }

    async fn list_project_executions(
        &self,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_records WHERE project_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(execution_from_row).collect()
    }

    async fn count_endpoints(&self, api_id: &str) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM endpoints WHERE api_id = ?")
                .bind(api_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn count_configurations(&self, api_id: &str) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM api_configurations WHERE api_id = ?")
                .bind(api_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn count_executions(&self, api_id: &str) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM execution_records WHERE api_id = ?")
                .bind(api_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn delete_api(&self, api_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["execution_records", "api_configurations", "endpoints"] {
            sqlx::query(&format!("DELETE FROM {} WHERE api_id = ?", table))
                .bind(api_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM discovered_apis WHERE id = ?")
            .bind(api_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
