use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing',
            error_message TEXT,
            remote_name TEXT,
            remote_uri TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS discovered_apis (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            base_url TEXT NOT NULL,
            auth_type TEXT NOT NULL DEFAULT 'none',
            auth_details_json TEXT,
            business_value TEXT,
            use_cases_json TEXT NOT NULL DEFAULT '[]',
            auto_executable INTEGER NOT NULL DEFAULT 0,
            credentials_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS endpoints (
            id TEXT PRIMARY KEY,
            api_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            method TEXT NOT NULL,
            path TEXT NOT NULL,
            description TEXT,
            category TEXT,
            parameters_json TEXT NOT NULL DEFAULT '[]',
            business_value TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(api_id, position),
            FOREIGN KEY (api_id) REFERENCES discovered_apis(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One configuration per API: upserts conflict on api_id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_configurations (
            id TEXT PRIMARY KEY,
            api_id TEXT NOT NULL UNIQUE,
            credentials_json TEXT NOT NULL DEFAULT '{}',
            is_active INTEGER NOT NULL DEFAULT 1,
            test_status TEXT NOT NULL DEFAULT 'untested',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (api_id) REFERENCES discovered_apis(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_records (
            id TEXT PRIMARY KEY,
            api_id TEXT NOT NULL,
            endpoint_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            status TEXT NOT NULL,
            status_code INTEGER,
            duration_ms INTEGER NOT NULL,
            response_json TEXT NOT NULL DEFAULT 'null',
            error TEXT,
            record_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            FOREIGN KEY (api_id) REFERENCES discovered_apis(id),
            FOREIGN KEY (endpoint_id) REFERENCES endpoints(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_apis_document ON discovered_apis(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_apis_project ON discovered_apis(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_api ON execution_records(api_id, seq DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_executions_project ON execution_records(project_id, seq DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
