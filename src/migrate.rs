use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables. Idempotent — safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Pipelines: one row per ingestion configuration; soft-deleted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            mode TEXT NOT NULL,
            target_object TEXT NOT NULL,
            webhook_secret TEXT,
            source_url TEXT,
            source_http_method TEXT,
            source_auth_config TEXT,
            source_request_config TEXT,
            response_records_path TEXT,
            schedule TEXT,
            dedup_field_path TEXT,
            pagination_config TEXT,
            is_enabled INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Field mappings, cascade-deleted with their pipeline
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_mappings (
            id TEXT PRIMARY KEY,
            pipeline_id TEXT NOT NULL,
            source_field_path TEXT NOT NULL,
            target_field_name TEXT NOT NULL,
            target_composite_sub_field TEXT,
            transform TEXT,
            relation_target_object TEXT,
            relation_match_field TEXT,
            relation_auto_create INTEGER NOT NULL DEFAULT 0,
            position INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (pipeline_id) REFERENCES pipelines(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Run logs: one row per pipeline execution
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_logs (
            id TEXT PRIMARY KEY,
            pipeline_id TEXT NOT NULL,
            status TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            total_records_received INTEGER NOT NULL DEFAULT 0,
            records_created INTEGER NOT NULL DEFAULT 0,
            records_updated INTEGER NOT NULL DEFAULT 0,
            records_skipped INTEGER NOT NULL DEFAULT 0,
            records_failed INTEGER NOT NULL DEFAULT 0,
            errors TEXT,
            incoming_payload TEXT,
            started_at INTEGER,
            completed_at INTEGER,
            duration_ms INTEGER,
            FOREIGN KEY (pipeline_id) REFERENCES pipelines(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Generic record store: all target object types share one table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            object TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipelines_workspace_id ON pipelines(workspace_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_field_mappings_pipeline_id ON field_mappings(pipeline_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ingestion_logs_pipeline_id ON ingestion_logs(pipeline_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ingestion_logs_started_at ON ingestion_logs(started_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_workspace_object ON records(workspace_id, object)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
