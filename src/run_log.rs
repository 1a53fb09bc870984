//! Run lifecycle tracking.
//!
//! Every pipeline execution gets one log row, created `pending` before
//! async dispatch and driven through `running` to a terminal state:
//! `completed` (no failures), `partial` (some failures), or `failed`
//! (run-level precondition or unexpected error, one synthetic error at
//! index -1). Terminal rows are never updated again by this subsystem.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{IngestionError, IngestionLog, PipelineMode, ProcessingResult, RunStatus};

pub struct LogStore {
    pool: SqlitePool,
}

impl LogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a `pending` log row, optionally capturing the raw incoming
    /// payload (push runs) for audit and debugging.
    pub async fn create_pending(
        &self,
        pipeline_id: &str,
        trigger_type: PipelineMode,
        incoming_payload: Option<&Value>,
    ) -> Result<IngestionLog> {
        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let payload_json = incoming_payload
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO ingestion_logs \
             (id, pipeline_id, status, trigger_type, incoming_payload, started_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(pipeline_id)
        .bind(RunStatus::Pending.as_str())
        .bind(trigger_type.to_string())
        .bind(&payload_json)
        .bind(started_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        self.get(&id).await
    }

    /// Transition to `running`, re-stamping the start time.
    pub async fn mark_running(&self, log_id: &str) -> Result<()> {
        sqlx::query("UPDATE ingestion_logs SET status = ?, started_at = ? WHERE id = ?")
            .bind(RunStatus::Running.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(log_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Terminal transition from a finished batch: `partial` if any record
    /// failed, `completed` otherwise.
    pub async fn mark_completed(
        &self,
        log_id: &str,
        total_records_received: i64,
        result: &ProcessingResult,
    ) -> Result<IngestionLog> {
        let status = if result.records_failed > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };
        let errors = if result.errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&result.errors)?)
        };

        self.finish(
            log_id,
            status,
            Some(total_records_received),
            Some(result),
            errors,
        )
        .await
    }

    /// Terminal transition for a run-level failure.
    pub async fn mark_failed(&self, log_id: &str, message: &str) -> Result<IngestionLog> {
        let errors = serde_json::to_string(&[IngestionError {
            record_index: -1,
            message: message.to_string(),
            source_data: None,
        }])?;

        self.finish(log_id, RunStatus::Failed, None, None, Some(errors)).await
    }

    async fn finish(
        &self,
        log_id: &str,
        status: RunStatus,
        total_records_received: Option<i64>,
        result: Option<&ProcessingResult>,
        errors_json: Option<String>,
    ) -> Result<IngestionLog> {
        let existing = self.get(log_id).await?;
        let completed_at = Utc::now();
        let duration_ms = existing
            .started_at
            .map(|started| (completed_at - started).num_milliseconds());

        let (created, updated, skipped, failed) = match result {
            Some(r) => (
                r.records_created,
                r.records_updated,
                r.records_skipped,
                r.records_failed,
            ),
            None => (0, 0, 0, 0),
        };

        sqlx::query(
            "UPDATE ingestion_logs SET \
             status = ?, \
             total_records_received = COALESCE(?, total_records_received), \
             records_created = ?, records_updated = ?, \
             records_skipped = ?, records_failed = ?, \
             errors = ?, completed_at = ?, duration_ms = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(total_records_received)
        .bind(created)
        .bind(updated)
        .bind(skipped)
        .bind(failed)
        .bind(&errors_json)
        .bind(completed_at.timestamp_millis())
        .bind(duration_ms)
        .bind(log_id)
        .execute(&self.pool)
        .await?;

        self.get(log_id).await
    }

    pub async fn get(&self, log_id: &str) -> Result<IngestionLog> {
        let row = sqlx::query("SELECT * FROM ingestion_logs WHERE id = ?")
            .bind(log_id)
            .fetch_optional(&self.pool)
            .await?
            .with_context(|| format!("ingestion log {log_id} not found"))?;

        row_to_log(&row)
    }

    /// Recent runs for a pipeline, newest first.
    pub async fn find_by_pipeline(&self, pipeline_id: &str, limit: i64) -> Result<Vec<IngestionLog>> {
        let rows = sqlx::query(
            "SELECT * FROM ingestion_logs WHERE pipeline_id = ? \
             ORDER BY started_at DESC LIMIT ?",
        )
        .bind(pipeline_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_log).collect()
    }
}

fn millis_to_datetime(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::from_timestamp_millis)
}

fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> Result<IngestionLog> {
    let status: String = row.get("status");
    let trigger: String = row.get("trigger_type");
    let errors: Option<String> = row.get("errors");
    let incoming_payload: Option<String> = row.get("incoming_payload");

    Ok(IngestionLog {
        id: row.get("id"),
        pipeline_id: row.get("pipeline_id"),
        status: status.parse()?,
        trigger_type: trigger.parse()?,
        total_records_received: row.get("total_records_received"),
        records_created: row.get("records_created"),
        records_updated: row.get("records_updated"),
        records_skipped: row.get("records_skipped"),
        records_failed: row.get("records_failed"),
        errors: errors
            .map(|e| serde_json::from_str(&e))
            .transpose()
            .context("corrupt errors column")?,
        incoming_payload: incoming_payload
            .map(|p| serde_json::from_str(&p))
            .transpose()
            .context("corrupt incoming_payload column")?,
        started_at: millis_to_datetime(row.get("started_at")),
        completed_at: millis_to_datetime(row.get("completed_at")),
        duration_ms: row.get("duration_ms"),
    })
}
