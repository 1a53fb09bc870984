//! Job handlers: the entry points that wire fetching, preprocessing,
//! mapping, and logging together for one pipeline execution.
//!
//! Run-level precondition failures (pipeline missing or disabled, no
//! source URL, no mappings, fetch errors) mark the run `failed` with a
//! single synthetic error; per-record failures are absorbed by the
//! processor and surface as a `partial` run.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::fetcher::fetch_records;
use crate::models::{IngestionLog, Pipeline, PipelineMode, ProcessingResult};
use crate::pipelines::PipelineStore;
use crate::preprocess::PreprocessorRegistry;
use crate::processor::process_records;
use crate::run_log::LogStore;
use crate::store::RecordStore;

/// Payload of a queued push-processing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushJobData {
    pub pipeline_id: String,
    pub workspace_id: String,
    pub log_id: String,
    pub records: Vec<Value>,
}

/// Payload of a queued pull job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullJobData {
    pub pipeline_id: String,
    pub workspace_id: String,
}

/// Executes pipeline runs against the shared record store.
pub struct Engine {
    pool: SqlitePool,
    store: Arc<dyn RecordStore>,
    preprocessors: Arc<PreprocessorRegistry>,
}

impl Engine {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn RecordStore>,
        preprocessors: Arc<PreprocessorRegistry>,
    ) -> Self {
        Self {
            pool,
            store,
            preprocessors,
        }
    }

    /// Process one buffered webhook batch against its pre-created log.
    pub async fn run_push(&self, data: &PushJobData) -> Result<IngestionLog> {
        let logs = LogStore::new(self.pool.clone());

        info!(
            pipeline_id = %data.pipeline_id,
            log_id = %data.log_id,
            records = data.records.len(),
            "processing push ingestion"
        );

        logs.mark_running(&data.log_id).await?;

        match self.execute_push(data).await {
            Ok(result) => {
                let log = logs
                    .mark_completed(&data.log_id, data.records.len() as i64, &result)
                    .await?;
                info!(
                    pipeline_id = %data.pipeline_id,
                    created = result.records_created,
                    updated = result.records_updated,
                    failed = result.records_failed,
                    "push ingestion finished"
                );
                Ok(log)
            }
            Err(err) => {
                error!(pipeline_id = %data.pipeline_id, error = %err, "push ingestion failed");
                logs.mark_failed(&data.log_id, &err.to_string()).await
            }
        }
    }

    async fn execute_push(&self, data: &PushJobData) -> Result<ProcessingResult> {
        let pipelines = PipelineStore::new(self.pool.clone());

        let pipeline = pipelines
            .find_in_workspace(&data.pipeline_id, &data.workspace_id)
            .await?
            .ok_or_else(|| anyhow!("Pipeline not found"))?;

        let mappings = pipelines.mappings_for(&data.pipeline_id).await?;
        if mappings.is_empty() {
            return Err(anyhow!("No field mappings configured"));
        }

        let records = self
            .preprocessors
            .pre_process_records(data.records.clone(), &pipeline, &data.workspace_id)
            .await?;

        Ok(process_records(
            &records,
            &pipeline,
            &mappings,
            &data.workspace_id,
            self.store.as_ref(),
        )
        .await)
    }

    /// Execute one pull cycle: fetch, preprocess, process.
    pub async fn run_pull(&self, data: &PullJobData) -> Result<IngestionLog> {
        let logs = LogStore::new(self.pool.clone());

        info!(pipeline_id = %data.pipeline_id, "starting pull ingestion");

        let log = logs
            .create_pending(&data.pipeline_id, PipelineMode::Pull, None)
            .await?;
        logs.mark_running(&log.id).await?;

        match self.execute_pull(data).await {
            Ok(PullOutcome::Empty) => {
                logs.mark_completed(&log.id, 0, &ProcessingResult::default())
                    .await
            }
            Ok(PullOutcome::Processed { fetched, result }) => {
                let log = logs.mark_completed(&log.id, fetched, &result).await?;
                info!(
                    pipeline_id = %data.pipeline_id,
                    total = fetched,
                    created = result.records_created,
                    updated = result.records_updated,
                    failed = result.records_failed,
                    "pull ingestion finished"
                );
                Ok(log)
            }
            Err(err) => {
                error!(pipeline_id = %data.pipeline_id, error = %err, "pull ingestion failed");
                logs.mark_failed(&log.id, &err.to_string()).await
            }
        }
    }

    async fn execute_pull(&self, data: &PullJobData) -> Result<PullOutcome> {
        let pipelines = PipelineStore::new(self.pool.clone());

        let pipeline: Pipeline = pipelines
            .find_in_workspace(&data.pipeline_id, &data.workspace_id)
            .await?
            .filter(|p| p.is_enabled)
            .ok_or_else(|| anyhow!("Pipeline not found or disabled"))?;

        if pipeline.source_url.is_none() {
            return Err(anyhow!("No source URL configured"));
        }

        let mappings = pipelines.mappings_for(&data.pipeline_id).await?;
        if mappings.is_empty() {
            return Err(anyhow!("No field mappings configured"));
        }

        let fetched = fetch_records(&pipeline).await?;
        if fetched.is_empty() {
            return Ok(PullOutcome::Empty);
        }
        let total = fetched.len() as i64;

        let records = self
            .preprocessors
            .pre_process_records(fetched, &pipeline, &data.workspace_id)
            .await?;

        let result = process_records(
            &records,
            &pipeline,
            &mappings,
            &data.workspace_id,
            self.store.as_ref(),
        )
        .await;

        Ok(PullOutcome::Processed {
            fetched: total,
            result,
        })
    }
}

enum PullOutcome {
    /// Zero fetched records: completed immediately, no store traffic.
    Empty,
    Processed {
        fetched: i64,
        result: ProcessingResult,
    },
}
