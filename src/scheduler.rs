//! Recurring pull scheduling.
//!
//! Cron registrations are never trusted to survive on their own: the
//! schedule state is always derivable from the pipeline table. Every
//! pipeline change converges its registration with remove-then-add, and
//! process start re-registers everything, which makes scheduling
//! idempotent and crash-recoverable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::jobs::{Engine, PullJobData, PushJobData};
use crate::models::{Pipeline, PipelineMode};
use crate::pipelines::PipelineStore;

/// The job-dispatch capability the scheduler and webhook ingress need:
/// at-least-once dispatch of one-shot jobs plus idempotent cron
/// registration keyed by job id.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Dispatch a push-processing job for async execution.
    async fn enqueue_push(&self, data: PushJobData) -> Result<()>;

    /// Register a recurring pull job under `job_id`.
    async fn add_cron(&self, data: PullJobData, pattern: &str, job_id: &str) -> Result<()>;

    /// Remove the registration for `job_id`; absent registrations are not
    /// an error.
    async fn remove_cron(&self, job_id: &str) -> Result<()>;
}

fn cron_job_id(pipeline_id: &str) -> String {
    format!("ingestion-pull-{pipeline_id}")
}

/// Converge one pipeline's cron registration with its current state:
/// always remove, then re-add iff enabled + pull + scheduled.
pub async fn sync_schedule(pipeline: &Pipeline, dispatcher: &dyn JobDispatcher) -> Result<()> {
    let job_id = cron_job_id(&pipeline.id);

    dispatcher.remove_cron(&job_id).await?;

    match (&pipeline.schedule, pipeline.mode, pipeline.is_enabled) {
        (Some(schedule), PipelineMode::Pull, true) => {
            dispatcher
                .add_cron(
                    PullJobData {
                        pipeline_id: pipeline.id.clone(),
                        workspace_id: pipeline.workspace_id.clone(),
                    },
                    schedule,
                    &job_id,
                )
                .await?;
            info!(
                pipeline_id = %pipeline.id,
                schedule = %schedule,
                "scheduled recurring pull job"
            );
        }
        _ => {
            info!(pipeline_id = %pipeline.id, "removed pull schedule");
        }
    }

    Ok(())
}

/// Re-register cron jobs for every enabled scheduled pull pipeline.
/// Called at process start.
pub async fn sync_all(pipelines: &PipelineStore, dispatcher: &dyn JobDispatcher) -> Result<usize> {
    let scheduled = pipelines.list_scheduled().await?;

    for pipeline in &scheduled {
        sync_schedule(pipeline, dispatcher).await?;
    }

    if !scheduled.is_empty() {
        info!(count = scheduled.len(), "re-registered pull schedules");
    }

    Ok(scheduled.len())
}

/// In-process dispatcher: cron registrations via `tokio-cron-scheduler`,
/// one-shot jobs on spawned tasks against the shared [`Engine`].
pub struct CronDispatcher {
    scheduler: JobScheduler,
    engine: Arc<Engine>,
    registrations: Mutex<HashMap<String, uuid::Uuid>>,
}

impl CronDispatcher {
    pub async fn new(engine: Arc<Engine>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .context("creating job scheduler")?;

        Ok(Self {
            scheduler,
            engine,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// Start the underlying scheduler loop.
    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await.context("starting job scheduler")
    }
}

#[async_trait]
impl JobDispatcher for CronDispatcher {
    async fn enqueue_push(&self, data: PushJobData) -> Result<()> {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.run_push(&data).await {
                error!(pipeline_id = %data.pipeline_id, error = %err, "push job errored");
            }
        });
        Ok(())
    }

    async fn add_cron(&self, data: PullJobData, pattern: &str, job_id: &str) -> Result<()> {
        let engine = self.engine.clone();
        let job = Job::new_async(pattern, move |_uuid, _lock| {
            let engine = engine.clone();
            let data = data.clone();
            Box::pin(async move {
                if let Err(err) = engine.run_pull(&data).await {
                    error!(pipeline_id = %data.pipeline_id, error = %err, "scheduled pull errored");
                }
            })
        })
        .with_context(|| format!("invalid cron pattern '{pattern}'"))?;

        let uuid = self
            .scheduler
            .add(job)
            .await
            .context("registering cron job")?;
        self.registrations
            .lock()
            .unwrap()
            .insert(job_id.to_string(), uuid);

        Ok(())
    }

    async fn remove_cron(&self, job_id: &str) -> Result<()> {
        let uuid = self.registrations.lock().unwrap().remove(job_id);
        if let Some(uuid) = uuid {
            self.scheduler
                .remove(&uuid)
                .await
                .context("removing cron job")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Remove(String),
        Add { job_id: String, pattern: String },
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        ops: Mutex<Vec<Op>>,
    }

    impl RecordingDispatcher {
        fn ops(&self) -> Vec<Op> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn enqueue_push(&self, _data: PushJobData) -> Result<()> {
            Ok(())
        }

        async fn add_cron(&self, _data: PullJobData, pattern: &str, job_id: &str) -> Result<()> {
            self.ops.lock().unwrap().push(Op::Add {
                job_id: job_id.to_string(),
                pattern: pattern.to_string(),
            });
            Ok(())
        }

        async fn remove_cron(&self, job_id: &str) -> Result<()> {
            self.ops
                .lock()
                .unwrap()
                .push(Op::Remove(job_id.to_string()));
            Ok(())
        }
    }

    fn pipeline(mode: PipelineMode, enabled: bool, schedule: Option<&str>) -> Pipeline {
        Pipeline {
            id: "p1".to_string(),
            workspace_id: "ws1".to_string(),
            name: "Nightly sync".to_string(),
            description: None,
            mode,
            target_object: "policy".to_string(),
            webhook_secret: None,
            source_url: Some("https://example.com".to_string()),
            source_http_method: None,
            source_auth_config: None,
            source_request_config: None,
            response_records_path: None,
            schedule: schedule.map(str::to_string),
            dedup_field_path: None,
            pagination_config: None,
            is_enabled: enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn enabled_scheduled_pull_removes_then_adds() {
        let dispatcher = RecordingDispatcher::default();
        let p = pipeline(PipelineMode::Pull, true, Some("0 0 * * * *"));

        sync_schedule(&p, &dispatcher).await.unwrap();

        assert_eq!(
            dispatcher.ops(),
            vec![
                Op::Remove("ingestion-pull-p1".to_string()),
                Op::Add {
                    job_id: "ingestion-pull-p1".to_string(),
                    pattern: "0 0 * * * *".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn disabled_pipeline_only_removes() {
        let dispatcher = RecordingDispatcher::default();
        let p = pipeline(PipelineMode::Pull, false, Some("0 0 * * * *"));

        sync_schedule(&p, &dispatcher).await.unwrap();
        assert_eq!(dispatcher.ops(), vec![Op::Remove("ingestion-pull-p1".to_string())]);
    }

    #[tokio::test]
    async fn push_and_unscheduled_pipelines_only_remove() {
        let dispatcher = RecordingDispatcher::default();

        sync_schedule(&pipeline(PipelineMode::Push, true, None), &dispatcher)
            .await
            .unwrap();
        sync_schedule(&pipeline(PipelineMode::Pull, true, None), &dispatcher)
            .await
            .unwrap();

        assert!(dispatcher.ops().iter().all(|op| matches!(op, Op::Remove(_))));
    }

    #[tokio::test]
    async fn convergence_is_idempotent() {
        let dispatcher = RecordingDispatcher::default();
        let p = pipeline(PipelineMode::Pull, true, Some("0 0 * * * *"));

        sync_schedule(&p, &dispatcher).await.unwrap();
        sync_schedule(&p, &dispatcher).await.unwrap();

        // Each pass is a full remove-then-add; the final state has exactly
        // one live registration regardless of how often it runs.
        let adds = dispatcher
            .ops()
            .iter()
            .filter(|op| matches!(op, Op::Add { .. }))
            .count();
        assert_eq!(adds, 2);
        assert!(matches!(dispatcher.ops().last(), Some(Op::Add { .. })));
    }
}
