//! # Intake CLI (`intake`)
//!
//! The `intake` binary is the primary interface for the ingestion engine.
//! It provides commands for database initialization, running the webhook
//! server with its pull scheduler, triggering pull cycles manually, and
//! inspecting pipelines and run logs.
//!
//! ## Usage
//!
//! ```bash
//! intake --config ./config/intake.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `intake init` | Create the SQLite database and run schema migrations |
//! | `intake serve` | Start the webhook server, scheduler, and worker |
//! | `intake run <pipeline-id>` | Execute one pull cycle immediately |
//! | `intake pipelines` | List pipelines with mode and schedule |
//! | `intake logs <pipeline-id>` | List recent runs for a pipeline |

mod cli_output;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use intake::config;
use intake::db;
use intake::jobs::{Engine, PullJobData};
use intake::migrate;
use intake::pipelines::PipelineStore;
use intake::preprocess::PreprocessorRegistry;
use intake::run_log::LogStore;
use intake::scheduler::{sync_all, CronDispatcher};
use intake::server::{run_server, AppState};
use intake::sqlite_store::SqliteRecordStore;

/// Intake — a record ingestion pipeline engine for CRM-style stores.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/intake.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "intake",
    about = "Intake — a multi-tenant record ingestion pipeline engine",
    version,
    long_about = "Intake converts webhook pushes and scheduled API pulls into typed CRM records \
    through declarative field mappings with transforms, relation resolution, and dedup, \
    tracking every run's outcome with partial-failure semantics."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/intake.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (pipelines, field_mappings, ingestion_logs, records).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Start the ingestion server.
    ///
    /// Serves webhook ingress and the admin API, re-registers cron jobs
    /// for every enabled scheduled pull pipeline, and processes queued
    /// jobs in-process.
    Serve,

    /// Execute one pull cycle for a pipeline immediately.
    ///
    /// Bypasses the schedule; useful for backfills and debugging a new
    /// pipeline configuration.
    Run {
        /// Pipeline UUID.
        pipeline_id: String,

        /// Workspace to run in. Defaults to `[ingestion].default_workspace_id`.
        #[arg(long)]
        workspace: Option<String>,
    },

    /// List pipelines with their mode, target object, and schedule.
    Pipelines,

    /// List recent runs for a pipeline.
    Logs {
        /// Pipeline UUID.
        pipeline_id: String,

        /// Maximum number of runs to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    intake::logging::init("info");

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;

            let engine = Arc::new(Engine::new(
                pool.clone(),
                Arc::new(SqliteRecordStore::new(pool.clone())),
                Arc::new(PreprocessorRegistry::new()),
            ));
            let dispatcher = Arc::new(CronDispatcher::new(engine).await?);

            // Schedule state derives from the pipeline table on every start
            let pipelines = PipelineStore::new(pool.clone());
            let count = sync_all(&pipelines, dispatcher.as_ref()).await?;
            println!("Re-registered {count} pull schedules.");

            dispatcher.start().await?;
            run_server(&cfg, AppState::new(pool, dispatcher)).await?;
        }
        Commands::Run {
            pipeline_id,
            workspace,
        } => {
            let pool = db::connect(&cfg).await?;
            let engine = Engine::new(
                pool.clone(),
                Arc::new(SqliteRecordStore::new(pool.clone())),
                Arc::new(PreprocessorRegistry::new()),
            );

            // Prefer the pipeline's own workspace over the configured default
            let workspace_id = match workspace {
                Some(ws) => ws,
                None => PipelineStore::new(pool.clone())
                    .find_by_id(&pipeline_id)
                    .await?
                    .map(|p| p.workspace_id)
                    .unwrap_or_else(|| cfg.ingestion.default_workspace_id.clone()),
            };

            let log = engine
                .run_pull(&PullJobData {
                    pipeline_id,
                    workspace_id,
                })
                .await?;

            cli_output::print_run_summary(&log);
            pool.close().await;
        }
        Commands::Pipelines => {
            let pool = db::connect(&cfg).await?;
            let pipelines = PipelineStore::new(pool.clone()).list().await?;
            cli_output::print_pipelines(&pipelines);
            pool.close().await;
        }
        Commands::Logs { pipeline_id, limit } => {
            let pool = db::connect(&cfg).await?;
            let logs = LogStore::new(pool.clone())
                .find_by_pipeline(&pipeline_id, limit)
                .await?;
            cli_output::print_logs(&logs);
            pool.close().await;
        }
    }

    Ok(())
}
