//! HTTP surface: webhook ingress and pipeline administration.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingestion/{pipeline_id}` | Webhook ingress for push pipelines |
//! | `GET`  | `/pipelines` | List pipelines |
//! | `POST` | `/pipelines` | Create a pipeline (with optional mappings) |
//! | `PATCH` | `/pipelines/{id}` | Replace a pipeline's configuration |
//! | `DELETE` | `/pipelines/{id}` | Soft-delete a pipeline |
//! | `GET`  | `/pipelines/{id}/logs` | Recent runs |
//! | `POST` | `/pipelines/{id}/test` | Dry-run sample records through the mappings |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses carry a machine-readable code:
//!
//! ```json
//! { "error": { "code": "invalid_webhook_secret", "message": "invalid webhook secret" } }
//! ```
//!
//! Codes: `pipeline_not_found` (404), `pipeline_disabled` (403),
//! `invalid_mode` (400), `invalid_webhook_secret` (401),
//! `invalid_pipeline_input` (400), `rate_limited` (429), `internal` (500).
//!
//! Webhook ingress is rate-limited per pipeline (100 requests / 60 s
//! token bucket). Every pipeline create/update/delete converges that
//! pipeline's cron registration through the live dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::jobs::PushJobData;
use crate::mapping::{build_record_from_mappings, to_preview};
use crate::models::{IngestionLog, Pipeline, PipelineMode};
use crate::pipelines::{FieldMappingInput, PipelineInput, PipelineStore};
use crate::run_log::LogStore;
use crate::scheduler::{sync_schedule, JobDispatcher};
use crate::throttle::TokenBucket;

const WEBHOOK_RATE_LIMIT_MAX_TOKENS: u32 = 100;
const WEBHOOK_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
    dispatcher: Arc<dyn JobDispatcher>,
    throttle: Arc<TokenBucket>,
}

impl AppState {
    pub fn new(pool: SqlitePool, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            pool,
            dispatcher,
            throttle: Arc::new(TokenBucket::new(
                WEBHOOK_RATE_LIMIT_MAX_TOKENS,
                WEBHOOK_RATE_LIMIT_WINDOW,
            )),
        }
    }

    fn pipelines(&self) -> PipelineStore {
        PipelineStore::new(self.pool.clone())
    }

    fn logs(&self) -> LogStore {
        LogStore::new(self.pool.clone())
    }
}

/// Build the router. Exposed separately from [`run_server`] so tests can
/// drive it without binding a socket.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingestion/{pipeline_id}", post(handle_webhook))
        .route("/pipelines", get(handle_list_pipelines).post(handle_create_pipeline))
        .route(
            "/pipelines/{id}",
            axum::routing::patch(handle_update_pipeline).delete(handle_delete_pipeline),
        )
        .route("/pipelines/{id}/logs", get(handle_pipeline_logs))
        .route("/pipelines/{id}/test", post(handle_test_pipeline))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured bind address.
pub async fn run_server(config: &Config, state: AppState) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let router = app(state);

    info!(addr = %bind_addr, "ingestion server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "pipeline_not_found", message)
}

fn invalid_input(err: anyhow::Error) -> AppError {
    app_error(
        StatusCode::BAD_REQUEST,
        "invalid_pipeline_input",
        err.to_string(),
    )
}

fn internal(err: anyhow::Error) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
}

// ============ DTOs ============

/// Pipeline as returned by the admin API.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PipelineDto {
    id: String,
    workspace_id: String,
    name: String,
    description: Option<String>,
    mode: PipelineMode,
    target_object: String,
    webhook_secret: Option<String>,
    source_url: Option<String>,
    source_http_method: Option<String>,
    response_records_path: Option<String>,
    schedule: Option<String>,
    dedup_field_path: Option<String>,
    is_enabled: bool,
}

impl From<&Pipeline> for PipelineDto {
    fn from(p: &Pipeline) -> Self {
        Self {
            id: p.id.clone(),
            workspace_id: p.workspace_id.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
            mode: p.mode,
            target_object: p.target_object.clone(),
            webhook_secret: p.webhook_secret.clone(),
            source_url: p.source_url.clone(),
            source_http_method: p.source_http_method.clone(),
            response_records_path: p.response_records_path.clone(),
            schedule: p.schedule.clone(),
            dedup_field_path: p.dedup_field_path.clone(),
            is_enabled: p.is_enabled,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingestion/{pipeline_id} ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    success: bool,
    pipeline_id: String,
    log_id: String,
    record_count: usize,
}

/// Webhook ingress for push pipelines.
///
/// The shared secret is accepted from the `x-webhook-secret` header or
/// the `secret` query param; the check is skipped when the pipeline has
/// no secret. A single JSON object body is wrapped into a one-element
/// batch. The raw payload is snapshotted onto the pending log before the
/// processing job is enqueued.
async fn handle_webhook(
    State(state): State<AppState>,
    Path(pipeline_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<WebhookResponse>, AppError> {
    let pipeline = state
        .pipelines()
        .find_by_id(&pipeline_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("pipeline {pipeline_id} not found")))?;

    if !pipeline.is_enabled {
        return Err(app_error(
            StatusCode::FORBIDDEN,
            "pipeline_disabled",
            format!("pipeline {pipeline_id} is disabled"),
        ));
    }

    if pipeline.mode != PipelineMode::Push {
        return Err(app_error(
            StatusCode::BAD_REQUEST,
            "invalid_mode",
            format!("pipeline {pipeline_id} is not a push pipeline"),
        ));
    }

    if let Some(expected) = &pipeline.webhook_secret {
        let provided = headers
            .get("x-webhook-secret")
            .and_then(|v| v.to_str().ok())
            .or_else(|| query.get("secret").map(String::as_str));

        if provided != Some(expected.as_str()) {
            return Err(app_error(
                StatusCode::UNAUTHORIZED,
                "invalid_webhook_secret",
                "invalid webhook secret",
            ));
        }
    }

    if !state.throttle.try_acquire(&pipeline_id, Instant::now()) {
        return Err(app_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            format!("pipeline {pipeline_id} exceeded the webhook rate limit"),
        ));
    }

    // Wrap single objects into a one-element batch
    let records = match body {
        Value::Array(items) => items,
        other => vec![other],
    };
    let record_count = records.len();

    let log = state
        .logs()
        .create_pending(
            &pipeline_id,
            PipelineMode::Push,
            Some(&Value::Array(records.clone())),
        )
        .await
        .map_err(internal)?;

    state
        .dispatcher
        .enqueue_push(PushJobData {
            pipeline_id: pipeline_id.clone(),
            workspace_id: pipeline.workspace_id.clone(),
            log_id: log.id.clone(),
            records,
        })
        .await
        .map_err(internal)?;

    info!(
        pipeline_id = %pipeline_id,
        log_id = %log.id,
        record_count, "queued push ingestion"
    );

    Ok(Json(WebhookResponse {
        success: true,
        pipeline_id,
        log_id: log.id,
        record_count,
    }))
}

// ============ Pipeline administration ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePipelineRequest {
    workspace_id: String,
    pipeline: PipelineInput,
    #[serde(default)]
    mappings: Option<Vec<FieldMappingInput>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePipelineRequest {
    pipeline: PipelineInput,
    #[serde(default)]
    mappings: Option<Vec<FieldMappingInput>>,
}

async fn handle_list_pipelines(
    State(state): State<AppState>,
) -> Result<Json<Vec<PipelineDto>>, AppError> {
    let pipelines = state.pipelines().list().await.map_err(internal)?;
    Ok(Json(pipelines.iter().map(PipelineDto::from).collect()))
}

async fn handle_create_pipeline(
    State(state): State<AppState>,
    Json(request): Json<CreatePipelineRequest>,
) -> Result<Json<PipelineDto>, AppError> {
    let store = state.pipelines();
    let pipeline = store
        .create(&request.workspace_id, &request.pipeline)
        .await
        .map_err(invalid_input)?;

    if let Some(mappings) = &request.mappings {
        store
            .set_mappings(&pipeline.id, mappings)
            .await
            .map_err(invalid_input)?;
    }

    sync_schedule(&pipeline, state.dispatcher.as_ref())
        .await
        .map_err(internal)?;

    Ok(Json(PipelineDto::from(&pipeline)))
}

async fn handle_update_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdatePipelineRequest>,
) -> Result<Json<PipelineDto>, AppError> {
    let store = state.pipelines();

    store
        .find_by_id(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("pipeline {id} not found")))?;

    let pipeline = store.update(&id, &request.pipeline).await.map_err(invalid_input)?;

    if let Some(mappings) = &request.mappings {
        store.set_mappings(&id, mappings).await.map_err(invalid_input)?;
    }

    sync_schedule(&pipeline, state.dispatcher.as_ref())
        .await
        .map_err(internal)?;

    Ok(Json(PipelineDto::from(&pipeline)))
}

async fn handle_delete_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PipelineDto>, AppError> {
    let store = state.pipelines();

    store
        .find_by_id(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("pipeline {id} not found")))?;

    let deleted = store.delete(&id).await.map_err(internal)?;

    // A deleted pipeline must not keep firing
    sync_schedule(&deleted, state.dispatcher.as_ref())
        .await
        .map_err(internal)?;

    Ok(Json(PipelineDto::from(&deleted)))
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: i64,
}

fn default_log_limit() -> i64 {
    50
}

async fn handle_pipeline_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<IngestionLog>>, AppError> {
    let logs = state
        .logs()
        .find_by_pipeline(&id, query.limit)
        .await
        .map_err(internal)?;
    Ok(Json(logs))
}

// ============ POST /pipelines/{id}/test ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestPipelineRequest {
    sample_records: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestPipelineResponse {
    success: bool,
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    preview_records: Option<Vec<Value>>,
    errors: Option<Vec<Value>>,
}

/// Dry-run sample records through the pipeline's mappings without
/// resolving relations or touching the record store.
async fn handle_test_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TestPipelineRequest>,
) -> Result<Json<TestPipelineResponse>, AppError> {
    let store = state.pipelines();

    store
        .find_by_id(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("pipeline {id} not found")))?;

    let mappings = store.mappings_for(&id).await.map_err(internal)?;

    let previews: Vec<Value> = request
        .sample_records
        .iter()
        .map(|record| to_preview(&build_record_from_mappings(record, &mappings)))
        .collect();

    let total = request.sample_records.len();
    Ok(Json(TestPipelineResponse {
        success: true,
        total_records: total,
        valid_records: total,
        invalid_records: 0,
        preview_records: if previews.is_empty() {
            None
        } else {
            Some(previews)
        },
        errors: None,
    }))
}
