//! Core data models for the ingestion engine.
//!
//! Pipelines, field mappings, and run logs are persisted in SQLite;
//! their JSON-valued config columns deserialize into the closed tagged
//! unions defined here, validated when a pipeline is saved.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transform::FieldTransform;

/// How a pipeline receives data: webhook pushes or scheduled API pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    Push,
    Pull,
}

impl FromStr for PipelineMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            other => anyhow::bail!("unknown pipeline mode: '{other}'"),
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Lifecycle state of one pipeline run.
///
/// `pending → running → {completed | partial | failed}`; terminal states
/// are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown run status: '{other}'"),
        }
    }
}

/// Authentication applied to pull requests against the source API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SourceAuthConfig {
    Bearer {
        token: String,
    },
    ApiKey {
        header_name: String,
        key: String,
    },
    QueryParam {
        param_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        /// Resolve the value from this environment variable instead of
        /// storing the credential in the pipeline row.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env_var: Option<String>,
    },
    Basic {
        username: String,
        password: String,
    },
}

/// Computed date-range query params appended to pull requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeParams {
    pub start_param: String,
    pub end_param: String,
    pub lookback_minutes: i64,
    /// IANA timezone name the source API expects (e.g. `America/Chicago`).
    pub timezone: String,
}

/// Static request shaping for pull requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRequestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range_params: Option<DateRangeParams>,
}

/// Pagination strategy for pull sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum PaginationConfig {
    /// Param carries `page * page_size`.
    Offset {
        param_name: String,
        page_size: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_pages: Option<usize>,
    },
    /// Param carries the 1-based page number.
    Page {
        param_name: String,
        page_size: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_pages: Option<usize>,
    },
    /// Param carries a cursor extracted from the previous response.
    Cursor {
        param_name: String,
        cursor_path: String,
        page_size: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_pages: Option<usize>,
    },
}

impl PaginationConfig {
    pub fn page_size(&self) -> usize {
        match self {
            Self::Offset { page_size, .. }
            | Self::Page { page_size, .. }
            | Self::Cursor { page_size, .. } => *page_size,
        }
    }

    pub fn max_pages(&self) -> Option<usize> {
        match self {
            Self::Offset { max_pages, .. }
            | Self::Page { max_pages, .. }
            | Self::Cursor { max_pages, .. } => *max_pages,
        }
    }
}

/// A tenant-scoped ingestion configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub description: Option<String>,
    pub mode: PipelineMode,
    /// Target entity type in the record store (e.g. `person`, `call`).
    pub target_object: String,
    pub webhook_secret: Option<String>,
    pub source_url: Option<String>,
    pub source_http_method: Option<String>,
    pub source_auth_config: Option<SourceAuthConfig>,
    pub source_request_config: Option<SourceRequestConfig>,
    pub response_records_path: Option<String>,
    pub schedule: Option<String>,
    /// Dotted path deciding create-vs-update (e.g. `phones.primaryPhoneNumber`).
    pub dedup_field_path: Option<String>,
    pub pagination_config: Option<PaginationConfig>,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A declarative rule converting one source path into one target field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pipeline_id: String,
    pub source_field_path: String,
    pub target_field_name: String,
    /// Sub-field of a composite target attribute (e.g. `firstName` of `name`).
    #[serde(default)]
    pub target_composite_sub_field: Option<String>,
    #[serde(default)]
    pub transform: Option<FieldTransform>,
    #[serde(default)]
    pub relation_target_object: Option<String>,
    #[serde(default)]
    pub relation_match_field: Option<String>,
    #[serde(default)]
    pub relation_auto_create: bool,
    #[serde(default)]
    pub position: i64,
}

/// One per-record failure recorded on a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionError {
    /// Index in the incoming batch; `-1` for run-level failures.
    pub record_index: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<Value>,
}

/// One execution record of a pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionLog {
    pub id: String,
    pub pipeline_id: String,
    pub status: RunStatus,
    pub trigger_type: PipelineMode,
    pub total_records_received: i64,
    pub records_created: i64,
    pub records_updated: i64,
    pub records_skipped: i64,
    pub records_failed: i64,
    pub errors: Option<Vec<IngestionError>>,
    /// Raw payload snapshot, captured before processing (push only).
    pub incoming_payload: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Aggregate outcome of processing one batch.
#[derive(Debug, Clone, Default)]
pub struct ProcessingResult {
    pub records_created: i64,
    pub records_updated: i64,
    pub records_skipped: i64,
    pub records_failed: i64,
    pub errors: Vec<IngestionError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_config_round_trips() {
        let raw = json!({"type": "api_key", "headerName": "X-Api-Key", "key": "k"});
        let auth: SourceAuthConfig = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(
            auth,
            SourceAuthConfig::ApiKey {
                header_name: "X-Api-Key".to_string(),
                key: "k".to_string()
            }
        );
        assert_eq!(serde_json::to_value(&auth).unwrap(), raw);
    }

    #[test]
    fn unknown_auth_type_is_rejected() {
        let raw = json!({"type": "oauth2", "clientId": "x"});
        assert!(serde_json::from_value::<SourceAuthConfig>(raw).is_err());
    }

    #[test]
    fn pagination_config_parses_all_variants() {
        let offset: PaginationConfig =
            serde_json::from_value(json!({"type": "offset", "paramName": "offset", "pageSize": 50}))
                .unwrap();
        assert_eq!(offset.page_size(), 50);
        assert_eq!(offset.max_pages(), None);

        let cursor: PaginationConfig = serde_json::from_value(json!({
            "type": "cursor",
            "paramName": "after",
            "cursorPath": "meta.next",
            "pageSize": 100,
            "maxPages": 10
        }))
        .unwrap();
        assert_eq!(cursor.max_pages(), Some(10));
    }

    #[test]
    fn field_mapping_accepts_minimal_json() {
        let mapping: FieldMapping = serde_json::from_value(json!({
            "sourceFieldPath": "call_length",
            "targetFieldName": "duration",
            "transform": {"type": "numberScale", "multiplier": 1}
        }))
        .unwrap();
        assert_eq!(mapping.source_field_path, "call_length");
        assert!(!mapping.relation_auto_create);
        assert_eq!(mapping.position, 0);
    }
}
