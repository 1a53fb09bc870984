//! Pipeline and field-mapping persistence.
//!
//! Config payloads (auth, pagination, request shaping, transforms) are
//! parsed into their closed tagged unions when a pipeline or mapping is
//! saved, so malformed configuration fails the admin call instead of a
//! run. Pipelines are soft-deleted; mappings cascade with their pipeline.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    FieldMapping, PaginationConfig, Pipeline, PipelineMode, SourceAuthConfig, SourceRequestConfig,
};
use crate::transform::FieldTransform;

/// Input for creating or replacing a pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PipelineInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub mode: PipelineMode,
    pub target_object: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub source_http_method: Option<String>,
    #[serde(default)]
    pub source_auth_config: Option<SourceAuthConfig>,
    #[serde(default)]
    pub source_request_config: Option<SourceRequestConfig>,
    #[serde(default)]
    pub response_records_path: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub dedup_field_path: Option<String>,
    #[serde(default)]
    pub pagination_config: Option<PaginationConfig>,
    #[serde(default)]
    pub is_enabled: bool,
}

/// Input for one field mapping; ids and ordering are assigned on save.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldMappingInput {
    pub source_field_path: String,
    pub target_field_name: String,
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
    pub position: Option<i64>,
}

impl PipelineInput {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("pipeline name must not be empty");
        }
        if self.target_object.trim().is_empty() {
            bail!("target object must not be empty");
        }
        if let Some(method) = &self.source_http_method {
            if method != "GET" && method != "POST" {
                bail!("source HTTP method must be GET or POST, got '{method}'");
            }
        }
        match self.mode {
            PipelineMode::Push => {
                if self.schedule.is_some() {
                    bail!("push pipelines cannot have a schedule");
                }
            }
            PipelineMode::Pull => {
                if self.source_url.is_none() {
                    bail!("pull pipelines require a source URL");
                }
            }
        }
        Ok(())
    }
}

impl FieldMappingInput {
    fn validate(&self) -> Result<()> {
        if self.source_field_path.trim().is_empty() {
            bail!("mapping source field path must not be empty");
        }
        if self.target_field_name.trim().is_empty() {
            bail!("mapping target field name must not be empty");
        }
        if self.relation_target_object.is_some() != self.relation_match_field.is_some() {
            bail!("relation mappings need both a target object and a match field");
        }
        if matches!(self.transform, Some(FieldTransform::Unknown)) {
            bail!("unknown transform type");
        }
        Ok(())
    }
}

pub struct PipelineStore {
    pool: SqlitePool,
}

impl PipelineStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pipeline; push pipelines get a generated webhook secret.
    pub async fn create(&self, workspace_id: &str, input: &PipelineInput) -> Result<Pipeline> {
        input.validate()?;

        let id = Uuid::new_v4().to_string();
        let webhook_secret = match input.mode {
            PipelineMode::Push => Some(generate_webhook_secret()),
            PipelineMode::Pull => None,
        };
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            "INSERT INTO pipelines \
             (id, workspace_id, name, description, mode, target_object, webhook_secret, \
              source_url, source_http_method, source_auth_config, source_request_config, \
              response_records_path, schedule, dedup_field_path, pagination_config, \
              is_enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.mode.to_string())
        .bind(&input.target_object)
        .bind(&webhook_secret)
        .bind(&input.source_url)
        .bind(&input.source_http_method)
        .bind(to_json_column(&input.source_auth_config)?)
        .bind(to_json_column(&input.source_request_config)?)
        .bind(&input.response_records_path)
        .bind(&input.schedule)
        .bind(&input.dedup_field_path)
        .bind(to_json_column(&input.pagination_config)?)
        .bind(input.is_enabled)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(&id)
            .await?
            .context("pipeline vanished after insert")
    }

    /// Replace a pipeline's mutable fields. The webhook secret, workspace,
    /// and timestamps are preserved.
    pub async fn update(&self, id: &str, input: &PipelineInput) -> Result<Pipeline> {
        input.validate()?;

        let existing = self
            .find_by_id(id)
            .await?
            .with_context(|| format!("pipeline {id} not found"))?;

        // A pipeline switched to push mode needs a secret it never had
        let webhook_secret = match (input.mode, &existing.webhook_secret) {
            (PipelineMode::Push, None) => Some(generate_webhook_secret()),
            (_, secret) => secret.clone(),
        };

        sqlx::query(
            "UPDATE pipelines SET \
             name = ?, description = ?, mode = ?, target_object = ?, webhook_secret = ?, \
             source_url = ?, source_http_method = ?, source_auth_config = ?, \
             source_request_config = ?, response_records_path = ?, schedule = ?, \
             dedup_field_path = ?, pagination_config = ?, is_enabled = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.mode.to_string())
        .bind(&input.target_object)
        .bind(&webhook_secret)
        .bind(&input.source_url)
        .bind(&input.source_http_method)
        .bind(to_json_column(&input.source_auth_config)?)
        .bind(to_json_column(&input.source_request_config)?)
        .bind(&input.response_records_path)
        .bind(&input.schedule)
        .bind(&input.dedup_field_path)
        .bind(to_json_column(&input.pagination_config)?)
        .bind(input.is_enabled)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .with_context(|| format!("pipeline {id} not found"))
    }

    /// Soft-delete a pipeline. Its mappings and logs stay referenced but
    /// orphaned from active use.
    pub async fn delete(&self, id: &str) -> Result<Pipeline> {
        let existing = self
            .find_by_id(id)
            .await?
            .with_context(|| format!("pipeline {id} not found"))?;

        sqlx::query("UPDATE pipelines SET deleted_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(&existing.id)
            .execute(&self.pool)
            .await?;

        Ok(Pipeline {
            deleted_at: Some(Utc::now()),
            is_enabled: false,
            ..existing
        })
    }

    /// Look up a live (non-deleted) pipeline by id.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query("SELECT * FROM pipelines WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_pipeline).transpose()
    }

    /// Look up a live pipeline by id within one workspace.
    pub async fn find_in_workspace(&self, id: &str, workspace_id: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query(
            "SELECT * FROM pipelines \
             WHERE id = ? AND workspace_id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_pipeline).transpose()
    }

    /// All live pipelines, oldest first.
    pub async fn list(&self) -> Result<Vec<Pipeline>> {
        let rows =
            sqlx::query("SELECT * FROM pipelines WHERE deleted_at IS NULL ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(row_to_pipeline).collect()
    }

    /// Enabled pull pipelines with a schedule — the set the scheduler
    /// re-registers at startup.
    pub async fn list_scheduled(&self) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query(
            "SELECT * FROM pipelines \
             WHERE mode = 'pull' AND is_enabled = 1 AND schedule IS NOT NULL \
               AND deleted_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_pipeline).collect()
    }

    /// Replace all field mappings for a pipeline.
    ///
    /// Positions default to input order when not given explicitly.
    pub async fn set_mappings(
        &self,
        pipeline_id: &str,
        inputs: &[FieldMappingInput],
    ) -> Result<Vec<FieldMapping>> {
        for input in inputs {
            input.validate()?;
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM field_mappings WHERE pipeline_id = ?")
            .bind(pipeline_id)
            .execute(&mut *tx)
            .await?;

        for (index, input) in inputs.iter().enumerate() {
            sqlx::query(
                "INSERT INTO field_mappings \
                 (id, pipeline_id, source_field_path, target_field_name, \
                  target_composite_sub_field, transform, relation_target_object, \
                  relation_match_field, relation_auto_create, position) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(pipeline_id)
            .bind(&input.source_field_path)
            .bind(&input.target_field_name)
            .bind(&input.target_composite_sub_field)
            .bind(to_json_column(&input.transform)?)
            .bind(&input.relation_target_object)
            .bind(&input.relation_match_field)
            .bind(input.relation_auto_create)
            .bind(input.position.unwrap_or(index as i64))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.mappings_for(pipeline_id).await
    }

    /// Field mappings for a pipeline, in position order.
    pub async fn mappings_for(&self, pipeline_id: &str) -> Result<Vec<FieldMapping>> {
        let rows = sqlx::query(
            "SELECT * FROM field_mappings WHERE pipeline_id = ? ORDER BY position ASC",
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mapping).collect()
    }
}

fn generate_webhook_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn to_json_column<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(Into::into))
        .transpose()
}

/// Stored config JSON parses leniently at load time: an unreadable column
/// degrades to `None` rather than failing every run for the pipeline.
fn from_json_column<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn row_to_pipeline(row: &sqlx::sqlite::SqliteRow) -> Result<Pipeline> {
    let mode: String = row.get("mode");
    let deleted_at: Option<i64> = row.get("deleted_at");

    Ok(Pipeline {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        description: row.get("description"),
        mode: mode.parse()?,
        target_object: row.get("target_object"),
        webhook_secret: row.get("webhook_secret"),
        source_url: row.get("source_url"),
        source_http_method: row.get("source_http_method"),
        source_auth_config: from_json_column(row.get("source_auth_config")),
        source_request_config: from_json_column(row.get("source_request_config")),
        response_records_path: row.get("response_records_path"),
        schedule: row.get("schedule"),
        dedup_field_path: row.get("dedup_field_path"),
        pagination_config: from_json_column(row.get("pagination_config")),
        is_enabled: row.get("is_enabled"),
        created_at: millis_to_datetime(row.get("created_at")),
        updated_at: millis_to_datetime(row.get("updated_at")),
        deleted_at: deleted_at.map(millis_to_datetime),
    })
}

fn row_to_mapping(row: &sqlx::sqlite::SqliteRow) -> Result<FieldMapping> {
    Ok(FieldMapping {
        id: row.get("id"),
        pipeline_id: row.get("pipeline_id"),
        source_field_path: row.get("source_field_path"),
        target_field_name: row.get("target_field_name"),
        target_composite_sub_field: row.get("target_composite_sub_field"),
        transform: from_json_column(row.get("transform")),
        relation_target_object: row.get("relation_target_object"),
        relation_match_field: row.get("relation_match_field"),
        relation_auto_create: row.get("relation_auto_create"),
        position: row.get("position"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_input() -> PipelineInput {
        serde_json::from_value(json!({
            "name": "Dialer webhooks",
            "mode": "push",
            "targetObject": "call"
        }))
        .unwrap()
    }

    #[test]
    fn push_input_rejects_schedule() {
        let input: PipelineInput = serde_json::from_value(json!({
            "name": "Dialer webhooks",
            "mode": "push",
            "targetObject": "call",
            "schedule": "0 * * * * *"
        }))
        .unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn pull_input_requires_source_url() {
        let input: PipelineInput = serde_json::from_value(json!({
            "name": "Nightly sync",
            "mode": "pull",
            "targetObject": "policy"
        }))
        .unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn malformed_auth_config_fails_at_parse_time() {
        let result = serde_json::from_value::<PipelineInput>(json!({
            "name": "Bad auth",
            "mode": "pull",
            "targetObject": "policy",
            "sourceUrl": "https://example.com",
            "sourceAuthConfig": {"type": "kerberos"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn http_method_is_restricted() {
        let mut input = push_input();
        input.source_http_method = Some("DELETE".to_string());
        assert!(input.validate().is_err());
    }

    #[test]
    fn relation_mapping_needs_both_halves() {
        let input: FieldMappingInput = serde_json::from_value(json!({
            "sourceFieldPath": "email",
            "targetFieldName": "ownerId",
            "relationTargetObject": "workspaceMember"
        }))
        .unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn unknown_transform_fails_validation() {
        let input: FieldMappingInput = serde_json::from_value(json!({
            "sourceFieldPath": "a",
            "targetFieldName": "b",
            "transform": {"type": "teleport"}
        }))
        .unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn webhook_secret_is_64_hex_chars() {
        let secret = generate_webhook_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
