//! SQLite-backed [`RecordStore`].
//!
//! Records of every object type share one `records` table with the field
//! map stored as a JSON text column. Composite field predicates use
//! `json_extract`, which keeps the store schema-free: ingestion can
//! target any object type without migrations.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::store::{FieldFilter, RecordStore, StoredRecord};

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn json_path(filter: &FieldFilter) -> String {
    match &filter.sub_field {
        Some(sub) => format!("$.{}.{}", filter.field, sub),
        None => format!("$.{}", filter.field),
    }
}

/// SQLite compares JSON scalars by their SQL value, so bind strings and
/// numbers natively and fall back to JSON text for anything else.
fn bind_filter_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::String(s) => query.bind(s.as_str()),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap_or_default()),
        Value::Number(n) => query.bind(n.as_f64().unwrap_or_default()),
        Value::Bool(b) => query.bind(*b),
        other => query.bind(other.to_string()),
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_one(
        &self,
        workspace_id: &str,
        object: &str,
        filter: &FieldFilter,
    ) -> Result<Option<StoredRecord>> {
        let sql = "SELECT id, data FROM records \
                   WHERE workspace_id = ? AND object = ? AND json_extract(data, ?) = ? \
                   LIMIT 1";

        let query = sqlx::query(sql)
            .bind(workspace_id)
            .bind(object)
            .bind(json_path(filter));
        let row = bind_filter_value(query, &filter.value)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.get("id");
        let data: String = row.get("data");
        let fields: Map<String, Value> = serde_json::from_str(&data)
            .with_context(|| format!("corrupt record data for {object} {id}"))?;

        Ok(Some(StoredRecord { id, fields }))
    }

    async fn insert(
        &self,
        workspace_id: &str,
        object: &str,
        fields: &Map<String, Value>,
    ) -> Result<StoredRecord> {
        let id = Uuid::new_v4().to_string();
        let data = serde_json::to_string(&Value::Object(fields.clone()))?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO records (id, workspace_id, object, data, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(object)
        .bind(&data)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(StoredRecord {
            id,
            fields: fields.clone(),
        })
    }

    async fn update(
        &self,
        workspace_id: &str,
        object: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<()> {
        // json_patch treats nulls as deletions; mapped records never carry
        // nulls, so a patch merge matches the partial-update contract.
        let merged = serde_json::to_string(&Value::Object(fields.clone()))?;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE records \
             SET data = json_patch(data, ?), updated_at = ? \
             WHERE id = ? AND workspace_id = ? AND object = ?",
        )
        .bind(&merged)
        .bind(now)
        .bind(id)
        .bind(workspace_id)
        .bind(object)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("record '{id}' not found for object '{object}'"));
        }

        Ok(())
    }
}
