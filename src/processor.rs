//! Per-batch record processing: compile → resolve → dedup → write.
//!
//! Records are processed sequentially and independently; a failure on one
//! record is recorded and never aborts the batch. One relation cache is
//! shared across the whole batch.

use serde_json::Value;
use tracing::warn;

use crate::mapping::build_record_from_mappings;
use crate::models::{FieldMapping, IngestionError, Pipeline, ProcessingResult};
use crate::paths::extract_value_by_path;
use crate::resolver::{resolve_relations, RelationCache};
use crate::store::{FieldFilter, RecordStore};

/// Process one batch of raw source records against a pipeline.
///
/// An empty batch returns all-zero stats without touching the store.
pub async fn process_records(
    records: &[Value],
    pipeline: &Pipeline,
    mappings: &[FieldMapping],
    workspace_id: &str,
    store: &dyn RecordStore,
) -> ProcessingResult {
    let mut result = ProcessingResult::default();
    let mut cache = RelationCache::new();

    for (index, source) in records.iter().enumerate() {
        match process_one(source, pipeline, mappings, workspace_id, store, &mut cache).await {
            Ok(Outcome::Created) => result.records_created += 1,
            Ok(Outcome::Updated) => result.records_updated += 1,
            Err(err) => {
                result.records_failed += 1;
                result.errors.push(IngestionError {
                    record_index: index as i64,
                    message: err.to_string(),
                    source_data: Some(source.clone()),
                });
                warn!(
                    pipeline_id = %pipeline.id,
                    record_index = index,
                    error = %err,
                    "failed to process record"
                );
            }
        }
    }

    result
}

enum Outcome {
    Created,
    Updated,
}

async fn process_one(
    source: &Value,
    pipeline: &Pipeline,
    mappings: &[FieldMapping],
    workspace_id: &str,
    store: &dyn RecordStore,
    cache: &mut RelationCache,
) -> anyhow::Result<Outcome> {
    let mapped = build_record_from_mappings(source, mappings);
    let resolved = resolve_relations(mapped, workspace_id, store, cache).await;

    if let Some(dedup_path) = &pipeline.dedup_field_path {
        let dedup_value = extract_value_by_path(&Value::Object(resolved.clone()), dedup_path);

        if let Some(value) = dedup_value {
            let filter = FieldFilter::from_path(dedup_path, value);
            if let Some(existing) = store
                .find_one(workspace_id, &pipeline.target_object, &filter)
                .await?
            {
                store
                    .update(workspace_id, &pipeline.target_object, &existing.id, &resolved)
                    .await?;
                return Ok(Outcome::Updated);
            }
        }
    }

    store
        .insert(workspace_id, &pipeline.target_object, &resolved)
        .await?;
    Ok(Outcome::Created)
}
