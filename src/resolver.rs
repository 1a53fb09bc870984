//! Relation resolution: pending references → foreign-key ids.
//!
//! Resolution is fail-open by design: a relation that cannot be resolved
//! (no match without auto-create, missing target object, repository
//! error) drops the field from the record instead of failing it. The
//! outcome of each reference is an explicit [`Resolution`] so callers and
//! tests can see why a field was dropped.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::mapping::{MappedRecord, MappedValue, RelationRef};
use crate::store::{FieldFilter, RecordStore};
use crate::transform::stringify;

/// Per-run cache of resolved reference ids.
///
/// Key: `(target object, match field, stringified match value)`. Scoped
/// to one processing batch and discarded after; guarantees at most one
/// store lookup per distinct reference per run.
#[derive(Default)]
pub struct RelationCache {
    entries: HashMap<(String, String, String), String>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(reference: &RelationRef) -> (String, String, String) {
        (
            reference.target_object.clone(),
            reference.match_field.clone(),
            stringify(&reference.match_value),
        )
    }
}

/// Outcome of resolving one relation reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(String),
    Dropped(DropReason),
}

/// Why a relation field was dropped from the record.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// No match and auto-create was not enabled.
    NotFound,
    /// Lookup or create failed; the error is swallowed deliberately.
    LookupFailed(String),
}

/// Replace every pending relation reference in a compiled record,
/// yielding a plain JSON field map ready for the record store.
///
/// Unresolvable references are removed from the record entirely (no null
/// is written). Non-relation fields pass through untouched.
pub async fn resolve_relations(
    record: MappedRecord,
    workspace_id: &str,
    store: &dyn RecordStore,
    cache: &mut RelationCache,
) -> Map<String, Value> {
    let mut resolved = Map::new();

    for (field, value) in record {
        match value {
            MappedValue::Direct(v) => {
                resolved.insert(field, v);
            }
            MappedValue::Relation(reference) => {
                match resolve_reference(&reference, workspace_id, store, cache).await {
                    Resolution::Resolved(id) => {
                        resolved.insert(field, Value::String(id));
                    }
                    Resolution::Dropped(reason) => {
                        warn!(
                            field = %field,
                            target_object = %reference.target_object,
                            match_field = %reference.match_field,
                            ?reason,
                            "dropping unresolved relation field"
                        );
                    }
                }
            }
        }
    }

    resolved
}

/// Resolve one reference via cache, lookup, and optional auto-create.
pub async fn resolve_reference(
    reference: &RelationRef,
    workspace_id: &str,
    store: &dyn RecordStore,
    cache: &mut RelationCache,
) -> Resolution {
    let key = RelationCache::key(reference);
    if let Some(id) = cache.entries.get(&key) {
        return Resolution::Resolved(id.clone());
    }

    match lookup_or_create(reference, workspace_id, store).await {
        Ok(Some(id)) => {
            cache.entries.insert(key, id.clone());
            Resolution::Resolved(id)
        }
        Ok(None) => Resolution::Dropped(DropReason::NotFound),
        Err(err) => Resolution::Dropped(DropReason::LookupFailed(err.to_string())),
    }
}

async fn lookup_or_create(
    reference: &RelationRef,
    workspace_id: &str,
    store: &dyn RecordStore,
) -> anyhow::Result<Option<String>> {
    let filter = FieldFilter::new(&reference.match_field, reference.match_value.clone());

    if let Some(existing) = store
        .find_one(workspace_id, &reference.target_object, &filter)
        .await?
    {
        return Ok(Some(existing.id));
    }

    if !reference.auto_create {
        return Ok(None);
    }

    let mut fields = Map::new();
    fields.insert(
        reference.match_field.clone(),
        reference.match_value.clone(),
    );
    let created = store
        .insert(workspace_id, &reference.target_object, &fields)
        .await?;

    Ok(Some(created.id))
}
