//! Storage abstraction over the CRM's generic record repository.
//!
//! The ingestion engine never talks to entity-specific tables; it goes
//! through [`RecordStore`], which models the repository capability it
//! needs: find-one by field predicate, insert, and update — all scoped to
//! a workspace and a target object type, with permission checks assumed
//! bypassed (system-level ingestion identity).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// An equality predicate on a (possibly composite) field.
///
/// `sub_field` addresses one level of nesting, enough for composite
/// attributes like `{phones: {primaryPhoneNumber: x}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub sub_field: Option<String>,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            sub_field: None,
            value,
        }
    }

    /// Build a filter from a dotted path, splitting off at most one
    /// composite sub-field.
    pub fn from_path(path: &str, value: Value) -> Self {
        match path.split_once('.') {
            Some((field, sub_field)) => Self {
                field: field.to_string(),
                sub_field: Some(sub_field.to_string()),
                value,
            },
            None => Self::new(path, value),
        }
    }
}

/// A record as stored, with its id and JSON field map.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Abstract record repository for one tenant's typed record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find one record of `object` matching the filter, if any.
    async fn find_one(
        &self,
        workspace_id: &str,
        object: &str,
        filter: &FieldFilter,
    ) -> Result<Option<StoredRecord>>;

    /// Insert a new record, returning it with its generated id.
    async fn insert(
        &self,
        workspace_id: &str,
        object: &str,
        fields: &Map<String, Value>,
    ) -> Result<StoredRecord>;

    /// Update an existing record in place by id.
    async fn update(
        &self,
        workspace_id: &str,
        object: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_from_path_splits_one_composite_level() {
        let plain = FieldFilter::from_path("externalId", json!("x1"));
        assert_eq!(plain.field, "externalId");
        assert_eq!(plain.sub_field, None);

        let nested = FieldFilter::from_path("phones.primaryPhoneNumber", json!("+15125552368"));
        assert_eq!(nested.field, "phones");
        assert_eq!(nested.sub_field.as_deref(), Some("primaryPhoneNumber"));
    }
}
