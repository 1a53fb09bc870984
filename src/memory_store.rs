//! In-memory [`RecordStore`] implementation for tests and dry runs.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Tracks operation counts so tests can assert on repository traffic
//! (cache hit behaviour, empty-batch short-circuits), and can be told to
//! fail for a given object type to exercise fail-open paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::store::{FieldFilter, RecordStore, StoredRecord};

/// In-memory record store for tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<(String, String), Vec<StoredRecord>>>,
    fail_objects: RwLock<Vec<String>>,
    find_one_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation against `object` return an error.
    pub fn fail_for_object(&self, object: &str) {
        self.fail_objects.write().unwrap().push(object.to_string());
    }

    pub fn find_one_calls(&self) -> usize {
        self.find_one_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// All records of one object type, for assertions.
    pub fn records(&self, workspace_id: &str, object: &str) -> Vec<StoredRecord> {
        self.records
            .read()
            .unwrap()
            .get(&(workspace_id.to_string(), object.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn check_failure(&self, object: &str) -> Result<()> {
        if self.fail_objects.read().unwrap().iter().any(|o| o == object) {
            bail!("object '{object}' does not exist in this workspace");
        }
        Ok(())
    }
}

fn matches(record: &StoredRecord, filter: &FieldFilter) -> bool {
    let Some(field_value) = record.fields.get(&filter.field) else {
        return false;
    };

    match &filter.sub_field {
        Some(sub) => match field_value {
            Value::Object(composite) => composite.get(sub) == Some(&filter.value),
            _ => false,
        },
        None => field_value == &filter.value,
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_one(
        &self,
        workspace_id: &str,
        object: &str,
        filter: &FieldFilter,
    ) -> Result<Option<StoredRecord>> {
        self.find_one_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(object)?;

        let records = self.records.read().unwrap();
        Ok(records
            .get(&(workspace_id.to_string(), object.to_string()))
            .and_then(|rows| rows.iter().find(|r| matches(r, filter)))
            .cloned())
    }

    async fn insert(
        &self,
        workspace_id: &str,
        object: &str,
        fields: &Map<String, Value>,
    ) -> Result<StoredRecord> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(object)?;

        let record = StoredRecord {
            id: Uuid::new_v4().to_string(),
            fields: fields.clone(),
        };

        let mut records = self.records.write().unwrap();
        records
            .entry((workspace_id.to_string(), object.to_string()))
            .or_default()
            .push(record.clone());

        Ok(record)
    }

    async fn update(
        &self,
        workspace_id: &str,
        object: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(object)?;

        let mut records = self.records.write().unwrap();
        let rows = records
            .get_mut(&(workspace_id.to_string(), object.to_string()))
            .ok_or_else(|| anyhow::anyhow!("no records for object '{object}'"))?;
        let record = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow::anyhow!("record '{id}' not found for object '{object}'"))?;

        for (key, value) in fields {
            record.fields.insert(key.clone(), value.clone());
        }

        Ok(())
    }
}
