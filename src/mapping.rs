//! The mapping compiler: raw source record → partially-typed target record.
//!
//! Composite fields (name, phones, address structures) are assembled from
//! multiple mappings targeting the same field with different sub-fields.
//! Relation mappings compile to a [`RelationRef`] that the resolver later
//! replaces with a foreign-key id; the [`MappedValue`] sum type keeps
//! unresolved references out of the record store by construction.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::models::FieldMapping;
use crate::paths::extract_value_by_path;
use crate::transform::apply_transform;

/// An unresolved foreign-key lookup produced by a relation mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRef {
    pub target_object: String,
    pub match_field: String,
    pub match_value: Value,
    pub auto_create: bool,
}

/// A compiled field value: either a plain JSON value or a pending
/// relation reference.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedValue {
    Direct(Value),
    Relation(RelationRef),
}

/// A compiled target record, keyed by target field name.
pub type MappedRecord = BTreeMap<String, MappedValue>;

/// Assemble a target record from source data using field mappings.
///
/// Mappings are applied in position order. Mappings whose source path does
/// not resolve (or resolves to null / empty string, before or after the
/// transform) are skipped entirely; the output contains only fields that
/// had a defined mapped value.
pub fn build_record_from_mappings(source: &Value, mappings: &[FieldMapping]) -> MappedRecord {
    let mut record = MappedRecord::new();

    for mapping in mappings {
        let Some(raw) = extract_value_by_path(source, &mapping.source_field_path) else {
            continue;
        };
        if is_blank(&raw) {
            continue;
        }

        let transformed = apply_transform(raw, mapping.transform.as_ref());
        if is_blank(&transformed) {
            continue;
        }

        if let Some(sub_field) = &mapping.target_composite_sub_field {
            // Composite field: merge sub-fields under the parent key
            let existing = record
                .entry(mapping.target_field_name.clone())
                .or_insert_with(|| MappedValue::Direct(Value::Object(Map::new())));

            match existing {
                MappedValue::Direct(Value::Object(composite)) => {
                    composite.insert(sub_field.clone(), transformed);
                }
                other => {
                    // A prior direct assignment gets replaced by the composite
                    let mut composite = Map::new();
                    composite.insert(sub_field.clone(), transformed);
                    *other = MappedValue::Direct(Value::Object(composite));
                }
            }
        } else if let (Some(target_object), Some(match_field)) = (
            &mapping.relation_target_object,
            &mapping.relation_match_field,
        ) {
            record.insert(
                mapping.target_field_name.clone(),
                MappedValue::Relation(RelationRef {
                    target_object: target_object.clone(),
                    match_field: match_field.clone(),
                    match_value: transformed,
                    auto_create: mapping.relation_auto_create,
                }),
            );
        } else {
            record.insert(
                mapping.target_field_name.clone(),
                MappedValue::Direct(transformed),
            );
        }
    }

    record
}

/// Render a compiled record as plain JSON for previews, with pending
/// relation references shown as descriptive objects.
pub fn to_preview(record: &MappedRecord) -> Value {
    let mut out = Map::new();
    for (field, value) in record {
        let rendered = match value {
            MappedValue::Direct(v) => v.clone(),
            MappedValue::Relation(r) => serde_json::json!({
                "relation": {
                    "targetObject": r.target_object,
                    "matchField": r.match_field,
                    "matchValue": r.match_value,
                    "autoCreate": r.auto_create,
                }
            }),
        };
        out.insert(field.clone(), rendered);
    }
    Value::Object(out)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::FieldTransform;
    use serde_json::json;

    fn mapping(source: &str, target: &str) -> FieldMapping {
        FieldMapping {
            id: String::new(),
            pipeline_id: String::new(),
            source_field_path: source.to_string(),
            target_field_name: target.to_string(),
            target_composite_sub_field: None,
            transform: None,
            relation_target_object: None,
            relation_match_field: None,
            relation_auto_create: false,
            position: 0,
        }
    }

    fn composite_mapping(source: &str, target: &str, sub: &str) -> FieldMapping {
        FieldMapping {
            target_composite_sub_field: Some(sub.to_string()),
            ..mapping(source, target)
        }
    }

    #[test]
    fn direct_assignment() {
        let source = json!({"first_name": "John"});
        let record = build_record_from_mappings(&source, &[mapping("first_name", "firstName")]);
        assert_eq!(
            record.get("firstName"),
            Some(&MappedValue::Direct(json!("John")))
        );
    }

    #[test]
    fn unresolved_path_leaves_field_absent() {
        let source = json!({"a": 1});
        let record = build_record_from_mappings(&source, &[mapping("missing", "target")]);
        assert!(!record.contains_key("target"));
        assert!(record.is_empty());
    }

    #[test]
    fn null_and_empty_source_values_are_skipped() {
        let source = json!({"a": null, "b": ""});
        let mappings = [mapping("a", "x"), mapping("b", "y")];
        assert!(build_record_from_mappings(&source, &mappings).is_empty());
    }

    #[test]
    fn value_transformed_to_null_is_skipped() {
        let source = json!({"status": "None"});
        let m = FieldMapping {
            transform: Some(FieldTransform::SanitizeNull),
            ..mapping("status", "status")
        };
        assert!(build_record_from_mappings(&source, &[m]).is_empty());
    }

    #[test]
    fn composite_merge_is_order_independent() {
        let source = json!({"first_name": "John", "last_name": "Doe"});
        let forward = [
            composite_mapping("first_name", "name", "firstName"),
            composite_mapping("last_name", "name", "lastName"),
        ];
        let reverse = [
            composite_mapping("last_name", "name", "lastName"),
            composite_mapping("first_name", "name", "firstName"),
        ];

        let expected = MappedValue::Direct(json!({"firstName": "John", "lastName": "Doe"}));
        assert_eq!(
            build_record_from_mappings(&source, &forward).get("name"),
            Some(&expected)
        );
        assert_eq!(
            build_record_from_mappings(&source, &reverse).get("name"),
            Some(&expected)
        );
    }

    #[test]
    fn composite_skips_missing_sub_fields_only() {
        let source = json!({"first_name": "John"});
        let mappings = [
            composite_mapping("first_name", "name", "firstName"),
            composite_mapping("last_name", "name", "lastName"),
        ];
        let record = build_record_from_mappings(&source, &mappings);
        assert_eq!(
            record.get("name"),
            Some(&MappedValue::Direct(json!({"firstName": "John"})))
        );
    }

    #[test]
    fn relation_mapping_compiles_to_reference() {
        let source = json!({"agent_email": "agent@example.com"});
        let m = FieldMapping {
            relation_target_object: Some("workspaceMember".to_string()),
            relation_match_field: Some("email".to_string()),
            relation_auto_create: true,
            ..mapping("agent_email", "ownerId")
        };
        let record = build_record_from_mappings(&source, &[m]);
        assert_eq!(
            record.get("ownerId"),
            Some(&MappedValue::Relation(RelationRef {
                target_object: "workspaceMember".to_string(),
                match_field: "email".to_string(),
                match_value: json!("agent@example.com"),
                auto_create: true,
            }))
        );
    }

    #[test]
    fn transform_feeds_relation_match_value() {
        let source = json!({"agent_email": "  AGENT@EXAMPLE.COM "});
        let m = FieldMapping {
            transform: Some(FieldTransform::Trim),
            relation_target_object: Some("workspaceMember".to_string()),
            relation_match_field: Some("email".to_string()),
            ..mapping("agent_email", "ownerId")
        };
        let record = build_record_from_mappings(&source, &[m]);
        match record.get("ownerId") {
            Some(MappedValue::Relation(r)) => {
                assert_eq!(r.match_value, json!("AGENT@EXAMPLE.COM"));
            }
            other => panic!("expected relation reference, got {other:?}"),
        }
    }

    #[test]
    fn number_scale_scenario() {
        let source = json!({"call_length": "45"});
        let m = FieldMapping {
            transform: Some(FieldTransform::NumberScale { multiplier: 1.0 }),
            ..mapping("call_length", "duration")
        };
        let record = build_record_from_mappings(&source, &[m]);
        assert_eq!(record.get("duration"), Some(&MappedValue::Direct(json!(45))));
    }

    #[test]
    fn preview_renders_relations_descriptively() {
        let source = json!({"email": "a@b.c", "city": "Austin"});
        let relation = FieldMapping {
            relation_target_object: Some("person".to_string()),
            relation_match_field: Some("email".to_string()),
            ..mapping("email", "personId")
        };
        let record =
            build_record_from_mappings(&source, &[mapping("city", "city"), relation]);
        let preview = to_preview(&record);
        assert_eq!(preview["city"], json!("Austin"));
        assert_eq!(preview["personId"]["relation"]["matchField"], json!("email"));
    }
}
