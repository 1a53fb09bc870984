//! Dot-notation path extraction over JSON values.
//!
//! Source payloads are arbitrarily nested, so field mappings address them
//! with dotted paths supporting bracket indexing (e.g. `recording[0].public_url`).
//! Extraction is total: a path that does not resolve yields `None`.

use serde_json::Value;

/// A single path segment: an object key or an array index.
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn parse_segments(path: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();

    for part in path.split('.') {
        // "key[3]" splits into a key segment and an index segment
        if let Some(open) = part.find('[') {
            if part.ends_with(']') {
                if let Ok(index) = part[open + 1..part.len() - 1].parse::<usize>() {
                    segments.push(Segment::Key(&part[..open]));
                    segments.push(Segment::Index(index));
                    continue;
                }
            }
        }
        segments.push(Segment::Key(part));
    }

    segments
}

/// Extract a value from nested JSON using a dot-notation path.
///
/// Returns `None` if any intermediate key is missing, an index is out of
/// range, or the path tries to descend into a non-container value.
pub fn extract_value_by_path(data: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = data;

    for segment in parse_segments(path) {
        match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => {
                current = map.get(key)?;
            }
            (Segment::Index(index), Value::Array(items)) => {
                current = items.get(index)?;
            }
            _ => return None,
        }
    }

    if current.is_null() {
        return None;
    }

    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_top_level_field() {
        let data = json!({"first_name": "John"});
        assert_eq!(
            extract_value_by_path(&data, "first_name"),
            Some(json!("John"))
        );
    }

    #[test]
    fn extracts_nested_field() {
        let data = json!({"contact": {"address": {"city": "Austin"}}});
        assert_eq!(
            extract_value_by_path(&data, "contact.address.city"),
            Some(json!("Austin"))
        );
    }

    #[test]
    fn extracts_array_index() {
        let data = json!({"recording": [{"public_url": "https://example.com/a.mp3"}]});
        assert_eq!(
            extract_value_by_path(&data, "recording[0].public_url"),
            Some(json!("https://example.com/a.mp3"))
        );
    }

    #[test]
    fn missing_key_yields_none() {
        let data = json!({"a": {"b": 1}});
        assert_eq!(extract_value_by_path(&data, "a.c"), None);
        assert_eq!(extract_value_by_path(&data, "x.y.z"), None);
    }

    #[test]
    fn out_of_range_index_yields_none() {
        let data = json!({"items": [1, 2]});
        assert_eq!(extract_value_by_path(&data, "items[5]"), None);
    }

    #[test]
    fn indexing_a_non_array_yields_none() {
        let data = json!({"items": {"0": "zero"}});
        assert_eq!(extract_value_by_path(&data, "items[0]"), None);
    }

    #[test]
    fn descending_into_a_scalar_yields_none() {
        let data = json!({"a": 42});
        assert_eq!(extract_value_by_path(&data, "a.b"), None);
    }

    #[test]
    fn empty_path_yields_none() {
        let data = json!({"a": 1});
        assert_eq!(extract_value_by_path(&data, ""), None);
    }

    #[test]
    fn null_leaf_yields_none() {
        let data = json!({"a": null});
        assert_eq!(extract_value_by_path(&data, "a"), None);
    }

    #[test]
    fn preserves_non_string_values() {
        let data = json!({"count": 7, "flags": [true, false]});
        assert_eq!(extract_value_by_path(&data, "count"), Some(json!(7)));
        assert_eq!(extract_value_by_path(&data, "flags[1]"), Some(json!(false)));
    }
}
