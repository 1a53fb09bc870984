//! Field transforms applied to raw source values during mapping.
//!
//! Transforms are deliberately forgiving: a value that cannot be
//! transformed (wrong type, unparsable) passes through unchanged rather
//! than failing the record. Unknown transform kinds deserialize to
//! [`FieldTransform::Unknown`] and behave as the identity, so pipelines
//! saved by a newer version keep working.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declarative transform descriptor, stored as JSON on a field mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FieldTransform {
    Uppercase,
    Lowercase,
    Trim,
    /// Look up the stringified value in a key → value table.
    Map { values: HashMap<String, String> },
    /// Multiply a numeric value (or numeric string) and round to an integer.
    NumberScale { multiplier: f64 },
    /// Collapse null-like literals (`""`, `"null"`, `"None"`, ...) to JSON null.
    SanitizeNull,
    /// Parse a date from `unix` seconds, `unix_ms` millis, or a date string,
    /// emitting an ISO-8601 timestamp.
    DateFormat { source_format: String },
    /// Normalize a US phone number to E.164 (`+1XXXXXXXXXX`).
    PhoneNormalize,
    /// Ignore the input and emit a configured constant.
    Static { value: Value },
    /// Transform kind from a newer version; acts as the identity.
    #[serde(other)]
    Unknown,
}

/// Apply a transform to a raw source value.
///
/// Returns the transformed value, or the original when no transform is
/// configured or the transform does not apply.
pub fn apply_transform(value: Value, transform: Option<&FieldTransform>) -> Value {
    let Some(transform) = transform else {
        return value;
    };

    match transform {
        FieldTransform::Uppercase => match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        },
        FieldTransform::Lowercase => match value {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other,
        },
        FieldTransform::Trim => match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        },
        FieldTransform::Map { values } => {
            let key = stringify(&value);
            match values.get(&key) {
                Some(mapped) => Value::String(mapped.clone()),
                None => value,
            }
        }
        FieldTransform::NumberScale { multiplier } => apply_number_scale(value, *multiplier),
        FieldTransform::SanitizeNull => sanitize_null(value),
        FieldTransform::DateFormat { source_format } => parse_date_value(value, source_format),
        FieldTransform::PhoneNormalize => normalize_phone(value),
        FieldTransform::Static { value: constant } => constant.clone(),
        FieldTransform::Unknown => value,
    }
}

/// JS-style stringification, used for map-table keys and cache keys.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn apply_number_scale(value: Value, multiplier: f64) -> Value {
    let parsed = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(n) => Value::from((n * multiplier).round() as i64),
        None => value,
    }
}

const NULL_LIKE: &[&str] = &["", "null", "NULL", "None", "none", "undefined"];

fn sanitize_null(value: Value) -> Value {
    match &value {
        Value::Null => Value::Null,
        Value::String(s) if NULL_LIKE.contains(&s.as_str()) => Value::Null,
        _ => value,
    }
}

fn parse_date_value(value: Value, source_format: &str) -> Value {
    let to_iso = |dt: DateTime<Utc>| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true));

    match source_format {
        "unix" | "unix_ms" => {
            let timestamp = match &value {
                Value::Number(n) => n.as_f64().map(|f| f as i64),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => return value,
            };

            let Some(ts) = timestamp else {
                return value;
            };

            let millis = if source_format == "unix" { ts * 1000 } else { ts };
            match Utc.timestamp_millis_opt(millis).single() {
                Some(dt) => to_iso(dt),
                None => value,
            }
        }
        _ => {
            let Value::String(s) = &value else {
                return value;
            };

            match parse_date_string(s) {
                Some(dt) => to_iso(dt),
                None => value,
            }
        }
    }
}

fn parse_date_string(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}

fn normalize_phone(value: Value) -> Value {
    let Value::String(s) = &value else {
        return value;
    };
    if s.trim().is_empty() {
        return value;
    }

    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();

    // US numbers only: ten digits, or eleven with a leading country code 1
    let national = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('1') => &digits[1..],
        _ => return value,
    };

    // Area code and exchange cannot start with 0 or 1 in the NANP
    let leading_ok = |d: u8| d >= b'2';
    if !leading_ok(national.as_bytes()[0]) || !leading_ok(national.as_bytes()[3]) {
        return value;
    }

    Value::String(format!("+1{national}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_transform_is_identity() {
        for v in [json!("x"), json!(0), json!(null), json!({"a": 1}), json!([1])] {
            assert_eq!(apply_transform(v.clone(), None), v);
        }
    }

    #[test]
    fn unknown_kind_is_identity() {
        let t: FieldTransform =
            serde_json::from_value(json!({"type": "reverseWords"})).unwrap();
        assert_eq!(t, FieldTransform::Unknown);
        assert_eq!(apply_transform(json!("hello"), Some(&t)), json!("hello"));
    }

    #[test]
    fn string_ops_pass_non_strings_through() {
        assert_eq!(
            apply_transform(json!(42), Some(&FieldTransform::Uppercase)),
            json!(42)
        );
        assert_eq!(
            apply_transform(json!("Hi"), Some(&FieldTransform::Uppercase)),
            json!("HI")
        );
        assert_eq!(
            apply_transform(json!("Hi"), Some(&FieldTransform::Lowercase)),
            json!("hi")
        );
        assert_eq!(
            apply_transform(json!("  hi  "), Some(&FieldTransform::Trim)),
            json!("hi")
        );
    }

    #[test]
    fn map_looks_up_stringified_value() {
        let t = FieldTransform::Map {
            values: HashMap::from([
                ("1".to_string(), "active".to_string()),
                ("yes".to_string(), "true".to_string()),
            ]),
        };
        assert_eq!(apply_transform(json!(1), Some(&t)), json!("active"));
        assert_eq!(apply_transform(json!("yes"), Some(&t)), json!("true"));
        // Absent key returns the original value, not null
        assert_eq!(apply_transform(json!("maybe"), Some(&t)), json!("maybe"));
    }

    #[test]
    fn number_scale_parses_numeric_strings() {
        let t = FieldTransform::NumberScale { multiplier: 1.0 };
        assert_eq!(apply_transform(json!("45"), Some(&t)), json!(45));

        let cents = FieldTransform::NumberScale { multiplier: 100.0 };
        assert_eq!(apply_transform(json!(12.345), Some(&cents)), json!(1235));
        assert_eq!(apply_transform(json!("n/a"), Some(&cents)), json!("n/a"));
    }

    #[test]
    fn sanitize_null_maps_all_null_like_literals() {
        let t = FieldTransform::SanitizeNull;
        for s in ["", "null", "NULL", "None", "none", "undefined"] {
            assert_eq!(apply_transform(json!(s), Some(&t)), json!(null));
        }
        assert_eq!(apply_transform(json!(null), Some(&t)), json!(null));
        // Zero and unlisted strings pass through
        assert_eq!(apply_transform(json!(0), Some(&t)), json!(0));
        assert_eq!(apply_transform(json!("nil"), Some(&t)), json!("nil"));
    }

    #[test]
    fn date_format_unix_seconds() {
        let t = FieldTransform::DateFormat {
            source_format: "unix".to_string(),
        };
        assert_eq!(
            apply_transform(json!(1700000000), Some(&t)),
            json!("2023-11-14T22:13:20.000Z")
        );
        assert_eq!(
            apply_transform(json!("1700000000"), Some(&t)),
            json!("2023-11-14T22:13:20.000Z")
        );
    }

    #[test]
    fn date_format_unix_millis() {
        let t = FieldTransform::DateFormat {
            source_format: "unix_ms".to_string(),
        };
        assert_eq!(
            apply_transform(json!(1700000000500i64), Some(&t)),
            json!("2023-11-14T22:13:20.500Z")
        );
    }

    #[test]
    fn date_format_generic_string() {
        let t = FieldTransform::DateFormat {
            source_format: "".to_string(),
        };
        assert_eq!(
            apply_transform(json!("2024-03-01 08:30:00"), Some(&t)),
            json!("2024-03-01T08:30:00.000Z")
        );
        // Unparsable dates pass through unchanged
        assert_eq!(
            apply_transform(json!("not a date"), Some(&t)),
            json!("not a date")
        );
    }

    #[test]
    fn phone_normalize_handles_us_formats() {
        let t = FieldTransform::PhoneNormalize;
        assert_eq!(
            apply_transform(json!("(512) 555-2368"), Some(&t)),
            json!("+15125552368")
        );
        assert_eq!(
            apply_transform(json!("1-512-555-2368"), Some(&t)),
            json!("+15125552368")
        );
        // Empty, non-string, and unparsable values pass through
        assert_eq!(apply_transform(json!(""), Some(&t)), json!(""));
        assert_eq!(apply_transform(json!(5125552368i64), Some(&t)), json!(5125552368i64));
        assert_eq!(apply_transform(json!("12345"), Some(&t)), json!("12345"));
    }

    #[test]
    fn static_ignores_input() {
        let t = FieldTransform::Static {
            value: json!("webhook"),
        };
        assert_eq!(apply_transform(json!("anything"), Some(&t)), json!("webhook"));
        assert_eq!(apply_transform(json!(null), Some(&t)), json!("webhook"));
    }

    #[test]
    fn transform_round_trips_through_serde() {
        let t = FieldTransform::NumberScale { multiplier: 0.5 };
        let raw = serde_json::to_value(&t).unwrap();
        assert_eq!(raw, json!({"type": "numberScale", "multiplier": 0.5}));
        assert_eq!(serde_json::from_value::<FieldTransform>(raw).unwrap(), t);
    }
}
