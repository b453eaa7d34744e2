// ABOUTME: SQLite value to JSON conversion and per-column type coercion
// ABOUTME: Handles all SQLite types with lossless conversion and BLOB base64 encoding

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Target kind for per-column value coercion.
///
/// A table configured with a record schema maps column names to one of
/// these kinds; extracted values are normalized to the declared kind.
/// Columns without a declared kind keep the driver's native value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Bool,
    Float,
    Double,
    Decimal,
    DateTime,
    Char,
    Blob,
}

/// Convert a single SQLite value to JSON
///
/// Maps SQLite types to JSON types:
/// - INTEGER → number (i64)
/// - REAL → number (f64)
/// - TEXT → string (UTF-8)
/// - BLOB → object with base64-encoded data
/// - NULL → null
///
/// # Examples
///
/// ```
/// # use sqlite_rowsync::values::sqlite_value_to_json;
/// # use rusqlite::types::Value;
/// let json = sqlite_value_to_json(&Value::Integer(42));
/// assert_eq!(json, serde_json::json!(42));
/// ```
pub fn sqlite_value_to_json(value: &rusqlite::types::Value) -> JsonValue {
    match value {
        rusqlite::types::Value::Null => JsonValue::Null,

        rusqlite::types::Value::Integer(i) => JsonValue::Number((*i).into()),

        rusqlite::types::Value::Real(f) => {
            // JSON can't represent NaN or Infinity; store those as strings
            match serde_json::Number::from_f64(*f) {
                Some(n) => JsonValue::Number(n),
                None => JsonValue::String(f.to_string()),
            }
        }

        rusqlite::types::Value::Text(s) => JsonValue::String(s.clone()),

        rusqlite::types::Value::Blob(b) => {
            // Encode BLOB as base64 in a JSON object
            // Format: {"_type": "blob", "data": "base64..."}
            // This allows distinguishing BLOBs from regular strings
            let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b);
            serde_json::json!({
                "_type": "blob",
                "data": encoded
            })
        }
    }
}

/// Convert a JSON value back to a SQLite value for statement binding
///
/// Inverse of [`sqlite_value_to_json`]:
/// - null → NULL
/// - bool → INTEGER 0/1
/// - number → INTEGER when integral, REAL otherwise
/// - string → TEXT
/// - `{"_type": "blob", "data": "base64..."}` → BLOB
///
/// Anything else (arrays, foreign objects, undecodable blob payloads)
/// is stored as its JSON text so no value is ever dropped.
pub fn json_to_sqlite_value(value: &JsonValue) -> rusqlite::types::Value {
    match value {
        JsonValue::Null => rusqlite::types::Value::Null,
        JsonValue::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => rusqlite::types::Value::Text(s.clone()),
        JsonValue::Object(map) => {
            if map.get("_type").and_then(JsonValue::as_str) == Some("blob") {
                if let Some(data) = map.get("data").and_then(JsonValue::as_str) {
                    if let Ok(bytes) = base64::Engine::decode(
                        &base64::engine::general_purpose::STANDARD,
                        data,
                    ) {
                        return rusqlite::types::Value::Blob(bytes);
                    }
                    tracing::warn!("blob payload is not valid base64, keeping JSON text");
                }
            }
            rusqlite::types::Value::Text(value.to_string())
        }
        JsonValue::Array(_) => rusqlite::types::Value::Text(value.to_string()),
    }
}

/// Coerce an extracted value to a declared column kind
///
/// NULL is preserved as null. Values that cannot be represented in the
/// declared kind fall through unchanged, keeping the driver's native
/// value.
///
/// # Examples
///
/// ```
/// # use sqlite_rowsync::values::{coerce, ColumnKind};
/// assert_eq!(coerce(ColumnKind::Int, serde_json::json!("42")), serde_json::json!(42));
/// assert_eq!(coerce(ColumnKind::Bool, serde_json::json!(1)), serde_json::json!(true));
/// assert_eq!(coerce(ColumnKind::Text, serde_json::json!(7)), serde_json::json!("7"));
/// ```
pub fn coerce(kind: ColumnKind, value: JsonValue) -> JsonValue {
    if value.is_null() {
        return JsonValue::Null;
    }
    match kind {
        ColumnKind::Text | ColumnKind::DateTime | ColumnKind::Decimal => match value {
            JsonValue::String(_) => value,
            JsonValue::Number(n) => JsonValue::String(n.to_string()),
            JsonValue::Bool(b) => JsonValue::String(b.to_string()),
            other => other,
        },
        ColumnKind::TinyInt => coerce_integer(value, u8::MIN as i64, u8::MAX as i64),
        ColumnKind::SmallInt => coerce_integer(value, i16::MIN as i64, i16::MAX as i64),
        ColumnKind::Int => coerce_integer(value, i32::MIN as i64, i32::MAX as i64),
        ColumnKind::BigInt => coerce_integer(value, i64::MIN, i64::MAX),
        ColumnKind::Bool => match &value {
            JsonValue::Bool(_) => value,
            JsonValue::Number(n) => JsonValue::Bool(n.as_f64() != Some(0.0)),
            JsonValue::String(s) if s == "true" || s == "1" => JsonValue::Bool(true),
            JsonValue::String(s) if s == "false" || s == "0" => JsonValue::Bool(false),
            _ => value,
        },
        ColumnKind::Float => match &value {
            JsonValue::Number(n) => match n.as_f64() {
                // Round-trip through f32 to match the declared precision
                Some(f) => serde_json::Number::from_f64(f as f32 as f64)
                    .map(JsonValue::Number)
                    .unwrap_or(value),
                None => value,
            },
            JsonValue::String(s) => s
                .parse::<f32>()
                .ok()
                .and_then(|f| serde_json::Number::from_f64(f as f64))
                .map(JsonValue::Number)
                .unwrap_or(value),
            _ => value,
        },
        ColumnKind::Double => match &value {
            JsonValue::Number(_) => value,
            JsonValue::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(value),
            _ => value,
        },
        ColumnKind::Char => match &value {
            JsonValue::String(s) => {
                JsonValue::String(s.chars().next().map(String::from).unwrap_or_default())
            }
            JsonValue::Number(n) => {
                JsonValue::String(n.to_string().chars().next().map(String::from).unwrap_or_default())
            }
            _ => value,
        },
        ColumnKind::Blob => value,
    }
}

fn coerce_integer(value: JsonValue, min: i64, max: i64) -> JsonValue {
    let parsed = match &value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.parse::<i64>().ok(),
        JsonValue::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    match parsed {
        Some(i) if i >= min && i <= max => JsonValue::Number(i.into()),
        // Out of range or unparsable, keep the native value
        _ => value,
    }
}
