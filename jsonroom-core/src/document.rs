//! The JSON document envelope inside the CRDT.
//!
//! The replica's top-level map (`root`) is used only as an envelope: the
//! whole document lives wholesale under the single entry `doc` as a yrs
//! `Any` value. Concurrent writes to that entry resolve last-writer-wins.
//!
//! Conversion is explicit rather than going through serde so that integers
//! stay integers (`Any::BigInt`) and compare equal after a round trip.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use yrs::Any;

/// Name of the replica's top-level shared map.
pub const ROOT_MAP: &str = "root";

/// Key under which the document is stored in [`ROOT_MAP`].
pub const DOC_KEY: &str = "doc";

/// The document an empty replica reads as.
pub fn empty_document() -> Value {
    Value::Object(Map::new())
}

/// Whether a value can hold children (object or array).
pub fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Convert plain JSON into a CRDT value.
///
/// Integers that fit `i64` are kept exact. A `u64` above `i64::MAX` is
/// stored as an `f64` and reads back rounded to the nearest representable
/// double, the same as a JavaScript number.
pub fn to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Any::BigInt(i)
            } else {
                // u64 beyond i64::MAX and real floats
                Any::Number(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => {
            let items: Vec<Any> = items.iter().map(to_any).collect();
            Any::Array(Arc::from(items))
        }
        Value::Object(map) => {
            let entries: HashMap<String, Any> =
                map.iter().map(|(k, v)| (k.clone(), to_any(v))).collect();
            Any::Map(Arc::new(entries))
        }
    }
}

/// Convert a CRDT value back into plain JSON.
///
/// Always produces an owned tree; nothing aliases replica internals.
pub fn from_any(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Any::BigInt(i) => Value::Number(Number::from(*i)),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(from_any).collect()),
        Any::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), from_any(v)))
                .collect(),
        ),
    }
}

/// Render a document the way the export/download path does.
pub fn to_pretty_json(document: &Value) -> String {
    serde_json::to_string_pretty(document).unwrap_or_else(|_| "{}".to_string())
}
