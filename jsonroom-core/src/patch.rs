//! Edit intents and their translation into replica mutations.
//!
//! Every intent becomes exactly one [`Replica::mutate`] call tagged
//! [`ChangeOrigin::Local`]: read the document inside the transaction, edit an
//! owned copy, write the copy back. A rejected intent never writes, so the
//! document is left untouched.
//!
//! ## Path segments
//!
//! A segment addresses an array element only when the container it is
//! applied to is already an array *and* the segment is a canonical
//! non-negative decimal (`"0"`, `"12"`; not `"01"`, `"-1"`, `"1.0"`).
//! Against an object every segment is a plain key, so `"2"` on `{}` creates
//! the key `"2"`. The rule is the same at every depth.
//!
//! | operation | missing / scalar intermediate | array + non-index segment | index past end |
//! |-----------|-------------------------------|---------------------------|----------------|
//! | set       | replaced by `{}`              | `InvalidPath`             | padded with `null`, at most [`MAX_ARRAY_PADDING`]; further is `InvalidPath` |
//! | delete    | `InvalidPath`                 | `InvalidPath`             | no-op          |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::document::{empty_document, is_container};
use crate::replica::{ChangeOrigin, Replica};

/// Patch errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("Malformed edit intent: {0}")]
    Malformed(String),
}

impl PatchError {
    fn invalid(path: &JsonPath, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Paths
// ───────────────────────────────────────────────────────────────────

/// An ordered list of object keys / array indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct JsonPath(Vec<String>);

impl JsonPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse the dotted form typed into the editor (`a.b.0`).
    ///
    /// An empty string is the root path.
    pub fn parse_dotted(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::default();
        }
        Self::new(text.split('.'))
    }

    /// Build from JSON: an array of strings / non-negative integers, or a
    /// dotted string.
    pub fn from_value(value: &Value) -> Result<Self, PatchError> {
        match value {
            Value::String(s) => Ok(Self::parse_dotted(s)),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) if n.is_u64() => Ok(n.to_string()),
                    other => Err(PatchError::Malformed(format!(
                        "path segment must be a string or non-negative integer, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self),
            other => Err(PatchError::Malformed(format!(
                "path must be an array or a dotted string, got {other}"
            ))),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl FromStr for JsonPath {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_dotted(s))
    }
}

impl Serialize for JsonPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JsonPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Array index for `segment`, if it is a canonical non-negative decimal.
fn as_index(segment: &str) -> Option<usize> {
    let canonical = !segment.is_empty()
        && segment.bytes().all(|b| b.is_ascii_digit())
        && (segment == "0" || !segment.starts_with('0'));
    if canonical {
        segment.parse().ok()
    } else {
        None
    }
}

// ───────────────────────────────────────────────────────────────────
// Edit intents
// ───────────────────────────────────────────────────────────────────

/// A requested change to the document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum EditIntent {
    /// Replace the whole document.
    Replace(Value),
    /// Set the element at `path`.
    Set { path: JsonPath, value: Value },
    /// Remove the element at `path`.
    Delete { path: JsonPath },
}

impl EditIntent {
    /// Parse the editor's JSON shape.
    ///
    /// `{"full": v}` replaces, `{"path": p, "value": v}` sets (a `null`
    /// value is a set), and `{"path": p}` without `value` deletes.
    pub fn from_json(value: Value) -> Result<Self, PatchError> {
        let Value::Object(mut fields) = value else {
            return Err(PatchError::Malformed("edit intent must be a JSON object".into()));
        };

        if let Some(full) = fields.remove("full") {
            return Ok(Self::Replace(full));
        }

        let path = fields
            .get("path")
            .ok_or_else(|| PatchError::Malformed("missing 'full' or 'path'".into()))
            .and_then(JsonPath::from_value)?;

        let delete_marker = matches!(fields.get("delete"), Some(Value::Bool(true)));
        match fields.remove("value") {
            Some(_) if delete_marker => Err(PatchError::Malformed(
                "'value' and 'delete' are mutually exclusive".into(),
            )),
            Some(value) => Ok(Self::Set { path, value }),
            None => Ok(Self::Delete { path }),
        }
    }

    /// Parse intent JSON text.
    pub fn parse(text: &str) -> Result<Self, PatchError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| PatchError::Malformed(e.to_string()))?;
        Self::from_json(value)
    }
}

impl TryFrom<Value> for EditIntent {
    type Error = PatchError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

// ───────────────────────────────────────────────────────────────────
// Pure path algorithms
// ───────────────────────────────────────────────────────────────────

/// Most `null`s a single set may insert to reach an index past the end.
pub const MAX_ARRAY_PADDING: usize = 64;

/// Step into `container` for a set, creating what is missing.
fn child_for_set<'v>(
    container: &'v mut Value,
    segment: &str,
    path: &JsonPath,
) -> Result<&'v mut Value, PatchError> {
    match container {
        Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let index = as_index(segment).ok_or_else(|| {
                PatchError::invalid(path, format!("'{segment}' is not an index into an array"))
            })?;
            let len = items.len();
            if index > len.saturating_add(MAX_ARRAY_PADDING) {
                return Err(PatchError::invalid(
                    path,
                    format!("index {index} is too far past the end of an array of {len}"),
                ));
            }
            if index >= len {
                items.resize(index + 1, Value::Null);
            }
            Ok(&mut items[index])
        }
        // callers guarantee a container
        _ => Err(PatchError::invalid(path, "cannot descend into a scalar")),
    }
}

/// Assign `value` at `path` inside `document`.
///
/// Missing or scalar intermediates become `{}`; a scalar root becomes `{}`
/// when the path is non-empty. The empty path replaces the whole document.
pub fn set_at_path(document: &mut Value, path: &JsonPath, value: Value) -> Result<(), PatchError> {
    let Some((last, parents)) = path.segments().split_last() else {
        *document = value;
        return Ok(());
    };

    if !is_container(document) {
        *document = empty_document();
    }

    let mut cursor = document;
    for segment in parents {
        let child = child_for_set(cursor, segment, path)?;
        if !is_container(child) {
            *child = Value::Object(Map::new());
        }
        cursor = child;
    }

    *child_for_set(cursor, last, path)? = value;
    Ok(())
}

/// Remove the element at `path` from `document`.
///
/// Every intermediate must already resolve to an object or array. Returns
/// whether anything was removed; a missing final key is not an error.
pub fn delete_at_path(document: &mut Value, path: &JsonPath) -> Result<bool, PatchError> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(PatchError::invalid(path, "the document root cannot be deleted"));
    };

    let mut cursor = document;
    for segment in parents {
        let child = match cursor {
            Value::Object(map) => map.get_mut(segment.as_str()),
            Value::Array(items) => as_index(segment).and_then(|i| items.get_mut(i)),
            _ => None,
        };
        cursor = match child {
            Some(c) if is_container(c) => c,
            _ => {
                return Err(PatchError::invalid(
                    path,
                    format!("'{segment}' does not resolve to an object"),
                ))
            }
        };
    }

    match cursor {
        Value::Object(map) => Ok(map.remove(last.as_str()).is_some()),
        Value::Array(items) => match as_index(last) {
            Some(i) if i < items.len() => {
                items.remove(i);
                Ok(true)
            }
            _ => Ok(false),
        },
        _ => Err(PatchError::invalid(path, "the document is not an object")),
    }
}

// ───────────────────────────────────────────────────────────────────
// Replica binding
// ───────────────────────────────────────────────────────────────────

/// Applies edit intents to a replica as local mutations.
///
/// Each method returns whether the document changed; an unchanged document
/// emits no update.
pub struct PatchEngine<'r> {
    replica: &'r Replica,
}

impl<'r> PatchEngine<'r> {
    pub fn new(replica: &'r Replica) -> Self {
        Self { replica }
    }

    /// Replace the whole document with a copy of `document`.
    pub fn apply_full_replace(&self, document: &Value) -> bool {
        self.replica.mutate(ChangeOrigin::Local, |txn| {
            if txn.document() == *document {
                return false;
            }
            txn.set_document(document);
            true
        })
    }

    /// Set `value` at `path`, materialising missing objects on the way.
    pub fn apply_path_set(&self, path: &JsonPath, value: Value) -> Result<bool, PatchError> {
        self.edit(|doc| set_at_path(doc, path, value))
    }

    /// Delete the element at `path`.
    pub fn apply_path_delete(&self, path: &JsonPath) -> Result<bool, PatchError> {
        self.edit(|doc| delete_at_path(doc, path).map(|_| ()))
    }

    /// Apply any intent.
    pub fn apply(&self, intent: &EditIntent) -> Result<bool, PatchError> {
        match intent {
            EditIntent::Replace(document) => Ok(self.apply_full_replace(document)),
            EditIntent::Set { path, value } => self.apply_path_set(path, value.clone()),
            EditIntent::Delete { path } => self.apply_path_delete(path),
        }
    }

    /// Plain-JSON copy of the document for display or export.
    pub fn snapshot(&self) -> Value {
        self.replica.snapshot()
    }

    /// Read-modify-write inside one local transaction.
    fn edit<F>(&self, f: F) -> Result<bool, PatchError>
    where
        F: FnOnce(&mut Value) -> Result<(), PatchError>,
    {
        self.replica.mutate(ChangeOrigin::Local, |txn| {
            let before = txn.document();
            let mut after = before.clone();
            f(&mut after)?;
            if after == before {
                return Ok(false);
            }
            txn.set_document(&after);
            Ok(true)
        })
    }
}
