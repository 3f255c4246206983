//! Core domain types: records, their identifiers, and collection names.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CryptfeedError, Result};

/// Name of the identifier field carried by every stored record.
pub const ID_FIELD: &str = "article_id";

/// Maximum length of a collection name.
const MAX_COLLECTION_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// RecordId
// ---------------------------------------------------------------------------

/// Canonical identifier of a record within a collection.
///
/// Upstream identifiers can be strings or integers. Both are normalised to
/// text so that `5` and `"5"` compare equal everywhere novelty is checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create an identifier from its canonical text form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the canonical text form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret a JSON value as an identifier.
    ///
    /// Returns `None` for nulls, blank strings, and non-scalar values.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One fetched item: a required identifier plus an open bag of fields.
///
/// Serializes as a flat JSON object with the identifier under [`ID_FIELD`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Record {
    id: RecordId,
    fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record with the given identifier.
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Build a record from an arbitrary JSON value.
    ///
    /// The value must be an object with a usable [`ID_FIELD`].
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::try_from(map),
            other => Err(CryptfeedError::validation(format!(
                "record must be a JSON object, got {other}"
            ))),
        }
    }

    /// The record's identifier.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Look up a non-identifier field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a field. The identifier is fixed at construction; attempts to
    /// overwrite it are ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == ID_FIELD {
            tracing::warn!(id = %self.id, "ignoring attempt to overwrite record identifier");
            return;
        }
        self.fields.insert(key, value.into());
    }

    /// Builder-style [`Record::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Flatten into a JSON object including the identifier field.
    pub fn into_document(self) -> Map<String, Value> {
        let mut doc = Map::with_capacity(self.fields.len() + 1);
        doc.insert(ID_FIELD.to_string(), Value::String(self.id.0));
        doc.extend(self.fields);
        doc
    }
}

impl TryFrom<Map<String, Value>> for Record {
    type Error = CryptfeedError;

    fn try_from(mut map: Map<String, Value>) -> Result<Self> {
        let raw = map.remove(ID_FIELD).ok_or_else(|| {
            CryptfeedError::validation(format!("record is missing the `{ID_FIELD}` field"))
        })?;
        let id = RecordId::from_value(&raw).ok_or_else(|| {
            CryptfeedError::validation(format!("`{ID_FIELD}` is not a usable identifier: {raw}"))
        })?;
        Ok(Self { id, fields: map })
    }
}

impl From<Record> for Map<String, Value> {
    fn from(record: Record) -> Self {
        record.into_document()
    }
}

// ---------------------------------------------------------------------------
// CollectionName
// ---------------------------------------------------------------------------

/// A validated destination collection name.
///
/// Non-empty, at most 64 characters, ASCII alphanumerics plus `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionName(String);

impl CollectionName {
    /// Validate and wrap a collection name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CryptfeedError::validation("collection name is empty"));
        }
        if name.len() > MAX_COLLECTION_NAME_LEN {
            return Err(CryptfeedError::validation(format!(
                "collection name '{name}' exceeds {MAX_COLLECTION_NAME_LEN} characters"
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CryptfeedError::validation(format!(
                "collection name '{name}' may only contain letters, digits, '_' and '-'"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CollectionName {
    type Err = CryptfeedError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for CollectionName {
    type Error = CryptfeedError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<CollectionName> for String {
    fn from(name: CollectionName) -> Self {
        name.0
    }
}
