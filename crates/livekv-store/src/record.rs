use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};

/// Key of a stored record: its `id`, used verbatim as the engine key.
///
/// Range order is the byte-lexicographic order of the UTF-8 encoding, so
/// callers pick id encodings whose lexicographic order matches the logical
/// order they want (for example zero-padded numbers).
pub type Key = String;

/// Name of the identity field every record carries.
pub const ID_FIELD: &str = "id";

/// A structured value stored under its own `id`.
///
/// Records are JSON objects. Unknown fields are preserved as-is, which keeps
/// the persisted format forward compatible.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create a record holding only an `id`.
    pub fn new(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Self(fields)
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// The record's `id`, if it is present and a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The record's `id` when it is present and non-empty.
    pub fn require_id(&self) -> StoreResult<&str> {
        match self.id() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(StoreError::InvalidArgument(
                "record id must be a non-empty string".into(),
            )),
        }
    }

    /// Read a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// All fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a plain JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub(crate) fn key(&self) -> &str {
        self.id().unwrap_or_default()
    }
}

impl TryFrom<Value> for Record {
    type Error = StoreError;

    fn try_from(value: Value) -> StoreResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(StoreError::InvalidArgument(format!(
                "record must be a JSON object, got {other}"
            ))),
        }
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<unprintable record>"),
        }
    }
}
