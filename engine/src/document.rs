//! Stored documents.

use crate::{Map, Value, Version};

/// Field holding the store-local key.
pub const ID_FIELD: &str = "_id";

/// Field holding the server-assigned version.
pub const VERSION_FIELD: &str = "_version";

/// A document as held by a datastore: a map of fields plus the reserved
/// `_id` and `_version` entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: Map,
}

impl Document {
    /// Create an empty document carrying only its `_id`.
    pub fn new(key: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(key.into()));
        Self { fields }
    }

    /// Wrap an existing field map.
    pub fn from_map(fields: Map) -> Self {
        Self { fields }
    }

    /// The `_id` field, if present and a string.
    pub fn key(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The `_version` field, if present and a non-negative integer.
    pub fn version(&self) -> Option<Version> {
        self.fields.get(VERSION_FIELD).and_then(Value::as_u64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Look up a dotted path such as `address.city`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> &Map {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Map {
        &mut self.fields
    }

    pub fn into_map(self) -> Map {
        self.fields
    }
}

impl From<Map> for Document {
    fn from(fields: Map) -> Self {
        Self::from_map(fields)
    }
}
