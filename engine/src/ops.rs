//! Operation sets.
//!
//! Clients express edits as a small set of directives rather than whole
//! documents:
//!
//! - `$set` assigns fields
//! - `$inc` adds a numeric delta (missing fields start from zero)
//! - `$unset` removes fields
//!
//! Field names may be dotted paths (`address.city`); intermediate maps are
//! created on demand. The plain names `set`, `increment` and `unset` are
//! accepted as aliases on input.

use crate::{
    document::{ID_FIELD, VERSION_FIELD},
    error::Result,
    Document, Error, Map, Value,
};
use serde_json::Number;
use std::collections::{BTreeMap, BTreeSet};

const SET_KEYS: [&str; 2] = ["$set", "set"];
const INC_KEYS: [&str; 2] = ["$inc", "increment"];
const UNSET_KEYS: [&str; 2] = ["$unset", "unset"];

/// A set of mutation directives applied atomically to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationSet {
    set: Map,
    increment: BTreeMap<String, Number>,
    unset: BTreeSet<String>,
}

impl OperationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an operation set from an already-decoded value.
    ///
    /// The value must be a map whose keys are directive names. `$unset`
    /// accepts either a map (values ignored) or an array of field names.
    pub fn from_value(value: Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::new()),
            Value::Map(map) => map,
            other => {
                return Err(Error::InvalidOperation(format!(
                    "operations must be a map, got {}",
                    other.kind()
                )))
            }
        };

        let mut ops = Self::new();
        for (directive, body) in map {
            if SET_KEYS.contains(&directive.as_str()) {
                ops.set.extend(expect_map(&directive, body)?);
            } else if INC_KEYS.contains(&directive.as_str()) {
                for (field, delta) in expect_map(&directive, body)? {
                    match delta {
                        Value::Number(n) => {
                            ops.increment.insert(field, n);
                        }
                        other => {
                            return Err(Error::InvalidOperation(format!(
                                "cannot increment '{field}' by a {}",
                                other.kind()
                            )))
                        }
                    }
                }
            } else if UNSET_KEYS.contains(&directive.as_str()) {
                match body {
                    Value::Map(fields) => ops.unset.extend(fields.into_keys()),
                    Value::Array(fields) => {
                        for field in fields {
                            match field {
                                Value::String(name) => {
                                    ops.unset.insert(name);
                                }
                                other => {
                                    return Err(Error::InvalidOperation(format!(
                                        "unset expects field names, got {}",
                                        other.kind()
                                    )))
                                }
                            }
                        }
                    }
                    other => {
                        return Err(Error::InvalidOperation(format!(
                            "unset expects a map or array, got {}",
                            other.kind()
                        )))
                    }
                }
            } else {
                return Err(Error::InvalidOperation(format!(
                    "unknown directive '{directive}'"
                )));
            }
        }
        Ok(ops)
    }

    /// Render the operation set with its canonical `$` directive names.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if !self.set.is_empty() {
            map.insert("$set".into(), Value::Map(self.set.clone()));
        }
        if !self.increment.is_empty() {
            let inc = self
                .increment
                .iter()
                .map(|(field, n)| (field.clone(), Value::Number(n.clone())))
                .collect();
            map.insert("$inc".into(), Value::Map(inc));
        }
        if !self.unset.is_empty() {
            let unset = self
                .unset
                .iter()
                .map(|field| (field.clone(), Value::String(String::new())))
                .collect();
            map.insert("$unset".into(), Value::Map(unset));
        }
        Value::Map(map)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn increment(&mut self, field: impl Into<String>, delta: i64) -> &mut Self {
        self.increment.insert(field.into(), delta.into());
        self
    }

    pub fn unset(&mut self, field: impl Into<String>) -> &mut Self {
        self.unset.insert(field.into());
        self
    }

    pub fn sets(&self) -> &Map {
        &self.set
    }

    pub fn increments(&self) -> &BTreeMap<String, Number> {
        &self.increment
    }

    pub fn unsets(&self) -> &BTreeSet<String> {
        &self.unset
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.increment.is_empty() && self.unset.is_empty()
    }

    /// Make the set safe to apply on behalf of a client.
    ///
    /// `_version` is owned by the server: any client attempt to write it is
    /// dropped and replaced by a `+1` increment. `_id` is immutable.
    pub fn prepare_for_push(&mut self) {
        for reserved in [ID_FIELD, VERSION_FIELD] {
            self.set.remove(reserved);
            self.unset.remove(reserved);
        }
        self.increment.remove(ID_FIELD);
        self.increment.insert(VERSION_FIELD.to_string(), 1.into());
    }

    /// Apply every directive to `doc`: sets first, then increments, then
    /// unsets. On error the document may be partially modified, so callers
    /// apply to a copy and swap it in on success.
    pub fn apply_to(&self, doc: &mut Document) -> Result<()> {
        let fields = doc.fields_mut();

        for (path, value) in &self.set {
            *slot(fields, path)? = value.clone();
        }

        for (path, delta) in &self.increment {
            let target = slot(fields, path)?;
            let next = match &*target {
                Value::Null => Value::Number(delta.clone()),
                Value::Number(current) => Value::Number(add(current, delta).ok_or_else(|| {
                    Error::InvalidOperation(format!("increment of '{path}' overflows"))
                })?),
                other => {
                    return Err(Error::InvalidOperation(format!(
                        "cannot increment '{path}': it holds a {}",
                        other.kind()
                    )))
                }
            };
            *target = next;
        }

        for path in &self.unset {
            remove_path(fields, path);
        }

        Ok(())
    }
}

fn expect_map(directive: &str, body: Value) -> Result<Map> {
    match body {
        Value::Map(map) => Ok(map),
        other => Err(Error::InvalidOperation(format!(
            "'{directive}' expects a map, got {}",
            other.kind()
        ))),
    }
}

/// Resolve a dotted path to a mutable slot, creating intermediate maps and a
/// `Null` leaf where missing.
fn slot<'a>(fields: &'a mut Map, path: &str) -> Result<&'a mut Value> {
    let mut segments = path.split('.');
    let first = segments.next().unwrap_or(path);
    let mut current = fields.entry(first.to_string()).or_default();

    for segment in segments {
        if current.is_null() {
            *current = Value::Map(Map::new());
        }
        current = match current {
            Value::Map(map) => map.entry(segment.to_string()).or_default(),
            other => {
                return Err(Error::InvalidOperation(format!(
                    "cannot descend into '{path}': found a {}",
                    other.kind()
                )))
            }
        };
    }
    Ok(current)
}

fn remove_path(fields: &mut Map, path: &str) {
    match path.split_once('.') {
        None => {
            fields.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Map(inner)) = fields.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

fn add(a: &Number, b: &Number) -> Option<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.checked_add(y).map(Number::from);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.checked_add(y).map(Number::from);
    }
    Number::from_f64(a.as_f64()? + b.as_f64()?)
}
