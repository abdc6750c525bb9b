//! Composite document identity.
//!
//! A client id has the shape `database.collection$key`. The database name ends
//! at the first `.`, the key starts after the `$`, and everything in between
//! is the collection name (which may itself contain dots).

use crate::{error::Result, ClientId, Error, Namespace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a single document, split into its store coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocId {
    database: String,
    collection: String,
    key: String,
}

impl DocId {
    /// Parse a client id of the form `database.collection$key`.
    pub fn parse(client_id: &str) -> Result<Self> {
        let malformed = || Error::MalformedId(client_id.to_string());

        let dot = client_id.find('.').ok_or_else(malformed)?;
        let dollar = client_id.find('$').ok_or_else(malformed)?;
        if dot > dollar || client_id[dollar + 1..].contains('$') {
            return Err(malformed());
        }

        let database = &client_id[..dot];
        let collection = &client_id[dot + 1..dollar];
        let key = &client_id[dollar + 1..];
        if database.is_empty() || collection.is_empty() || key.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            database: database.to_string(),
            collection: collection.to_string(),
            key: key.to_string(),
        })
    }

    /// Build an id from its parts. Every part must be non-empty.
    pub fn from_parts(
        database: impl Into<String>,
        collection: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self> {
        let (database, collection, key) = (database.into(), collection.into(), key.into());
        if database.is_empty() || collection.is_empty() || key.is_empty() {
            return Err(Error::MalformedId(format!("{database}.{collection}${key}")));
        }
        Ok(Self {
            database,
            collection,
            key,
        })
    }

    /// Build an id from a `database.collection` namespace and a store key.
    pub fn from_namespace(namespace: &str, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let (database, collection) = namespace
            .split_once('.')
            .ok_or_else(|| Error::MalformedId(format!("{namespace}${key}")))?;
        Self::from_parts(database, collection, key)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The store-local key, mirrored in the document's `_id` field.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The `database.collection` portion of the id.
    pub fn namespace(&self) -> Namespace {
        format!("{}.{}", self.database, self.collection)
    }

    /// Rebuild the client-visible id. Left inverse of [`DocId::parse`].
    pub fn to_client_id(&self) -> ClientId {
        format!("{}.{}${}", self.database, self.collection, self.key)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}${}", self.database, self.collection, self.key)
    }
}

impl FromStr for DocId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DocId> for String {
    fn from(id: DocId) -> Self {
        id.to_client_id()
    }
}
