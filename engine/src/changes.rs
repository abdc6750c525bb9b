//! Change-log types.
//!
//! The change log keeps one [`Atom`] per document: the latest known version
//! and the sequence number of the batch that last touched it. Peers poll with
//! "changes since sequence N" and receive every atom at or above N.

use crate::{error::Result, ClientId, Document, Error, Namespace, Sequence, Value, Version};
use serde::{Deserialize, Serialize};

/// Latest-state change record for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Atom {
    /// Client id of the document (`database.collection$key`).
    pub id: ClientId,
    /// Last version seen. `None` for deletions of documents never logged.
    pub version: Option<Version>,
    pub namespace: Namespace,
    pub sequence: Sequence,
    pub deleted: bool,
}

impl Atom {
    /// Read an atom back from its stored document form.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let missing = |field: &str| Error::InvalidDocument(format!("atom without '{field}'"));

        Ok(Self {
            id: doc
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| missing("id"))?
                .to_string(),
            version: doc.get("version").and_then(Value::as_u64),
            namespace: doc
                .get("namespace")
                .and_then(Value::as_str)
                .ok_or_else(|| missing("namespace"))?
                .to_string(),
            sequence: doc
                .get("sequence")
                .and_then(Value::as_u64)
                .ok_or_else(|| missing("sequence"))?,
            deleted: doc.get("deleted").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// A document modified by a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedDoc {
    pub id: ClientId,
    pub version: Version,
    pub namespace: Namespace,
}

/// A document deleted by a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedDoc {
    pub id: ClientId,
    pub namespace: Namespace,
}

/// Summary of one push batch, handed to the change log once the whole batch
/// has settled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    #[serde(default)]
    pub modified: Vec<ModifiedDoc>,
    #[serde(default)]
    pub deleted: Vec<DeletedDoc>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Reply to a change-log update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceResponse {
    pub sequence: Sequence,
}

/// Reply to a "changes since" query. `atoms` is omitted for handshakes
/// that named no starting sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesResponse {
    pub sequence: Sequence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atoms: Option<Vec<Atom>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_atom_documents() {
        let mut doc = Document::new("app.Coll$1");
        doc.insert("id", "app.Coll$1");
        doc.insert("namespace", "app.Coll");
        doc.insert("version", 2u64);
        doc.insert("sequence", 5u64);
        doc.insert("deleted", false);

        let atom = Atom::from_document(&doc).unwrap();
        assert_eq!(atom.id, "app.Coll$1");
        assert_eq!(atom.version, Some(2));
        assert_eq!(atom.sequence, 5);
        assert!(!atom.deleted);

        doc.remove("sequence");
        assert!(Atom::from_document(&doc).is_err());
    }

    #[test]
    fn handshake_response_omits_atoms() {
        let handshake = ChangesResponse {
            sequence: 4,
            atoms: None,
        };
        assert_eq!(serde_json::to_value(&handshake).unwrap(), json!({"sequence": 4}));

        let full = ChangesResponse {
            sequence: 4,
            atoms: Some(vec![]),
        };
        assert_eq!(
            serde_json::to_value(&full).unwrap(),
            json!({"sequence": 4, "atoms": []})
        );
    }
}
