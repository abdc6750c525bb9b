//! Change log.
//!
//! The [`Syncer`] keeps a monotonically increasing sequence counter and one
//! atom per document recording the sequence of the batch that last touched
//! it. Peers poll "changes since N" to learn which documents to pull again.
//!
//! Every update bumps the counter twice: atoms are written at the first
//! value, and the second is what callers get back. A peer that polls with
//! the returned value therefore never misses an atom written by a later
//! batch, which is always stamped at or above it.

use std::sync::Arc;

use async_trait::async_trait;
use docsync_engine::{
    Atom, ChangeSet, ChangesResponse, ClientId, DocId, Namespace, OperationSet, Sequence,
    SequenceResponse, Value, Version,
};
use futures::future::join_all;

use crate::adapter::PushNotifier;
use crate::datastore::Datastore;
use crate::error::{SyncError, SyncResult};

/// Database name of the change log's own namespaces.
pub const SYNC_DATABASE: &str = "docsync";
pub const ATOM_COLLECTION: &str = "atoms";
pub const SEQUENCE_COLLECTION: &str = "sequences";
const SEQUENCE_KEY: &str = "current";
const SEQUENCE_FIELD: &str = "value";

/// Notified after every change-log update with the new sequence.
pub trait ChangeListener: Send + Sync {
    fn changes_available(&self, sequence: Sequence);
}

pub struct Syncer {
    datastore: Arc<dyn Datastore>,
    atom_namespace: Namespace,
    listener: Option<Arc<dyn ChangeListener>>,
}

impl Syncer {
    /// A change log kept in `datastore`, which should not be shared with
    /// synchronized documents.
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            atom_namespace: format!("{SYNC_DATABASE}.{ATOM_COLLECTION}"),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ChangeListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    fn sequence_id(&self) -> SyncResult<DocId> {
        Ok(DocId::from_parts(SYNC_DATABASE, SEQUENCE_COLLECTION, SEQUENCE_KEY)?)
    }

    /// Atomically increment the counter and return its new value.
    pub async fn bump_sequence(&self) -> SyncResult<Sequence> {
        let mut ops = OperationSet::new();
        ops.increment(SEQUENCE_FIELD, 1);

        let doc = self
            .datastore
            .update_by_operations(&self.sequence_id()?, None, &ops)
            .await?;

        doc.get(SEQUENCE_FIELD).and_then(Value::as_u64).ok_or_else(|| {
            SyncError::Engine(docsync_engine::Error::InvalidDocument(
                "sequence counter is not a non-negative integer".into(),
            ))
        })
    }

    /// Record a push batch and return the sequence peers should poll from.
    pub async fn update_with_payload(&self, changes: &ChangeSet) -> SyncResult<SequenceResponse> {
        let stamp = self.bump_sequence().await?;

        let modified = changes
            .modified
            .iter()
            .map(|doc| self.write_atom(stamp, &doc.id, &doc.namespace, Some(doc.version), false));
        let deleted = changes
            .deleted
            .iter()
            .map(|doc| self.write_atom(stamp, &doc.id, &doc.namespace, None, true));

        // Let every atom settle before reporting the first failure.
        let results = join_all(modified.chain(deleted)).await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }

        let sequence = self.bump_sequence().await?;
        tracing::debug!(
            stamp,
            sequence,
            atoms = changes.modified.len() + changes.deleted.len(),
            "Change log updated"
        );

        if let Some(listener) = &self.listener {
            listener.changes_available(sequence);
        }

        Ok(SequenceResponse { sequence })
    }

    async fn write_atom(
        &self,
        sequence: Sequence,
        client_id: &ClientId,
        namespace: &Namespace,
        version: Option<Version>,
        deleted: bool,
    ) -> SyncResult<()> {
        let id = DocId::from_parts(SYNC_DATABASE, ATOM_COLLECTION, client_id.as_str())?;

        let mut ops = OperationSet::new();
        ops.set("id", client_id.as_str())
            .set("namespace", namespace.as_str())
            .set("sequence", sequence)
            .set("deleted", deleted);
        if let Some(version) = version {
            ops.set("version", version);
        }

        self.datastore.update_by_operations(&id, None, &ops).await?;
        Ok(())
    }

    /// Current sequence, plus every atom at or above `since` when given.
    pub async fn changes_since_sequence(
        &self,
        since: Option<Sequence>,
    ) -> SyncResult<ChangesResponse> {
        let sequence = match self.datastore.get_document(&self.sequence_id()?).await {
            Ok(doc) => doc.get(SEQUENCE_FIELD).and_then(Value::as_u64).unwrap_or(0),
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };

        let Some(since) = since else {
            return Ok(ChangesResponse {
                sequence,
                atoms: None,
            });
        };

        let mut atoms: Vec<Atom> = self
            .datastore
            .find_all(&self.atom_namespace)
            .await?
            .iter()
            .filter_map(|doc| match Atom::from_document(doc) {
                Ok(atom) => Some(atom),
                Err(e) => {
                    tracing::warn!(key = ?doc.key(), "Skipping malformed atom: {}", e);
                    None
                }
            })
            .filter(|atom| atom.sequence >= since)
            .collect();
        atoms.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)));

        Ok(ChangesResponse {
            sequence,
            atoms: Some(atoms),
        })
    }
}

#[async_trait]
impl PushNotifier for Syncer {
    async fn push_completed(&self, changes: ChangeSet) {
        if let Err(e) = self.update_with_payload(&changes).await {
            tracing::error!("Failed to record changes: {}", e);
        }
    }
}
