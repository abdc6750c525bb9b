//! Pull and push orchestration.
//!
//! The [`Adapter`] turns pull and push payloads into datastore calls, runs
//! the conflict protocol for stale pushes, streams every outcome through a
//! [`ResultStreamer`] and, once a push batch has settled, hands a summary of
//! what changed to the configured [`PushNotifier`].

use std::sync::Arc;

use async_trait::async_trait;
use docsync_engine::{
    resolve_conflict, ChangeSet, ClientId, ConflictContext, ConflictHandler, ConflictIntent,
    Decision, DeletedDoc, DocId, Document, ModifiedDoc, OperationSet, PullRequest, PushRequest,
    ServerWins, SyncMeta, Version,
};
use futures::future::join_all;

use crate::datastore::{Datastore, DocumentSink, NamespaceSummary};
use crate::error::{SyncError, SyncResult};
use crate::stream::ResultStreamer;

/// Told about the changes of every push batch.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn push_completed(&self, changes: ChangeSet);
}

/// Everything an [`Adapter`] is built from.
#[derive(Clone)]
pub struct AdapterConfig {
    pub datastore: Arc<dyn Datastore>,
    pub conflict_handler: Arc<dyn ConflictHandler>,
    pub notifier: Option<Arc<dyn PushNotifier>>,
    /// Emit error elements for per-document failures instead of only
    /// logging them.
    pub send_document_level_errors: bool,
}

impl AdapterConfig {
    /// Server-wins conflicts, no notifier, document errors only logged.
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            conflict_handler: Arc::new(ServerWins),
            notifier: None,
            send_document_level_errors: false,
        }
    }

    pub fn with_conflict_handler(mut self, handler: Arc<dyn ConflictHandler>) -> Self {
        self.conflict_handler = handler;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PushNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_document_level_errors(mut self, enabled: bool) -> Self {
        self.send_document_level_errors = enabled;
        self
    }
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Full snapshot, one entry per namespace.
    Snapshot(Vec<NamespaceSummary>),
    /// The ids that were requested, in request order.
    Documents(Vec<ClientId>),
}

/// Result of a push batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub changes: ChangeSet,
    /// Documents that failed individually.
    pub failed: usize,
    /// Entries skipped for lack of sync metadata.
    pub skipped: usize,
}

/// Streams enumerated documents in the wire form of the datastore that
/// produced them.
struct EncodingSink<'a> {
    datastore: &'a dyn Datastore,
    out: &'a ResultStreamer,
}

impl DocumentSink for EncodingSink<'_> {
    fn write(&self, id: &DocId, version: Option<Version>, deleted: bool, doc: Option<&Document>) {
        let body = doc.map(|doc| self.datastore.encode_special_types(doc));
        self.out.write(id, version, deleted, body.as_ref());
    }
}

/// What one pushed document did to storage.
enum PushOutcome {
    Modified(ModifiedDoc),
    Deleted(DeletedDoc),
    Unchanged,
}

pub struct Adapter {
    datastore: Arc<dyn Datastore>,
    conflict_handler: Arc<dyn ConflictHandler>,
    notifier: Option<Arc<dyn PushNotifier>>,
    send_document_level_errors: bool,
}

impl Adapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            datastore: config.datastore,
            conflict_handler: config.conflict_handler,
            notifier: config.notifier,
            send_document_level_errors: config.send_document_level_errors,
        }
    }

    /// Stream the requested documents, or everything when no ids are given.
    ///
    /// The stream is always closed, even when the whole pull fails.
    pub async fn pull_with_payload(
        &self,
        payload: Option<PullRequest>,
        out: &ResultStreamer,
    ) -> SyncResult<PullOutcome> {
        out.start();

        let outcome = match payload.and_then(|p| p.ids) {
            None => {
                let sink = EncodingSink {
                    datastore: self.datastore.as_ref(),
                    out,
                };
                match self.datastore.get_all_documents(&sink).await {
                    Ok(summary) => {
                        tracing::debug!(namespaces = summary.len(), "Full pull streamed");
                        Ok(PullOutcome::Snapshot(summary))
                    }
                    Err(e) => {
                        tracing::error!("Full pull failed: {}", e);
                        out.write_error(e.to_string(), None);
                        Err(e)
                    }
                }
            }
            Some(ids) => {
                join_all(ids.iter().map(|id| self.pull_one(id, out))).await;
                Ok(PullOutcome::Documents(ids))
            }
        };

        out.end();
        outcome
    }

    async fn pull_one(&self, client_id: &str, out: &ResultStreamer) {
        let id = match DocId::parse(client_id) {
            Ok(id) => id,
            Err(e) => return self.report_document_error(out, client_id, &e.into()),
        };

        match self.datastore.get_document(&id).await {
            Ok(doc) => {
                tracing::debug!(id = %id, version = ?doc.version(), "Pulled document");
                self.stream_document(out, &id, &doc);
            }
            Err(e) if e.is_not_found() => {
                if self.send_document_level_errors {
                    out.write_error(e.to_string(), Some(client_id));
                } else {
                    out.write(&id, None, true, None);
                }
            }
            Err(e) => self.report_document_error(out, client_id, &e),
        }
    }

    /// Apply every pushed document, streaming each result, then notify.
    ///
    /// Documents settle independently; a failing document never affects its
    /// siblings.
    pub async fn push_with_payload(
        &self,
        payload: PushRequest,
        out: &ResultStreamer,
    ) -> PushSummary {
        out.start();

        let mut summary = PushSummary::default();
        let mut pending = Vec::with_capacity(payload.documents.len());
        for doc in &payload.documents {
            match &doc.sync {
                Some(meta) => pending.push((meta, &doc.ops)),
                None => {
                    tracing::warn!("Skipping pushed document without sync metadata");
                    summary.skipped += 1;
                }
            }
        }

        let results = join_all(pending.into_iter().map(|(meta, ops)| async move {
            (meta.id.as_str(), self.push_one(meta, ops, out).await)
        }))
        .await;

        for (client_id, result) in results {
            match result {
                Ok(PushOutcome::Modified(doc)) => summary.changes.modified.push(doc),
                Ok(PushOutcome::Deleted(doc)) => summary.changes.deleted.push(doc),
                Ok(PushOutcome::Unchanged) => {}
                Err(e) => {
                    summary.failed += 1;
                    self.report_document_error(out, client_id, &e);
                }
            }
        }

        tracing::debug!(
            modified = summary.changes.modified.len(),
            deleted = summary.changes.deleted.len(),
            failed = summary.failed,
            "Push batch settled"
        );

        if let Some(notifier) = &self.notifier {
            notifier.push_completed(summary.changes.clone()).await;
        }

        out.end();
        summary
    }

    async fn push_one(
        &self,
        meta: &SyncMeta,
        ops: &serde_json::Value,
        out: &ResultStreamer,
    ) -> SyncResult<PushOutcome> {
        let id = DocId::parse(&meta.id)?;

        if meta.deleted {
            self.push_removal(&id, meta.version, out).await
        } else {
            let ops = self.datastore.decode_special_types(ops.clone())?;
            let mut ops = OperationSet::from_value(ops)?;
            ops.prepare_for_push();
            self.push_update(&id, meta.version, ops, out).await
        }
    }

    async fn push_update(
        &self,
        id: &DocId,
        expected: Option<Version>,
        ops: OperationSet,
        out: &ResultStreamer,
    ) -> SyncResult<PushOutcome> {
        match self.datastore.update_by_operations(id, expected, &ops).await {
            Ok(doc) => Ok(self.modified(id, doc, out)),
            Err(e) if e.is_conflict() => {
                tracing::debug!(id = %id, expected = ?expected, "Update conflict");
                let server = self.current(id).await?;
                let ctx = ConflictContext {
                    id,
                    expected_version: expected,
                    server: server.as_ref(),
                    intent: ConflictIntent::Update(&ops),
                };

                match resolve_conflict(self.conflict_handler.as_ref(), &ctx)? {
                    Decision::Apply { ops: forced } => {
                        let mut forced = forced.unwrap_or_else(|| ops.clone());
                        forced.prepare_for_push();
                        let doc = self.datastore.update_by_operations(id, None, &forced).await?;
                        Ok(self.modified(id, doc, out))
                    }
                    Decision::Ignore { doc: Some(doc) } => {
                        self.stream_document(out, id, &doc);
                        Ok(PushOutcome::Unchanged)
                    }
                    Decision::Ignore { doc: None } => {
                        out.write(id, None, true, None);
                        Ok(PushOutcome::Unchanged)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn push_removal(
        &self,
        id: &DocId,
        expected: Option<Version>,
        out: &ResultStreamer,
    ) -> SyncResult<PushOutcome> {
        match self.datastore.remove_document(id, expected).await {
            Ok(()) => Ok(self.deleted(id, expected, out)),
            Err(e) if e.is_not_found() => {
                tracing::debug!(id = %id, "Removal of a missing document");
                Ok(self.deleted(id, expected, out))
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(id = %id, expected = ?expected, "Removal conflict");
                let server = self.current(id).await?;
                let ctx = ConflictContext {
                    id,
                    expected_version: expected,
                    server: server.as_ref(),
                    intent: ConflictIntent::Remove,
                };

                match resolve_conflict(self.conflict_handler.as_ref(), &ctx)? {
                    Decision::Apply { .. } => {
                        match self.datastore.remove_document(id, None).await {
                            Ok(()) => {}
                            Err(e) if e.is_not_found() => {}
                            Err(e) => return Err(e),
                        }
                        let version = server.as_ref().and_then(Document::version).or(expected);
                        Ok(self.deleted(id, version, out))
                    }
                    Decision::Ignore { doc: Some(doc) } => {
                        self.stream_document(out, id, &doc);
                        Ok(PushOutcome::Unchanged)
                    }
                    Decision::Ignore { doc: None } => {
                        out.write(id, None, true, None);
                        Ok(PushOutcome::Unchanged)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// The stored document, or `None` when it no longer exists.
    async fn current(&self, id: &DocId) -> SyncResult<Option<Document>> {
        match self.datastore.get_document(id).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn modified(&self, id: &DocId, doc: Document, out: &ResultStreamer) -> PushOutcome {
        tracing::debug!(id = %id, version = ?doc.version(), "Document modified");
        self.stream_document(out, id, &doc);
        match doc.version() {
            Some(version) => PushOutcome::Modified(ModifiedDoc {
                id: id.to_client_id(),
                version,
                namespace: id.namespace(),
            }),
            None => {
                tracing::warn!(id = %id, "Written document has no version");
                PushOutcome::Unchanged
            }
        }
    }

    /// Stream a live document in this datastore's wire form.
    fn stream_document(&self, out: &ResultStreamer, id: &DocId, doc: &Document) {
        let body = self.datastore.encode_special_types(doc);
        out.write(id, doc.version(), false, Some(&body));
    }

    fn deleted(&self, id: &DocId, version: Option<Version>, out: &ResultStreamer) -> PushOutcome {
        tracing::debug!(id = %id, "Document deleted");
        out.write(id, version, true, None);
        PushOutcome::Deleted(DeletedDoc {
            id: id.to_client_id(),
            namespace: id.namespace(),
        })
    }

    fn report_document_error(&self, out: &ResultStreamer, client_id: &str, err: &SyncError) {
        if err.is_storage() {
            tracing::error!(id = %client_id, "Document failed: {}", err);
        } else {
            tracing::warn!(id = %client_id, "Document failed: {}", err);
        }
        if self.send_document_level_errors {
            out.write_error(err.to_string(), Some(client_id));
        }
    }
}
