//! Embedded datastore.
//!
//! Documents live in memory, one map per namespace. When a directory is
//! configured every write is also appended to a JSON-lines file for its
//! namespace, and the files are replayed when the store is opened again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use docsync_engine::document::ID_FIELD;
use docsync_engine::{codec, DocId, Document, OperationSet, Version};
use serde_json::json;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{Datastore, DocumentSink, HandleCache, NamespaceSummary};
use crate::error::{SyncError, SyncResult};

const FILE_EXTENSION: &str = "jsonl";
const DELETED_MARKER: &str = "$$deleted";

/// In-memory datastore with optional append-only persistence.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    dir: Option<PathBuf>,
    collections: HandleCache<Collection>,
}

#[derive(Debug)]
struct Collection {
    path: Option<PathBuf>,
    docs: Mutex<BTreeMap<String, Document>>,
}

impl MemoryDatastore {
    /// A store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a persistent store under `dir`, loading every namespace found
    /// there.
    pub async fn open(dir: impl AsRef<Path>) -> SyncResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let store = Self {
            dir: Some(dir.clone()),
            collections: HandleCache::new(),
        };

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(namespace) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(namespace_from_file_stem)
            else {
                tracing::warn!(file = %path.display(), "Skipping unrecognised data file");
                continue;
            };
            store.collection(&namespace).await?;
        }

        tracing::debug!(namespaces = store.collections.len(), "File datastore loaded");
        Ok(store)
    }

    /// Every namespace with data on disk is loaded by `open`, so a namespace
    /// that has no handle yet holds no documents.
    fn existing(&self, namespace: &str) -> Option<Arc<Collection>> {
        self.collections.get(namespace)
    }

    async fn collection(&self, namespace: &str) -> SyncResult<Arc<Collection>> {
        let path = self
            .dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{FILE_EXTENSION}", file_stem(namespace))));

        self.collections
            .get_or_open(namespace, move || Collection::load(path))
            .await
    }
}

impl Collection {
    async fn load(path: Option<PathBuf>) -> SyncResult<Self> {
        let mut docs = BTreeMap::new();

        if let Some(path) = &path {
            match tokio::fs::read_to_string(path).await {
                Ok(contents) => replay(&contents, &mut docs),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self {
            path,
            docs: Mutex::new(docs),
        })
    }

    async fn append(&self, entry: &serde_json::Value) -> SyncResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn replay(contents: &str, docs: &mut BTreeMap<String, Document>) {
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let entry: serde_json::Value = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                // A torn final write after a crash ends up here.
                tracing::warn!(line = number + 1, error = %e, "Skipping unreadable data line");
                continue;
            }
        };

        if entry.get(DELETED_MARKER).and_then(|v| v.as_bool()) == Some(true) {
            if let Some(key) = entry.get(ID_FIELD).and_then(|v| v.as_str()) {
                docs.remove(key);
            }
            continue;
        }

        match codec::decode_document(entry) {
            Ok(doc) => match doc.key() {
                Some(key) => {
                    docs.insert(key.to_string(), doc);
                }
                None => tracing::warn!(line = number + 1, "Skipping document without _id"),
            },
            Err(e) => {
                tracing::warn!(line = number + 1, error = %e, "Skipping undecodable document")
            }
        }
    }
}

fn file_stem(namespace: &str) -> String {
    namespace.bytes().map(|b| format!("{b:02x}")).collect()
}

fn namespace_from_file_stem(stem: &str) -> Option<String> {
    if stem.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..stem.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(stem.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    let namespace = String::from_utf8(bytes).ok()?;

    // Reject names that could never have come from a document id.
    DocId::from_namespace(&namespace, "_").ok()?;
    Some(namespace)
}

fn check_version(
    id: &DocId,
    expected: Option<Version>,
    current: Option<&Document>,
) -> SyncResult<()> {
    match expected {
        Some(expected) if current.and_then(Document::version) != Some(expected) => {
            Err(SyncError::Conflict {
                id: id.to_client_id(),
                expected: Some(expected),
                found: current.and_then(Document::version),
            })
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get_document(&self, id: &DocId) -> SyncResult<Document> {
        let Some(collection) = self.existing(&id.namespace()) else {
            return Err(SyncError::NotFound(id.to_client_id()));
        };
        let docs = collection.docs.lock().await;
        docs.get(id.key())
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.to_client_id()))
    }

    async fn update_by_operations(
        &self,
        id: &DocId,
        expected_version: Option<Version>,
        ops: &OperationSet,
    ) -> SyncResult<Document> {
        let collection = self.collection(&id.namespace()).await?;
        let mut docs = collection.docs.lock().await;

        let current = docs.get(id.key());
        check_version(id, expected_version, current)?;

        let mut next = current
            .cloned()
            .unwrap_or_else(|| Document::new(id.key()));
        ops.apply_to(&mut next)?;

        collection.append(&codec::encode_document(&next)).await?;
        docs.insert(id.key().to_string(), next.clone());

        tracing::trace!(id = %id, version = ?next.version(), "Document written");
        Ok(next)
    }

    async fn remove_document(
        &self,
        id: &DocId,
        expected_version: Option<Version>,
    ) -> SyncResult<()> {
        let Some(collection) = self.existing(&id.namespace()) else {
            return Err(SyncError::NotFound(id.to_client_id()));
        };
        let mut docs = collection.docs.lock().await;

        let Some(current) = docs.get(id.key()) else {
            return Err(SyncError::NotFound(id.to_client_id()));
        };
        check_version(id, expected_version, Some(current))?;

        collection
            .append(&json!({ DELETED_MARKER: true, ID_FIELD: id.key() }))
            .await?;
        docs.remove(id.key());
        Ok(())
    }

    async fn get_all_documents(
        &self,
        sink: &dyn DocumentSink,
    ) -> SyncResult<Vec<NamespaceSummary>> {
        let scans = self
            .collections
            .opened()
            .into_iter()
            .map(|(namespace, collection)| async move {
                let docs = collection.docs.lock().await;
                let mut sent = 0;
                for (key, doc) in docs.iter() {
                    let id = DocId::from_namespace(&namespace, key.clone())?;
                    sink.write(&id, doc.version(), false, Some(doc));
                    sent += 1;
                }
                Ok::<_, SyncError>(NamespaceSummary { namespace, sent })
            });

        futures::future::try_join_all(scans).await
    }

    async fn find_all(&self, namespace: &str) -> SyncResult<Vec<Document>> {
        let Some(collection) = self.existing(namespace) else {
            return Ok(Vec::new());
        };
        let docs = collection.docs.lock().await;
        Ok(docs.values().cloned().collect())
    }
}
