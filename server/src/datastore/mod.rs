//! Storage backends for synchronized documents.
//!
//! Every backend implements [`Datastore`]. Two ship with the server: the
//! embedded [`MemoryDatastore`] (optionally persisted to JSON-lines files) and
//! the PostgreSQL-backed [`PgDatastore`].

mod handles;
mod memory;
mod postgres;

pub use handles::HandleCache;
pub use memory::MemoryDatastore;
pub use postgres::{create_pool, run_migrations, PgDatastore, Pool};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use docsync_engine::{codec, DocId, Document, Namespace, OperationSet, Value, Version};
use serde::Serialize;

use crate::error::SyncResult;

/// Receives documents as a datastore enumerates them.
pub trait DocumentSink: Send + Sync {
    fn write(&self, id: &DocId, version: Option<Version>, deleted: bool, doc: Option<&Document>);
}

/// How many documents one namespace contributed to a full pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceSummary {
    pub namespace: Namespace,
    pub sent: usize,
}

/// Versioned document storage.
///
/// Implementations must make [`update_by_operations`] and
/// [`remove_document`] atomic with respect to the version check.
///
/// [`update_by_operations`]: Datastore::update_by_operations
/// [`remove_document`]: Datastore::remove_document
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch one document. Fails with `NotFound` when absent.
    async fn get_document(&self, id: &DocId) -> SyncResult<Document>;

    /// Apply `ops` and return the stored result.
    ///
    /// Without `expected_version` this is an upsert: the operations are
    /// applied to the existing document, or to a fresh `{_id}` document.
    /// With it, the write only happens when the stored `_version` matches,
    /// otherwise `Conflict`.
    async fn update_by_operations(
        &self,
        id: &DocId,
        expected_version: Option<Version>,
        ops: &OperationSet,
    ) -> SyncResult<Document>;

    /// Delete one document. `NotFound` when absent, `Conflict` when
    /// `expected_version` does not match.
    async fn remove_document(
        &self,
        id: &DocId,
        expected_version: Option<Version>,
    ) -> SyncResult<()>;

    /// Stream every document of every namespace into `sink`.
    async fn get_all_documents(
        &self,
        sink: &dyn DocumentSink,
    ) -> SyncResult<Vec<NamespaceSummary>>;

    /// Every document of one namespace.
    async fn find_all(&self, namespace: &str) -> SyncResult<Vec<Document>>;

    /// Wire form of a document sent back to clients.
    fn encode_special_types(&self, doc: &Document) -> serde_json::Value {
        codec::encode_document(doc)
    }

    /// Typed form of operations received from clients.
    fn decode_special_types(&self, json: serde_json::Value) -> SyncResult<Value> {
        Ok(codec::decode_value(json)?)
    }
}

/// Where a datastore keeps its documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// Process memory only.
    Memory,
    /// Embedded store persisted under a directory.
    File(PathBuf),
    /// PostgreSQL, partitioned by `scope`.
    Postgres { url: String, scope: String },
}

/// Open the datastore described by `config`.
pub async fn open(config: &StoreConfig) -> SyncResult<Arc<dyn Datastore>> {
    let store: Arc<dyn Datastore> = match config {
        StoreConfig::Memory => Arc::new(MemoryDatastore::in_memory()),
        StoreConfig::File(dir) => {
            tracing::info!(dir = %dir.display(), "Opening file datastore");
            Arc::new(MemoryDatastore::open(dir).await?)
        }
        StoreConfig::Postgres { url, scope } => {
            let pool = create_pool(url).await?;
            tracing::info!(scope = %scope, "Running database migrations...");
            run_migrations(&pool).await?;
            Arc::new(PgDatastore::new(pool, scope.clone()))
        }
    };
    Ok(store)
}
