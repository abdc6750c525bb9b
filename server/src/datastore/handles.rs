//! Per-namespace handle cache.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use docsync_engine::Namespace;
use tokio::sync::OnceCell;

use crate::error::SyncResult;

/// Memoizes one handle per namespace.
///
/// Concurrent first requests for the same namespace share a single in-flight
/// open. A failed open leaves the slot empty so the next caller retries.
#[derive(Debug)]
pub struct HandleCache<H> {
    handles: DashMap<Namespace, Arc<OnceCell<Arc<H>>>>,
}

impl<H> Default for HandleCache<H> {
    fn default() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }
}

impl<H> HandleCache<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `namespace`, opening it with `open` on first use.
    pub async fn get_or_open<F, Fut>(&self, namespace: &str, open: F) -> SyncResult<Arc<H>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<H>>,
    {
        // The map guard must not live across the await below.
        let cell = self.handles.entry(namespace.to_string()).or_default().clone();

        let handle = cell.get_or_try_init(|| async move { open().await.map(Arc::new) }).await?;
        Ok(handle.clone())
    }

    /// The handle for `namespace` if it has already been opened. Never
    /// opens one.
    pub fn get(&self, namespace: &str) -> Option<Arc<H>> {
        self.handles
            .get(namespace)
            .and_then(|cell| cell.get().cloned())
    }

    /// All handles opened so far.
    pub fn opened(&self) -> Vec<(Namespace, Arc<H>)> {
        self.handles
            .iter()
            .filter_map(|entry| entry.value().get().map(|h| (entry.key().clone(), h.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
