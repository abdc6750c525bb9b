//! Docsync Server - document synchronization over HTTP.
//!
//! Clients pull documents, push changes guarded by per-document versions,
//! and poll a change log (or subscribe over WebSocket) to learn what other
//! clients changed. Storage is pluggable through [`datastore::Datastore`].

pub mod adapter;
pub mod config;
pub mod datastore;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod stream;
pub mod syncer;
pub mod websocket;

pub use adapter::{Adapter, AdapterConfig, PullOutcome, PushNotifier, PushSummary};
pub use error::{AppError, SyncError, SyncResult};
pub use stream::ResultStreamer;
pub use syncer::{ChangeListener, Syncer};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::websocket::ConnectionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<Adapter>,
    pub syncer: Arc<Syncer>,
    pub conn_manager: Arc<ConnectionManager>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        adapter: Arc<Adapter>,
        syncer: Arc<Syncer>,
        conn_manager: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            adapter,
            syncer,
            conn_manager,
            started_at: Utc::now(),
        }
    }
}

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
