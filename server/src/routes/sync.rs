//! Sync endpoint routes.
//!
//! `/pull` and `/push` answer with a JSON array streamed as the adapter
//! produces it; `/changes` serves the change log.

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State, WebSocketUpgrade},
    http::header::{HeaderMap, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use docsync_engine::{ChangesResponse, PullRequest, PushRequest, Sequence};
use serde::{Deserialize, Deserializer};

use crate::error::{AppError, Result};
use crate::handlers::handle_websocket_connection;
use crate::stream::{ChunkReceiver, ResultStreamer};
use crate::AppState;

const NO_CACHE: &str = "no-cache, private, no-store, must-revalidate";

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/pull", get(pull_handler).post(pull_handler))
        .route("/push", axum::routing::post(push_handler))
        .route("/changes", get(changes_handler))
        .route("/changes/ws", get(ws_handler))
}

#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    #[serde(default, alias = "since", deserialize_with = "empty_as_none")]
    pub seq: Option<Sequence>,
}

/// `?seq=` with no value is the same as leaving it out.
fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<Sequence>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid sequence '{raw}': {e}"))),
        _ => Ok(None),
    }
}

/// Wrap a result stream in a response body.
fn stream_response(rx: ChunkReceiver) -> Response {
    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });

    (
        [(CACHE_CONTROL, NO_CACHE), (CONTENT_TYPE, "application/json")],
        Body::from_stream(chunks),
    )
        .into_response()
}

/// GET|POST /pull - Stream requested documents, or all of them.
async fn pull_handler(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let request: PullRequest = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("invalid pull payload: {e}")))?;
        Some(request)
    };

    let (out, rx) = ResultStreamer::channel();
    tokio::spawn(async move {
        if let Err(e) = state.adapter.pull_with_payload(payload, &out).await {
            tracing::error!("Pull failed: {}", e);
        }
    });

    Ok(stream_response(rx))
}

/// POST /push - Apply pushed documents and stream the results.
async fn push_handler(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Response> {
    if request.documents.is_empty() {
        return Err(AppError::BadRequest("push contains no documents".into()));
    }

    let (out, rx) = ResultStreamer::channel();
    tokio::spawn(async move {
        let summary = state.adapter.push_with_payload(request, &out).await;
        tracing::info!(
            modified = summary.changes.modified.len(),
            deleted = summary.changes.deleted.len(),
            failed = summary.failed,
            skipped = summary.skipped,
            "Push completed"
        );
    });

    Ok(stream_response(rx))
}

/// GET /changes - Current sequence, and atoms since `seq` when given.
async fn changes_handler(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> Result<Response> {
    let response: ChangesResponse = state.syncer.changes_since_sequence(query.seq).await?;
    Ok(([(CACHE_CONTROL, NO_CACHE)], Json(response)).into_response())
}

/// GET /changes/ws - Subscribe to change notifications.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.syncer, state.conn_manager, peer)
    })
}
