//! Streaming JSON array writer for pull and push results.
//!
//! A [`ResultStreamer`] frames its output as one JSON array: `start` opens it,
//! every `write` adds a metadata element (and the document after it unless it
//! is a deletion), `write_error` adds an error element, and `end` closes it.
//! Chunks go out over an unbounded channel as they are produced.

use std::sync::{Mutex, MutexGuard};

use docsync_engine::{DocId, ErrorBody, ErrorElement, ResultMeta, Version};
use tokio::sync::mpsc;

/// Receiving half of a result stream.
pub type ChunkReceiver = mpsc::UnboundedReceiver<String>;

#[derive(Debug, Default)]
struct StreamState {
    started: bool,
    ended: bool,
    elements: usize,
}

/// Single-pass writer of one result array.
#[derive(Debug)]
pub struct ResultStreamer {
    tx: mpsc::UnboundedSender<String>,
    state: Mutex<StreamState>,
}

impl ResultStreamer {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            tx,
            state: Mutex::new(StreamState::default()),
        }
    }

    /// A streamer together with the receiver its chunks arrive on.
    pub fn channel() -> (Self, ChunkReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, chunk: String) {
        if self.tx.send(chunk).is_err() {
            tracing::debug!("Result receiver dropped, discarding output");
        }
    }

    /// Open the array. Calling it again has no effect.
    pub fn start(&self) {
        let mut state = self.state();
        self.open(&mut state);
    }

    fn open(&self, state: &mut StreamState) {
        if !state.started {
            state.started = true;
            self.send("[".to_string());
        }
    }

    /// Append `elements` as a group, so concurrent writers never split them.
    fn emit(&self, elements: &[serde_json::Value]) {
        let mut state = self.state();
        if state.ended {
            tracing::warn!(dropped = elements.len(), "Write after end of result stream");
            return;
        }
        self.open(&mut state);

        let mut chunk = String::new();
        for element in elements {
            let text = match serde_json::to_string(element) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to serialize result element: {}", e);
                    continue;
                }
            };
            if state.elements > 0 {
                chunk.push(',');
            }
            chunk.push_str(&text);
            state.elements += 1;
        }

        if !chunk.is_empty() {
            self.send(chunk);
        }
    }

    /// Report one document. `body` is the document's wire form; deletions
    /// carry only the metadata element.
    pub fn write(
        &self,
        id: &DocId,
        version: Option<Version>,
        deleted: bool,
        body: Option<&serde_json::Value>,
    ) {
        let meta = ResultMeta {
            id: id.to_client_id(),
            namespace: id.namespace(),
            version,
            deleted,
        };
        let meta = match serde_json::to_value(&meta) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::error!(id = %id, "Failed to serialize result metadata: {}", e);
                return;
            }
        };

        match (deleted, body) {
            (true, _) => self.emit(&[meta]),
            (false, Some(body)) => self.emit(&[meta, body.clone()]),
            (false, None) => {
                tracing::warn!(id = %id, "Live document written without a body");
                self.emit(&[meta]);
            }
        }
    }

    pub fn write_error(&self, message: impl Into<String>, id: Option<&str>) {
        let element = ErrorElement {
            error: ErrorBody {
                id: id.map(str::to_string),
                message: message.into(),
            },
        };
        match serde_json::to_value(&element) {
            Ok(element) => self.emit(&[element]),
            Err(e) => tracing::error!("Failed to serialize error element: {}", e),
        }
    }

    /// Close the array. Idempotent; an unopened stream becomes `[]`.
    pub fn end(&self) {
        let mut state = self.state();
        if state.ended {
            return;
        }
        self.open(&mut state);
        state.ended = true;
        self.send("]".to_string());
    }

    pub fn is_ended(&self) -> bool {
        self.state().ended
    }
}
