//! # docsync engine
//!
//! Pure building blocks for the docsync document synchronization adapter.
//!
//! This crate has no IO. It defines how documents are identified, how their
//! values travel over the wire, how mutations are expressed, and how update
//! conflicts are decided. The server crate combines these pieces with a
//! concrete datastore, a streaming result writer and the change log.
//!
//! ## Core Concepts
//!
//! ### Document identity
//!
//! Clients address documents with a composite key `database.collection$id`.
//! [`DocId`] parses and rebuilds that key; collection names may contain dots.
//!
//! ### Values and special types
//!
//! Documents are trees of [`Value`]s. Timestamps and binary blobs are not
//! JSON-native, so the [`codec`] module tags them on the way out
//! (`{"_bsonType":"Date","millis":..}`, `{"_bsonType":"Binary","encoded":..}`)
//! and restores them on the way in.
//!
//! ### Operation sets
//!
//! Clients never send whole documents. They send an [`OperationSet`] made of
//! `$set`, `$inc` and `$unset` directives. The server owns `_version`: every
//! accepted edit increments it by one.
//!
//! ### Conflicts
//!
//! A push carries the version the client last saw. When the stored version has
//! moved on, a [`ConflictHandler`] decides whether the server copy wins
//! ([`Resolution::Ignore`]), the client change is forced through
//! ([`Resolution::Apply`]), or the document fails ([`Resolution::Fail`]).
//!
//! ## Quick Start
//!
//! ```rust
//! use docsync_engine::{DocId, Document, OperationSet, Value};
//!
//! let id = DocId::parse("app.Coll$1").unwrap();
//! assert_eq!(id.namespace(), "app.Coll");
//!
//! let mut ops = OperationSet::new();
//! ops.set("a", Value::from(1));
//! ops.set("b", Value::from(2));
//! ops.prepare_for_push();
//!
//! let mut doc = Document::new(id.key());
//! ops.apply_to(&mut doc).unwrap();
//! assert_eq!(doc.version(), Some(1));
//! ```

pub mod changes;
pub mod codec;
pub mod conflict;
pub mod document;
pub mod error;
pub mod id;
pub mod ops;
pub mod protocol;
pub mod value;

// Re-export main types at crate root
pub use changes::{Atom, ChangeSet, ChangesResponse, DeletedDoc, ModifiedDoc, SequenceResponse};
pub use conflict::{
    resolve_conflict, ClientWins, ConflictContext, ConflictHandler, ConflictIntent, Decision,
    Resolution, ServerWins,
};
pub use document::Document;
pub use error::Error;
pub use id::DocId;
pub use ops::OperationSet;
pub use protocol::{
    ErrorBody, ErrorElement, PullRequest, PushDocument, PushRequest, ResultMeta, SyncMeta,
};
pub use value::{Map, Value};

/// Type aliases for clarity
pub type ClientId = String;
pub type Namespace = String;
pub type Version = u64;
pub type Sequence = u64;
