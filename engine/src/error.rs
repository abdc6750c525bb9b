//! Error types for the docsync engine.

use crate::ClientId;
use thiserror::Error;

/// All possible errors from the docsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Identity errors
    #[error("malformed id '{0}': expected database.collection$id")]
    MalformedId(String),

    // Codec errors
    #[error("unknown special type: {0}")]
    UnknownSpecialType(String),

    #[error("invalid {tag} value: {reason}")]
    InvalidSpecialType { tag: String, reason: String },

    // Operation errors
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    // Conflict protocol
    #[error("conflict on {id} rejected by handler: {reason}")]
    ConflictRejected { id: ClientId, reason: String },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
