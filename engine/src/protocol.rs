//! Wire types for pull, push and result streams.
//!
//! Result streams are JSON arrays in which every document is preceded by a
//! [`ResultMeta`] element; deletions appear as a metadata element alone.

use crate::{ClientId, Namespace, Version};
use serde::{Deserialize, Serialize};

/// Body of a pull request. Without `ids` the whole store is returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<ClientId>>,
}

/// Body of a push request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub documents: Vec<PushDocument>,
}

/// One document inside a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushDocument {
    /// Sync metadata. Entries without it are skipped.
    #[serde(rename = "_sync", default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMeta>,
    /// Raw operation set, special types still encoded.
    #[serde(default)]
    pub ops: serde_json::Value,
}

/// Identity and intent of a pushed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub id: ClientId,
    /// The version the client's change is based on. Absent for creations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub deleted: bool,
}

/// Metadata element of a result stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    pub id: ClientId,
    pub namespace: Namespace,
    pub version: Option<Version>,
    pub deleted: bool,
}

/// Error element of a result stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorElement {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub id: Option<ClientId>,
    pub message: String,
}
