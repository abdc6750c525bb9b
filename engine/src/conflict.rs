//! Conflict resolution protocol.
//!
//! A conflict happens when a push names a version that no longer matches the
//! stored document. The handler sees the server copy and what the client
//! wanted, and returns one of three resolutions:
//!
//! - [`Resolution::Ignore`]: the server copy wins, the client change is dropped
//! - [`Resolution::Apply`]: the client change (or a substitute) is written
//!   without a version check
//! - [`Resolution::Fail`]: the document fails; other documents in the same
//!   batch are unaffected
//!
//! [`ServerWins`] is the default policy.

use crate::{error::Result, DocId, Document, Error, OperationSet, Version};

/// What the client tried to do when the conflict was detected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConflictIntent<'a> {
    /// An edit expressed as an operation set.
    Update(&'a OperationSet),
    /// A deletion.
    Remove,
}

/// Everything a handler may inspect to make its decision.
#[derive(Debug, Clone, Copy)]
pub struct ConflictContext<'a> {
    pub id: &'a DocId,
    /// The version the client based its change on.
    pub expected_version: Option<Version>,
    /// The stored document, or `None` when it has been deleted meanwhile.
    pub server: Option<&'a Document>,
    pub intent: ConflictIntent<'a>,
}

impl ConflictContext<'_> {
    /// Version currently held by the server, if the document still exists.
    pub fn server_version(&self) -> Option<Version> {
        self.server.and_then(Document::version)
    }
}

/// A handler's verdict on one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Ignore,
    /// Force the write. `Some` substitutes the client's operations.
    Apply(Option<OperationSet>),
    Fail(String),
}

/// Decides how to resolve a conflicting push.
///
/// Handlers are synchronous and must not touch storage; the adapter performs
/// whatever write the resolution calls for.
pub trait ConflictHandler: Send + Sync {
    fn resolve(&self, ctx: &ConflictContext<'_>) -> Resolution;
}

impl<F> ConflictHandler for F
where
    F: Fn(&ConflictContext<'_>) -> Resolution + Send + Sync,
{
    fn resolve(&self, ctx: &ConflictContext<'_>) -> Resolution {
        self(ctx)
    }
}

/// Server state wins every conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerWins;

impl ConflictHandler for ServerWins {
    fn resolve(&self, _ctx: &ConflictContext<'_>) -> Resolution {
        Resolution::Ignore
    }
}

/// Client changes win every conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientWins;

impl ConflictHandler for ClientWins {
    fn resolve(&self, _ctx: &ConflictContext<'_>) -> Resolution {
        Resolution::Apply(None)
    }
}

/// The settled outcome of a conflict, ready for the adapter to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Leave storage untouched and report `doc` (the server copy) back.
    Ignore { doc: Option<Document> },
    /// Write unconditionally. For updates `ops` is always present: the
    /// handler's substitute or the client's original set.
    Apply { ops: Option<OperationSet> },
}

/// Run `handler` on `ctx` and turn its resolution into a [`Decision`].
pub fn resolve_conflict(
    handler: &dyn ConflictHandler,
    ctx: &ConflictContext<'_>,
) -> Result<Decision> {
    match handler.resolve(ctx) {
        Resolution::Ignore => Ok(Decision::Ignore {
            doc: ctx.server.cloned(),
        }),
        Resolution::Apply(alternate) => {
            let ops = match ctx.intent {
                ConflictIntent::Update(original) => {
                    Some(alternate.unwrap_or_else(|| original.clone()))
                }
                ConflictIntent::Remove => None,
            };
            Ok(Decision::Apply { ops })
        }
        Resolution::Fail(reason) => Err(Error::ConflictRejected {
            id: ctx.id.to_client_id(),
            reason,
        }),
    }
}
