//! WebSocket change notifications.
//!
//! Peers connect to `/changes/ws` and are told the new sequence number every
//! time the change log advances, so they can poll `/changes` instead of
//! polling on a timer. They may also ask for changes over the socket itself.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
