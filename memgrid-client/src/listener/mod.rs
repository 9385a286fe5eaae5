//! Listener traits and event types published by the client.

mod lifecycle;
mod membership;

use std::sync::Arc;

pub use lifecycle::LifecycleEvent;
pub use membership::{
    EndpointQualifier, Member, MemberEvent, MemberEventType, MemberVersion, ProtocolType,
};

use crate::connection::Connection;

/// Observer of authenticated connections being added to and removed from the
/// client.
///
/// Callbacks run on the task that changed the registry and must not block.
pub trait ConnectionListener: Send + Sync {
    /// Called after a connection has authenticated and been registered.
    fn connection_added(&self, _connection: &Arc<Connection>) {}

    /// Called after a registered connection was closed and removed.
    fn connection_removed(&self, _connection: &Arc<Connection>) {}
}

impl std::fmt::Debug for dyn ConnectionListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConnectionListener")
    }
}
