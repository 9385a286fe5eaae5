//! Client lifecycle events.

use std::fmt;

/// Events emitted as the client starts, connects, fails over and stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The client is starting.
    Starting,
    /// The client has started.
    Started,
    /// The client is shutting down.
    ShuttingDown,
    /// The client has shut down.
    Shutdown,
    /// The client has an initialized connection to the cluster.
    ClientConnected,
    /// The client lost its last connection to the cluster.
    ClientDisconnected,
    /// The client switched to another cluster.
    ClientChangedCluster,
}

impl LifecycleEvent {
    /// Returns the event name in upper snake case.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Shutdown => "SHUTDOWN",
            Self::ClientConnected => "CLIENT_CONNECTED",
            Self::ClientDisconnected => "CLIENT_DISCONNECTED",
            Self::ClientChangedCluster => "CLIENT_CHANGED_CLUSTER",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
