//! Request/response correlation, routing and retries.

mod service;

use std::sync::Arc;

use uuid::Uuid;

use memgrid_core::ClientMessage;

use crate::connection::Connection;

pub use service::InvocationService;

/// Callback for event messages pushed on a listener registration.
pub type EventHandler = Arc<dyn Fn(ClientMessage) + Send + Sync>;

/// Where an invocation is sent.
#[derive(Debug, Clone)]
pub enum InvocationTarget {
    /// Any connection; the load balancer chooses in smart mode.
    Random,
    /// The connection to the owner of a partition.
    Partition(i32),
    /// The connection to a member.
    Member(Uuid),
    /// One specific connection. Failures are never retried.
    Connection(Arc<Connection>),
}

/// A request and how to route it.
pub struct Invocation {
    pub(crate) request: ClientMessage,
    pub(crate) target: InvocationTarget,
    pub(crate) event_handler: Option<EventHandler>,
    pub(crate) urgent: bool,
}

impl Invocation {
    /// Creates an invocation of `request` on `target`.
    pub fn new(request: ClientMessage, target: InvocationTarget) -> Self {
        Self {
            request,
            target,
            event_handler: None,
            urgent: false,
        }
    }

    /// Keeps `handler` registered for events after the response arrives.
    pub fn with_event_handler(mut self, handler: EventHandler) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Marks the invocation as control-plane traffic. Urgent invocations
    /// skip the concurrency limit and are allowed before the client is
    /// initialized on the cluster.
    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    /// Returns the routing target.
    pub fn target(&self) -> &InvocationTarget {
        &self.target
    }

    /// Returns whether the invocation is urgent.
    pub fn is_urgent(&self) -> bool {
        self.urgent
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("message_type", &self.request.message_type())
            .field("target", &self.target)
            .field("has_event_handler", &self.event_handler.is_some())
            .field("urgent", &self.urgent)
            .finish()
    }
}
