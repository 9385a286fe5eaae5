//! Client lifecycle state and lifecycle event publication.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::listener::LifecycleEvent;

const LIFECYCLE_EVENT_CAPACITY: usize = 32;

/// Registration handle for a lifecycle event listener.
///
/// The listener receives events until this registration is dropped.
#[derive(Debug)]
pub struct LifecycleListenerRegistration {
    id: Uuid,
    receiver: broadcast::Receiver<LifecycleEvent>,
}

impl LifecycleListenerRegistration {
    /// Returns the unique identifier for this registration.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns a mutable reference to the event receiver.
    pub fn receiver(&mut self) -> &mut broadcast::Receiver<LifecycleEvent> {
        &mut self.receiver
    }

    /// Receives the next lifecycle event.
    ///
    /// Returns the event or an error if the channel is closed or lagged.
    pub async fn recv(&mut self) -> std::result::Result<LifecycleEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

/// Tracks whether the client is running and publishes lifecycle events.
///
/// # Example
///
/// ```ignore
/// let mut registration = client.lifecycle().subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = registration.recv().await {
///         println!("lifecycle event: {}", event);
///     }
/// });
/// ```
#[derive(Debug)]
pub struct LifecycleService {
    running: AtomicBool,
    events: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleService {
    /// Creates a service in the not-running state.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(LIFECYCLE_EVENT_CAPACITY);
        Self {
            running: AtomicBool::new(false),
            events,
        }
    }

    /// Returns `true` between start and the beginning of shutdown.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> LifecycleListenerRegistration {
        LifecycleListenerRegistration {
            id: Uuid::new_v4(),
            receiver: self.events.subscribe(),
        }
    }

    /// Marks the client running and fires `Starting`.
    ///
    /// `GridClient::start` calls this; services wired by hand need it before
    /// the connection manager connects.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.fire(LifecycleEvent::Starting);
    }

    /// Marks the client as no longer running.
    ///
    /// Returns `false` if shutdown had already begun, so only one caller
    /// runs the shutdown sequence.
    pub(crate) fn begin_shutdown(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    /// Publishes `event` to every subscriber.
    pub(crate) fn fire(&self, event: LifecycleEvent) {
        tracing::info!(event = %event, "lifecycle state changed");
        let _ = self.events.send(event);
    }
}
