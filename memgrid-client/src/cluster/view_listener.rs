//! Keeps one cluster view listener registered on some connection.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use memgrid_core::{ClientMessage, GridError};

use super::{ClusterService, PartitionService};
use crate::codec::{ClientAddClusterViewListenerCodec, ClusterViewEvent};
use crate::connection::{Connection, ConnectionId, ConnectionRegistry};
use crate::invocation::{Invocation, InvocationService, InvocationTarget};
use crate::listener::ConnectionListener;

/// Registers for member list and partition table updates over exactly one
/// connection at a time, moving the registration when that connection goes
/// away.
#[derive(Debug)]
pub struct ClusterViewListenerService {
    registry: Arc<ConnectionRegistry>,
    invocations: Arc<InvocationService>,
    cluster: Arc<ClusterService>,
    partitions: Arc<PartitionService>,
    listener_connection: Mutex<Option<ConnectionId>>,
    self_ref: Weak<ClusterViewListenerService>,
}

impl ClusterViewListenerService {
    /// Creates the service. It acts once added as a connection listener.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        invocations: Arc<InvocationService>,
        cluster: Arc<ClusterService>,
        partitions: Arc<PartitionService>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry,
            invocations,
            cluster,
            partitions,
            listener_connection: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Returns the connection the listener is registered on, if any.
    pub fn listener_connection(&self) -> Option<ConnectionId> {
        *self.slot()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<ConnectionId>> {
        self.listener_connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the slot for `connection` if it is free and registers on it.
    fn try_register(&self, connection: Arc<Connection>) {
        {
            let mut slot = self.slot();
            if slot.is_some() {
                return;
            }
            *slot = Some(connection.id());
        }

        let Some(service) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let connection_id = connection.id();
            let handler = {
                let service = Arc::downgrade(&service);
                Arc::new(move |event: ClientMessage| {
                    if let Some(service) = service.upgrade() {
                        service.handle_event(connection_id, &event);
                    }
                })
            };
            let invocation = Invocation::new(
                ClientAddClusterViewListenerCodec::encode_request(),
                InvocationTarget::Connection(Arc::clone(&connection)),
            )
            .with_event_handler(handler)
            .urgent();

            match service.invocations.invoke(invocation).await {
                Ok(_) => {
                    tracing::debug!(connection = %connection_id, "cluster view listener registered");
                }
                Err(e) => {
                    tracing::debug!(
                        connection = %connection_id,
                        error = %e,
                        "cluster view listener registration failed"
                    );
                    service.release(connection_id);
                }
            }
        });
    }

    /// Frees the slot held by `connection_id` and registers on another
    /// connection, if one exists.
    fn release(&self, connection_id: ConnectionId) {
        {
            let mut slot = self.slot();
            if *slot != Some(connection_id) {
                return;
            }
            *slot = None;
        }
        if let Some(next) = self.registry.get_random_connection() {
            if next.id() != connection_id {
                self.try_register(next);
            }
        }
    }

    fn handle_event(&self, connection_id: ConnectionId, event: &ClientMessage) {
        match ClientAddClusterViewListenerCodec::decode_event(event) {
            Ok(Some(ClusterViewEvent::Members { version, members })) => {
                for member in self.cluster.handle_members_view_event(version, members) {
                    if let Some(connection) = self.registry.get_connection(&member.uuid()) {
                        connection.close(
                            "member left the cluster",
                            Some(GridError::TargetDisconnected(format!(
                                "member {} left the cluster",
                                member
                            ))),
                        );
                    }
                }
            }
            Ok(Some(ClusterViewEvent::Partitions { version, partitions })) => {
                self.partitions
                    .handle_partitions_view_event(connection_id, version, partitions);
            }
            Ok(None) => {
                tracing::trace!(message_type = ?event.message_type(), "ignoring unknown cluster view event");
            }
            Err(e) => {
                tracing::warn!(connection = %connection_id, error = %e, "malformed cluster view event");
            }
        }
    }
}

impl ConnectionListener for ClusterViewListenerService {
    fn connection_added(&self, connection: &Arc<Connection>) {
        self.try_register(Arc::clone(connection));
    }

    fn connection_removed(&self, connection: &Arc<Connection>) {
        self.release(connection.id());
    }
}
