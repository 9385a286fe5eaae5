//! Live authenticated connections, keyed by member UUID.

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use uuid::Uuid;

use memgrid_core::{GridError, Result};

use super::connection::{Connection, ConnectionId};
use super::load_balancer::LoadBalancer;
use crate::cluster::ClusterService;
use crate::config::ReconnectMode;
use crate::listener::ConnectionListener;

/// Where the client stands with respect to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No cluster has been joined yet.
    Initial,
    /// Authenticated to a cluster whose client-side state is not yet sent.
    ConnectedToCluster,
    /// Fully set up on the cluster; invocations are allowed.
    InitializedOnCluster,
}

/// Tracks the authenticated connection to each member.
///
/// Also answers whether invocations may be sent right now and picks a
/// connection for operations without a routing target.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Arc<Connection>>,
    state: RwLock<ClientState>,
    load_balancer: Arc<dyn LoadBalancer>,
    cluster_service: Arc<ClusterService>,
    smart_routing: bool,
    async_start: bool,
    reconnect_mode: ReconnectMode,
    listeners: RwLock<Vec<Arc<dyn ConnectionListener>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry in the `Initial` state.
    pub fn new(
        load_balancer: Arc<dyn LoadBalancer>,
        cluster_service: Arc<ClusterService>,
        smart_routing: bool,
        async_start: bool,
        reconnect_mode: ReconnectMode,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            state: RwLock::new(ClientState::Initial),
            load_balancer,
            cluster_service,
            smart_routing,
            async_start,
            reconnect_mode,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Returns whether operations are routed to partition owners.
    pub fn is_smart_routing(&self) -> bool {
        self.smart_routing
    }

    /// Returns the client state.
    pub fn state(&self) -> ClientState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ClientState) {
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "client state changed");
            *current = state;
        }
    }

    /// Returns the connection to `member_uuid`, if any.
    pub fn get_connection(&self, member_uuid: &Uuid) -> Option<Arc<Connection>> {
        self.connections
            .get(member_uuid)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the open connection whose socket goes to `address`, if any.
    pub fn connection_to(&self, address: &super::Address) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|entry| entry.value().remote_address() == address)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns every registered connection.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns the number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Registers `connection` for `member_uuid`, returning the connection it
    /// replaced.
    pub(crate) fn add_connection(
        &self,
        member_uuid: Uuid,
        connection: Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        self.connections.insert(member_uuid, connection)
    }

    /// Removes the mapping for `member_uuid` if it still points at the
    /// connection `connection_id`. Returns whether anything was removed.
    pub(crate) fn delete_connection(&self, member_uuid: &Uuid, connection_id: ConnectionId) -> bool {
        self.connections
            .remove_if(member_uuid, |_, connection| connection.id() == connection_id)
            .is_some()
    }

    /// Picks a connection for an operation without a routing target.
    ///
    /// In smart mode the load balancer chooses among known members; when the
    /// chosen member has no connection, or in unisocket mode, any
    /// connection is used.
    pub fn get_random_connection(&self) -> Option<Arc<Connection>> {
        if self.smart_routing {
            let members = self.cluster_service.members();
            if let Some(connection) = self
                .load_balancer
                .select(&members)
                .and_then(|member| self.get_connection(&member.uuid()))
            {
                return Some(connection);
            }
        }
        self.connections
            .iter()
            .next()
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Fails fast when the client cannot send invocations right now.
    ///
    /// Returns `ClientOffline` when the configuration asks not to wait for
    /// a connection, and an I/O error otherwise; the latter is retried by
    /// the invocation service until the connection is back or the
    /// invocation times out.
    pub fn check_if_invocation_allowed(&self) -> Result<()> {
        let state = self.state();
        if state == ClientState::InitializedOnCluster && !self.is_empty() {
            return Ok(());
        }

        if state == ClientState::Initial {
            if self.async_start {
                return Err(GridError::ClientOffline);
            }
            return Err(GridError::no_connection(
                "No connection found to cluster since the client is starting.",
            ));
        }

        if self.reconnect_mode == ReconnectMode::Async {
            return Err(GridError::ClientOffline);
        }
        Err(GridError::no_connection("No connection found to cluster."))
    }

    /// Subscribes `listener` to connection added/removed notifications.
    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub(crate) fn fire_connection_added(&self, connection: &Arc<Connection>) {
        for listener in self.listeners_snapshot() {
            listener.connection_added(connection);
        }
    }

    pub(crate) fn fire_connection_removed(&self, connection: &Arc<Connection>) {
        for listener in self.listeners_snapshot() {
            listener.connection_removed(connection);
        }
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClientInfo;
    use crate::connection::connection::testing::authenticated_connection;
    use crate::connection::load_balancer::RoundRobinLoadBalancer;
    use crate::connection::Address;
    use crate::listener::Member;

    fn registry(smart: bool, async_start: bool, mode: ReconnectMode) -> ConnectionRegistry {
        let cluster = Arc::new(ClusterService::new(ClientInfo::new(
            Uuid::new_v4(),
            "test".to_string(),
            Vec::new(),
        )));
        ConnectionRegistry::new(
            Arc::new(RoundRobinLoadBalancer::new()),
            cluster,
            smart,
            async_start,
            mode,
        )
    }

    #[tokio::test]
    async fn test_delete_only_current_mapping() {
        let registry = registry(true, false, ReconnectMode::On);
        let uuid = Uuid::new_v4();
        let (old, _old_peer) = authenticated_connection(uuid, 5701);
        let (new, _new_peer) = authenticated_connection(uuid, 5701);

        registry.add_connection(uuid, Arc::clone(&old));
        registry.add_connection(uuid, Arc::clone(&new));

        assert!(!registry.delete_connection(&uuid, old.id()));
        assert_eq!(registry.get_connection(&uuid).unwrap().id(), new.id());
        assert!(registry.delete_connection(&uuid, new.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_random_connection_follows_load_balancer() {
        let registry = registry(true, false, ReconnectMode::On);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.cluster_service.handle_members_view_event(
            1,
            vec![
                Member::new(a, Address::new("127.0.0.1", 5701)),
                Member::new(b, Address::new("127.0.0.1", 5702)),
            ],
        );
        let (conn_a, _pa) = authenticated_connection(a, 5701);
        let (conn_b, _pb) = authenticated_connection(b, 5702);
        registry.add_connection(a, Arc::clone(&conn_a));
        registry.add_connection(b, Arc::clone(&conn_b));

        let first = registry.get_random_connection().unwrap().id();
        let second = registry.get_random_connection().unwrap().id();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_random_connection_falls_back_when_member_unconnected() {
        let registry = registry(true, false, ReconnectMode::On);
        registry.cluster_service.handle_members_view_event(
            1,
            vec![Member::new(Uuid::new_v4(), Address::new("127.0.0.1", 5701))],
        );
        assert!(registry.get_random_connection().is_none());

        let uuid = Uuid::new_v4();
        let (connection, _peer) = authenticated_connection(uuid, 5702);
        registry.add_connection(uuid, Arc::clone(&connection));
        assert_eq!(registry.get_random_connection().unwrap().id(), connection.id());
        assert_eq!(
            registry.connection_to(&Address::new("127.0.0.1", 5702)).unwrap().id(),
            connection.id()
        );
    }

    #[tokio::test]
    async fn test_invocation_allowed_by_state() {
        let registry = registry(true, false, ReconnectMode::On);
        assert!(matches!(
            registry.check_if_invocation_allowed(),
            Err(GridError::Io(_))
        ));

        let uuid = Uuid::new_v4();
        let (connection, _peer) = authenticated_connection(uuid, 5701);
        registry.add_connection(uuid, connection);
        registry.set_state(ClientState::InitializedOnCluster);
        assert!(registry.check_if_invocation_allowed().is_ok());

        registry.connections.clear();
        assert!(matches!(
            registry.check_if_invocation_allowed(),
            Err(GridError::Io(_))
        ));
    }

    #[test]
    fn test_offline_modes() {
        let starting = registry(true, true, ReconnectMode::On);
        assert!(matches!(
            starting.check_if_invocation_allowed(),
            Err(GridError::ClientOffline)
        ));

        let reconnecting = registry(true, false, ReconnectMode::Async);
        reconnecting.set_state(ClientState::InitializedOnCluster);
        assert!(matches!(
            reconnecting.check_if_invocation_allowed(),
            Err(GridError::ClientOffline)
        ));
    }
}
