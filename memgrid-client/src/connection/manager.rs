//! Cluster connection establishment, authentication and loss handling.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::{BoxFuture, FutureExt, Shared};
use rand::seq::SliceRandom;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use memgrid_core::protocol::CLIENT_PROTOCOL_PREAMBLE;
use memgrid_core::{GridError, Result};

use super::address::{Address, Addresses};
use super::connection::{Connection, ConnectionOptions, MessageHandler};
use super::failover::{CandidateClusterContext, ClusterFailoverService};
use super::heartbeat::HeartbeatManager;
use super::registry::{ClientState, ConnectionRegistry};
use super::wait_strategy::WaitStrategy;
use crate::cluster::{ClusterService, LifecycleService, PartitionService};
use crate::codec::{
    AuthenticationRequest, AuthenticationResponse, AuthenticationStatus,
    ClientAuthenticationCodec,
};
use crate::config::{ClientConfig, ConnectionRetryConfig, ReconnectMode};
use crate::invocation::{InvocationService, InvocationTarget};
use crate::listener::{LifecycleEvent, Member};

/// Period of the task that opens connections to members without one.
const CONNECT_TO_ALL_MEMBERS_PERIOD: Duration = Duration::from_secs(1);

type PendingConnection = Shared<BoxFuture<'static, Result<Arc<Connection>>>>;

/// Settings the manager reads from the client configuration.
#[derive(Debug, Clone)]
struct ManagerSettings {
    retry: ConnectionRetryConfig,
    connection_timeout: Duration,
    authentication_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    initial_member_list_timeout: Duration,
    write_threshold: usize,
    socket_no_delay: bool,
    shuffle_member_list: bool,
    smart_routing: bool,
    async_start: bool,
    reconnect_mode: ReconnectMode,
}

impl ManagerSettings {
    fn from_config(config: &ClientConfig) -> Self {
        let properties = config.properties();
        let strategy = config.connection_strategy();
        Self {
            retry: strategy.retry().clone(),
            connection_timeout: config.network().connection_timeout(),
            authentication_timeout: properties.heartbeat_timeout(),
            heartbeat_interval: properties.heartbeat_interval(),
            heartbeat_timeout: properties.heartbeat_timeout(),
            initial_member_list_timeout: properties.invocation_timeout(),
            write_threshold: if properties.autopipelining_enabled() {
                properties.autopipelining_threshold()
            } else {
                0
            },
            socket_no_delay: properties.socket_no_delay(),
            shuffle_member_list: properties.shuffle_member_list(),
            smart_routing: config.network().smart_routing(),
            async_start: strategy.async_start(),
            reconnect_mode: strategy.reconnect_mode(),
        }
    }
}

/// Connects the client to a cluster and keeps it connected.
///
/// Owns the connect-to-cluster loop with backoff and failover, per-address
/// connect de-duplication, authentication, and the reaction to lost
/// connections. Connections are registered in the [`ConnectionRegistry`]
/// once authenticated.
pub struct ConnectionManager {
    settings: ManagerSettings,
    registry: Arc<ConnectionRegistry>,
    invocations: Arc<InvocationService>,
    cluster: Arc<ClusterService>,
    partitions: Arc<PartitionService>,
    lifecycle: Arc<LifecycleService>,
    failover: ClusterFailoverService,
    pending_connections: DashMap<String, PendingConnection>,
    connecting_members: DashSet<Uuid>,
    cluster_id: Mutex<Option<Uuid>>,
    switching_to_next_cluster: AtomicBool,
    connect_task_submitted: AtomicBool,
    cancel: CancellationToken,
    #[cfg(feature = "tls")]
    tls: Option<super::tls::TlsConnector>,
    self_ref: Weak<ConnectionManager>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.registry.len())
            .field("state", &self.registry.state())
            .field("cluster_id", &self.cluster_id())
            .field("clusters", &self.failover.len())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates the manager.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Configuration` if TLS is enabled and its
    /// certificates cannot be loaded.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &ClientConfig,
        failover: ClusterFailoverService,
        registry: Arc<ConnectionRegistry>,
        invocations: Arc<InvocationService>,
        cluster: Arc<ClusterService>,
        partitions: Arc<PartitionService>,
        lifecycle: Arc<LifecycleService>,
    ) -> Result<Arc<Self>> {
        #[cfg(feature = "tls")]
        let tls = if config.network().tls().enabled() {
            Some(super::tls::TlsConnector::new(config.network().tls())?)
        } else {
            None
        };

        Ok(Arc::new_cyclic(|self_ref| Self {
            settings: ManagerSettings::from_config(config),
            registry,
            invocations,
            cluster,
            partitions,
            lifecycle,
            failover,
            pending_connections: DashMap::new(),
            connecting_members: DashSet::new(),
            cluster_id: Mutex::new(None),
            switching_to_next_cluster: AtomicBool::new(false),
            connect_task_submitted: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            #[cfg(feature = "tls")]
            tls,
            self_ref: self_ref.clone(),
        }))
    }

    /// Returns the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the id of the cluster the client is connected to, if any.
    pub fn cluster_id(&self) -> Option<Uuid> {
        *self.cluster_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the candidate cluster currently in use.
    pub fn current_cluster(&self) -> CandidateClusterContext {
        self.failover.current()
    }

    /// Starts heartbeating and connects to the cluster.
    ///
    /// With async start the connect runs in the background and this returns
    /// at once. In smart routing mode a background task also keeps a
    /// connection open to every member.
    ///
    /// # Errors
    ///
    /// Returns the connect error when no candidate cluster could be joined.
    #[instrument(
        name = "connection_manager.start",
        skip(self),
        fields(async_start = self.settings.async_start, smart = self.settings.smart_routing)
    )]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        HeartbeatManager::new(
            self.settings.heartbeat_interval,
            self.settings.heartbeat_timeout,
            Arc::clone(&self.registry),
            Arc::clone(&self.invocations),
            Arc::clone(&self.lifecycle),
        )
        .spawn(self.cancel.child_token());

        if self.settings.async_start {
            self.submit_connect_to_cluster_task();
        } else {
            self.connect_to_cluster().await?;
        }

        if self.settings.smart_routing {
            self.spawn_member_connector();
        }
        Ok(())
    }

    /// Connects to the current candidate cluster, then to the alternatives.
    ///
    /// # Errors
    ///
    /// Returns `ClientNotActive` if the client shut down meanwhile and
    /// `IllegalState` when every candidate failed.
    #[instrument(name = "connection_manager.connect_to_cluster", skip(self))]
    pub async fn connect_to_cluster(self: &Arc<Self>) -> Result<()> {
        let context = self.failover.current();
        if self.do_connect_to_candidate_cluster(&context, false).await? {
            return Ok(());
        }

        let lifecycle = Arc::clone(&self.lifecycle);
        let switched = self
            .failover
            .try_next_cluster(
                || lifecycle.is_running(),
                |next| {
                    let manager = Arc::clone(self);
                    async move { manager.cleanup_and_try_next_cluster(next).await }
                },
            )
            .await;
        if switched {
            return Ok(());
        }

        self.check_client_active()?;
        tracing::error!("unable to connect to any cluster");
        Err(GridError::IllegalState(
            "Unable to connect to any cluster.".to_string(),
        ))
    }

    async fn cleanup_and_try_next_cluster(self: Arc<Self>, context: CandidateClusterContext) -> bool {
        self.cluster.reset();
        self.partitions.reset();
        tracing::info!(cluster = context.cluster_name(), "trying to connect to next cluster");

        match self.do_connect_to_candidate_cluster(&context, true).await {
            Ok(true) => {
                self.cluster
                    .wait_initial_member_list(self.settings.initial_member_list_timeout)
                    .await;
                self.lifecycle.fire(LifecycleEvent::ClientChangedCluster);
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(cluster = context.cluster_name(), error = %e, "cluster switch aborted");
                false
            }
        }
    }

    async fn do_connect_to_candidate_cluster(
        self: &Arc<Self>,
        context: &CandidateClusterContext,
        switching: bool,
    ) -> Result<bool> {
        self.switching_to_next_cluster
            .store(switching, Ordering::Release);
        tracing::info!(cluster = context.cluster_name(), "trying to connect to cluster");

        let mut wait = WaitStrategy::new(&self.settings.retry);
        wait.reset();
        loop {
            match self.try_all_known_addresses(context).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_cluster_fatal() => {
                    tracing::warn!(
                        cluster = context.cluster_name(),
                        error = %e,
                        "stopped trying on the cluster"
                    );
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }

            self.check_client_active()?;
            let slept = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Self::shutting_down()),
                slept = wait.sleep() => slept,
            };
            if !slept {
                break;
            }
        }

        tracing::warn!(cluster = context.cluster_name(), "unable to connect to any address of the cluster");
        Ok(false)
    }

    /// One round over the known members, then over the provider's addresses.
    async fn try_all_known_addresses(
        self: &Arc<Self>,
        context: &CandidateClusterContext,
    ) -> Result<bool> {
        let mut tried: HashSet<Address> = HashSet::new();

        let mut members = self.cluster.members();
        if self.settings.shuffle_member_list {
            members.shuffle(&mut rand::thread_rng());
        }
        for member in &members {
            self.check_client_active()?;
            tried.insert(member.address().clone());
            if self.try_connect_to_member(context, member, &members).await?.is_some() {
                return Ok(true);
            }
        }

        let mut addresses = match context.provider().load_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                tracing::warn!(cluster = context.cluster_name(), error = %e, "failed to load addresses");
                Addresses::default()
            }
        };
        if self.settings.shuffle_member_list {
            addresses.shuffle();
        }
        for address in addresses.iter() {
            self.check_client_active()?;
            if !tried.insert(address.clone()) {
                continue;
            }
            let translated = match context.provider().translate(address).await {
                Ok(Some(translated)) => translated,
                Ok(None) => {
                    tracing::warn!(address = %address, "address provider could not translate address");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "address translation failed");
                    continue;
                }
            };
            if self.try_connect(context, translated).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn try_connect_to_member(
        self: &Arc<Self>,
        context: &CandidateClusterContext,
        member: &Member,
        members: &[Member],
    ) -> Result<Option<Arc<Connection>>> {
        if let Some(connection) = self.registry.get_connection(&member.uuid()) {
            return Ok(Some(connection));
        }
        let address = match context
            .translator()
            .translate(member, members, context.provider().as_ref())
            .await
        {
            Ok(Some(address)) => address,
            Ok(None) => {
                tracing::debug!(member = %member, "no address to dial for member");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(member = %member, error = %e, "member address translation failed");
                return Ok(None);
            }
        };
        self.try_connect(context, address).await
    }

    /// Connects to `address`, swallowing errors that only concern this
    /// address.
    async fn try_connect(
        self: &Arc<Self>,
        context: &CandidateClusterContext,
        address: Address,
    ) -> Result<Option<Arc<Connection>>> {
        match self.get_or_connect(context.clone(), address.clone()).await {
            Ok(connection) => Ok(Some(connection)),
            Err(e) if e.is_cluster_fatal() || matches!(e, GridError::ClientNotActive(_)) => Err(e),
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "failed to connect");
                Ok(None)
            }
        }
    }

    /// Returns the connection to `address`, opening and authenticating one
    /// against the current cluster if needed. The address goes through the
    /// cluster's address provider first.
    ///
    /// # Errors
    ///
    /// Returns `TargetDisconnected` when the provider has no translation for
    /// `address`, otherwise the connect or authentication error.
    pub async fn connect_to(self: &Arc<Self>, address: Address) -> Result<Arc<Connection>> {
        let context = self.failover.current();
        let translated = context.provider().translate(&address).await?.ok_or_else(|| {
            GridError::TargetDisconnected(format!(
                "address provider could not translate {}",
                address
            ))
        })?;
        self.get_or_connect(context, translated).await
    }

    /// Concurrent calls for the same address share one attempt.
    async fn get_or_connect(
        self: &Arc<Self>,
        context: CandidateClusterContext,
        address: Address,
    ) -> Result<Arc<Connection>> {
        if let Some(connection) = self.registry.connection_to(&address) {
            return Ok(connection);
        }

        let key = address.to_string();
        let attempt = match self.pending_connections.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                // The entry is removed even when every waiter is dropped.
                let manager = Arc::clone(self);
                let task = tokio::spawn(async move {
                    let result = Arc::clone(&manager)
                        .connect_and_authenticate(context, address)
                        .await;
                    manager.pending_connections.remove(&key);
                    result
                });
                let attempt = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(GridError::IllegalState(format!("connect task failed: {}", e)))
                    })
                }
                .boxed()
                .shared();
                entry.insert(attempt.clone());
                attempt
            }
        };
        attempt.await
    }

    async fn connect_and_authenticate(
        self: Arc<Self>,
        context: CandidateClusterContext,
        address: Address,
    ) -> Result<Arc<Connection>> {
        self.check_client_active()?;
        let connection = self.open_connection(&address).await?;
        match self.authenticate(&context, &connection).await {
            Ok(authenticated) => Ok(authenticated),
            Err(e) => {
                connection.close("authentication failed", Some(e.clone()));
                Err(e)
            }
        }
    }

    #[instrument(name = "connection_manager.open", skip(self), fields(address = %address))]
    async fn open_connection(&self, address: &Address) -> Result<Arc<Connection>> {
        let socket_address = address.resolve().await?;
        let connect = timeout(
            self.settings.connection_timeout,
            TcpStream::connect(socket_address),
        );
        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Self::shutting_down()),
            connected = connect => match connected {
                Ok(stream) => stream?,
                Err(_) => {
                    return Err(GridError::Timeout(format!(
                        "connecting to {} timed out after {:?}",
                        address, self.settings.connection_timeout
                    )))
                }
            },
        };
        stream.set_nodelay(self.settings.socket_no_delay)?;
        let local_address = stream.local_addr().ok();

        #[cfg(feature = "tls")]
        if let Some(tls) = &self.tls {
            let stream = tls.connect(address.host(), stream).await?;
            return self.start_connection(stream, address, local_address).await;
        }

        self.start_connection(stream, address, local_address).await
    }

    async fn start_connection<S>(
        &self,
        mut stream: S,
        address: &Address,
        local_address: Option<std::net::SocketAddr>,
    ) -> Result<Arc<Connection>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        stream.write_all(CLIENT_PROTOCOL_PREAMBLE).await?;

        let manager = self.self_ref.clone();
        let connection = Connection::start(
            stream,
            address.clone(),
            local_address,
            ConnectionOptions {
                write_threshold: self.settings.write_threshold,
            },
            Arc::clone(&self.invocations) as Arc<dyn MessageHandler>,
            Arc::new(move |connection: &Arc<Connection>| {
                if let Some(manager) = manager.upgrade() {
                    manager.on_connection_close(connection);
                }
            }),
        );
        tracing::info!(id = %connection.id(), address = %address, "connection opened");
        Ok(connection)
    }

    async fn authenticate(
        &self,
        context: &CandidateClusterContext,
        connection: &Arc<Connection>,
    ) -> Result<Arc<Connection>> {
        let client = self.cluster.local_client();
        let request = ClientAuthenticationCodec::encode_request(&AuthenticationRequest {
            cluster_name: context.cluster_name().to_string(),
            credentials: context.credentials().cloned(),
            client_uuid: client.uuid(),
            client_name: client.name().to_string(),
            labels: client.labels().to_vec(),
        });

        let invocation = self
            .invocations
            .invoke_urgent(request, InvocationTarget::Connection(Arc::clone(connection)));
        let response = match timeout(self.settings.authentication_timeout, invocation).await {
            Ok(response) => response?,
            Err(_) => {
                return Err(GridError::Timeout(format!(
                    "authentication with {} did not complete within {:?}",
                    connection.remote_address(),
                    self.settings.authentication_timeout
                )))
            }
        };

        let response = ClientAuthenticationCodec::decode_response(&response)?;
        self.on_authenticated(connection, response)
    }

    fn on_authenticated(
        &self,
        connection: &Arc<Connection>,
        response: AuthenticationResponse,
    ) -> Result<Arc<Connection>> {
        match response.status {
            AuthenticationStatus::Authenticated => {}
            AuthenticationStatus::CredentialsFailed => {
                return Err(GridError::Authentication(format!(
                    "authentication failed on {}: credentials rejected",
                    connection.remote_address()
                )))
            }
            AuthenticationStatus::SerializationVersionMismatch => {
                return Err(GridError::SerializationVersionMismatch(format!(
                    "member {} does not support serialization version {}",
                    connection.remote_address(),
                    crate::codec::SERIALIZATION_VERSION
                )))
            }
            AuthenticationStatus::NotAllowedInCluster => {
                return Err(GridError::ClientNotAllowedInCluster(
                    "client is not allowed in the cluster".to_string(),
                ))
            }
        }

        let (Some(member_uuid), Some(new_cluster_id)) = (response.member_uuid, response.cluster_id)
        else {
            return Err(GridError::Protocol(
                "authentication response without member uuid or cluster id".to_string(),
            ));
        };

        if !self
            .partitions
            .check_and_set_partition_count(response.partition_count)
        {
            return Err(GridError::PartitionCountMismatch {
                expected: self.partitions.partition_count(),
                actual: response.partition_count,
            });
        }

        connection.set_authenticated(member_uuid, response.address.clone(), response.server_version);
        if !connection.is_alive() {
            return Err(connection.closed_error());
        }

        {
            let mut cluster_id = self.cluster_id.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(existing) = self.registry.get_connection(&member_uuid) {
                if existing.is_alive() {
                    connection.close("duplicate connection to the same member", None);
                    return Ok(existing);
                }
            }

            let initial_connection = self.registry.is_empty();
            let changed_cluster = matches!(*cluster_id, Some(current) if current != new_cluster_id);
            if changed_cluster {
                if !initial_connection {
                    return Err(GridError::IllegalState(format!(
                        "cluster id changed from {:?} to {} while other connections are open",
                        *cluster_id, new_cluster_id
                    )));
                }
                let switching = self
                    .switching_to_next_cluster
                    .swap(false, Ordering::AcqRel);
                if self.failover.max_try_count() > 0 && !switching {
                    return Err(GridError::ClientNotAllowedInCluster(
                        "forced hard cluster switch".to_string(),
                    ));
                }
                tracing::warn!(
                    from = ?cluster_id.as_ref(),
                    to = %new_cluster_id,
                    "switching to a new cluster"
                );
                self.cluster.reset();
                self.partitions.reset();
            }

            self.registry
                .add_connection(member_uuid, Arc::clone(connection));
            if initial_connection {
                *cluster_id = Some(new_cluster_id);
                if changed_cluster {
                    self.registry.set_state(ClientState::ConnectedToCluster);
                    if let Some(manager) = self.self_ref.upgrade() {
                        tokio::spawn(async move {
                            manager.initialize_client_on_cluster(new_cluster_id);
                        });
                    }
                } else {
                    self.registry.set_state(ClientState::InitializedOnCluster);
                    self.lifecycle.fire(LifecycleEvent::ClientConnected);
                }
            }
        }

        if !connection.is_alive() {
            self.remove_closed_connection(connection);
            return Err(connection.closed_error());
        }

        tracing::info!(
            id = %connection.id(),
            address = %connection.remote_address(),
            member = %member_uuid,
            cluster = %new_cluster_id,
            server_version = connection.server_version().unwrap_or(""),
            "authenticated"
        );
        self.registry.fire_connection_added(connection);
        Ok(Arc::clone(connection))
    }

    /// Finishes joining a new cluster. Listener state would be re-sent here.
    fn initialize_client_on_cluster(&self, target_cluster_id: Uuid) {
        if self.cluster_id() != Some(target_cluster_id) {
            tracing::warn!(cluster = %target_cluster_id, "cluster changed again before initialization");
            return;
        }
        self.registry.set_state(ClientState::InitializedOnCluster);
        self.lifecycle.fire(LifecycleEvent::ClientConnected);
    }

    fn on_connection_close(&self, connection: &Arc<Connection>) {
        self.invocations.on_connection_closed(connection);
        self.remove_closed_connection(connection);
    }

    fn remove_closed_connection(&self, connection: &Arc<Connection>) {
        let Some(member_uuid) = connection.member_uuid() else {
            return;
        };
        if !self.registry.delete_connection(&member_uuid, connection.id()) {
            return;
        }

        tracing::info!(
            id = %connection.id(),
            address = %connection.remote_address(),
            member = %member_uuid,
            "removed connection to member"
        );
        self.registry.fire_connection_removed(connection);

        if self.registry.is_empty() {
            if self.registry.state() == ClientState::InitializedOnCluster {
                self.lifecycle.fire(LifecycleEvent::ClientDisconnected);
            }
            self.trigger_cluster_reconnection();
        }
    }

    fn trigger_cluster_reconnection(&self) {
        if self.settings.reconnect_mode == ReconnectMode::Off {
            tracing::info!("reconnect mode is off, shutting down the client");
            self.shutdown_client();
            return;
        }
        if !self.lifecycle.is_running() {
            return;
        }
        self.submit_connect_to_cluster_task();
    }

    fn submit_connect_to_cluster_task(&self) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        if self.connect_task_submitted.swap(true, Ordering::AcqRel) {
            return;
        }

        tokio::spawn(async move {
            let result = manager.connect_to_cluster().await;
            manager.connect_task_submitted.store(false, Ordering::Release);
            match result {
                Ok(()) => {
                    if manager.registry.is_empty() && manager.lifecycle.is_running() {
                        manager.submit_connect_to_cluster_task();
                    }
                }
                Err(e) => {
                    if manager.lifecycle.is_running() {
                        tracing::error!(error = %e, "unable to reconnect, shutting down the client");
                        manager.shutdown_client();
                    }
                }
            }
        });
    }

    fn spawn_member_connector(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CONNECT_TO_ALL_MEMBERS_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                manager.connect_to_all_members();
            }
        });
    }

    /// Opens connections to members that have none. Attempts already in
    /// flight for a member are not repeated.
    fn connect_to_all_members(self: &Arc<Self>) {
        if !self.lifecycle.is_running() || self.registry.is_empty() {
            return;
        }

        let members = self.cluster.members();
        for member in &members {
            let member_uuid = member.uuid();
            if self.registry.get_connection(&member_uuid).is_some() {
                continue;
            }
            if !self.connecting_members.insert(member_uuid) {
                continue;
            }

            let manager = Arc::clone(self);
            let member = member.clone();
            let members = members.clone();
            tokio::spawn(async move {
                if manager.lifecycle.is_running() {
                    let context = manager.failover.current();
                    if let Err(e) = manager.try_connect_to_member(&context, &member, &members).await {
                        tracing::debug!(member = %member, error = %e, "background connect failed");
                    }
                }
                manager.connecting_members.remove(&member_uuid);
            });
        }
    }

    fn check_client_active(&self) -> Result<()> {
        if self.lifecycle.is_running() {
            Ok(())
        } else {
            Err(GridError::ClientNotActive("client is not running".to_string()))
        }
    }

    fn shutting_down() -> GridError {
        GridError::ClientNotActive("client is shutting down".to_string())
    }

    /// Shuts the client down: fails pending invocations, closes every
    /// connection and stops background tasks. Only the first call acts.
    pub fn shutdown_client(&self) {
        if !self.lifecycle.begin_shutdown() {
            return;
        }
        self.lifecycle.fire(LifecycleEvent::ShuttingDown);
        self.cancel.cancel();
        self.invocations.shutdown();
        for connection in self.registry.connections() {
            connection.close("client is shutting down", None);
        }
        self.lifecycle.fire(LifecycleEvent::Shutdown);
    }
}
