//! Client entry point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use memgrid_core::Result;

use crate::cluster::{
    ClientInfo, ClusterService, ClusterViewListenerService, LifecycleService, PartitionService,
};
use crate::config::{ClientConfig, ClientFailoverConfig};
use crate::connection::{
    load_balancer_for, ClusterFailoverService, ConnectionManager, ConnectionRegistry,
};
use crate::invocation::InvocationService;
use crate::listener::{ConnectionListener, LifecycleEvent};

static CLIENT_ID: AtomicUsize = AtomicUsize::new(0);

/// A client connected to a cluster.
///
/// # Example
///
/// ```ignore
/// use memgrid_client::{ClientConfig, GridClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .cluster_name("dev")
///         .add_address("127.0.0.1:5701")
///         .build()?;
///
///     let client = GridClient::start(config).await?;
///     println!("connected to {} members", client.cluster().member_count());
///
///     client.shutdown();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct GridClient {
    name: String,
    cluster_name: String,
    lifecycle: Arc<LifecycleService>,
    cluster: Arc<ClusterService>,
    partitions: Arc<PartitionService>,
    invocations: Arc<InvocationService>,
    connection_manager: Arc<ConnectionManager>,
    _view_listener: Arc<ClusterViewListenerService>,
}

impl GridClient {
    /// Starts a client and connects it to the configured cluster.
    ///
    /// Unless async start is configured, this returns once the client is
    /// connected and has received the member list (or waited the
    /// invocation timeout for it).
    ///
    /// # Errors
    ///
    /// Returns the connect error if no member of the cluster could be
    /// joined, for example `Authentication` or `IllegalState`.
    pub async fn start(config: ClientConfig) -> Result<Self> {
        let failover = ClusterFailoverService::from_config(&config);
        Self::start_with(config, failover).await
    }

    /// Starts a client that may switch between the clusters of `config`.
    ///
    /// The first cluster configuration supplies every setting other than
    /// cluster name, addresses and credentials.
    ///
    /// # Errors
    ///
    /// Returns the connect error once every candidate cluster was tried
    /// `try_count` times in total.
    pub async fn start_with_failover(config: ClientFailoverConfig) -> Result<Self> {
        let failover = ClusterFailoverService::from_failover_config(&config);
        let primary = config
            .client_configs()
            .first()
            .cloned()
            .ok_or_else(|| {
                memgrid_core::GridError::Configuration(
                    "failover configuration has no client configuration".to_string(),
                )
            })?;
        Self::start_with(primary, failover).await
    }

    async fn start_with(config: ClientConfig, failover: ClusterFailoverService) -> Result<Self> {
        let name = config.instance_name().map(str::to_string).unwrap_or_else(|| {
            format!("memgrid_client_{}", CLIENT_ID.fetch_add(1, Ordering::Relaxed))
        });
        let client_info = ClientInfo::new(Uuid::new_v4(), name.clone(), config.labels().to_vec());

        let lifecycle = Arc::new(LifecycleService::new());
        let cluster = Arc::new(ClusterService::new(client_info));
        let partitions = Arc::new(PartitionService::new());
        let strategy = config.connection_strategy();
        let registry = Arc::new(ConnectionRegistry::new(
            load_balancer_for(config.load_balancer()),
            Arc::clone(&cluster),
            config.network().smart_routing(),
            strategy.async_start(),
            strategy.reconnect_mode(),
        ));
        let invocations = Arc::new(InvocationService::new(
            Arc::clone(&registry),
            Arc::clone(&partitions),
            Arc::clone(&lifecycle),
            config.properties(),
        ));
        let connection_manager = ConnectionManager::new(
            &config,
            failover,
            Arc::clone(&registry),
            Arc::clone(&invocations),
            Arc::clone(&cluster),
            Arc::clone(&partitions),
            Arc::clone(&lifecycle),
        )?;
        let view_listener = ClusterViewListenerService::new(
            Arc::clone(&registry),
            Arc::clone(&invocations),
            Arc::clone(&cluster),
            Arc::clone(&partitions),
        );
        registry.add_listener(Arc::clone(&view_listener) as Arc<dyn ConnectionListener>);

        tracing::info!(
            client = %name,
            cluster = config.cluster_name(),
            "starting client"
        );
        lifecycle.start();
        if let Err(e) = connection_manager.start().await {
            connection_manager.shutdown_client();
            return Err(e);
        }
        if !strategy.async_start() {
            cluster
                .wait_initial_member_list(config.properties().invocation_timeout())
                .await;
        }
        lifecycle.fire(LifecycleEvent::Started);

        Ok(Self {
            name,
            cluster_name: config.cluster_name().to_string(),
            lifecycle,
            cluster,
            partitions,
            invocations,
            connection_manager,
            _view_listener: view_listener,
        })
    }

    /// Returns the client instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the cluster the client was configured for.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the local client description sent during authentication.
    pub fn local_client(&self) -> &ClientInfo {
        self.cluster.local_client()
    }

    /// Returns the lifecycle service.
    pub fn lifecycle(&self) -> &Arc<LifecycleService> {
        &self.lifecycle
    }

    /// Returns the cluster membership view.
    pub fn cluster(&self) -> &Arc<ClusterService> {
        &self.cluster
    }

    /// Returns the partition table.
    pub fn partitions(&self) -> &Arc<PartitionService> {
        &self.partitions
    }

    /// Returns the invocation service used to send requests.
    pub fn invocation_service(&self) -> &Arc<InvocationService> {
        &self.invocations
    }

    /// Returns the connection manager.
    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connection_manager
    }

    /// Shuts the client down. Pending invocations fail with
    /// `ClientNotActive`. Calling it again does nothing.
    pub fn shutdown(&self) {
        tracing::info!(client = %self.name, "shutting down client");
        self.connection_manager.shutdown_client();
    }
}

impl Drop for GridClient {
    fn drop(&mut self) {
        self.connection_manager.shutdown_client();
    }
}
