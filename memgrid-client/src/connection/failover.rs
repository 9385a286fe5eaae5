//! Candidate clusters and round-robin switching between them.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::address::Address;
use super::discovery::{AddressProvider, DefaultAddressProvider};
use super::public_address::PublicAddressTranslator;
use crate::config::{ClientConfig, ClientFailoverConfig, Credentials};

/// Everything needed to connect to one candidate cluster.
#[derive(Debug, Clone)]
pub struct CandidateClusterContext {
    cluster_name: String,
    provider: Arc<dyn AddressProvider>,
    credentials: Option<Credentials>,
    translator: Arc<PublicAddressTranslator>,
}

impl CandidateClusterContext {
    /// Creates a context from its parts.
    pub fn new(
        cluster_name: impl Into<String>,
        provider: Arc<dyn AddressProvider>,
        credentials: Option<Credentials>,
        translator: Arc<PublicAddressTranslator>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            provider,
            credentials,
            translator,
        }
    }

    /// Builds the context described by a client configuration.
    ///
    /// With a cloud discovery token the cloud provider is used and addresses
    /// are already public, so no public address detection is done.
    pub fn from_config(config: &ClientConfig) -> Self {
        let network = config.network();

        #[cfg(feature = "cloud")]
        if let Some(token) = network.cloud_discovery_token() {
            let provider = super::cloud::CloudAddressProvider::new(
                network.cloud_url_base(),
                token,
                network.connection_timeout(),
            );
            return Self::new(
                config.cluster_name(),
                Arc::new(provider),
                config.credentials().cloned(),
                Arc::new(PublicAddressTranslator::disabled()),
            );
        }

        let configured_hosts = network
            .cluster_members()
            .iter()
            .filter_map(|member| Address::parse_host_port(member).ok())
            .map(|(host, _)| host)
            .collect();

        Self::new(
            config.cluster_name(),
            Arc::new(DefaultAddressProvider::new(
                network.cluster_members().to_vec(),
                network.port_try_count(),
            )),
            config.credentials().cloned(),
            Arc::new(PublicAddressTranslator::new(
                network.use_public_address(),
                configured_hosts,
            )),
        )
    }

    /// Returns the cluster name sent during authentication.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the provider of candidate addresses.
    pub fn provider(&self) -> &Arc<dyn AddressProvider> {
        &self.provider
    }

    /// Returns the credentials sent during authentication.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Returns the member address translator.
    pub fn translator(&self) -> &Arc<PublicAddressTranslator> {
        &self.translator
    }
}

/// Holds the candidate clusters and which one is current.
///
/// `max_try_count` bounds the switches made by one `try_next_cluster` call,
/// counted across all candidates.
#[derive(Debug)]
pub struct ClusterFailoverService {
    contexts: Vec<CandidateClusterContext>,
    index: AtomicUsize,
    max_try_count: u32,
}

impl ClusterFailoverService {
    /// Creates the service. `contexts` must not be empty.
    pub fn new(contexts: Vec<CandidateClusterContext>, max_try_count: u32) -> Self {
        debug_assert!(!contexts.is_empty());
        Self {
            contexts,
            index: AtomicUsize::new(0),
            max_try_count,
        }
    }

    /// Single cluster, no switching.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(vec![CandidateClusterContext::from_config(config)], 0)
    }

    /// One context per configured alternative.
    pub fn from_failover_config(config: &ClientFailoverConfig) -> Self {
        Self::new(
            config
                .client_configs()
                .iter()
                .map(CandidateClusterContext::from_config)
                .collect(),
            config.try_count(),
        )
    }

    /// Returns the number of candidate clusters.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Returns `true` if there are no candidates.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Returns the maximum number of switches per `try_next_cluster` call.
    pub fn max_try_count(&self) -> u32 {
        self.max_try_count
    }

    /// Returns the current candidate.
    pub fn current(&self) -> CandidateClusterContext {
        let index = self.index.load(Ordering::Acquire) % self.contexts.len();
        self.contexts[index].clone()
    }

    fn advance(&self) -> CandidateClusterContext {
        let index = self.index.fetch_add(1, Ordering::AcqRel).wrapping_add(1) % self.contexts.len();
        self.contexts[index].clone()
    }

    /// Switches to the next candidate and runs `attempt` on it until an
    /// attempt succeeds, the client stops running, or `max_try_count`
    /// attempts were made. Returns whether an attempt succeeded.
    pub async fn try_next_cluster<R, F, Fut>(&self, is_running: R, mut attempt: F) -> bool
    where
        R: Fn() -> bool,
        F: FnMut(CandidateClusterContext) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut try_count = 0;
        while is_running() && try_count < self.max_try_count {
            let context = self.advance();
            tracing::info!(
                cluster = context.cluster_name(),
                attempt = try_count + 1,
                max = self.max_try_count,
                "trying alternative cluster"
            );
            if attempt(context).await {
                return true;
            }
            try_count += 1;
        }
        false
    }
}
