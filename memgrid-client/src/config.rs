//! Client configuration types and builders.

use std::path::PathBuf;
use std::time::Duration;

use crate::connection::{Address, DEFAULT_PORT_TRY_COUNT, MAX_PORT_TRY_COUNT};

/// Default cluster name.
const DEFAULT_CLUSTER_NAME: &str = "dev";
/// Default connection timeout.
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Default heartbeat interval.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Default heartbeat timeout.
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default invocation timeout.
const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Default pause between invocation retries.
const DEFAULT_INVOCATION_RETRY_PAUSE: Duration = Duration::from_secs(1);
/// Default write coalescing threshold in bytes.
const DEFAULT_AUTOPIPELINING_THRESHOLD: usize = 8192;
/// Default initial cluster connect backoff.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Default maximum cluster connect backoff.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Default backoff multiplier.
const DEFAULT_RETRY_MULTIPLIER: f64 = 1.05;
/// Default failover try count.
const DEFAULT_FAILOVER_TRY_COUNT: u32 = 3;
/// Default cloud discovery endpoint.
const DEFAULT_CLOUD_URL_BASE: &str = "https://coordinator.memgrid.io";

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the validation message, which names the offending field.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for memgrid_core::GridError {
    fn from(err: ConfigError) -> Self {
        memgrid_core::GridError::Configuration(err.message)
    }
}

/// Credentials presented during authentication.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password.
    UsernamePassword {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// Opaque token bytes.
    Token(Vec<u8>),
    /// Custom credentials, already serialized.
    Custom(Vec<u8>),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::Custom(bytes) => write!(f, "Custom({} bytes)", bytes.len()),
        }
    }
}

/// How the client reacts when it loses every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectMode {
    /// Shut the client down.
    Off,
    /// Reconnect; invocations fail until the cluster is reachable again.
    #[default]
    On,
    /// Reconnect in the background; invocations fail fast with `ClientOffline`.
    Async,
}

/// Member selection strategy for operations without a routing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerKind {
    /// Cycle through members in order.
    #[default]
    RoundRobin,
    /// Pick a member uniformly at random.
    Random,
}

/// TLS configuration for secure connections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsConfig {
    enabled: bool,
    ca_cert_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    server_name: Option<String>,
}

impl TlsConfig {
    /// Returns whether TLS is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the path to the CA certificate file.
    pub fn ca_cert_path(&self) -> Option<&PathBuf> {
        self.ca_cert_path.as_ref()
    }

    /// Returns the path to the client certificate file.
    pub fn client_cert_path(&self) -> Option<&PathBuf> {
        self.client_cert_path.as_ref()
    }

    /// Returns the path to the client private key file.
    pub fn client_key_path(&self) -> Option<&PathBuf> {
        self.client_key_path.as_ref()
    }

    /// Server name used for certificate verification, when it differs from the host.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Returns true if client authentication is configured.
    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }
}

/// Builder for `TlsConfig`.
#[derive(Debug, Clone, Default)]
pub struct TlsConfigBuilder {
    enabled: Option<bool>,
    ca_cert_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    server_name: Option<String>,
}

impl TlsConfigBuilder {
    /// Creates a new TLS configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables TLS.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets the path to the CA certificate file for server verification.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Sets client certificate and key paths for mutual TLS.
    pub fn client_auth(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Overrides the server name checked against the member certificate.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Builds the TLS configuration, returning an error if validation fails.
    pub fn build(self) -> Result<TlsConfig, ConfigError> {
        let enabled = self.enabled.unwrap_or(false);

        if enabled && !cfg!(feature = "tls") {
            return Err(ConfigError::new(
                "network.tls.enabled requires the `tls` feature",
            ));
        }

        Ok(TlsConfig {
            enabled,
            ca_cert_path: self.ca_cert_path,
            client_cert_path: self.client_cert_path,
            client_key_path: self.client_key_path,
            server_name: self.server_name,
        })
    }
}

/// Network configuration for cluster connections.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    cluster_members: Vec<String>,
    smart_routing: bool,
    connection_timeout: Duration,
    port_try_count: u16,
    use_public_address: Option<bool>,
    cloud_discovery_token: Option<String>,
    cloud_url_base: String,
    tls: TlsConfig,
}

impl NetworkConfig {
    /// Returns the configured member address strings.
    pub fn cluster_members(&self) -> &[String] {
        &self.cluster_members
    }

    /// Returns `true` if the client connects to every member.
    pub fn smart_routing(&self) -> bool {
        self.smart_routing
    }

    /// Returns the connection timeout; zero means no timeout.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Number of ports tried for an address given without a port.
    pub fn port_try_count(&self) -> u16 {
        self.port_try_count
    }

    /// Explicit choice between member public and internal addresses.
    pub fn use_public_address(&self) -> Option<bool> {
        self.use_public_address
    }

    /// Cloud discovery token, when cloud discovery is used.
    pub fn cloud_discovery_token(&self) -> Option<&str> {
        self.cloud_discovery_token.as_deref()
    }

    /// Base URL of the cloud discovery service.
    pub fn cloud_url_base(&self) -> &str {
        &self.cloud_url_base
    }

    /// Returns the TLS configuration.
    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cluster_members: Vec::new(),
            smart_routing: true,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            port_try_count: DEFAULT_PORT_TRY_COUNT,
            use_public_address: None,
            cloud_discovery_token: None,
            cloud_url_base: DEFAULT_CLOUD_URL_BASE.to_string(),
            tls: TlsConfig::default(),
        }
    }
}

/// Builder for `NetworkConfig`.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfigBuilder {
    cluster_members: Vec<String>,
    smart_routing: Option<bool>,
    connection_timeout: Option<Duration>,
    port_try_count: Option<u16>,
    use_public_address: Option<bool>,
    cloud_discovery_token: Option<String>,
    cloud_url_base: Option<String>,
    tls: TlsConfigBuilder,
}

impl NetworkConfigBuilder {
    /// Creates a new network configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cluster member address (`host`, `host:port` or `[v6]:port`).
    pub fn add_address(mut self, address: impl Into<String>) -> Self {
        self.cluster_members.push(address.into());
        self
    }

    /// Sets the cluster member addresses, replacing any previously configured.
    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster_members = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables smart routing.
    pub fn smart_routing(mut self, enabled: bool) -> Self {
        self.smart_routing = Some(enabled);
        self
    }

    /// Sets the connection timeout duration.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets how many ports are tried for an address given without one.
    pub fn port_try_count(mut self, count: u16) -> Self {
        self.port_try_count = Some(count);
        self
    }

    /// Forces use of member public (`true`) or internal (`false`) addresses.
    pub fn use_public_address(mut self, enabled: bool) -> Self {
        self.use_public_address = Some(enabled);
        self
    }

    /// Enables cloud discovery with the given token.
    pub fn cloud_discovery_token(mut self, token: impl Into<String>) -> Self {
        self.cloud_discovery_token = Some(token.into());
        self
    }

    /// Overrides the cloud discovery base URL.
    pub fn cloud_url_base(mut self, url: impl Into<String>) -> Self {
        self.cloud_url_base = Some(url.into());
        self
    }

    /// Configures TLS settings using a builder function.
    pub fn tls<F>(mut self, f: F) -> Self
    where
        F: FnOnce(TlsConfigBuilder) -> TlsConfigBuilder,
    {
        self.tls = f(self.tls);
        self
    }

    /// Builds the network configuration.
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        for (index, member) in self.cluster_members.iter().enumerate() {
            Address::parse_host_port(member).map_err(|e| {
                ConfigError::new(format!("network.cluster_members[{}]: {}", index, e))
            })?;
        }

        let port_try_count = self.port_try_count.unwrap_or(DEFAULT_PORT_TRY_COUNT);
        if port_try_count == 0 {
            return Err(ConfigError::new("network.port_try_count must be at least 1"));
        }
        if port_try_count > MAX_PORT_TRY_COUNT {
            return Err(ConfigError::new(format!(
                "network.port_try_count must not exceed {}",
                MAX_PORT_TRY_COUNT
            )));
        }

        if let Some(token) = &self.cloud_discovery_token {
            if !cfg!(feature = "cloud") {
                return Err(ConfigError::new(
                    "network.cloud_discovery_token requires the `cloud` feature",
                ));
            }
            if token.is_empty() {
                return Err(ConfigError::new(
                    "network.cloud_discovery_token must not be empty",
                ));
            }
            if !self.cluster_members.is_empty() {
                return Err(ConfigError::new(
                    "network.cluster_members and network.cloud_discovery_token cannot both be set",
                ));
            }
        }

        Ok(NetworkConfig {
            cluster_members: self.cluster_members,
            smart_routing: self.smart_routing.unwrap_or(true),
            connection_timeout: self.connection_timeout.unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            port_try_count,
            use_public_address: self.use_public_address,
            cloud_discovery_token: self.cloud_discovery_token,
            cloud_url_base: self
                .cloud_url_base
                .unwrap_or_else(|| DEFAULT_CLOUD_URL_BASE.to_string()),
            tls: self.tls.build()?,
        })
    }
}

/// Backoff settings for cluster connect retries.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRetryConfig {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
    cluster_connect_timeout: Option<Duration>,
}

impl ConnectionRetryConfig {
    /// Returns the initial backoff duration.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the backoff multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter fraction in `[0, 1]`.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Total time allowed for connecting to one cluster; `None` is unbounded.
    pub fn cluster_connect_timeout(&self) -> Option<Duration> {
        self.cluster_connect_timeout
    }
}

impl Default for ConnectionRetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter: 0.0,
            cluster_connect_timeout: None,
        }
    }
}

/// Builder for `ConnectionRetryConfig`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRetryConfigBuilder {
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    cluster_connect_timeout: Option<Duration>,
}

impl ConnectionRetryConfigBuilder {
    /// Creates a new retry configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial backoff duration.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff duration.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter fraction applied to each backoff.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Bounds the total time spent connecting to one cluster.
    pub fn cluster_connect_timeout(mut self, timeout: Duration) -> Self {
        self.cluster_connect_timeout = Some(timeout);
        self
    }

    /// Builds the retry configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `initial_backoff` exceeds `max_backoff`
    /// - `multiplier` is not finite or is less than 1.0
    /// - `jitter` is outside `[0, 1]`
    pub fn build(self) -> Result<ConnectionRetryConfig, ConfigError> {
        let initial_backoff = self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF);
        let max_backoff = self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF);
        let multiplier = self.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER);
        let jitter = self.jitter.unwrap_or(0.0);

        if initial_backoff > max_backoff {
            return Err(ConfigError::new(
                "connection_strategy.retry.initial_backoff must not exceed max_backoff",
            ));
        }

        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::new(
                "connection_strategy.retry.multiplier must be a finite value of at least 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::new(
                "connection_strategy.retry.jitter must be between 0.0 and 1.0",
            ));
        }

        Ok(ConnectionRetryConfig {
            initial_backoff,
            max_backoff,
            multiplier,
            jitter,
            cluster_connect_timeout: self.cluster_connect_timeout,
        })
    }
}

/// How the client connects at startup and after losing the cluster.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionStrategyConfig {
    async_start: bool,
    reconnect_mode: ReconnectMode,
    retry: ConnectionRetryConfig,
}

impl ConnectionStrategyConfig {
    /// Returns `true` if startup returns before the cluster is reachable.
    pub fn async_start(&self) -> bool {
        self.async_start
    }

    /// Returns the reconnect mode.
    pub fn reconnect_mode(&self) -> ReconnectMode {
        self.reconnect_mode
    }

    /// Returns the retry configuration.
    pub fn retry(&self) -> &ConnectionRetryConfig {
        &self.retry
    }
}

/// Builder for `ConnectionStrategyConfig`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStrategyConfigBuilder {
    async_start: Option<bool>,
    reconnect_mode: Option<ReconnectMode>,
    retry: ConnectionRetryConfigBuilder,
}

impl ConnectionStrategyConfigBuilder {
    /// Creates a new connection strategy builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns from startup without waiting for a connection.
    pub fn async_start(mut self, enabled: bool) -> Self {
        self.async_start = Some(enabled);
        self
    }

    /// Sets the reconnect mode.
    pub fn reconnect_mode(mut self, mode: ReconnectMode) -> Self {
        self.reconnect_mode = Some(mode);
        self
    }

    /// Configures retry settings using a builder function.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ConnectionRetryConfigBuilder) -> ConnectionRetryConfigBuilder,
    {
        self.retry = f(self.retry);
        self
    }

    /// Builds the connection strategy configuration.
    pub fn build(self) -> Result<ConnectionStrategyConfig, ConfigError> {
        Ok(ConnectionStrategyConfig {
            async_start: self.async_start.unwrap_or(false),
            reconnect_mode: self.reconnect_mode.unwrap_or_default(),
            retry: self.retry.build()?,
        })
    }
}

/// Tunables for heartbeating, invocations and socket behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProperties {
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    invocation_timeout: Duration,
    invocation_retry_pause: Duration,
    redo_operation: bool,
    autopipelining_enabled: bool,
    autopipelining_threshold: usize,
    socket_no_delay: bool,
    shuffle_member_list: bool,
    max_concurrent_invocations: Option<usize>,
}

impl ClientProperties {
    /// Interval after which an idle connection is pinged.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Silence after which a connection is considered dead.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Deadline applied to invocations.
    pub fn invocation_timeout(&self) -> Duration {
        self.invocation_timeout
    }

    /// Pause before a retryable invocation is resent.
    pub fn invocation_retry_pause(&self) -> Duration {
        self.invocation_retry_pause
    }

    /// Whether any invocation may be resent after its connection closed.
    pub fn redo_operation(&self) -> bool {
        self.redo_operation
    }

    /// Whether outgoing messages are coalesced into larger writes.
    pub fn autopipelining_enabled(&self) -> bool {
        self.autopipelining_enabled
    }

    /// Upper bound in bytes for one coalesced write.
    pub fn autopipelining_threshold(&self) -> usize {
        self.autopipelining_threshold
    }

    /// Whether `TCP_NODELAY` is set on sockets.
    pub fn socket_no_delay(&self) -> bool {
        self.socket_no_delay
    }

    /// Whether member and address lists are shuffled before connecting.
    pub fn shuffle_member_list(&self) -> bool {
        self.shuffle_member_list
    }

    /// Bound on concurrent non-urgent invocations, if any.
    pub fn max_concurrent_invocations(&self) -> Option<usize> {
        self.max_concurrent_invocations
    }
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            invocation_retry_pause: DEFAULT_INVOCATION_RETRY_PAUSE,
            redo_operation: false,
            autopipelining_enabled: true,
            autopipelining_threshold: DEFAULT_AUTOPIPELINING_THRESHOLD,
            socket_no_delay: true,
            shuffle_member_list: true,
            max_concurrent_invocations: None,
        }
    }
}

/// Builder for `ClientProperties`.
#[derive(Debug, Clone, Default)]
pub struct ClientPropertiesBuilder {
    heartbeat_interval: Option<Duration>,
    heartbeat_timeout: Option<Duration>,
    invocation_timeout: Option<Duration>,
    invocation_retry_pause: Option<Duration>,
    redo_operation: Option<bool>,
    autopipelining_enabled: Option<bool>,
    autopipelining_threshold: Option<usize>,
    socket_no_delay: Option<bool>,
    shuffle_member_list: Option<bool>,
    max_concurrent_invocations: Option<usize>,
}

impl ClientPropertiesBuilder {
    /// Creates a new properties builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Sets the heartbeat timeout.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    /// Sets the invocation timeout.
    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }

    /// Sets the pause between invocation retries.
    pub fn invocation_retry_pause(mut self, pause: Duration) -> Self {
        self.invocation_retry_pause = Some(pause);
        self
    }

    /// Allows resending any invocation whose connection closed.
    pub fn redo_operation(mut self, enabled: bool) -> Self {
        self.redo_operation = Some(enabled);
        self
    }

    /// Enables or disables write coalescing.
    pub fn autopipelining_enabled(mut self, enabled: bool) -> Self {
        self.autopipelining_enabled = Some(enabled);
        self
    }

    /// Sets the write coalescing threshold in bytes.
    pub fn autopipelining_threshold(mut self, bytes: usize) -> Self {
        self.autopipelining_threshold = Some(bytes);
        self
    }

    /// Enables or disables `TCP_NODELAY`.
    pub fn socket_no_delay(mut self, enabled: bool) -> Self {
        self.socket_no_delay = Some(enabled);
        self
    }

    /// Enables or disables shuffling of member and address lists.
    pub fn shuffle_member_list(mut self, enabled: bool) -> Self {
        self.shuffle_member_list = Some(enabled);
        self
    }

    /// Bounds the number of concurrent non-urgent invocations.
    pub fn max_concurrent_invocations(mut self, max: usize) -> Self {
        self.max_concurrent_invocations = Some(max);
        self
    }

    /// Builds the properties, returning an error if validation fails.
    pub fn build(self) -> Result<ClientProperties, ConfigError> {
        let heartbeat_interval = self.heartbeat_interval.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        let heartbeat_timeout = self.heartbeat_timeout.unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT);
        let autopipelining_threshold = self
            .autopipelining_threshold
            .unwrap_or(DEFAULT_AUTOPIPELINING_THRESHOLD);

        if heartbeat_interval.is_zero() {
            return Err(ConfigError::new("properties.heartbeat_interval must be positive"));
        }
        if heartbeat_timeout.is_zero() {
            return Err(ConfigError::new("properties.heartbeat_timeout must be positive"));
        }
        if autopipelining_threshold == 0 {
            return Err(ConfigError::new(
                "properties.autopipelining_threshold must be positive",
            ));
        }
        if self.max_concurrent_invocations == Some(0) {
            return Err(ConfigError::new(
                "properties.max_concurrent_invocations must be at least 1",
            ));
        }

        Ok(ClientProperties {
            heartbeat_interval,
            heartbeat_timeout,
            invocation_timeout: self.invocation_timeout.unwrap_or(DEFAULT_INVOCATION_TIMEOUT),
            invocation_retry_pause: self
                .invocation_retry_pause
                .unwrap_or(DEFAULT_INVOCATION_RETRY_PAUSE),
            redo_operation: self.redo_operation.unwrap_or(false),
            autopipelining_enabled: self.autopipelining_enabled.unwrap_or(true),
            autopipelining_threshold,
            socket_no_delay: self.socket_no_delay.unwrap_or(true),
            shuffle_member_list: self.shuffle_member_list.unwrap_or(true),
            max_concurrent_invocations: self.max_concurrent_invocations,
        })
    }
}

/// Main client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    cluster_name: String,
    instance_name: Option<String>,
    labels: Vec<String>,
    credentials: Option<Credentials>,
    network: NetworkConfig,
    connection_strategy: ConnectionStrategyConfig,
    properties: ClientProperties,
    load_balancer: LoadBalancerKind,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the cluster name.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the configured client name, if any.
    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    /// Returns the labels sent during authentication.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the credentials, if any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Returns the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Returns the connection strategy.
    pub fn connection_strategy(&self) -> &ConnectionStrategyConfig {
        &self.connection_strategy
    }

    /// Returns the tunables.
    pub fn properties(&self) -> &ClientProperties {
        &self.properties
    }

    /// Returns the load balancer kind.
    pub fn load_balancer(&self) -> LoadBalancerKind {
        self.load_balancer
    }

    /// Returns the name of the first setting that differs in ways a failover
    /// alternative may not, or `None` when `other` is a valid alternative.
    fn failover_mismatch(&self, other: &ClientConfig) -> Option<&'static str> {
        if self.instance_name != other.instance_name {
            Some("instance_name")
        } else if self.labels != other.labels {
            Some("labels")
        } else if self.properties != other.properties {
            Some("properties")
        } else if self.connection_strategy != other.connection_strategy {
            Some("connection_strategy")
        } else if self.load_balancer != other.load_balancer {
            Some("load_balancer")
        } else if self.network.smart_routing != other.network.smart_routing {
            Some("network.smart_routing")
        } else if self.network.connection_timeout != other.network.connection_timeout {
            Some("network.connection_timeout")
        } else if self.network.tls != other.network.tls {
            Some("network.tls")
        } else {
            None
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            instance_name: None,
            labels: Vec::new(),
            credentials: None,
            network: NetworkConfig::default(),
            connection_strategy: ConnectionStrategyConfig::default(),
            properties: ClientProperties::default(),
            load_balancer: LoadBalancerKind::default(),
        }
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    cluster_name: Option<String>,
    instance_name: Option<String>,
    labels: Vec<String>,
    credentials: Option<Credentials>,
    network: NetworkConfigBuilder,
    connection_strategy: ConnectionStrategyConfigBuilder,
    properties: ClientPropertiesBuilder,
    load_balancer: Option<LoadBalancerKind>,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cluster name.
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    /// Sets the client name reported to the cluster.
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    /// Adds a label reported to the cluster.
    pub fn add_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Sets username/password credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::UsernamePassword {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Sets token credentials.
    pub fn token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.credentials = Some(Credentials::Token(token.into()));
        self
    }

    /// Sets pre-serialized custom credentials.
    pub fn custom_credentials(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.credentials = Some(Credentials::Custom(payload.into()));
        self
    }

    /// Configures network settings using a builder function.
    pub fn network<F>(mut self, f: F) -> Self
    where
        F: FnOnce(NetworkConfigBuilder) -> NetworkConfigBuilder,
    {
        self.network = f(self.network);
        self
    }

    /// Configures the connection strategy using a builder function.
    pub fn connection_strategy<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ConnectionStrategyConfigBuilder) -> ConnectionStrategyConfigBuilder,
    {
        self.connection_strategy = f(self.connection_strategy);
        self
    }

    /// Configures tunables using a builder function.
    pub fn properties<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ClientPropertiesBuilder) -> ClientPropertiesBuilder,
    {
        self.properties = f(self.properties);
        self
    }

    /// Adds a cluster member address.
    pub fn add_address(mut self, address: impl Into<String>) -> Self {
        self.network = self.network.add_address(address);
        self
    }

    /// Sets the load balancer.
    pub fn load_balancer(mut self, kind: LoadBalancerKind) -> Self {
        self.load_balancer = Some(kind);
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let cluster_name = self
            .cluster_name
            .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());

        if cluster_name.is_empty() {
            return Err(ConfigError::new("cluster_name must not be empty"));
        }

        if let Some(Credentials::UsernamePassword { username, .. }) = &self.credentials {
            if username.is_empty() {
                return Err(ConfigError::new("credentials.username must not be empty"));
            }
        }

        Ok(ClientConfig {
            cluster_name,
            instance_name: self.instance_name,
            labels: self.labels,
            credentials: self.credentials,
            network: self.network.build()?,
            connection_strategy: self.connection_strategy.build()?,
            properties: self.properties.build()?,
            load_balancer: self.load_balancer.unwrap_or_default(),
        })
    }
}

/// Ordered list of alternative clusters tried when the current one is lost.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFailoverConfig {
    client_configs: Vec<ClientConfig>,
    try_count: u32,
}

impl ClientFailoverConfig {
    /// Creates a new failover configuration builder.
    pub fn builder() -> ClientFailoverConfigBuilder {
        ClientFailoverConfigBuilder::new()
    }

    /// Returns the candidate cluster configurations in order.
    pub fn client_configs(&self) -> &[ClientConfig] {
        &self.client_configs
    }

    /// Maximum number of cluster switches tried before giving up.
    pub fn try_count(&self) -> u32 {
        self.try_count
    }
}

/// Builder for `ClientFailoverConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientFailoverConfigBuilder {
    client_configs: Vec<ClientConfig>,
    try_count: Option<u32>,
}

impl ClientFailoverConfigBuilder {
    /// Creates a new failover configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a candidate cluster configuration.
    pub fn add_client_config(mut self, config: ClientConfig) -> Self {
        self.client_configs.push(config);
        self
    }

    /// Sets the maximum number of cluster switches.
    pub fn try_count(mut self, count: u32) -> Self {
        self.try_count = Some(count);
        self
    }

    /// Builds the failover configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if no configuration was added, if `try_count`
    /// is zero, or if an alternative differs from the first configuration in
    /// anything other than cluster name, addresses and credentials.
    pub fn build(self) -> Result<ClientFailoverConfig, ConfigError> {
        let try_count = self.try_count.unwrap_or(DEFAULT_FAILOVER_TRY_COUNT);

        let Some(first) = self.client_configs.first() else {
            return Err(ConfigError::new(
                "client_configs must contain at least one client configuration",
            ));
        };

        if try_count == 0 {
            return Err(ConfigError::new("try_count must be at least 1"));
        }

        for (index, alternative) in self.client_configs.iter().enumerate().skip(1) {
            if let Some(field) = first.failover_mismatch(alternative) {
                return Err(ConfigError::new(format!(
                    "client_configs[{}].{} differs from client_configs[0]",
                    index, field
                )));
            }
        }

        Ok(ClientFailoverConfig {
            client_configs: self.client_configs,
            try_count,
        })
    }
}
