//! Async client core for memgrid clusters.
//!
//! This crate connects to a cluster over the binary client protocol defined
//! in [`memgrid_core`], keeps the connections alive and routes requests to
//! the right member. It is built on [Tokio](https://tokio.rs/).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use memgrid_client::{ClientConfig, GridClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .cluster_name("dev")
//!         .add_address("127.0.0.1:5701")
//!         .build()?;
//!     let client = GridClient::start(config).await?;
//!
//!     for member in client.cluster().members() {
//!         println!("{}", member);
//!     }
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # What the client does
//!
//! - Authenticates to a member, then (in smart routing mode) opens a
//!   connection to every member in the background.
//! - Keeps a member list and partition table pushed by the cluster.
//! - Sends heartbeats on idle connections and closes silent ones.
//! - Reconnects with exponential backoff when the last connection is lost,
//!   and switches to an alternative cluster when a failover configuration is
//!   given.
//! - Correlates responses to requests and retries retryable failures until
//!   the invocation timeout.
//!
//! # Configuration
//!
//! ```rust,no_run
//! use memgrid_client::{ClientConfig, ReconnectMode};
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .cluster_name("production")
//!     .add_address("10.0.0.1:5701")
//!     .credentials("admin", "secret")
//!     .network(|n| n.connection_timeout(Duration::from_secs(10)))
//!     .connection_strategy(|s| s
//!         .reconnect_mode(ReconnectMode::Async)
//!         .retry(|r| r
//!             .initial_backoff(Duration::from_millis(100))
//!             .max_backoff(Duration::from_secs(30))
//!             .multiplier(2.0)))
//!     .build()
//!     .expect("invalid config");
//! ```
//!
//! # Feature Flags
//!
//! | Flag | Purpose |
//! |------|---------|
//! | `tls` | TLS connections via `rustls` |
//! | `cloud` | Cloud discovery of member addresses over HTTPS |

#![warn(missing_docs)]

mod client;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod connection;
pub mod invocation;
pub mod listener;

pub use client::GridClient;
pub use cluster::{
    ClientInfo, ClusterService, LifecycleListenerRegistration, LifecycleService, Partition,
    PartitionService,
};
pub use config::{
    ClientConfig, ClientConfigBuilder, ClientFailoverConfig, ClientFailoverConfigBuilder,
    ClientProperties, ClientPropertiesBuilder, ConfigError, ConnectionRetryConfig,
    ConnectionRetryConfigBuilder, ConnectionStrategyConfig, ConnectionStrategyConfigBuilder,
    Credentials, LoadBalancerKind, NetworkConfig, NetworkConfigBuilder, ReconnectMode, TlsConfig,
    TlsConfigBuilder,
};
pub use connection::{Address, ClientState, Connection, ConnectionId, ConnectionManager};
pub use invocation::{Invocation, InvocationService, InvocationTarget};
pub use listener::{ConnectionListener, LifecycleEvent, Member, MemberEvent, MemberEventType};
pub use memgrid_core as core;
pub use memgrid_core::{GridError, Result};
