//! Connections to cluster members and everything that keeps them open.

mod address;
#[cfg(feature = "cloud")]
mod cloud;
pub(crate) mod connection;
mod discovery;
mod failover;
mod heartbeat;
mod load_balancer;
mod manager;
mod public_address;
mod registry;
#[cfg(feature = "tls")]
mod tls;
mod wait_strategy;
mod writer;

pub use address::{
    socket_addresses, Address, Addresses, DEFAULT_PORT, DEFAULT_PORT_TRY_COUNT, MAX_PORT_TRY_COUNT,
};
pub use connection::{
    CloseHandler, CloseReason, Connection, ConnectionId, ConnectionOptions, MessageHandler,
};
pub use discovery::{AddressProvider, DefaultAddressProvider, DEFAULT_ADDRESS};
pub use failover::{CandidateClusterContext, ClusterFailoverService};
pub use heartbeat::HeartbeatManager;
pub use load_balancer::{
    load_balancer_for, LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer,
};
pub use manager::ConnectionManager;
pub use public_address::{PublicAddressTranslator, ReachabilityProbe, TcpProbe};
pub use registry::{ClientState, ConnectionRegistry};
pub use wait_strategy::WaitStrategy;
pub use writer::PipelinedWriter;

#[cfg(feature = "cloud")]
pub use cloud::CloudAddressProvider;
#[cfg(feature = "tls")]
pub use tls::TlsConnector;
