//! Cluster membership, partition table and client lifecycle.

mod cluster_service;
mod lifecycle_service;
mod partition_service;
mod view_listener;

pub use cluster_service::{ClientInfo, ClusterService};
pub use lifecycle_service::{LifecycleListenerRegistration, LifecycleService};
pub use partition_service::{Partition, PartitionService};
pub use view_listener::ClusterViewListenerService;
