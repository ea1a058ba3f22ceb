pub mod cluster;
pub mod host;
pub mod host_set;
pub mod init;
pub mod manager;
pub mod resource;
pub mod thread_local;

pub use cluster::{Cluster, ClusterInfo, DiscoveryType, LbPolicy};
pub use host::Host;
pub use host_set::{HostSet, MainPrioritySet, PrioritySet};
pub use manager::ClusterManager;
