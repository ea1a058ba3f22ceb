pub mod first_available;
pub mod lowest_rtt;
pub mod most_idle;
pub mod random;
pub mod round_robin;

use std::sync::Arc;

use crate::upstream::cluster::LbPolicy;
use crate::upstream::host::Host;
use crate::upstream::host_set::HostSet;

pub use first_available::FirstAvailableBalancer;
pub use lowest_rtt::LowestRttBalancer;
pub use most_idle::MostIdleBalancer;
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

/// host selection over one priority's host set.
/// selection is synchronous in this scope, so there is no cancel handle to
/// return: a `None` simply means no usable host.
pub trait LoadBalancer: Send + Sync {
    fn choose_host(&self, hosts: &HostSet) -> Option<Arc<Host>>;
}

/// build a fresh balancer instance for one worker's cluster entry
pub fn build(policy: LbPolicy, seed: Option<u64>) -> Box<dyn LoadBalancer> {
    match policy {
        LbPolicy::RoundRobin => Box::new(RoundRobinBalancer::new()),
        LbPolicy::MostIdle => Box::new(MostIdleBalancer::new()),
        LbPolicy::LowestRtt => Box::new(LowestRttBalancer::new()),
        LbPolicy::FirstAvailable => Box::new(FirstAvailableBalancer::new()),
        LbPolicy::Random => Box::new(RandomBalancer::new(seed)),
    }
}
