use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::upstream::host::Host;
use crate::upstream::host_set::HostSet;

use super::lowest_rtt::LowestRttBalancer;
use super::LoadBalancer;

/// cycle through the host set with a per-cluster cursor.
/// with a single host there is nothing to rotate, so selection degrades to
/// the rtt-based pick, which also keeps the estimate warm.
pub struct RoundRobinBalancer {
    cursor: AtomicUsize,
    single_host_fallback: LowestRttBalancer,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        RoundRobinBalancer {
            cursor: AtomicUsize::new(0),
            single_host_fallback: LowestRttBalancer::new(),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        RoundRobinBalancer::new()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn choose_host(&self, hosts: &HostSet) -> Option<Arc<Host>> {
        let candidates = &hosts.healthy_hosts;
        match candidates.len() {
            0 => None,
            1 => self.single_host_fallback.choose_host(hosts),
            n => {
                let at = self.cursor.fetch_add(1, Ordering::Relaxed);
                Some(candidates[at % n].clone())
            }
        }
    }
}
