use std::sync::Arc;

use crate::upstream::host::Host;
use crate::upstream::host_set::HostSet;

use super::LoadBalancer;

/// pick the first host that has an idle connection parked in its pool,
/// falling back to the first host when nobody has one
pub struct FirstAvailableBalancer;

impl FirstAvailableBalancer {
    pub fn new() -> Self {
        FirstAvailableBalancer
    }
}

impl Default for FirstAvailableBalancer {
    fn default() -> Self {
        FirstAvailableBalancer::new()
    }
}

impl LoadBalancer for FirstAvailableBalancer {
    fn choose_host(&self, hosts: &HostSet) -> Option<Arc<Host>> {
        for host in &hosts.healthy_hosts {
            if host.idle_connections() > 0 {
                return Some(host.clone());
            }
        }
        hosts.healthy_hosts.first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::testing::make_hosts;

    #[test]
    fn prefers_a_host_with_idle_capacity() {
        let lb = FirstAvailableBalancer::new();
        let hosts = make_hosts(&["127.0.0.1:8001", "127.0.0.1:8002"]);
        hosts.hosts[1].inc_idle_connections();
        assert_eq!(
            lb.choose_host(&hosts).unwrap().address().to_string(),
            "127.0.0.1:8002"
        );
    }

    #[test]
    fn falls_back_to_first_host() {
        let lb = FirstAvailableBalancer::new();
        let hosts = make_hosts(&["127.0.0.1:8001", "127.0.0.1:8002"]);
        assert_eq!(
            lb.choose_host(&hosts).unwrap().address().to_string(),
            "127.0.0.1:8001"
        );
    }

    #[test]
    fn empty_set_yields_none() {
        let lb = FirstAvailableBalancer::new();
        assert!(lb.choose_host(&HostSet::default()).is_none());
    }
}
