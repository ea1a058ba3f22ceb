use std::sync::Arc;

use crate::upstream::host::Host;
use crate::upstream::host_set::HostSet;

use super::LoadBalancer;

/// pick the host with the most idle pooled connections, the cheapest host
/// to send a stream to right now; ties break on host index
pub struct MostIdleBalancer;

impl MostIdleBalancer {
    pub fn new() -> Self {
        MostIdleBalancer
    }
}

impl Default for MostIdleBalancer {
    fn default() -> Self {
        MostIdleBalancer::new()
    }
}

impl LoadBalancer for MostIdleBalancer {
    fn choose_host(&self, hosts: &HostSet) -> Option<Arc<Host>> {
        let mut best: Option<(usize, &Arc<Host>)> = None;
        for host in &hosts.healthy_hosts {
            let idle = host.idle_connections();
            let better = match best {
                None => true,
                Some((best_idle, _)) => idle > best_idle,
            };
            if better {
                best = Some((idle, host));
            }
        }
        best.map(|(_, host)| host.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::testing::make_hosts;

    #[test]
    fn prefers_most_idle() {
        let lb = MostIdleBalancer::new();
        let hosts = make_hosts(&["127.0.0.1:8001", "127.0.0.1:8002"]);
        hosts.hosts[1].inc_idle_connections();
        hosts.hosts[1].inc_idle_connections();
        hosts.hosts[0].inc_idle_connections();
        assert_eq!(
            lb.choose_host(&hosts).unwrap().address().to_string(),
            "127.0.0.1:8002"
        );
    }

    #[test]
    fn tie_breaks_on_index() {
        let lb = MostIdleBalancer::new();
        let hosts = make_hosts(&["127.0.0.1:8001", "127.0.0.1:8002"]);
        assert_eq!(
            lb.choose_host(&hosts).unwrap().address().to_string(),
            "127.0.0.1:8001"
        );
    }

    #[test]
    fn empty_set_yields_none() {
        let lb = MostIdleBalancer::new();
        assert!(lb.choose_host(&HostSet::default()).is_none());
    }
}
