use std::sync::Arc;

use crate::upstream::host::Host;
use crate::upstream::host_set::HostSet;

use super::LoadBalancer;

/// pick the host with the smallest smoothed rtt.
/// hosts that were never measured rank as infinitely slow, so fresh hosts
/// only win when nothing has a measurement; ties break on host index.
pub struct LowestRttBalancer;

impl LowestRttBalancer {
    pub fn new() -> Self {
        LowestRttBalancer
    }
}

impl Default for LowestRttBalancer {
    fn default() -> Self {
        LowestRttBalancer::new()
    }
}

impl LoadBalancer for LowestRttBalancer {
    fn choose_host(&self, hosts: &HostSet) -> Option<Arc<Host>> {
        let mut best: Option<(f64, &Arc<Host>)> = None;
        for host in &hosts.healthy_hosts {
            let rtt = host.rtt_estimate_ns().unwrap_or(f64::INFINITY);
            let better = match best {
                None => true,
                Some((best_rtt, _)) => rtt < best_rtt,
            };
            if better {
                best = Some((rtt, host));
            }
        }
        best.map(|(_, host)| host.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::testing::make_hosts;
    use std::time::Duration;

    #[test]
    fn prefers_the_measured_fastest() {
        let lb = LowestRttBalancer::new();
        let hosts = make_hosts(&["127.0.0.1:8001", "127.0.0.1:8002", "127.0.0.1:8003"]);
        hosts.hosts[0].record_rtt(Duration::from_millis(30));
        hosts.hosts[1].record_rtt(Duration::from_millis(5));
        hosts.hosts[2].record_rtt(Duration::from_millis(40));
        assert_eq!(
            lb.choose_host(&hosts).unwrap().address().to_string(),
            "127.0.0.1:8002"
        );
    }

    #[test]
    fn unmeasured_hosts_rank_last() {
        let lb = LowestRttBalancer::new();
        let hosts = make_hosts(&["127.0.0.1:8001", "127.0.0.1:8002"]);
        hosts.hosts[1].record_rtt(Duration::from_millis(500));
        assert_eq!(
            lb.choose_host(&hosts).unwrap().address().to_string(),
            "127.0.0.1:8002"
        );
    }

    #[test]
    fn all_unmeasured_breaks_tie_on_index() {
        let lb = LowestRttBalancer::new();
        let hosts = make_hosts(&["127.0.0.1:8001", "127.0.0.1:8002"]);
        assert_eq!(
            lb.choose_host(&hosts).unwrap().address().to_string(),
            "127.0.0.1:8001"
        );
    }

    #[test]
    fn empty_set_yields_none() {
        let lb = LowestRttBalancer::new();
        assert!(lb.choose_host(&HostSet::default()).is_none());
    }
}
