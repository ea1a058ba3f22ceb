use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::network::Address;
use crate::stream::TransportSocketFactory;

use super::cluster::ClusterInfo;

// smoothing factor for the rtt estimate, matching the balancer's horizon
const RTT_EWMA_ALPHA: f64 = 0.3;

/// one upstream endpoint. shared by every worker; only the atomics move
/// after construction.
pub struct Host {
    cluster: Arc<ClusterInfo>,
    address: Address,
    hostname: Option<String>,
    metadata: HashMap<String, String>,
    transport: Arc<dyn TransportSocketFactory>,
    priority: AtomicU32,
    active_connections: AtomicUsize,
    idle_connections: AtomicUsize,
    // f64 bits; u64::MAX marks "never measured"
    rtt_ewma_ns: AtomicU64,
    created_at: Instant,
}

impl Host {
    pub fn new(
        cluster: Arc<ClusterInfo>,
        address: Address,
        hostname: Option<String>,
        metadata: HashMap<String, String>,
        transport: Arc<dyn TransportSocketFactory>,
        priority: u32,
    ) -> Arc<Host> {
        Arc::new(Host {
            cluster,
            address,
            hostname,
            metadata,
            transport,
            priority: AtomicU32::new(priority),
            active_connections: AtomicUsize::new(0),
            idle_connections: AtomicUsize::new(0),
            rtt_ewma_ns: AtomicU64::new(u64::MAX),
            created_at: Instant::now(),
        })
    }

    pub fn cluster_info(&self) -> &Arc<ClusterInfo> {
        &self.cluster
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn transport_socket_factory(&self) -> &Arc<dyn TransportSocketFactory> {
        &self.transport
    }

    pub fn priority(&self) -> u32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: u32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn inc_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// idle connections parked in this host's pools, across protocols
    pub fn idle_connections(&self) -> usize {
        self.idle_connections.load(Ordering::Relaxed)
    }

    pub fn inc_idle_connections(&self) {
        self.idle_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_idle_connections(&self) {
        self.idle_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// fold one observed connect+first-byte latency into the estimate
    pub fn record_rtt(&self, sample: Duration) {
        let sample_ns = sample.as_nanos() as f64;
        let prev_bits = self.rtt_ewma_ns.load(Ordering::Relaxed);
        let next = if prev_bits == u64::MAX {
            sample_ns
        } else {
            RTT_EWMA_ALPHA * sample_ns + (1.0 - RTT_EWMA_ALPHA) * f64::from_bits(prev_bits)
        };
        self.rtt_ewma_ns.store(next.to_bits(), Ordering::Relaxed);
    }

    /// smoothed rtt in nanoseconds, `None` until the first measurement
    pub fn rtt_estimate_ns(&self) -> Option<f64> {
        let bits = self.rtt_ewma_ns.load(Ordering::Relaxed);
        if bits == u64::MAX {
            None
        } else {
            Some(f64::from_bits(bits))
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("cluster", &self.cluster.name())
            .field("address", &self.address)
            .field("priority", &self.priority())
            .field("active", &self.active_connections())
            .field("idle", &self.idle_connections())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RawTransportSocketFactory;
    use crate::upstream::cluster::ClusterInfo;

    fn test_host() -> Arc<Host> {
        let info = ClusterInfo::for_tests("c1");
        Host::new(
            info,
            Address::parse("127.0.0.1:80").unwrap(),
            None,
            HashMap::new(),
            Arc::new(RawTransportSocketFactory),
            0,
        )
    }

    #[test]
    fn rtt_estimate_starts_unmeasured() {
        let host = test_host();
        assert!(host.rtt_estimate_ns().is_none());
        host.record_rtt(Duration::from_millis(10));
        let first = host.rtt_estimate_ns().unwrap();
        assert!((first - 10_000_000.0).abs() < 1.0);
        host.record_rtt(Duration::from_millis(20));
        let second = host.rtt_estimate_ns().unwrap();
        assert!(second > first);
        assert!(second < 20_000_000.0);
    }

    #[test]
    fn connection_counters_move_independently() {
        let host = test_host();
        host.inc_active_connections();
        host.inc_idle_connections();
        assert_eq!(host.active_connections(), 1);
        assert_eq!(host.idle_connections(), 1);
        host.dec_active_connections();
        assert_eq!(host.active_connections(), 0);
        assert_eq!(host.idle_connections(), 1);
    }
}
