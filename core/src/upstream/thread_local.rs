use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ahash::AHasher;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::balancer::{self, LoadBalancer};
use crate::network::Address;
use crate::pool::http::HttpConnPool;
use crate::pool::map::PriorityConnPoolMap;
use crate::pool::tcp::TcpConnPool;
use crate::pool::DrainBehavior;

use super::cluster::ClusterInfo;
use super::host::Host;
use super::host_set::PrioritySet;

/// http pools of one host, keyed by (priority, upstream-protocol hash)
pub type ConnPoolsContainer = PriorityConnPoolMap<u64, HttpConnPool>;

/// tcp pools of one host, keyed by priority alone
pub type TcpConnPoolsContainer = PriorityConnPoolMap<(), TcpConnPool>;

/// stable hash key for an upstream protocol name
pub fn protocol_hash(name: &str) -> u64 {
    let mut hasher = AHasher::default();
    name.hash(&mut hasher);
    hasher.finish()
}

/// pool key of the plain http/1.1 upstream protocol
pub static HTTP11_PROTOCOL_HASH: Lazy<u64> = Lazy::new(|| protocol_hash("http/1.1"));

/// one worker's view of one cluster: its own membership copy, its own
/// balancer instance and its own pool containers
pub struct ClusterEntry {
    info: Arc<ClusterInfo>,
    priority_set: PrioritySet,
    balancer: Box<dyn LoadBalancer>,
    http_pools: Mutex<HashMap<Address, Arc<ConnPoolsContainer>>>,
    tcp_pools: Mutex<HashMap<Address, Arc<TcpConnPoolsContainer>>>,
}

impl ClusterEntry {
    pub fn new(info: Arc<ClusterInfo>, priority_set: PrioritySet, lb_seed: Option<u64>) -> Self {
        let balancer = balancer::build(info.lb_policy(), lb_seed);
        ClusterEntry {
            info,
            priority_set,
            balancer,
            http_pools: Mutex::new(HashMap::new()),
            tcp_pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn info(&self) -> &Arc<ClusterInfo> {
        &self.info
    }

    pub fn priority_set(&self) -> &PrioritySet {
        &self.priority_set
    }

    /// run the balancer over the priority bands, 0 first
    pub fn choose_host(&self) -> Option<Arc<Host>> {
        for priority in 0..self.priority_set.num_priorities().max(1) {
            let set = self.priority_set.host_set(priority as u32);
            if let Some(host) = self.balancer.choose_host(&set) {
                return Some(host);
            }
        }
        None
    }

    /// this worker's http pool for the host, created on first use
    pub fn http_pool(&self, host: &Arc<Host>, protocol_hash: u64) -> Arc<HttpConnPool> {
        let container = self
            .http_pools
            .lock()
            .entry(host.address().clone())
            .or_insert_with(|| Arc::new(ConnPoolsContainer::new()))
            .clone();
        container.get_or_create(host.priority(), protocol_hash, || {
            HttpConnPool::new(host.clone(), host.priority())
        })
    }

    /// this worker's tcp pool for the host, created on first use
    pub fn tcp_pool(&self, host: &Arc<Host>) -> Arc<TcpConnPool> {
        let container = self
            .tcp_pools
            .lock()
            .entry(host.address().clone())
            .or_insert_with(|| Arc::new(TcpConnPoolsContainer::new()))
            .clone();
        container.get_or_create(host.priority(), (), || {
            TcpConnPool::new(host.clone(), host.priority())
        })
    }

    /// apply a membership delta and tear down pools of removed hosts
    pub fn update_hosts(&self, priority: u32, added: Vec<Arc<Host>>, removed: Vec<Arc<Host>>) {
        self.priority_set
            .update_hosts(priority, added, removed.clone());
        for host in removed {
            self.drain_host_pools(host.address(), DrainBehavior::DrainAndDelete);
        }
    }

    /// drain the pool containers of one host
    pub fn drain_host_pools(&self, address: &Address, behavior: DrainBehavior) {
        let http = self.http_pools.lock().get(address).cloned();
        if let Some(container) = http {
            container.drain_connections(behavior);
            container.remove_idle();
            if container.is_empty() && behavior == DrainBehavior::DrainAndDelete {
                self.http_pools.lock().remove(address);
            }
        }
        let tcp = self.tcp_pools.lock().get(address).cloned();
        if let Some(container) = tcp {
            container.drain_connections(behavior);
            container.remove_idle();
            if container.is_empty() && behavior == DrainBehavior::DrainAndDelete {
                self.tcp_pools.lock().remove(address);
            }
        }
    }

    /// drain every pool of every host matching the predicate
    pub fn drain_connections<F>(&self, behavior: DrainBehavior, predicate: F)
    where
        F: Fn(&Host) -> bool,
    {
        for host in self.priority_set.all_hosts() {
            if predicate(&host) {
                self.drain_host_pools(host.address(), behavior);
            }
        }
    }
}

/// the per-worker cluster table living in the manager's slot
pub struct ThreadLocalClusterManager {
    entries: Mutex<HashMap<String, Arc<ClusterEntry>>>,
}

impl ThreadLocalClusterManager {
    pub fn new() -> Self {
        ThreadLocalClusterManager {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClusterEntry>> {
        self.entries.lock().get(name).cloned()
    }

    pub fn insert(&self, name: String, entry: Arc<ClusterEntry>) {
        self.entries.lock().insert(name, entry);
    }

    /// drop the entry, draining everything it owns first
    pub fn remove(&self, name: &str) -> bool {
        let entry = self.entries.lock().remove(name);
        match entry {
            Some(entry) => {
                entry.drain_connections(DrainBehavior::DrainAndDelete, |_| true);
                true
            }
            None => false,
        }
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl Default for ThreadLocalClusterManager {
    fn default() -> Self {
        ThreadLocalClusterManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RawTransportSocketFactory;

    fn entry_with_hosts(addrs: &[&str]) -> ClusterEntry {
        let info = ClusterInfo::for_tests("c1");
        let set = PrioritySet::new();
        let hosts: Vec<Arc<Host>> = addrs
            .iter()
            .map(|a| {
                Host::new(
                    info.clone(),
                    Address::parse(a).unwrap(),
                    None,
                    HashMap::new(),
                    Arc::new(RawTransportSocketFactory),
                    0,
                )
            })
            .collect();
        set.update_hosts(0, hosts, Vec::new());
        ClusterEntry::new(info, set, Some(1))
    }

    #[test]
    fn choose_host_round_robins() {
        let entry = entry_with_hosts(&["127.0.0.1:9001", "127.0.0.1:9002"]);
        let a = entry.choose_host().unwrap().address().to_string();
        let b = entry.choose_host().unwrap().address().to_string();
        assert_ne!(a, b);
    }

    #[test]
    fn pools_are_created_once_per_host() {
        let entry = entry_with_hosts(&["127.0.0.1:9001"]);
        let host = entry.choose_host().unwrap();
        let p1 = entry.http_pool(&host, *HTTP11_PROTOCOL_HASH);
        let p2 = entry.http_pool(&host, *HTTP11_PROTOCOL_HASH);
        assert!(Arc::ptr_eq(&p1, &p2));
    }

    #[test]
    fn removing_a_cluster_drains_it() {
        let tlcm = ThreadLocalClusterManager::new();
        let entry = entry_with_hosts(&["127.0.0.1:9001"]);
        tlcm.insert("c1".to_string(), Arc::new(entry));
        assert!(tlcm.get("c1").is_some());
        assert!(tlcm.remove("c1"));
        assert!(tlcm.get("c1").is_none());
        assert!(!tlcm.remove("c1"));
    }
}
