use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::host::Host;
use super::host_set::MainPrioritySet;
use super::resource::{ResourceLimits, ResourceManager};

/// how a cluster learns its endpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryType {
    Static,
    StrictDns,
    LocalDns,
    Eds,
    OriginalDst,
}

/// host selection strategy of a cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LbPolicy {
    RoundRobin,
    MostIdle,
    LowestRtt,
    FirstAvailable,
    Random,
}

/// http options applied to upstream connections of a cluster
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpProtocolOptions {
    /// recycle a pooled connection after this many exchanges
    pub max_requests_per_connection: Option<usize>,
}

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_BUFFER_LIMIT: usize = 1024 * 1024;

/// immutable per-cluster configuration view, shared everywhere by `Arc`
#[derive(Debug)]
pub struct ClusterInfo {
    name: String,
    discovery: DiscoveryType,
    lb_policy: LbPolicy,
    connect_timeout: Duration,
    per_connection_buffer_limit: usize,
    resource_manager: ResourceManager,
    protocol_options: HttpProtocolOptions,
}

impl ClusterInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        discovery: DiscoveryType,
        lb_policy: LbPolicy,
        connect_timeout: Duration,
        per_connection_buffer_limit: usize,
        limits: &[ResourceLimits],
        protocol_options: HttpProtocolOptions,
    ) -> Arc<ClusterInfo> {
        Arc::new(ClusterInfo {
            name,
            discovery,
            lb_policy,
            connect_timeout,
            per_connection_buffer_limit,
            resource_manager: ResourceManager::new(limits),
            protocol_options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn discovery_type(&self) -> DiscoveryType {
        self.discovery
    }

    pub fn lb_policy(&self) -> LbPolicy {
        self.lb_policy
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn per_connection_buffer_limit(&self) -> usize {
        self.per_connection_buffer_limit
    }

    pub fn resource_manager(&self) -> &ResourceManager {
        &self.resource_manager
    }

    pub fn protocol_options(&self) -> &HttpProtocolOptions {
        &self.protocol_options
    }

    #[cfg(test)]
    pub fn for_tests(name: &str) -> Arc<ClusterInfo> {
        ClusterInfo::new(
            name.to_string(),
            DiscoveryType::Static,
            LbPolicy::RoundRobin,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_BUFFER_LIMIT,
            &[],
            HttpProtocolOptions::default(),
        )
    }

    #[cfg(test)]
    pub fn for_tests_with_limits(name: &str, limits: ResourceLimits) -> Arc<ClusterInfo> {
        ClusterInfo::new(
            name.to_string(),
            DiscoveryType::Static,
            LbPolicy::RoundRobin,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_BUFFER_LIMIT,
            &[limits],
            HttpProtocolOptions::default(),
        )
    }
}

/// lifecycle of a cluster from construction to serving
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Primary,
    Secondary,
    Ready,
}

/// which wave of manager initialization a cluster belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitializePhase {
    Primary,
    Secondary,
}

/// config view plus live membership plus the init state machine
pub struct Cluster {
    info: Arc<ClusterInfo>,
    priority_set: Arc<MainPrioritySet>,
    init_state: Mutex<InitState>,
}

impl Cluster {
    pub fn new(info: Arc<ClusterInfo>) -> Arc<Cluster> {
        Arc::new(Cluster {
            info,
            priority_set: Arc::new(MainPrioritySet::new()),
            init_state: Mutex::new(InitState::Uninitialized),
        })
    }

    pub fn info(&self) -> &Arc<ClusterInfo> {
        &self.info
    }

    pub fn priority_set(&self) -> &Arc<MainPrioritySet> {
        &self.priority_set
    }

    pub fn init_state(&self) -> InitState {
        *self.init_state.lock()
    }

    /// eds-fed clusters wait for the secondary wave, everything that can
    /// resolve on its own initializes in the primary wave
    pub fn initialize_phase(&self) -> InitializePhase {
        match self.info.discovery_type() {
            DiscoveryType::Eds => InitializePhase::Secondary,
            _ => InitializePhase::Primary,
        }
    }

    /// install the initial membership for one priority
    pub fn load_hosts(&self, priority: u32, hosts: Vec<Arc<Host>>) {
        self.priority_set.update_hosts(priority, hosts, Vec::new());
    }

    /// drive the state machine to ready. every discovery type in scope
    /// resolves its membership synchronously, so the intermediate states
    /// collapse into a single transition and the callback fires inline.
    pub fn initialize<F>(&self, on_initialized: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.init_state.lock();
            if *state != InitState::Uninitialized {
                tracing::debug!("cluster {} initialized more than once", self.info.name());
            }
            *state = InitState::Ready;
        }
        on_initialized();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn static_cluster_initializes_synchronously() {
        let cluster = Cluster::new(ClusterInfo::for_tests("c1"));
        assert_eq!(cluster.init_state(), InitState::Uninitialized);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        cluster.initialize(move || flag.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(cluster.init_state(), InitState::Ready);
    }

    #[test]
    fn phase_follows_discovery_type() {
        let cluster = Cluster::new(ClusterInfo::for_tests("c1"));
        assert_eq!(cluster.initialize_phase(), InitializePhase::Primary);
    }
}
