use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::network::Address;
use crate::stream::{RawTransportSocketFactory, TransportSocketFactory};
use crate::upstream::cluster::{
    Cluster, ClusterInfo, DiscoveryType, HttpProtocolOptions, LbPolicy,
};
use crate::upstream::host::Host;
use crate::upstream::resource::ResourceLimits;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_BUFFER_LIMIT: usize = 1024 * 1024;

/// one upstream endpoint as written in the config file
#[derive(Debug, Deserialize)]
pub struct HostConfig {
    pub address: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> u32 {
    1
}

/// hosts sharing one locality priority
#[derive(Debug, Deserialize)]
pub struct EndpointGroupConfig {
    #[serde(default)]
    pub locality_priority: u32,
    pub hosts: Vec<HostConfig>,
}

/// resource caps for one priority band
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ResourceLimitsConfig {
    pub max_connections: Option<usize>,
    pub max_pending_requests: Option<usize>,
    pub max_requests: Option<usize>,
    pub max_retries: Option<usize>,
    pub max_connections_per_host: Option<usize>,
}

impl ResourceLimitsConfig {
    fn build(&self) -> ResourceLimits {
        let defaults = ResourceLimits::default();
        ResourceLimits {
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
            max_pending_requests: self
                .max_pending_requests
                .unwrap_or(defaults.max_pending_requests),
            max_requests: self.max_requests.unwrap_or(defaults.max_requests),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            max_connections_per_host: self
                .max_connections_per_host
                .unwrap_or(defaults.max_connections_per_host),
        }
    }
}

/// one cluster as written in the config file
#[derive(Debug, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub discovery_type: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    pub per_connection_buffer_limit: Option<usize>,
    #[serde(default = "default_lb_policy")]
    pub lb_policy: String,
    #[serde(default = "default_dns_family")]
    pub dns_lookup_family: String,
    pub max_requests_per_connection: Option<usize>,
    #[serde(default)]
    pub resource_limits: Vec<ResourceLimitsConfig>,
    pub endpoints: Vec<EndpointGroupConfig>,
}

fn default_type() -> String {
    "static".to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_lb_policy() -> String {
    "round_robin".to_string()
}

fn default_dns_family() -> String {
    "auto".to_string()
}

/// startup validation; an invalid cluster definition is fatal
pub fn validate_cluster_config(config: &ClusterConfig) {
    if config.name.is_empty() {
        panic!("cluster without a name");
    }
    parse_discovery_type(&config.discovery_type)
        .unwrap_or_else(|| panic!("cluster {}: unknown type {:?}", config.name, config.discovery_type));
    parse_lb_policy(&config.lb_policy)
        .unwrap_or_else(|| panic!("cluster {}: unknown lb_policy {:?}", config.name, config.lb_policy));
    if !matches!(
        config.dns_lookup_family.as_str(),
        "auto" | "v4_only" | "v6_only" | "v4_preferred"
    ) {
        panic!(
            "cluster {}: unknown dns_lookup_family {:?}",
            config.name, config.dns_lookup_family
        );
    }
    if config.endpoints.is_empty() {
        panic!("cluster {} has no endpoints", config.name);
    }
    for group in &config.endpoints {
        if group.hosts.is_empty() {
            panic!("cluster {} has an empty endpoint group", config.name);
        }
        for host in &group.hosts {
            if host.address.is_empty() {
                panic!("cluster {} has a host without an address", config.name);
            }
        }
    }
}

fn parse_discovery_type(raw: &str) -> Option<DiscoveryType> {
    Some(match raw {
        "static" => DiscoveryType::Static,
        "strict_dns" => DiscoveryType::StrictDns,
        "local_dns" => DiscoveryType::LocalDns,
        "eds" => DiscoveryType::Eds,
        "original_dst" => DiscoveryType::OriginalDst,
        _ => return None,
    })
}

fn parse_lb_policy(raw: &str) -> Option<LbPolicy> {
    Some(match raw {
        "round_robin" => LbPolicy::RoundRobin,
        "least_request" => LbPolicy::MostIdle,
        "lowest_rtt" => LbPolicy::LowestRtt,
        "first_available" => LbPolicy::FirstAvailable,
        "random" => LbPolicy::Random,
        // original_dst clusters pick whatever connection exists already
        "original_dst" => LbPolicy::FirstAvailable,
        _ => return None,
    })
}

/// resolve one configured host address honoring the dns family preference
fn resolve_host_address(raw: &str, port: u16, family: &str) -> Address {
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Address::from_ip_port(ip, port);
    }
    let candidates: Vec<_> = (raw, port)
        .to_socket_addrs()
        .unwrap_or_else(|e| panic!("cannot resolve {}:{}: {}", raw, port, e))
        .collect();
    let picked = match family {
        "v4_only" => candidates.iter().find(|a| a.is_ipv4()),
        "v6_only" => candidates.iter().find(|a| a.is_ipv6()),
        "v4_preferred" => candidates
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| candidates.first()),
        _ => candidates.first(),
    };
    match picked {
        Some(addr) => Address::from(*addr),
        None => panic!("{}:{} resolved to no usable address", raw, port),
    }
}

/// turn a validated cluster config into a loaded cluster with its hosts
pub fn build_cluster(config: &ClusterConfig) -> Arc<Cluster> {
    validate_cluster_config(config);
    let limits: Vec<ResourceLimits> = config.resource_limits.iter().map(|l| l.build()).collect();
    let info = ClusterInfo::new(
        config.name.clone(),
        parse_discovery_type(&config.discovery_type).unwrap_or(DiscoveryType::Static),
        parse_lb_policy(&config.lb_policy).unwrap_or(LbPolicy::RoundRobin),
        Duration::from_millis(config.connect_timeout_ms),
        config
            .per_connection_buffer_limit
            .unwrap_or(DEFAULT_BUFFER_LIMIT),
        &limits,
        HttpProtocolOptions {
            max_requests_per_connection: config.max_requests_per_connection,
        },
    );
    let cluster = Cluster::new(info.clone());
    let transport: Arc<dyn TransportSocketFactory> = Arc::new(RawTransportSocketFactory);
    for group in &config.endpoints {
        let hosts: Vec<Arc<Host>> = group
            .hosts
            .iter()
            .map(|h| {
                let address =
                    resolve_host_address(&h.address, h.port, &config.dns_lookup_family);
                Host::new(
                    info.clone(),
                    address,
                    Some(h.address.clone()),
                    h.metadata.clone(),
                    transport.clone(),
                    group.locality_priority,
                )
            })
            .collect();
        cluster.load_hosts(group.locality_priority, hosts);
    }
    cluster
}
