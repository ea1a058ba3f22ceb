use std::collections::HashSet;
use std::fs::File;

use serde::Deserialize;

use super::cluster::ClusterConfig;
use super::route::RouteTableConfig;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// process-wide knobs
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    pub request_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

fn default_threads() -> usize {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            threads: default_threads(),
            request_timeout_ms: None,
            idle_timeout_ms: None,
        }
    }
}

/// one listening address
#[derive(Debug, Deserialize)]
pub struct ListenerConfig {
    pub address: String,
}

/// the whole configuration file
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub listeners: Vec<ListenerConfig>,
    pub clusters: Vec<ClusterConfig>,
    pub route_config: RouteTableConfig,
}

/// load and validate the file; configuration mistakes are fatal at startup
pub fn load_config(path: Option<&str>) -> Config {
    let path = path
        .map(str::to_string)
        .or_else(|| std::env::var("HALBERD_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let file = File::open(&path).unwrap_or_else(|e| panic!("cannot open {}: {}", path, e));
    let config: Config =
        serde_yaml::from_reader(file).unwrap_or_else(|e| panic!("cannot parse {}: {}", path, e));
    validate_config(&config);
    config
}

pub fn validate_config(config: &Config) {
    if config.listeners.is_empty() {
        panic!("no listeners configured");
    }
    let mut cluster_names = HashSet::new();
    for cluster in &config.clusters {
        super::cluster::validate_cluster_config(cluster);
        if !cluster_names.insert(cluster.name.clone()) {
            panic!("duplicate cluster name {}", cluster.name);
        }
    }
    super::route::validate_route_config(&config.route_config, &cluster_names);
}
