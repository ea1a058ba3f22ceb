use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::router::config::{DirectResponse, PathMatch, Route, RouteConfig, VirtualHost};

/// one routing rule as written in the config file
#[derive(Debug, Deserialize)]
pub struct RouteRuleConfig {
    pub name: String,
    pub prefix: Option<String>,
    pub path: Option<String>,
    pub cluster: Option<String>,
    #[serde(default)]
    pub passthrough: bool,
    #[serde(default)]
    pub rewrite_urls: Vec<String>,
    pub direct_response_status: Option<u16>,
    pub direct_response_body: Option<String>,
}

/// one virtual host as written in the config file
#[derive(Debug, Deserialize)]
pub struct VirtualHostConfig {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<RouteRuleConfig>,
}

/// the whole routing table as written in the config file
#[derive(Debug, Deserialize)]
pub struct RouteTableConfig {
    #[serde(default = "default_route_name")]
    pub name: String,
    #[serde(default)]
    pub ignore_port_in_host_matching: bool,
    #[serde(default)]
    pub ignore_path_parameters_in_path_matching: bool,
    pub virtual_hosts: Vec<VirtualHostConfig>,
}

fn default_route_name() -> String {
    "default".to_string()
}

/// startup validation; an invalid routing table is fatal
pub fn validate_route_config(config: &RouteTableConfig, cluster_names: &HashSet<String>) {
    if config.virtual_hosts.is_empty() {
        panic!("route config {} has no virtual hosts", config.name);
    }
    for vh in &config.virtual_hosts {
        if vh.domains.is_empty() {
            panic!("virtual host {} has no domains", vh.name);
        }
        if vh.routes.is_empty() {
            panic!("virtual host {} has no routes", vh.name);
        }
        for rule in &vh.routes {
            let has_direct = rule.direct_response_status.is_some();
            match (&rule.cluster, has_direct) {
                (None, false) => panic!(
                    "route {} in {} names neither a cluster nor a direct response",
                    rule.name, vh.name
                ),
                (Some(cluster), false) if !cluster_names.contains(cluster) => {
                    panic!("route {} references unknown cluster {}", rule.name, cluster)
                }
                _ => {}
            }
            match (&rule.prefix, &rule.path) {
                (None, None) => panic!("route {} has neither prefix nor path", rule.name),
                (Some(prefix), _) if !prefix.starts_with('/') => {
                    panic!("route {} prefix must start with /", rule.name)
                }
                _ => {}
            }
        }
    }
}

/// turn a validated table into the immutable routing structures
pub fn build_route_config(config: &RouteTableConfig) -> Arc<RouteConfig> {
    let mut virtual_hosts = Vec::with_capacity(config.virtual_hosts.len());
    for vh in &config.virtual_hosts {
        let routes: Vec<Arc<Route>> = vh
            .routes
            .iter()
            .map(|rule| {
                let path_match = match (&rule.path, &rule.prefix) {
                    (Some(path), _) => PathMatch::Exact(path.clone()),
                    (None, Some(prefix)) => PathMatch::Prefix(prefix.clone()),
                    (None, None) => PathMatch::Prefix("/".to_string()),
                };
                let mut route = Route::new(
                    &rule.name,
                    rule.cluster.as_deref().unwrap_or(""),
                    path_match,
                );
                route.passthrough = rule.passthrough;
                route.rewrite_urls = rule.rewrite_urls.clone();
                if let Some(status) = rule.direct_response_status {
                    route.direct_response = Some(DirectResponse {
                        status,
                        body: rule.direct_response_body.clone().unwrap_or_default(),
                    });
                }
                Arc::new(route)
            })
            .collect();
        virtual_hosts.push(VirtualHost::new(&vh.name, vh.domains.clone(), routes));
    }
    Arc::new(RouteConfig {
        name: config.name.clone(),
        virtual_hosts,
        ignore_port_in_host_matching: config.ignore_port_in_host_matching,
        ignore_path_parameters_in_path_matching: config.ignore_path_parameters_in_path_matching,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn table_round_trips_to_router_structures() {
        let config: RouteTableConfig = serde_yaml::from_str(
            r#"
virtual_hosts:
  - name: api
    domains: ["api.example.com", "*.example.com"]
    routes:
      - name: v1
        prefix: /v1
        cluster: api-v1
      - name: fallback
        prefix: /
        cluster: api-v1
        passthrough: true
"#,
        )
        .unwrap();
        validate_route_config(&config, &names(&["api-v1"]));
        let built = build_route_config(&config);
        assert_eq!(built.virtual_hosts.len(), 1);
        let vh = &built.virtual_hosts[0];
        assert_eq!(vh.domains.len(), 2);
        assert_eq!(vh.routes.len(), 2);
        assert!(vh.routes[1].passthrough);
    }

    #[test]
    #[should_panic(expected = "unknown cluster")]
    fn unknown_cluster_is_fatal() {
        let config: RouteTableConfig = serde_yaml::from_str(
            r#"
virtual_hosts:
  - name: api
    domains: ["*"]
    routes:
      - name: v1
        prefix: /
        cluster: nope
"#,
        )
        .unwrap();
        validate_route_config(&config, &names(&["api-v1"]));
    }

    #[test]
    fn direct_response_routes_need_no_cluster() {
        let config: RouteTableConfig = serde_yaml::from_str(
            r#"
virtual_hosts:
  - name: api
    domains: ["*"]
    routes:
      - name: teapot
        prefix: /teapot
        direct_response_status: 418
        direct_response_body: short and stout
"#,
        )
        .unwrap();
        validate_route_config(&config, &names(&[]));
        let built = build_route_config(&config);
        let direct = built.virtual_hosts[0].routes[0]
            .direct_response
            .as_ref()
            .unwrap();
        assert_eq!(direct.status, 418);
    }
}
