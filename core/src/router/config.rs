use std::sync::Arc;

use crate::codec::RequestHead;

/// a response served straight from config, no upstream involved
#[derive(Clone, Debug)]
pub struct DirectResponse {
    pub status: u16,
    pub body: String,
}

/// how a rule matches the request path
#[derive(Clone, Debug)]
pub enum PathMatch {
    Prefix(String),
    Exact(String),
}

impl PathMatch {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathMatch::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathMatch::Exact(exact) => path == exact,
        }
    }
}

/// one routing rule: a path pattern mapping to a cluster.
/// immutable once the config is loaded.
#[derive(Clone, Debug)]
pub struct Route {
    pub name: String,
    pub cluster_name: String,
    pub path_match: PathMatch,
    pub rewrite_urls: Vec<String>,
    pub direct_response: Option<DirectResponse>,
    /// bypass body transformations for this rule
    pub passthrough: bool,
}

impl Route {
    pub fn new(name: &str, cluster_name: &str, path_match: PathMatch) -> Route {
        Route {
            name: name.to_string(),
            cluster_name: cluster_name.to_string(),
            path_match,
            rewrite_urls: Vec::new(),
            direct_response: None,
            passthrough: false,
        }
    }

    /// whether an x-forwarded-host entry should be appended
    pub fn append_xfh(&self) -> bool {
        false
    }

    /// the request path after any configured rewrite; no rewrite in scope
    pub fn current_url_path_after_rewrite(&self, _head: &RequestHead) -> Option<String> {
        None
    }

    /// last-minute header fixups before the request leaves; nothing to do
    pub fn finalize_request_headers(&self, _head: &mut RequestHead) {}

    /// priority band this route's traffic lands on
    pub fn priority(&self) -> u32 {
        0
    }
}

/// a set of domains sharing a rule list
#[derive(Clone, Debug)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Arc<Route>>,
}

impl VirtualHost {
    pub fn new(name: &str, domains: Vec<String>, routes: Vec<Arc<Route>>) -> Arc<VirtualHost> {
        Arc::new(VirtualHost {
            name: name.to_string(),
            domains,
            routes,
        })
    }
}

/// the full routing table of one listener
#[derive(Clone, Debug, Default)]
pub struct RouteConfig {
    pub name: String,
    pub virtual_hosts: Vec<Arc<VirtualHost>>,
    /// strip `:port` from the authority before domain matching
    pub ignore_port_in_host_matching: bool,
    /// match the path only up to the first `;`
    pub ignore_path_parameters_in_path_matching: bool,
}
