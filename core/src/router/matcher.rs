use std::sync::Arc;

use http::Method;

use crate::codec::RequestHead;

use super::config::{Route, RouteConfig, VirtualHost};

/// outcome of a routing decision
#[derive(Clone)]
pub struct RouteMatch {
    pub virtual_host: Arc<VirtualHost>,
    pub route: Arc<Route>,
}

/// host + path to route resolution over a loaded `RouteConfig`.
/// pure over its inputs: identical requests always resolve identically.
pub struct RouteMatcher {
    config: Arc<RouteConfig>,
}

impl RouteMatcher {
    pub fn new(config: Arc<RouteConfig>) -> RouteMatcher {
        RouteMatcher { config }
    }

    pub fn config(&self) -> &Arc<RouteConfig> {
        &self.config
    }

    /// resolve a request; `None` means no virtual host or no rule matched
    /// and the caller owes the client a 404.
    /// the random value is reserved for weighted selection, unused by the
    /// match itself.
    pub fn route(&self, head: &RequestHead, _random: u64) -> Option<RouteMatch> {
        let mut authority = head.host().to_string();
        if self.config.ignore_port_in_host_matching {
            authority = strip_port(&authority).to_string();
        }
        let virtual_host = self.find_virtual_host(&authority)?;

        let mut path = if head.method == Method::CONNECT {
            // connect carries an authority-form target
            "/".to_string()
        } else {
            let p = head.path();
            if p.is_empty() {
                "/".to_string()
            } else {
                p.to_string()
            }
        };
        if self.config.ignore_path_parameters_in_path_matching {
            if let Some(semi) = path.find(';') {
                path.truncate(semi);
            }
        }

        for route in &virtual_host.routes {
            if route.path_match.matches(&path) {
                return Some(RouteMatch {
                    virtual_host: virtual_host.clone(),
                    route: route.clone(),
                });
            }
        }
        None
    }

    /// domain selection: exact beats suffix wildcard beats prefix wildcard
    /// beats `*`; within a wildcard tier the longest pattern wins
    fn find_virtual_host(&self, authority: &str) -> Option<Arc<VirtualHost>> {
        let authority_lower = authority.to_ascii_lowercase();
        let mut best_suffix: Option<(usize, &Arc<VirtualHost>)> = None;
        let mut best_prefix: Option<(usize, &Arc<VirtualHost>)> = None;
        let mut catch_all: Option<&Arc<VirtualHost>> = None;

        for vh in &self.config.virtual_hosts {
            for domain in &vh.domains {
                let domain_lower = domain.to_ascii_lowercase();
                if domain_lower == authority_lower {
                    return Some(vh.clone());
                }
                if domain_lower == "*" {
                    if catch_all.is_none() {
                        catch_all = Some(vh);
                    }
                } else if let Some(suffix) = domain_lower.strip_prefix('*') {
                    // `*.foo.com` requires a non-empty label before the dot
                    if authority_lower.len() > suffix.len() && authority_lower.ends_with(suffix) {
                        let better = best_suffix.map(|(len, _)| suffix.len() > len).unwrap_or(true);
                        if better {
                            best_suffix = Some((suffix.len(), vh));
                        }
                    }
                } else if let Some(prefix) = domain_lower.strip_suffix('*') {
                    if authority_lower.len() > prefix.len() && authority_lower.starts_with(prefix) {
                        let better = best_prefix.map(|(len, _)| prefix.len() > len).unwrap_or(true);
                        if better {
                            best_prefix = Some((prefix.len(), vh));
                        }
                    }
                }
            }
        }

        best_suffix
            .map(|(_, vh)| vh)
            .or(best_prefix.map(|(_, vh)| vh))
            .or(catch_all)
            .cloned()
    }
}

fn strip_port(authority: &str) -> &str {
    // bracketed ipv6 keeps its brackets, the port hangs off the end
    if let Some(end) = authority.rfind(']') {
        return &authority[..=end];
    }
    match authority.rfind(':') {
        Some(colon) => &authority[..colon],
        None => authority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::config::PathMatch;
    use http::Version;

    fn request(host: &str, path: &str) -> RequestHead {
        let mut head =
            RequestHead::build("GET", path.as_bytes(), Version::HTTP_11, None).unwrap();
        head.insert_header(http::header::HOST, host).unwrap();
        head
    }

    fn table() -> RouteMatcher {
        let exact = VirtualHost::new(
            "exact",
            vec!["api.example.com".to_string()],
            vec![
                Arc::new(Route::new("root", "api-cluster", PathMatch::Prefix("/".to_string()))),
            ],
        );
        let suffix = VirtualHost::new(
            "suffix",
            vec!["*.example.com".to_string()],
            vec![
                Arc::new(Route::new("a", "suffix-a", PathMatch::Prefix("/a".to_string()))),
                Arc::new(Route::new("rest", "suffix-rest", PathMatch::Prefix("/".to_string()))),
            ],
        );
        let prefix = VirtualHost::new(
            "prefix",
            vec!["internal.*".to_string()],
            vec![
                Arc::new(Route::new("root", "internal-cluster", PathMatch::Prefix("/".to_string()))),
            ],
        );
        let wildcard = VirtualHost::new(
            "wildcard",
            vec!["*".to_string()],
            vec![
                Arc::new(Route::new("root", "default-cluster", PathMatch::Prefix("/".to_string()))),
            ],
        );
        RouteMatcher::new(Arc::new(RouteConfig {
            name: "test-routes".to_string(),
            virtual_hosts: vec![exact, suffix, prefix, wildcard],
            ignore_port_in_host_matching: false,
            ignore_path_parameters_in_path_matching: false,
        }))
    }

    #[test]
    fn exact_domain_wins() {
        let m = table();
        let found = m.route(&request("api.example.com", "/x"), 0).unwrap();
        assert_eq!(found.route.cluster_name, "api-cluster");
    }

    #[test]
    fn suffix_wildcard_needs_a_label() {
        let m = table();
        let found = m.route(&request("web.example.com", "/a/1"), 0).unwrap();
        assert_eq!(found.route.cluster_name, "suffix-a");
        // bare suffix has no label in front, falls to the catch-all
        let found = m.route(&request(".example.com", "/"), 0);
        assert_eq!(found.unwrap().route.cluster_name, "default-cluster");
    }

    #[test]
    fn prefix_wildcard_matches() {
        let m = table();
        let found = m.route(&request("internal.corp", "/"), 0).unwrap();
        assert_eq!(found.route.cluster_name, "internal-cluster");
    }

    #[test]
    fn catch_all_is_last_resort() {
        let m = table();
        let found = m.route(&request("elsewhere.net", "/"), 0).unwrap();
        assert_eq!(found.route.cluster_name, "default-cluster");
    }

    #[test]
    fn first_matching_rule_wins() {
        let m = table();
        let found = m.route(&request("web.example.com", "/a"), 0).unwrap();
        assert_eq!(found.route.cluster_name, "suffix-a");
        let found = m.route(&request("web.example.com", "/b"), 0).unwrap();
        assert_eq!(found.route.cluster_name, "suffix-rest");
    }

    #[test]
    fn no_rule_match_returns_none() {
        let only_exact = RouteMatcher::new(Arc::new(RouteConfig {
            name: "narrow".to_string(),
            virtual_hosts: vec![VirtualHost::new(
                "vh",
                vec!["a.com".to_string()],
                vec![Arc::new(Route::new(
                    "only",
                    "c",
                    PathMatch::Exact("/only".to_string()),
                ))],
            )],
            ignore_port_in_host_matching: false,
            ignore_path_parameters_in_path_matching: false,
        }));
        assert!(only_exact.route(&request("a.com", "/other"), 0).is_none());
        assert!(only_exact.route(&request("b.com", "/only"), 0).is_none());
    }

    #[test]
    fn port_stripping_is_opt_in() {
        let m = table();
        // with the port kept, the exact domain no longer matches
        let found = m.route(&request("api.example.com:8080", "/"), 0).unwrap();
        assert_eq!(found.route.cluster_name, "default-cluster");

        let mut config = m.config().as_ref().clone();
        config.ignore_port_in_host_matching = true;
        let m = RouteMatcher::new(Arc::new(config));
        let found = m.route(&request("api.example.com:8080", "/"), 0).unwrap();
        assert_eq!(found.route.cluster_name, "api-cluster");
    }

    #[test]
    fn path_parameters_can_be_ignored() {
        let mut config = table().config().as_ref().clone();
        config.ignore_path_parameters_in_path_matching = true;
        let m = RouteMatcher::new(Arc::new(config));
        let found = m
            .route(&request("web.example.com", "/a;v=1"), 0)
            .unwrap();
        assert_eq!(found.route.cluster_name, "suffix-a");
    }

    #[test]
    fn routing_is_stable_across_calls() {
        let m = table();
        let head = request("web.example.com", "/a");
        let first = m.route(&head, 1).unwrap().route.cluster_name.clone();
        let second = m.route(&head, 2).unwrap().route.cluster_name.clone();
        assert_eq!(first, second);
    }
}
