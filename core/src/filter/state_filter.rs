use std::sync::Arc;

use crate::buffer::ChainBuffer;
use crate::codec::RequestHead;
use crate::router::config::Route;

use super::state::{LifeSpan, StateMutability};
use super::types::{
    FilterContext, FilterDataStatus, FilterHeadersStatus, StreamDecoderFilter, StreamFilterBase,
};

pub const RULE_KEY: &str = "halberd.state.rule";
pub const REWRITE_URLS_KEY: &str = "halberd.state.rewrite-urls";
pub const ORIGINAL_URI_KEY: &str = "halberd.state.original-uri";
pub const PASSTHROUGH_KEY: &str = "halberd.state.passthrough";

/// absolute form of the request target as the client sent it
fn build_original_uri(head: &RequestHead) -> String {
    format!("http://{}{}", head.host(), head.path())
}

/// first decoder filter: publishes the resolved rule and its rewrite
/// context into filter state for everything downstream of it
pub struct StateFilter;

impl StateFilter {
    pub fn new() -> Self {
        StateFilter
    }
}

impl Default for StateFilter {
    fn default() -> Self {
        StateFilter::new()
    }
}

impl StreamFilterBase for StateFilter {
    fn name(&self) -> &str {
        "state"
    }
}

impl StreamDecoderFilter for StateFilter {
    fn decode_headers(
        &mut self,
        ctx: &mut FilterContext<'_>,
        headers: &mut RequestHead,
        _end_stream: bool,
    ) -> FilterHeadersStatus {
        let Some(route_match) = ctx.stream_info.route.clone() else {
            // nothing to publish; the router filter owns the 404
            return FilterHeadersStatus::Continue;
        };
        let route: &Arc<Route> = &route_match.route;

        if route.passthrough {
            ctx.filter_state.set_data(
                PASSTHROUGH_KEY,
                Arc::new(true),
                StateMutability::ReadOnly,
                LifeSpan::Request,
            );
            return FilterHeadersStatus::Continue;
        }

        ctx.filter_state.set_data(
            RULE_KEY,
            Arc::new(route.clone()),
            StateMutability::ReadOnly,
            LifeSpan::Request,
        );
        ctx.filter_state.set_data(
            REWRITE_URLS_KEY,
            Arc::new(route.rewrite_urls.clone()),
            StateMutability::ReadOnly,
            LifeSpan::Request,
        );
        ctx.filter_state.set_data(
            ORIGINAL_URI_KEY,
            Arc::new(build_original_uri(headers)),
            StateMutability::ReadOnly,
            LifeSpan::Request,
        );
        FilterHeadersStatus::Continue
    }

    fn decode_data(
        &mut self,
        _ctx: &mut FilterContext<'_>,
        _data: &mut ChainBuffer,
        _end_stream: bool,
    ) -> FilterDataStatus {
        FilterDataStatus::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::manager::{FilterManager, FilterManagerCallbacks};
    use crate::filter::types::StreamResetReason;
    use crate::router::config::{PathMatch, RouteConfig, VirtualHost};
    use crate::router::matcher::{RouteMatch, RouteMatcher};
    use http::Version;

    struct NullCallbacks;
    impl FilterManagerCallbacks for NullCallbacks {
        fn encode_headers(&mut self, _: crate::codec::ResponseHead, _: bool) {}
        fn encode_data(&mut self, _: bytes::Bytes, _: bool) {}
        fn encode_trailers(&mut self, _: http::HeaderMap) {}
        fn end_stream(&mut self) {}
        fn on_reset_stream(&mut self, _: StreamResetReason, _: &str) {}
    }

    fn route_match(passthrough: bool) -> RouteMatch {
        let mut route = Route::new("r", "cluster-a", PathMatch::Prefix("/".to_string()));
        route.passthrough = passthrough;
        route.rewrite_urls = vec!["https://alias.example.com/".to_string()];
        let route = Arc::new(route);
        let vh = VirtualHost::new("vh", vec!["*".to_string()], vec![route.clone()]);
        let matcher = RouteMatcher::new(Arc::new(RouteConfig {
            name: "rc".to_string(),
            virtual_hosts: vec![vh],
            ignore_port_in_host_matching: false,
            ignore_path_parameters_in_path_matching: false,
        }));
        let mut head = RequestHead::build("GET", b"/", Version::HTTP_11, None).unwrap();
        head.insert_header(http::header::HOST, "svc.example.com").unwrap();
        matcher.route(&head, 0).unwrap()
    }

    #[test]
    fn publishes_rule_and_rewrite_context() {
        let mut fm = FilterManager::new(Box::new(NullCallbacks), 0, false);
        fm.stream_info_mut().route = Some(route_match(false));
        fm.add_decoder_filter(Box::new(StateFilter::new()));
        let mut head = RequestHead::build("GET", b"/a/b", Version::HTTP_11, None).unwrap();
        head.insert_header(http::header::HOST, "svc.example.com").unwrap();
        fm.decode_headers(head, true);

        let state = fm.filter_state();
        assert!(state.has_data(RULE_KEY));
        let uri = state.get_data::<String>(ORIGINAL_URI_KEY).unwrap();
        assert_eq!(&*uri, "http://svc.example.com/a/b");
        let urls = state.get_data::<Vec<String>>(REWRITE_URLS_KEY).unwrap();
        assert_eq!(urls.len(), 1);
        assert!(!state.has_data(PASSTHROUGH_KEY));
    }

    #[test]
    fn passthrough_rules_skip_the_rewrite_context() {
        let mut fm = FilterManager::new(Box::new(NullCallbacks), 0, false);
        fm.stream_info_mut().route = Some(route_match(true));
        fm.add_decoder_filter(Box::new(StateFilter::new()));
        let mut head = RequestHead::build("GET", b"/", Version::HTTP_11, None).unwrap();
        head.insert_header(http::header::HOST, "svc.example.com").unwrap();
        fm.decode_headers(head, true);

        let state = fm.filter_state();
        assert!(state.has_data(PASSTHROUGH_KEY));
        assert!(!state.has_data(RULE_KEY));
        assert!(!state.has_data(ORIGINAL_URI_KEY));
    }
}
