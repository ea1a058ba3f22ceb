use std::sync::Arc;

use http::HeaderMap;
use parking_lot::Mutex;

use crate::buffer::ChainBuffer;
use crate::codec::RequestHead;
use crate::prelude::{Error, ErrorKind};

use super::manager::FilterManager;
use super::state::{LifeSpan, StateMutability};
use super::types::{
    FilterContext, FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus,
    StreamDecoderFilter, StreamFilterBase,
};

pub const UPSTREAM_PLAN_KEY: &str = "halberd.router.upstream-plan";

/// marker header stamped on load-shed replies
pub const OVERLOAD_MARKER: &str = "x-halberd-overloaded";

/// everything the upstream side needs once decoding finishes: the target
/// cluster plus the request body collected by the terminal filter
pub struct UpstreamPlan {
    pub cluster_name: String,
    pub body: Mutex<ChainBuffer>,
    pub trailers: Mutex<Option<HeaderMap>>,
}

/// terminal decoder filter. resolves the route to a cluster, validates
/// that a host was selectable, and swallows the request body into the
/// upstream plan. failures never leave this filter: they become local
/// replies.
pub struct RouterFilter {
    plan: Option<Arc<UpstreamPlan>>,
}

impl RouterFilter {
    pub fn new() -> Self {
        RouterFilter { plan: None }
    }
}

impl Default for RouterFilter {
    fn default() -> Self {
        RouterFilter::new()
    }
}

impl StreamFilterBase for RouterFilter {
    fn name(&self) -> &str {
        "router"
    }
}

impl StreamDecoderFilter for RouterFilter {
    fn decode_headers(
        &mut self,
        ctx: &mut FilterContext<'_>,
        headers: &mut RequestHead,
        _end_stream: bool,
    ) -> FilterHeadersStatus {
        let Some(route_match) = ctx.stream_info.route.clone() else {
            ctx.send_local_reply(404, "");
            return FilterHeadersStatus::StopIteration;
        };
        let route = &route_match.route;

        if let Some(direct) = &route.direct_response {
            ctx.send_local_reply(direct.status, &direct.body);
            return FilterHeadersStatus::StopIteration;
        }

        if ctx.stream_info.upstream_host.is_none() {
            ctx.send_local_reply(503, "no healthy upstream");
            return FilterHeadersStatus::StopIteration;
        }

        route.finalize_request_headers(headers);

        let plan = Arc::new(UpstreamPlan {
            cluster_name: route.cluster_name.clone(),
            body: Mutex::new(ChainBuffer::new()),
            trailers: Mutex::new(None),
        });
        ctx.filter_state.set_data(
            UPSTREAM_PLAN_KEY,
            plan.clone(),
            StateMutability::Mutable,
            LifeSpan::Request,
        );
        self.plan = Some(plan);
        FilterHeadersStatus::Continue
    }

    fn decode_data(
        &mut self,
        _ctx: &mut FilterContext<'_>,
        data: &mut ChainBuffer,
        _end_stream: bool,
    ) -> FilterDataStatus {
        if let Some(plan) = &self.plan {
            plan.body.lock().move_from(data);
        }
        FilterDataStatus::Continue
    }

    fn decode_trailers(
        &mut self,
        _ctx: &mut FilterContext<'_>,
        trailers: &mut HeaderMap,
    ) -> FilterTrailersStatus {
        if let Some(plan) = &self.plan {
            *plan.trailers.lock() = Some(trailers.clone());
        }
        FilterTrailersStatus::Continue
    }
}

/// translate a pool failure into the reply the client sees.
/// overflow replies carry the overload marker so shed load is tellable
/// from upstream breakage.
pub fn send_pool_failure_reply(fm: &mut FilterManager, err: &Error) {
    let status = err.kind.response_code();
    let body = err.kind.public_reason();
    match err.kind {
        ErrorKind::Overflow | ErrorKind::Overload => {
            fm.send_local_reply_with_headers(
                status,
                body,
                vec![(OVERLOAD_MARKER.to_string(), "true".to_string())],
            );
        }
        _ => fm.send_local_reply(status, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ResponseHead;
    use crate::filter::manager::FilterManagerCallbacks;
    use crate::filter::types::StreamResetReason;
    use crate::network::Address;
    use crate::router::config::{PathMatch, Route, RouteConfig, VirtualHost};
    use crate::router::matcher::RouteMatcher;
    use crate::stream::RawTransportSocketFactory;
    use crate::upstream::cluster::ClusterInfo;
    use crate::upstream::host::Host;
    use bytes::Bytes;
    use http::Version;
    use std::collections::HashMap;

    #[derive(Default, Clone)]
    struct Capture {
        headers: Arc<Mutex<Vec<(u16, bool, Vec<(String, String)>)>>>,
        ended: Arc<Mutex<usize>>,
    }

    impl FilterManagerCallbacks for Capture {
        fn encode_headers(&mut self, head: ResponseHead, end_stream: bool) {
            let extra = head
                .headers
                .iter()
                .map(|(n, v)| {
                    (
                        n.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).to_string(),
                    )
                })
                .collect();
            self.headers.lock().push((head.status.as_u16(), end_stream, extra));
        }
        fn encode_data(&mut self, _: Bytes, _: bool) {}
        fn encode_trailers(&mut self, _: HeaderMap) {}
        fn end_stream(&mut self) {
            *self.ended.lock() += 1;
        }
        fn on_reset_stream(&mut self, _: StreamResetReason, _: &str) {}
    }

    fn request(host: &str, path: &str) -> RequestHead {
        let mut head = RequestHead::build("GET", path.as_bytes(), Version::HTTP_11, None).unwrap();
        head.insert_header(http::header::HOST, host).unwrap();
        head
    }

    fn seeded_manager(capture: Capture, with_route: bool, with_host: bool) -> FilterManager {
        let mut fm = FilterManager::new(Box::new(capture), 0, false);
        if with_route {
            let route = Arc::new(Route::new("r", "cluster-a", PathMatch::Prefix("/".to_string())));
            let vh = VirtualHost::new("vh", vec!["*".to_string()], vec![route]);
            let matcher = RouteMatcher::new(Arc::new(RouteConfig {
                name: "rc".to_string(),
                virtual_hosts: vec![vh],
                ignore_port_in_host_matching: false,
                ignore_path_parameters_in_path_matching: false,
            }));
            fm.stream_info_mut().route = matcher.route(&request("any", "/"), 0);
        }
        if with_host {
            fm.stream_info_mut().upstream_host = Some(Host::new(
                ClusterInfo::for_tests("cluster-a"),
                Address::parse("127.0.0.1:9000").unwrap(),
                None,
                HashMap::new(),
                Arc::new(RawTransportSocketFactory),
                0,
            ));
        }
        fm.add_decoder_filter(Box::new(RouterFilter::new()));
        fm
    }

    #[test]
    fn missing_route_yields_404_with_empty_body() {
        let capture = Capture::default();
        let mut fm = seeded_manager(capture.clone(), false, false);
        fm.decode_headers(request("no.match", "/"), true);
        let headers = capture.headers.lock();
        assert_eq!(headers.len(), 1);
        let (status, end, extra) = &headers[0];
        assert_eq!(*status, 404);
        assert!(*end);
        assert!(extra
            .iter()
            .any(|(n, v)| n == "content-length" && v == "0"));
        assert_eq!(*capture.ended.lock(), 1);
    }

    #[test]
    fn missing_host_yields_503() {
        let capture = Capture::default();
        let mut fm = seeded_manager(capture.clone(), true, false);
        fm.decode_headers(request("any", "/"), true);
        let headers = capture.headers.lock();
        assert_eq!(headers[0].0, 503);
    }

    #[test]
    fn plan_collects_the_request_body() {
        let capture = Capture::default();
        let mut fm = seeded_manager(capture, true, true);
        fm.decode_headers(request("any", "/"), false);
        fm.decode_data(Bytes::from_static(b"part one "), false);
        fm.decode_data(Bytes::from_static(b"part two"), true);
        assert!(fm.decoder_chain_complete());
        let plan = fm
            .filter_state()
            .get_data::<UpstreamPlan>(UPSTREAM_PLAN_KEY)
            .unwrap();
        assert_eq!(plan.cluster_name, "cluster-a");
        assert_eq!(plan.body.lock().pullup(), b"part one part two");
    }

    #[test]
    fn overflow_reply_carries_the_overload_marker() {
        let capture = Capture::default();
        let mut fm = seeded_manager(capture.clone(), true, true);
        fm.decode_headers(request("any", "/"), true);
        let err = Error::explain(ErrorKind::Overflow, "pending queue full");
        send_pool_failure_reply(&mut fm, &err);
        let headers = capture.headers.lock();
        let overloaded = headers
            .iter()
            .find(|(status, _, _)| *status == 503)
            .expect("a 503 reply");
        assert!(overloaded
            .2
            .iter()
            .any(|(n, v)| n == OVERLOAD_MARKER && v == "true"));
    }
}
