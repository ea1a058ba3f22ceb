use bytes::Bytes;
use regex::bytes::Regex;

use crate::buffer::ChainBuffer;
use crate::codec::{RequestHead, ResponseHead};

use super::state_filter::{ORIGINAL_URI_KEY, PASSTHROUGH_KEY, REWRITE_URLS_KEY};
use super::types::{
    FilterContext, FilterDataStatus, FilterHeadersStatus, StreamDecoderFilter,
    StreamEncoderFilter, StreamFilterBase,
};

/// scheme, host and optional port of an absolute url
fn split_url(url: &str) -> Option<(String, String, Option<u16>)> {
    let uri: http::Uri = url.parse().ok()?;
    let scheme = uri.scheme_str()?.to_string();
    let host = uri.host()?.to_string();
    Some((scheme, host, uri.port_u16()))
}

fn base_url(scheme: &str, host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{}://{}:{}/", scheme, host, port),
        None => format!("{}://{}/", scheme, host),
    }
}

/// url substitution across one proxied domain boundary.
///
/// the pattern is the base url of the original request, the replacement is
/// either a configured alias or the chosen upstream endpoint. an engine
/// whose pattern equals its replacement deactivates itself.
pub struct RewriteEngine {
    pattern: String,
    replacement: String,
    regex: Option<Regex>,
    host_value: String,
    origin_value: String,
    active: bool,
}

impl RewriteEngine {
    pub fn new(
        original_uri: &str,
        rewrite_urls: &[String],
        upstream_authority: &str,
        tls: bool,
    ) -> RewriteEngine {
        let Some((scheme, host, port)) = split_url(original_uri) else {
            return RewriteEngine::inactive();
        };
        let pattern = base_url(&scheme, &host, port);
        let replacement = Self::pick_replacement(&host, rewrite_urls)
            .unwrap_or_else(|| {
                let scheme = if tls { "https" } else { "http" };
                format!("{}://{}/", scheme, upstream_authority)
            });
        RewriteEngine::from_parts(pattern, replacement)
    }

    fn pick_replacement(original_host: &str, rewrite_urls: &[String]) -> Option<String> {
        for url in rewrite_urls {
            if let Some((scheme, host, port)) = split_url(url) {
                if host.eq_ignore_ascii_case(original_host) {
                    return Some(base_url(&scheme, &host, port));
                }
            }
        }
        None
    }

    fn from_parts(pattern: String, replacement: String) -> RewriteEngine {
        if pattern.eq_ignore_ascii_case(&replacement) {
            return RewriteEngine::inactive();
        }
        let regex = Regex::new(&format!("(?i){}", regex::escape(&pattern))).ok();
        let (host_value, origin_value) = match split_url(&replacement) {
            Some((scheme, host, port)) => {
                let authority = match port {
                    Some(port) => format!("{}:{}", host, port),
                    None => host,
                };
                let origin = format!("{}://{}", scheme, authority);
                (authority, origin)
            }
            None => (String::new(), String::new()),
        };
        let active = regex.is_some();
        RewriteEngine {
            pattern,
            replacement,
            regex,
            host_value,
            origin_value,
            active,
        }
    }

    fn inactive() -> RewriteEngine {
        RewriteEngine {
            pattern: String::new(),
            replacement: String::new(),
            regex: None,
            host_value: String::new(),
            origin_value: String::new(),
            active: false,
        }
    }

    /// the same mapping pointed the other way, for the response path
    pub fn inverse(&self) -> RewriteEngine {
        if !self.active {
            return RewriteEngine::inactive();
        }
        RewriteEngine::from_parts(self.replacement.clone(), self.pattern.clone())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// authority form of the replacement, what a Host header should say
    pub fn host_value(&self) -> &str {
        &self.host_value
    }

    /// scheme://authority form of the replacement, for Origin headers
    pub fn origin_value(&self) -> &str {
        &self.origin_value
    }

    fn replace_bytes(&self, input: &[u8]) -> Option<Vec<u8>> {
        let regex = self.regex.as_ref()?;
        if !regex.is_match(input) {
            return None;
        }
        Some(
            regex
                .replace_all(input, self.replacement.as_bytes())
                .into_owned(),
        )
    }

    /// rewrite request headers: Host and Origin become the replacement's
    /// authority, every other value gets the url substitution
    pub fn process_request_headers(&self, head: &mut RequestHead) {
        if !self.active {
            return;
        }
        let mut saw_host = false;
        let mut saw_origin = false;
        let mut rewrites: Vec<(http::HeaderName, Vec<u8>)> = Vec::new();
        for (name, value) in head.headers.iter() {
            if !saw_host && name == http::header::HOST {
                saw_host = true;
                continue;
            }
            if !saw_origin && name == http::header::ORIGIN {
                saw_origin = true;
                continue;
            }
            if let Some(replaced) = self.replace_bytes(value.as_bytes()) {
                rewrites.push((name.clone(), replaced));
            }
        }
        for (name, value) in rewrites {
            if let Ok(value) = http::HeaderValue::from_bytes(&value) {
                let _ = head.insert_header(&name, value);
            }
        }
        if saw_host {
            let _ = head.insert_header(http::header::HOST, self.host_value.clone());
        }
        if saw_origin {
            let _ = head.insert_header(http::header::ORIGIN, self.origin_value.clone());
        }
    }

    /// rewrite response header values (Location and friends)
    pub fn process_response_headers(&self, head: &mut ResponseHead) {
        if !self.active {
            return;
        }
        let mut rewrites: Vec<(http::HeaderName, Vec<u8>)> = Vec::new();
        for (name, value) in head.headers.iter() {
            if let Some(replaced) = self.replace_bytes(value.as_bytes()) {
                rewrites.push((name.clone(), replaced));
            }
        }
        for (name, value) in rewrites {
            if let Ok(value) = http::HeaderValue::from_bytes(&value) {
                let _ = head.insert_header(&name, value);
            }
        }
    }

    /// rewrite a complete body in place
    pub fn process_buffer(&self, data: &mut ChainBuffer) {
        if !self.active || data.is_empty() {
            return;
        }
        let combined = data.pullup();
        if let Some(replaced) = self.replace_bytes(combined) {
            data.replace_with(Bytes::from(replaced));
        }
    }
}

fn engine_from_context(ctx: &mut FilterContext<'_>) -> Option<RewriteEngine> {
    if ctx.filter_state.has_data(PASSTHROUGH_KEY) {
        return None;
    }
    let original_uri = ctx.filter_state.get_data::<String>(ORIGINAL_URI_KEY)?;
    let rewrite_urls = ctx
        .filter_state
        .get_data::<Vec<String>>(REWRITE_URLS_KEY)
        .map(|urls| (*urls).clone())
        .unwrap_or_default();
    let authority = ctx
        .stream_info
        .upstream_host
        .as_ref()
        .map(|host| host.address().to_string())?;
    let engine = RewriteEngine::new(
        &original_uri,
        &rewrite_urls,
        &authority,
        ctx.stream_info.upstream_secure,
    );
    engine.is_active().then_some(engine)
}

/// request-path filter: maps the client-facing domain onto the chosen
/// upstream across headers and a buffered body
pub struct RequestRewriteFilter {
    engine: Option<RewriteEngine>,
    held_body: ChainBuffer,
}

impl RequestRewriteFilter {
    pub fn new() -> Self {
        RequestRewriteFilter {
            engine: None,
            held_body: ChainBuffer::new(),
        }
    }
}

impl Default for RequestRewriteFilter {
    fn default() -> Self {
        RequestRewriteFilter::new()
    }
}

impl StreamFilterBase for RequestRewriteFilter {
    fn name(&self) -> &str {
        "request-rewrite"
    }
}

impl StreamDecoderFilter for RequestRewriteFilter {
    fn decode_headers(
        &mut self,
        ctx: &mut FilterContext<'_>,
        headers: &mut RequestHead,
        _end_stream: bool,
    ) -> FilterHeadersStatus {
        self.engine = engine_from_context(ctx);
        if let Some(engine) = &self.engine {
            engine.process_request_headers(headers);
        }
        FilterHeadersStatus::Continue
    }

    fn decode_data(
        &mut self,
        _ctx: &mut FilterContext<'_>,
        data: &mut ChainBuffer,
        end_stream: bool,
    ) -> FilterDataStatus {
        let Some(engine) = &self.engine else {
            return FilterDataStatus::Continue;
        };
        if !end_stream {
            // hold everything until the body is complete so a url split
            // across chunks still matches
            self.held_body.move_from(data);
            return FilterDataStatus::StopIterationNoBuffer;
        }
        if !self.held_body.is_empty() {
            data.prepend_from(&mut self.held_body);
        }
        engine.process_buffer(data);
        FilterDataStatus::Continue
    }

    fn decode_trailers(
        &mut self,
        ctx: &mut FilterContext<'_>,
        _trailers: &mut http::HeaderMap,
    ) -> crate::filter::types::FilterTrailersStatus {
        // the body ended with trailers instead of an end-stream data chunk
        if let Some(engine) = &self.engine {
            if !self.held_body.is_empty() {
                let mut body = std::mem::take(&mut self.held_body);
                engine.process_buffer(&mut body);
                ctx.add_decoded_data(body.take_all(), false);
            }
        }
        crate::filter::types::FilterTrailersStatus::Continue
    }
}

/// response-path filter: the inverse mapping, upstream urls back onto the
/// client-facing domain
pub struct ResponseRewriteFilter {
    engine: Option<RewriteEngine>,
    held_body: ChainBuffer,
}

impl ResponseRewriteFilter {
    pub fn new() -> Self {
        ResponseRewriteFilter {
            engine: None,
            held_body: ChainBuffer::new(),
        }
    }
}

impl Default for ResponseRewriteFilter {
    fn default() -> Self {
        ResponseRewriteFilter::new()
    }
}

impl StreamFilterBase for ResponseRewriteFilter {
    fn name(&self) -> &str {
        "response-rewrite"
    }
}

impl StreamEncoderFilter for ResponseRewriteFilter {
    fn encode_headers(
        &mut self,
        ctx: &mut FilterContext<'_>,
        headers: &mut ResponseHead,
        end_stream: bool,
    ) -> FilterHeadersStatus {
        self.engine = engine_from_context(ctx).map(|engine| engine.inverse());
        if let Some(engine) = &self.engine {
            engine.process_response_headers(headers);
            if !end_stream {
                // the body is about to be buffered and resized, so the
                // advertised length can no longer be trusted
                headers.remove_header(http::header::CONTENT_LENGTH.as_str());
                let _ = headers.insert_header(http::header::TRANSFER_ENCODING, "chunked");
            }
        }
        FilterHeadersStatus::Continue
    }

    fn encode_data(
        &mut self,
        _ctx: &mut FilterContext<'_>,
        data: &mut ChainBuffer,
        end_stream: bool,
    ) -> FilterDataStatus {
        let Some(engine) = &self.engine else {
            return FilterDataStatus::Continue;
        };
        if !end_stream {
            self.held_body.move_from(data);
            return FilterDataStatus::StopIterationNoBuffer;
        }
        if !self.held_body.is_empty() {
            data.prepend_from(&mut self.held_body);
        }
        engine.process_buffer(data);
        FilterDataStatus::Continue
    }

    fn encode_trailers(
        &mut self,
        ctx: &mut FilterContext<'_>,
        _trailers: &mut http::HeaderMap,
    ) -> crate::filter::types::FilterTrailersStatus {
        if let Some(engine) = &self.engine {
            if !self.held_body.is_empty() {
                let mut body = std::mem::take(&mut self.held_body);
                engine.process_buffer(&mut body);
                ctx.add_encoded_data(body.take_all(), false);
            }
        }
        crate::filter::types::FilterTrailersStatus::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Version;

    fn engine() -> RewriteEngine {
        RewriteEngine::new(
            "https://public.example.com/landing",
            &[],
            "10.0.0.8:8080",
            false,
        )
    }

    #[test]
    fn pattern_and_replacement_from_upstream() {
        let engine = engine();
        assert!(engine.is_active());
        assert_eq!(engine.host_value(), "10.0.0.8:8080");
        assert_eq!(engine.origin_value(), "http://10.0.0.8:8080");
    }

    #[test]
    fn alias_match_deactivates_identity_mapping() {
        let engine = RewriteEngine::new(
            "https://public.example.com/x",
            &["https://public.example.com/".to_string()],
            "10.0.0.8:8080",
            true,
        );
        // the alias resolves to the same base url as the pattern
        assert!(!engine.is_active());
    }

    #[test]
    fn request_headers_are_rewritten() {
        let engine = engine();
        let mut head = RequestHead::build("GET", b"/landing", Version::HTTP_11, None).unwrap();
        head.insert_header(http::header::HOST, "public.example.com").unwrap();
        head.insert_header(http::header::ORIGIN, "https://public.example.com").unwrap();
        head.insert_header(
            http::header::REFERER,
            "https://public.example.com/other",
        )
        .unwrap();
        engine.process_request_headers(&mut head);
        assert_eq!(head.host(), "10.0.0.8:8080");
        assert_eq!(
            head.headers.get(http::header::ORIGIN).unwrap(),
            "http://10.0.0.8:8080"
        );
        assert_eq!(
            head.headers.get(http::header::REFERER).unwrap(),
            "http://10.0.0.8:8080/other"
        );
    }

    #[test]
    fn body_rewrite_matches_across_chunk_boundaries() {
        let engine = engine().inverse();
        // the url is split in the middle by a chunk boundary
        let mut body = ChainBuffer::new();
        body.append(Bytes::from_static(b"<a href=\"http://10.0."));
        body.append(Bytes::from_static(b"0.8:8080/x\">link</a>"));
        engine.process_buffer(&mut body);
        assert_eq!(
            body.pullup(),
            b"<a href=\"https://public.example.com/x\">link</a>"
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        let engine = engine();
        let mut head = RequestHead::build("GET", b"/", Version::HTTP_11, None).unwrap();
        head.insert_header(http::header::HOST, "public.example.com").unwrap();
        head.insert_header(
            "x-link",
            "https://public.example.com/a",
        )
        .unwrap();
        engine.process_request_headers(&mut head);
        let host_once = head.host().to_string();
        let link_once = head.headers.get("x-link").unwrap().clone();
        engine.process_request_headers(&mut head);
        assert_eq!(head.host(), host_once);
        assert_eq!(head.headers.get("x-link").unwrap(), &link_once);
    }

    #[test]
    fn inverse_maps_upstream_to_public() {
        let inverse = engine().inverse();
        assert!(inverse.is_active());
        assert_eq!(inverse.host_value(), "public.example.com");
        assert_eq!(inverse.origin_value(), "https://public.example.com");
    }

    #[test]
    fn case_insensitive_match() {
        let engine = engine();
        let mut body = ChainBuffer::from(&b"see HTTPS://PUBLIC.EXAMPLE.COM/page"[..]);
        engine.process_buffer(&mut body);
        assert_eq!(body.pullup(), b"see http://10.0.0.8:8080/page");
    }
}
