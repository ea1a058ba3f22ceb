use std::time::Duration;

use http::{HeaderValue, Method, Version};

use super::head::{RequestHead, ResponseHead};

/// keepalive decision for one session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeepaliveStatus {
    Timeout(Duration),
    Infinite,
    Off,
}

impl KeepaliveStatus {
    pub fn is_on(&self) -> bool {
        !matches!(self, KeepaliveStatus::Off)
    }
}

/// tokens found in a `Connection` (or `Proxy-Connection`) header
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionValue {
    pub keep_alive: bool,
    pub close: bool,
    pub upgrade: bool,
}

/// parse the comma-separated `Connection` token list
pub fn parse_connection_value(value: &HeaderValue) -> ConnectionValue {
    let mut out = ConnectionValue::default();
    if let Ok(text) = value.to_str() {
        for token in text.split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case("keep-alive") {
                out.keep_alive = true;
            } else if token.eq_ignore_ascii_case("close") {
                out.close = true;
            } else if token.eq_ignore_ascii_case("upgrade") {
                out.upgrade = true;
            }
        }
    }
    out
}

/// `timeout=` and `max=` parameters of a `Keep-Alive` header
pub fn parse_keepalive_params(value: &HeaderValue) -> (Option<u64>, Option<usize>) {
    let Ok(text) = value.to_str() else {
        return (None, None);
    };
    let mut timeout = None;
    let mut max = None;
    for param in text.split(',') {
        match param.split_once('=').map(|(k, v)| (k.trim(), v.trim())) {
            Some(("timeout", v)) => timeout = v.parse().ok(),
            Some(("max", v)) => max = v.parse().ok(),
            _ => {}
        }
    }
    (timeout, max)
}

pub fn is_chunked_encoding(value: Option<&HeaderValue>) -> bool {
    match value {
        Some(v) => v.as_bytes().eq_ignore_ascii_case(b"chunked"),
        None => false,
    }
}

pub fn content_length(value: Option<&HeaderValue>) -> Option<usize> {
    let value = value?;
    let text = std::str::from_utf8(value.as_bytes()).ok()?;
    match text.parse::<i64>() {
        Ok(n) if n >= 0 => Some(n as usize),
        Ok(n) => {
            tracing::warn!("negative content length {}", n);
            None
        }
        Err(_) => {
            tracing::warn!("unparsable content length {:?}", text);
            None
        }
    }
}

/// methods whose requests carry no body on this proxy
pub fn is_bodyless_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::DELETE | Method::TRACE | Method::CONNECT
    )
}

/// `Upgrade` plus `Connection: upgrade` on the request side
pub fn is_request_upgrade(head: &RequestHead) -> bool {
    if head.headers.get(http::header::UPGRADE).is_none() {
        return false;
    }
    head.headers
        .get(http::header::CONNECTION)
        .map(|v| parse_connection_value(v).upgrade)
        .unwrap_or(false)
}

/// a 101 with an `Upgrade` header on the response side
pub fn is_response_upgrade(head: &ResponseHead) -> bool {
    head.status == http::StatusCode::SWITCHING_PROTOCOLS
        && head.headers.get(http::header::UPGRADE).is_some()
}

/// `Expect: 100-continue`
pub fn is_expect_continue(head: &RequestHead) -> bool {
    head.headers
        .get(http::header::EXPECT)
        .map(|v| v.as_bytes().eq_ignore_ascii_case(b"100-continue"))
        .unwrap_or(false)
}

/// the keepalive default when no `Connection` header speaks:
/// on for 1.1, off for 1.0 and below
pub fn default_keepalive(version: Version) -> bool {
    version == Version::HTTP_11
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_token_list() {
        let v = HeaderValue::from_static("Upgrade, Keep-Alive");
        let parsed = parse_connection_value(&v);
        assert!(parsed.upgrade);
        assert!(parsed.keep_alive);
        assert!(!parsed.close);
    }

    #[test]
    fn keepalive_params() {
        let v = HeaderValue::from_static("timeout=15, max=100");
        assert_eq!(parse_keepalive_params(&v), (Some(15), Some(100)));
    }

    #[test]
    fn content_length_rejects_garbage() {
        assert_eq!(content_length(Some(&HeaderValue::from_static("12"))), Some(12));
        assert_eq!(content_length(Some(&HeaderValue::from_static("-1"))), None);
        assert_eq!(content_length(Some(&HeaderValue::from_static("abc"))), None);
        assert_eq!(content_length(None), None);
    }

    #[test]
    fn bodyless_methods_match_the_table() {
        assert!(is_bodyless_method(&Method::GET));
        assert!(is_bodyless_method(&Method::CONNECT));
        assert!(!is_bodyless_method(&Method::POST));
    }
}
