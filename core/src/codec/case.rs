use bytes::Bytes;
use http::header;
use http::HeaderName;

/// header name exactly as it appeared on the wire.
/// `http::HeaderMap` lowercases names; proxied peers sometimes care about
/// the original casing, so the sessions carry both.
#[derive(Debug, Clone)]
pub struct CaseHeaderName(Bytes);

impl CaseHeaderName {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(buf: &[u8]) -> Self {
        CaseHeaderName(Bytes::copy_from_slice(buf))
    }
}

/// conversion into a case-preserving header name
pub trait IntoCaseHeaderName {
    fn into_case_header_name(self) -> CaseHeaderName;
}

impl IntoCaseHeaderName for CaseHeaderName {
    fn into_case_header_name(self) -> CaseHeaderName {
        self
    }
}

impl IntoCaseHeaderName for String {
    fn into_case_header_name(self) -> CaseHeaderName {
        CaseHeaderName(self.into())
    }
}

impl IntoCaseHeaderName for &'static str {
    fn into_case_header_name(self) -> CaseHeaderName {
        CaseHeaderName(self.into())
    }
}

impl IntoCaseHeaderName for Bytes {
    fn into_case_header_name(self) -> CaseHeaderName {
        CaseHeaderName(self)
    }
}

impl IntoCaseHeaderName for HeaderName {
    fn into_case_header_name(self) -> CaseHeaderName {
        CaseHeaderName(titled(&self))
    }
}

impl IntoCaseHeaderName for &HeaderName {
    fn into_case_header_name(self) -> CaseHeaderName {
        CaseHeaderName(titled(self))
    }
}

fn titled(name: &HeaderName) -> Bytes {
    match titled_str(name) {
        Some(s) => Bytes::from_static(s.as_bytes()),
        None => Bytes::copy_from_slice(name.as_str().as_bytes()),
    }
}

/// canonical title case for the names we synthesize ourselves
fn titled_str(name: &HeaderName) -> Option<&'static str> {
    Some(match *name {
        header::CACHE_CONTROL => "Cache-Control",
        header::CONNECTION => "Connection",
        header::CONTENT_LENGTH => "Content-Length",
        header::CONTENT_TYPE => "Content-Type",
        header::DATE => "Date",
        header::HOST => "Host",
        header::LOCATION => "Location",
        header::ORIGIN => "Origin",
        header::SERVER => "Server",
        header::TRANSFER_ENCODING => "Transfer-Encoding",
        header::UPGRADE => "Upgrade",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_case_is_preserved() {
        let name = CaseHeaderName::from_slice(b"X-CuStOm");
        assert_eq!(name.as_slice(), b"X-CuStOm");
    }

    #[test]
    fn known_names_get_title_case() {
        let name = header::CONTENT_LENGTH.into_case_header_name();
        assert_eq!(name.as_slice(), b"Content-Length");
    }
}
