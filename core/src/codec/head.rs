use bytes::{BufMut, Bytes, BytesMut};
use http::header::AsHeaderName;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};

use crate::prelude::{Error, ErrorKind, Result};

use super::case::{CaseHeaderName, IntoCaseHeaderName};

const MAX_HEADER_COUNT: usize = 4096;
const INIT_HEADER_SIZE: usize = 8;
const BUILD_HEADER_BUFFER: usize = 512;

const CRLF: &[u8; 2] = b"\r\n";
const HEADER_DELIMITER: &[u8; 2] = b": ";
const SP: &[u8; 1] = b" ";

pub type CaseMap = HeaderMap<CaseHeaderName>;

fn serve_capacity(hint: Option<usize>) -> usize {
    std::cmp::min(hint.unwrap_or(INIT_HEADER_SIZE), MAX_HEADER_COUNT)
}

fn raw_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

/// parsed request line plus headers, case map alongside
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    header_case: CaseMap,
    raw_path: Bytes,
}

impl RequestHead {
    pub fn build<M>(method: M, raw_path: &[u8], version: Version, hint: Option<usize>) -> Result<Self>
    where
        M: TryInto<Method>,
    {
        let method = method
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid method"))?;
        let uri = Uri::try_from(raw_path)
            .map_err(|e| Error::because(ErrorKind::CodecProtocol, "invalid request target", e))?;
        let capacity = serve_capacity(hint);
        Ok(RequestHead {
            method,
            uri,
            version,
            headers: HeaderMap::with_capacity(capacity),
            header_case: CaseMap::with_capacity(capacity),
            raw_path: Bytes::copy_from_slice(raw_path),
        })
    }

    pub fn raw_path(&self) -> &[u8] {
        &self.raw_path
    }

    /// uri path component
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// replace the request target
    pub fn set_uri(&mut self, uri: Uri) {
        self.raw_path = Bytes::copy_from_slice(uri.to_string().as_bytes());
        self.uri = uri;
    }

    /// `Host` header as a string, empty when missing or not utf8
    pub fn host(&self) -> &str {
        self.headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// add without displacing same-named headers
    pub fn append_header<N, V>(&mut self, name: N, value: V) -> Result<()>
    where
        N: IntoCaseHeaderName,
        V: TryInto<HeaderValue>,
    {
        let case_name = name.into_case_header_name();
        let header_name: HeaderName = case_name
            .as_slice()
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid header name"))?;
        let header_value = value
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid header value"))?;
        self.header_case.append(header_name.clone(), case_name);
        self.headers.append(header_name, header_value);
        Ok(())
    }

    /// add or replace
    pub fn insert_header<N, V>(&mut self, name: N, value: V) -> Result<()>
    where
        N: IntoCaseHeaderName,
        V: TryInto<HeaderValue>,
    {
        let case_name = name.into_case_header_name();
        let header_name: HeaderName = case_name
            .as_slice()
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid header name"))?;
        let header_value = value
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid header value"))?;
        self.header_case.insert(header_name.clone(), case_name);
        self.headers.insert(header_name, header_value);
        Ok(())
    }

    pub fn remove_header<'a, N: ?Sized>(&mut self, name: &'a N)
    where
        &'a N: AsHeaderName,
    {
        self.header_case.remove(name);
        self.headers.remove(name);
    }

    /// serialize request line and headers to wire format
    pub fn write_to(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(BUILD_HEADER_BUFFER);
        buf.put_slice(self.method.as_str().as_bytes());
        buf.put_slice(SP);
        buf.put_slice(&self.raw_path);
        buf.put_slice(SP);
        buf.put_slice(raw_version(self.version).as_bytes());
        buf.put_slice(CRLF);
        write_headers(&mut buf, &self.headers, &self.header_case);
        buf.put_slice(CRLF);
        buf
    }
}

/// parsed status line plus headers
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    header_case: CaseMap,
    reason_phrase: Option<String>,
}

impl ResponseHead {
    pub fn build<S>(status: S, version: Version, hint: Option<usize>) -> Result<Self>
    where
        S: TryInto<StatusCode>,
    {
        let status = status
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid status code"))?;
        let capacity = serve_capacity(hint);
        Ok(ResponseHead {
            status,
            version,
            headers: HeaderMap::with_capacity(capacity),
            header_case: CaseMap::with_capacity(capacity),
            reason_phrase: None,
        })
    }

    pub fn set_reason_phrase(&mut self, reason: Option<&str>) {
        // the canonical phrase needs no storage
        if reason == self.status.canonical_reason() {
            self.reason_phrase = None;
            return;
        }
        self.reason_phrase = reason.map(str::to_string);
    }

    pub fn reason_phrase(&self) -> Option<&str> {
        self.reason_phrase
            .as_deref()
            .or_else(|| self.status.canonical_reason())
    }

    pub fn append_header<N, V>(&mut self, name: N, value: V) -> Result<()>
    where
        N: IntoCaseHeaderName,
        V: TryInto<HeaderValue>,
    {
        let case_name = name.into_case_header_name();
        let header_name: HeaderName = case_name
            .as_slice()
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid header name"))?;
        let header_value = value
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid header value"))?;
        self.header_case.append(header_name.clone(), case_name);
        self.headers.append(header_name, header_value);
        Ok(())
    }

    pub fn insert_header<N, V>(&mut self, name: N, value: V) -> Result<()>
    where
        N: IntoCaseHeaderName,
        V: TryInto<HeaderValue>,
    {
        let case_name = name.into_case_header_name();
        let header_name: HeaderName = case_name
            .as_slice()
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid header name"))?;
        let header_value = value
            .try_into()
            .map_err(|_| Error::explain(ErrorKind::CodecProtocol, "invalid header value"))?;
        self.header_case.insert(header_name.clone(), case_name);
        self.headers.insert(header_name, header_value);
        Ok(())
    }

    pub fn remove_header<'a, N: ?Sized>(&mut self, name: &'a N)
    where
        &'a N: AsHeaderName,
    {
        self.header_case.remove(name);
        self.headers.remove(name);
    }

    /// serialize status line and headers to wire format
    pub fn write_to(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(BUILD_HEADER_BUFFER);
        buf.put_slice(raw_version(self.version).as_bytes());
        buf.put_slice(SP);
        buf.put_slice(self.status.as_str().as_bytes());
        buf.put_slice(SP);
        if let Some(reason) = self.reason_phrase() {
            buf.put_slice(reason.as_bytes());
        }
        buf.put_slice(CRLF);
        write_headers(&mut buf, &self.headers, &self.header_case);
        buf.put_slice(CRLF);
        buf
    }
}

fn write_headers(buf: &mut BytesMut, headers: &HeaderMap, case: &CaseMap) {
    // the two maps are mutated in lockstep, so their iteration lines up;
    // fall back to the lowercase name if they ever diverge
    let mut case_iter = case.iter();
    for (name, value) in headers.iter() {
        let wire_name: &[u8] = match case_iter.next() {
            Some((case_key, case_name)) if case_key == name => case_name.as_slice(),
            _ => name.as_str().as_bytes(),
        };
        buf.put_slice(wire_name);
        buf.put_slice(HEADER_DELIMITER);
        buf.put_slice(value.as_bytes());
        buf.put_slice(CRLF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_head_serializes_with_wire_case() {
        let mut head =
            RequestHead::build("GET", b"/a/b?x=1", Version::HTTP_11, None).unwrap();
        head.append_header(
            CaseHeaderName::from_slice(b"X-CuStOm"),
            HeaderValue::from_static("v"),
        )
        .unwrap();
        head.append_header(http::header::HOST, "example.com").unwrap();
        let wire = head.write_to();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.starts_with("GET /a/b?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("X-CuStOm: v\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn response_head_has_reason_phrase() {
        let mut head = ResponseHead::build(404, Version::HTTP_11, None).unwrap();
        head.set_reason_phrase(None);
        let wire = head.write_to();
        assert!(String::from_utf8_lossy(&wire).starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn bad_method_is_a_codec_error() {
        let err = RequestHead::build("BAD METHOD", b"/", Version::HTTP_11, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CodecProtocol);
    }

    #[test]
    fn host_reads_the_host_header() {
        let mut head = RequestHead::build("GET", b"/", Version::HTTP_11, None).unwrap();
        head.insert_header(http::header::HOST, "svc.local:8443").unwrap();
        assert_eq!(head.host(), "svc.local:8443");
    }
}
