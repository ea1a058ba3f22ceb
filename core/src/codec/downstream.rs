use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode, Version};
use httparse::Status;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::prelude::{Error, ErrorKind, OrErr, Result};
use crate::stream::Stream;

use super::case::CaseHeaderName;
use super::head::{RequestHead, ResponseHead};
use super::reader::{BodyMode, BodyReader};
use super::util;
use super::writer::BodyWriter;

const INIT_BUFFER_SIZE: usize = 1024;
const MAX_HEAD_SIZE: usize = 8192;
const MAX_HEADERS_COUNT: usize = 256;

/// server side of one client connection: parses requests, emits responses,
/// carries the keepalive decision across messages
pub struct Downstream {
    stream: Stream,
    request_head: Option<RequestHead>,
    body_reader: BodyReader,
    body_writer: BodyWriter,
    keepalive: util::KeepaliveStatus,
    upgrade: bool,
    response_started: bool,
    request_count: usize,
}

impl Downstream {
    pub fn new(stream: Stream) -> Self {
        Downstream {
            stream,
            request_head: None,
            body_reader: BodyReader::new(),
            body_writer: BodyWriter::new(),
            keepalive: util::KeepaliveStatus::Off,
            upgrade: false,
            response_started: false,
            request_count: 0,
        }
    }

    /// parse the next request head off the wire.
    /// `Ok(false)` means the peer closed cleanly between requests.
    pub async fn read_request(&mut self) -> Result<bool> {
        self.request_head = None;
        self.response_started = false;
        self.body_writer = BodyWriter::new();
        let mut read_buffer = BytesMut::with_capacity(INIT_BUFFER_SIZE);
        // a pipelined request may already sit past the previous body
        let leftover = self.body_reader.leftover();
        if !leftover.is_empty() {
            read_buffer.extend_from_slice(&leftover);
        }

        let mut need_read = read_buffer.is_empty();
        loop {
            if read_buffer.len() > MAX_HEAD_SIZE {
                return Err(Error::explain(
                    ErrorKind::BufferFlood,
                    format!("request head larger than {}", MAX_HEAD_SIZE),
                ));
            }
            if need_read {
                let n = self
                    .stream
                    .read_buf(&mut read_buffer)
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "read request head")?;
                if n == 0 {
                    if read_buffer.is_empty() {
                        return Ok(false);
                    }
                    return Err(Error::explain(
                        ErrorKind::CodecProtocol,
                        "connection closed inside request head",
                    ));
                }
            }

            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
            let mut request = httparse::Request::new(&mut headers);
            match request.parse(&read_buffer) {
                Ok(Status::Complete(size)) => {
                    let version = match request.version {
                        Some(1) => Version::HTTP_11,
                        Some(0) => Version::HTTP_10,
                        _ => Version::HTTP_09,
                    };
                    let mut head = RequestHead::build(
                        request.method.unwrap_or(""),
                        request.path.unwrap_or("/").as_bytes(),
                        version,
                        Some(request.headers.len()),
                    )?;
                    for header in request.headers.iter() {
                        if header.name.is_empty() {
                            continue;
                        }
                        head.append_header(
                            CaseHeaderName::from_slice(header.name.as_bytes()),
                            http::HeaderValue::from_bytes(header.value)
                                .or_err(ErrorKind::CodecProtocol, "header value")?,
                        )?;
                    }
                    self.upgrade = util::is_request_upgrade(&head);
                    self.init_request_body_reader(&head, &read_buffer[size..]);
                    self.apply_request_keepalive(&head);
                    self.request_head = Some(head);
                    self.request_count += 1;
                    return Ok(true);
                }
                Ok(Status::Partial) => {
                    need_read = true;
                    continue;
                }
                Err(e) => {
                    return Err(Error::because(ErrorKind::CodecProtocol, "parse request", e));
                }
            }
        }
    }

    /// pick the body framing from the parsed request
    fn init_request_body_reader(&mut self, head: &RequestHead, rewind: &[u8]) {
        self.body_reader = BodyReader::new();
        if self.upgrade {
            // the tunnel takes over after the 101, no framed body
            self.body_reader.init(BodyMode::UntilClose, rewind);
            return;
        }
        if util::is_bodyless_method(&head.method) {
            self.body_reader.init(BodyMode::ContentLength(0), rewind);
            return;
        }
        if util::is_chunked_encoding(head.headers.get(http::header::TRANSFER_ENCODING)) {
            self.body_reader.init(BodyMode::Chunked, rewind);
            return;
        }
        match util::content_length(head.headers.get(http::header::CONTENT_LENGTH)) {
            Some(n) => self.body_reader.init(BodyMode::ContentLength(n), rewind),
            None => self.body_reader.init(BodyMode::ContentLength(0), rewind),
        }
    }

    /// keepalive from the request side: `Connection`/`Proxy-Connection`
    /// tokens win, then the version default
    fn apply_request_keepalive(&mut self, head: &RequestHead) {
        let mut decided = None;
        for name in [http::header::CONNECTION.as_str(), "proxy-connection"] {
            if let Some(value) = head.headers.get(name) {
                let tokens = util::parse_connection_value(value);
                if tokens.close {
                    decided = Some(false);
                } else if tokens.keep_alive && decided.is_none() {
                    decided = Some(true);
                }
            }
        }
        let on = decided.unwrap_or_else(|| util::default_keepalive(head.version));
        self.keepalive = if on {
            util::KeepaliveStatus::Infinite
        } else {
            util::KeepaliveStatus::Off
        };
    }

    pub fn request_head(&self) -> Option<&RequestHead> {
        self.request_head.as_ref()
    }

    pub fn request_head_mut(&mut self) -> Option<&mut RequestHead> {
        self.request_head.as_mut()
    }

    pub fn is_upgrade_request(&self) -> bool {
        self.upgrade
    }

    pub fn is_expecting_continue(&self) -> bool {
        self.request_head
            .as_ref()
            .map(util::is_expect_continue)
            .unwrap_or(false)
    }

    pub fn is_session_keepalive(&self) -> bool {
        self.keepalive.is_on()
    }

    pub fn set_keepalive_off(&mut self) {
        self.keepalive = util::KeepaliveStatus::Off;
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    /// next request-body chunk, `None` when the body is complete
    pub async fn read_body(&mut self) -> Result<Option<Bytes>> {
        self.body_reader.read_body(&mut self.stream).await
    }

    pub fn is_body_finished(&self) -> bool {
        self.body_reader.is_finished()
    }

    pub fn take_request_trailers(&mut self) -> Option<HeaderMap> {
        self.body_reader.take_trailers()
    }

    /// relay an interim `100 Continue` before reading the body
    pub async fn write_continue(&mut self) -> Result<()> {
        self.stream
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
            .await
            .or_err(ErrorKind::ConnectionTermination, "write 100-continue")?;
        self.stream
            .flush()
            .await
            .or_err(ErrorKind::ConnectionTermination, "flush 100-continue")
    }

    /// emit the response head and set up body framing from its headers
    pub async fn write_response_header(
        &mut self,
        head: &ResponseHead,
        end_stream: bool,
    ) -> Result<()> {
        if self.response_started {
            return Err(Error::explain(ErrorKind::CodecClient, "response already started"));
        }
        self.response_started = true;
        self.init_response_body_writer(head, end_stream);
        let buf = head.write_to();
        self.stream
            .write_all(&buf)
            .await
            .or_err(ErrorKind::ConnectionTermination, "write response head")?;
        self.stream
            .flush()
            .await
            .or_err(ErrorKind::ConnectionTermination, "flush response head")?;
        // a `Connection: close` response ends the session regardless of
        // what the request asked for
        if let Some(value) = head.headers.get(http::header::CONNECTION) {
            if util::parse_connection_value(value).close {
                self.keepalive = util::KeepaliveStatus::Off;
            }
        }
        if end_stream {
            self.finish_response(None).await?;
        }
        Ok(())
    }

    fn init_response_body_writer(&mut self, head: &ResponseHead, end_stream: bool) {
        let head_request = self
            .request_head
            .as_ref()
            .map(|h| h.method == Method::HEAD)
            .unwrap_or(false);
        let bodyless_status = matches!(
            head.status,
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED
        ) || head.status.is_informational();
        if head_request || bodyless_status {
            self.body_writer.init_content_length(0);
            return;
        }
        if util::is_chunked_encoding(head.headers.get(http::header::TRANSFER_ENCODING)) {
            self.body_writer.init_chunked();
            return;
        }
        match util::content_length(head.headers.get(http::header::CONTENT_LENGTH)) {
            Some(n) => self.body_writer.init_content_length(n),
            None => {
                if end_stream {
                    self.body_writer.init_content_length(0);
                } else {
                    // unknown length: write until close, no reuse
                    self.keepalive = util::KeepaliveStatus::Off;
                    self.body_writer.init_until_close();
                }
            }
        }
    }

    pub async fn write_response_body(&mut self, data: &[u8]) -> Result<Option<usize>> {
        self.body_writer.write_body(&mut self.stream, data).await
    }

    /// close the response framing and flush
    pub async fn finish_response(&mut self, trailers: Option<&HeaderMap>) -> Result<()> {
        self.body_writer.finish(&mut self.stream, trailers).await?;
        self.stream
            .flush()
            .await
            .or_err(ErrorKind::ConnectionTermination, "flush response")?;
        Ok(())
    }

    pub fn is_response_started(&self) -> bool {
        self.response_started
    }

    /// hand the raw stream over, for upgrade tunnels
    pub fn return_stream(self) -> Stream {
        self.stream
    }

    /// best-effort shutdown of the write half
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::connection::Connection;
    use tokio::net::{TcpListener, TcpStream};

    async fn tcp_pair() -> (Stream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Box::new(Connection::from(server)), client)
    }

    #[tokio::test]
    async fn parse_request_with_body_and_respond() {
        let (server, mut client) = tcp_pair().await;
        let mut session = Downstream::new(server);

        client
            .write_all(b"POST /submit HTTP/1.1\r\nHost: svc\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();

        assert!(session.read_request().await.unwrap());
        let head = session.request_head().unwrap();
        assert_eq!(head.method, Method::POST);
        assert_eq!(head.path(), "/submit");
        assert_eq!(head.host(), "svc");
        assert!(session.is_session_keepalive());

        let mut body = Vec::new();
        while let Some(chunk) = session.read_body().await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(&body, b"hello");

        let mut resp = ResponseHead::build(200, Version::HTTP_11, None).unwrap();
        resp.insert_header(http::header::CONTENT_LENGTH, "2").unwrap();
        session.write_response_header(&resp, false).await.unwrap();
        session.write_response_body(b"ok").await.unwrap();
        session.finish_response(None).await.unwrap();

        let mut out = vec![0u8; 256];
        let n = client.read(&mut out).await.unwrap();
        let text = String::from_utf8_lossy(&out[..n]).to_string();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nok"));
    }

    #[tokio::test]
    async fn connection_close_disables_keepalive() {
        let (server, mut client) = tcp_pair().await;
        let mut session = Downstream::new(server);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        assert!(session.read_request().await.unwrap());
        assert!(!session.is_session_keepalive());
    }

    #[tokio::test]
    async fn http10_keepalive_is_opt_in() {
        let (server, mut client) = tcp_pair().await;
        let mut session = Downstream::new(server);
        client
            .write_all(b"GET / HTTP/1.0\r\nHost: a\r\nConnection: keep-alive\r\n\r\n")
            .await
            .unwrap();
        assert!(session.read_request().await.unwrap());
        assert!(session.is_session_keepalive());
    }

    #[tokio::test]
    async fn get_requests_have_no_body() {
        let (server, mut client) = tcp_pair().await;
        let mut session = Downstream::new(server);
        client
            .write_all(b"GET /x HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\n")
            .await
            .unwrap();
        assert!(session.read_request().await.unwrap());
        assert!(session.is_body_finished());
        assert_eq!(session.read_body().await.unwrap(), None);
    }

    #[tokio::test]
    async fn clean_eof_between_requests() {
        let (server, client) = tcp_pair().await;
        drop(client);
        let mut session = Downstream::new(server);
        assert!(!session.read_request().await.unwrap());
    }
}
