use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, Version};
use httparse::Status;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::prelude::{Error, ErrorKind, OrErr, Result};
use crate::stream::Stream;

use super::case::CaseHeaderName;
use super::head::{RequestHead, ResponseHead};
use super::reader::{BodyMode, BodyReader};
use super::task::Task;
use super::util;
use super::writer::BodyWriter;

const INIT_BUFFER_SIZE: usize = 1024;
const MAX_HEAD_SIZE: usize = 8192;
const MAX_HEADERS_COUNT: usize = 256;

/// client side of one upstream connection: emits a request, parses the
/// response, decides whether the connection can go back to the pool
pub struct UpstreamSession {
    stream: Stream,
    request_head: Option<RequestHead>,
    response_head: Option<ResponseHead>,
    body_reader: BodyReader,
    body_writer: BodyWriter,
    upgrade: bool,
    header_task_sent: bool,
    requests_sent: usize,
}

impl UpstreamSession {
    pub fn new(stream: Stream) -> Self {
        UpstreamSession {
            stream,
            request_head: None,
            response_head: None,
            body_reader: BodyReader::new(),
            body_writer: BodyWriter::new(),
            upgrade: false,
            header_task_sent: false,
            requests_sent: 0,
        }
    }

    /// reset per-request state so the session can carry another exchange
    pub fn reuse(&mut self) {
        self.request_head = None;
        self.response_head = None;
        self.body_reader = BodyReader::new();
        self.body_writer = BodyWriter::new();
        self.upgrade = false;
        self.header_task_sent = false;
    }

    pub fn requests_sent(&self) -> usize {
        self.requests_sent
    }

    /// pick request-body framing from the outgoing head
    fn init_request_body_writer(&mut self, head: &RequestHead) {
        if util::is_request_upgrade(head) {
            self.body_writer.init_until_close();
            return;
        }
        if util::is_chunked_encoding(head.headers.get(http::header::TRANSFER_ENCODING)) {
            self.body_writer.init_chunked();
            return;
        }
        match util::content_length(head.headers.get(http::header::CONTENT_LENGTH)) {
            Some(n) => self.body_writer.init_content_length(n),
            None => self.body_writer.init_content_length(0),
        }
    }

    /// serialize and send the request head
    pub async fn write_request_header(&mut self, head: RequestHead) -> Result<()> {
        self.init_request_body_writer(&head);
        self.upgrade = util::is_request_upgrade(&head);
        let buf = head.write_to();
        self.stream
            .write_all(&buf)
            .await
            .or_err(ErrorKind::ConnectionTermination, "write request head")?;
        self.stream
            .flush()
            .await
            .or_err(ErrorKind::ConnectionTermination, "flush request head")?;
        self.request_head = Some(head);
        self.requests_sent += 1;
        Ok(())
    }

    pub async fn write_request_body(&mut self, data: &[u8]) -> Result<Option<usize>> {
        self.body_writer.write_body(&mut self.stream, data).await
    }

    pub async fn finish_request_body(&mut self, trailers: Option<&HeaderMap>) -> Result<()> {
        self.body_writer.finish(&mut self.stream, trailers).await?;
        self.stream
            .flush()
            .await
            .or_err(ErrorKind::ConnectionTermination, "flush request")?;
        Ok(())
    }

    /// parse one response head off the wire
    async fn read_response_head(&mut self) -> Result<ResponseHead> {
        let mut read_buffer = BytesMut::with_capacity(INIT_BUFFER_SIZE);
        // bytes past an earlier informational head
        let leftover = self.body_reader.leftover();
        if !leftover.is_empty() {
            read_buffer.extend_from_slice(&leftover);
        }
        let mut need_read = read_buffer.is_empty();

        loop {
            if read_buffer.len() > MAX_HEAD_SIZE {
                return Err(Error::explain(
                    ErrorKind::BufferFlood,
                    format!("response head larger than {}", MAX_HEAD_SIZE),
                ));
            }
            if need_read {
                let n = self
                    .stream
                    .read_buf(&mut read_buffer)
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "read response head")?;
                if n == 0 {
                    return Err(Error::explain(
                        ErrorKind::ConnectionTermination,
                        "upstream closed before response head",
                    ));
                }
            }

            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
            let mut response = httparse::Response::new(&mut headers);
            let mut parser = httparse::ParserConfig::default();
            parser.allow_spaces_after_header_name_in_responses(true);
            parser.allow_obsolete_multiline_headers_in_responses(true);

            match parser.parse_response(&mut response, &read_buffer) {
                Ok(Status::Complete(size)) => {
                    let version = match response.version {
                        Some(1) => Version::HTTP_11,
                        Some(0) => Version::HTTP_10,
                        _ => Version::HTTP_09,
                    };
                    let code = response.code.ok_or_else(|| {
                        Error::explain(ErrorKind::CodecProtocol, "response without status")
                    })?;
                    let mut head = ResponseHead::build(code, version, Some(response.headers.len()))?;
                    head.set_reason_phrase(response.reason);
                    for header in response.headers.iter() {
                        if header.name.is_empty() {
                            continue;
                        }
                        head.append_header(
                            CaseHeaderName::from_slice(header.name.as_bytes()),
                            http::HeaderValue::from_bytes(header.value)
                                .or_err(ErrorKind::CodecProtocol, "header value")?,
                        )?;
                    }
                    self.init_response_body_reader(&head, &read_buffer[size..]);
                    return Ok(head);
                }
                Ok(Status::Partial) => {
                    need_read = true;
                    continue;
                }
                Err(e) => {
                    return Err(Error::because(ErrorKind::CodecProtocol, "parse response", e));
                }
            }
        }
    }

    /// pick response-body framing from the parsed head
    fn init_response_body_reader(&mut self, head: &ResponseHead, rewind: &[u8]) {
        self.body_reader = BodyReader::new();
        let head_request = self
            .request_head
            .as_ref()
            .map(|h| h.method == Method::HEAD)
            .unwrap_or(false);
        if head_request {
            self.body_reader.init(BodyMode::ContentLength(0), rewind);
            return;
        }
        match head.status.as_u16() {
            101 => {
                // protocol switch, the tunnel owns the bytes from here
                self.body_reader.init(BodyMode::UntilClose, rewind);
                return;
            }
            100..=199 => {
                // informational, the next head follows; keep the leftover
                self.body_reader.init(BodyMode::ContentLength(0), rewind);
                return;
            }
            204 | 304 => {
                self.body_reader.init(BodyMode::ContentLength(0), rewind);
                return;
            }
            _ => {}
        }
        if util::is_chunked_encoding(head.headers.get(http::header::TRANSFER_ENCODING)) {
            self.body_reader.init(BodyMode::Chunked, rewind);
            return;
        }
        match util::content_length(head.headers.get(http::header::CONTENT_LENGTH)) {
            Some(n) => self.body_reader.init(BodyMode::ContentLength(n), rewind),
            None => self.body_reader.init(BodyMode::UntilClose, rewind),
        }
    }

    /// pull the next unit of response.
    /// informational 1xx heads (other than 101) are consumed here.
    pub async fn read_response_task(&mut self) -> Result<Task> {
        if self.response_head.is_none() {
            loop {
                let head = self.read_response_head().await?;
                if head.status.is_informational() && head.status.as_u16() != 101 {
                    tracing::debug!("skipping informational response {}", head.status);
                    continue;
                }
                self.response_head = Some(head);
                break;
            }
            let end = self.body_reader.is_finished();
            self.header_task_sent = true;
            let head = self
                .response_head
                .clone()
                .ok_or_else(|| Error::new(ErrorKind::Internal))?;
            return Ok(Task::Header(head, end));
        }
        if self.body_reader.is_finished() {
            match self.body_reader.take_trailers() {
                Some(trailers) => return Ok(Task::Trailer(Some(Box::new(trailers)))),
                None => return Ok(Task::Done),
            }
        }
        let body = self.body_reader.read_body(&mut self.stream).await?;
        let end = self.body_reader.is_finished();
        Ok(Task::Body(body, end))
    }

    pub fn response_head(&self) -> Option<&ResponseHead> {
        self.response_head.as_ref()
    }

    /// whether this exchange switched protocols
    pub fn is_session_upgrade(&self) -> bool {
        self.upgrade
            && self
                .response_head
                .as_ref()
                .map(util::is_response_upgrade)
                .unwrap_or(false)
    }

    /// whether the connection may return to the pool after this exchange
    pub fn is_connection_reusable(&self) -> bool {
        if self.upgrade {
            return false;
        }
        let Some(head) = self.response_head.as_ref() else {
            return false;
        };
        if !self.body_reader.is_finished() {
            return false;
        }
        // until-close framing consumes the connection by definition
        if matches!(self.body_reader.mode(), Some(BodyMode::UntilClose)) {
            return false;
        }
        if let Some(value) = head.headers.get(http::header::CONNECTION) {
            let tokens = util::parse_connection_value(value);
            if tokens.close {
                return false;
            }
            if tokens.keep_alive {
                return true;
            }
        }
        util::default_keepalive(head.version)
    }

    pub fn return_stream(self) -> Stream {
        self.stream
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
