use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::prelude::{Error, ErrorKind, OrErr, Result};

const READ_BUF_SIZE: usize = 64 * 1024;
const MAX_CHUNK_HEAD: usize = 8 * 1024;
const MAX_TRAILER_SIZE: usize = 8 * 1024;

/// framing mode for one message body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    NoBody,
    ContentLength(usize),
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    /// expecting a chunk-size line
    Head,
    /// inside chunk payload, this many bytes left
    Data(usize),
    /// expecting the crlf that closes a chunk
    DataCrlf,
    /// expecting trailer lines after the zero chunk
    Trailers,
}

/// incremental body reader over any byte stream.
/// bytes over-read while parsing heads are handed in as `rewind` and served
/// before touching the stream again; bytes left after the body ends are
/// available through `leftover()` for pipelined messages.
#[derive(Debug)]
pub struct BodyReader {
    mode: Option<BodyMode>,
    buf: BytesMut,
    chunk: ChunkPhase,
    bytes_read: usize,
    finished: bool,
    trailers: Option<HeaderMap>,
}

impl BodyReader {
    pub fn new() -> Self {
        BodyReader {
            mode: None,
            buf: BytesMut::new(),
            chunk: ChunkPhase::Head,
            bytes_read: 0,
            finished: false,
            trailers: None,
        }
    }

    pub fn init(&mut self, mode: BodyMode, rewind: &[u8]) {
        self.mode = Some(mode);
        self.buf = BytesMut::from(rewind);
        self.chunk = ChunkPhase::Head;
        self.bytes_read = 0;
        self.finished = matches!(mode, BodyMode::NoBody | BodyMode::ContentLength(0));
        self.trailers = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.mode.is_some()
    }

    pub fn mode(&self) -> Option<BodyMode> {
        self.mode
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// trailers parsed after a chunked body, if the peer sent any
    pub fn take_trailers(&mut self) -> Option<HeaderMap> {
        self.trailers.take()
    }

    /// unconsumed input past the end of this body
    pub fn leftover(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// pull the next body chunk, `None` once the body is complete
    pub async fn read_body<S>(&mut self, stream: &mut S) -> Result<Option<Bytes>>
    where
        S: AsyncRead + Unpin + Send,
    {
        if self.finished {
            return Ok(None);
        }
        match self.mode {
            Some(BodyMode::NoBody) => Ok(None),
            Some(BodyMode::ContentLength(total)) => self.read_sized(stream, total).await,
            Some(BodyMode::Chunked) => self.read_chunked(stream).await,
            Some(BodyMode::UntilClose) => self.read_until_close(stream).await,
            None => Err(Error::explain(ErrorKind::CodecClient, "body reader not initialized")),
        }
    }

    async fn fill<S>(&mut self, stream: &mut S) -> Result<usize>
    where
        S: AsyncRead + Unpin + Send,
    {
        self.buf.reserve(READ_BUF_SIZE);
        stream
            .read_buf(&mut self.buf)
            .await
            .or_err(ErrorKind::ConnectionTermination, "read body")
    }

    async fn read_sized<S>(&mut self, stream: &mut S, total: usize) -> Result<Option<Bytes>>
    where
        S: AsyncRead + Unpin + Send,
    {
        let remaining = total - self.bytes_read;
        if self.buf.is_empty() {
            let n = self.fill(stream).await?;
            if n == 0 {
                self.finished = true;
                return Err(Error::explain(
                    ErrorKind::PrematureResponse,
                    format!("peer closed with {} of {} body bytes", self.bytes_read, total),
                ));
            }
        }
        let take = remaining.min(self.buf.len());
        let out = self.buf.split_to(take).freeze();
        self.bytes_read += take;
        if self.bytes_read >= total {
            self.finished = true;
        }
        Ok(Some(out))
    }

    async fn read_until_close<S>(&mut self, stream: &mut S) -> Result<Option<Bytes>>
    where
        S: AsyncRead + Unpin + Send,
    {
        if self.buf.is_empty() {
            let n = self.fill(stream).await?;
            if n == 0 {
                self.finished = true;
                return Ok(None);
            }
        }
        let out = self.buf.split().freeze();
        self.bytes_read += out.len();
        Ok(Some(out))
    }

    async fn read_chunked<S>(&mut self, stream: &mut S) -> Result<Option<Bytes>>
    where
        S: AsyncRead + Unpin + Send,
    {
        loop {
            match self.chunk {
                ChunkPhase::Data(remaining) => {
                    if self.buf.is_empty() {
                        let n = self.fill(stream).await?;
                        if n == 0 {
                            self.finished = true;
                            return Err(Error::explain(
                                ErrorKind::PrematureResponse,
                                "peer closed inside a chunk",
                            ));
                        }
                    }
                    let take = remaining.min(self.buf.len());
                    let out = self.buf.split_to(take).freeze();
                    self.bytes_read += take;
                    self.chunk = if take == remaining {
                        ChunkPhase::DataCrlf
                    } else {
                        ChunkPhase::Data(remaining - take)
                    };
                    return Ok(Some(out));
                }
                ChunkPhase::DataCrlf => {
                    while self.buf.len() < 2 {
                        let n = self.fill(stream).await?;
                        if n == 0 {
                            self.finished = true;
                            return Err(Error::explain(
                                ErrorKind::PrematureResponse,
                                "peer closed before chunk crlf",
                            ));
                        }
                    }
                    if &self.buf[..2] != b"\r\n" {
                        self.finished = true;
                        return Err(Error::explain(ErrorKind::CodecProtocol, "chunk not crlf terminated"));
                    }
                    self.buf.advance(2);
                    self.chunk = ChunkPhase::Head;
                }
                ChunkPhase::Head => match httparse::parse_chunk_size(&self.buf) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        self.buf.advance(consumed);
                        if size == 0 {
                            self.chunk = ChunkPhase::Trailers;
                        } else {
                            self.chunk = ChunkPhase::Data(size as usize);
                        }
                    }
                    Ok(httparse::Status::Partial) => {
                        if self.buf.len() > MAX_CHUNK_HEAD {
                            self.finished = true;
                            return Err(Error::explain(ErrorKind::BufferFlood, "chunk head over limit"));
                        }
                        let n = self.fill(stream).await?;
                        if n == 0 {
                            self.finished = true;
                            return Err(Error::explain(
                                ErrorKind::PrematureResponse,
                                "peer closed inside a chunk head",
                            ));
                        }
                    }
                    Err(e) => {
                        self.finished = true;
                        return Err(Error::explain(ErrorKind::CodecProtocol, format!("bad chunk head: {}", e)));
                    }
                },
                ChunkPhase::Trailers => {
                    loop {
                        if let Some(end) = self.parse_trailer_section()? {
                            self.buf.advance(end);
                            self.finished = true;
                            return Ok(None);
                        }
                        if self.buf.len() > MAX_TRAILER_SIZE {
                            return Err(Error::explain(ErrorKind::BufferFlood, "trailers over limit"));
                        }
                        let n = self.fill(stream).await?;
                        if n == 0 {
                            return Err(Error::explain(
                                ErrorKind::PrematureResponse,
                                "peer closed inside trailers",
                            ));
                        }
                    }
                }
            }
        }
    }

    /// try to parse the trailer section currently buffered.
    /// returns the number of consumed bytes once the final crlf is seen.
    fn parse_trailer_section(&mut self) -> Result<Option<usize>> {
        // fast path: no trailers at all
        if self.buf.len() >= 2 && &self.buf[..2] == b"\r\n" {
            return Ok(Some(2));
        }
        let Some(end) = find_double_crlf(&self.buf) else {
            return Ok(None);
        };
        let mut trailers = HeaderMap::new();
        for line in self.buf[..end].split(|&b| b == b'\n') {
            let line = strip_cr(line);
            if line.is_empty() {
                continue;
            }
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                return Err(Error::explain(ErrorKind::CodecProtocol, "malformed trailer line"));
            };
            let name = HeaderName::from_bytes(&line[..colon])
                .or_err(ErrorKind::CodecProtocol, "trailer name")?;
            let value = HeaderValue::from_bytes(trim_ows(&line[colon + 1..]))
                .or_err(ErrorKind::CodecProtocol, "trailer value")?;
            trailers.append(name, value);
        }
        if !trailers.is_empty() {
            self.trailers = Some(trailers);
        }
        Ok(Some(end + 4))
    }
}

impl Default for BodyReader {
    fn default() -> Self {
        BodyReader::new()
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn trim_ows(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(reader: &mut BodyReader, mut input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = reader.read_body(&mut input).await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn content_length_body() {
        let mut reader = BodyReader::new();
        reader.init(BodyMode::ContentLength(5), b"he");
        let body = drain(&mut reader, b"llo!extra").await.unwrap();
        assert_eq!(&body, b"hello");
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn zero_content_length_finishes_immediately() {
        let mut reader = BodyReader::new();
        reader.init(BodyMode::ContentLength(0), b"");
        assert!(reader.is_finished());
        let body = drain(&mut reader, b"").await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn chunked_body_with_split_chunks() {
        let mut reader = BodyReader::new();
        // the first data byte rides with the head parse leftover
        reader.init(BodyMode::Chunked, b"4\r\nwi");
        let body = drain(&mut reader, b"ki\r\n5\r\npedia\r\n0\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(&body, b"wikipedia");
        assert!(reader.is_finished());
        assert!(reader.take_trailers().is_none());
    }

    #[tokio::test]
    async fn chunked_trailers_are_captured() {
        let mut reader = BodyReader::new();
        reader.init(BodyMode::Chunked, b"");
        let body = drain(&mut reader, b"3\r\nabc\r\n0\r\nX-Sum: ok\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(&body, b"abc");
        let trailers = reader.take_trailers().unwrap();
        assert_eq!(trailers.get("x-sum").unwrap(), "ok");
    }

    #[tokio::test]
    async fn short_content_length_is_premature() {
        let mut reader = BodyReader::new();
        reader.init(BodyMode::ContentLength(10), b"");
        let err = drain(&mut reader, b"only4").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PrematureResponse);
    }

    #[tokio::test]
    async fn until_close_reads_to_eof() {
        let mut reader = BodyReader::new();
        reader.init(BodyMode::UntilClose, b"par");
        let body = drain(&mut reader, b"tial").await.unwrap();
        assert_eq!(&body, b"partial");
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn pipelined_leftover_is_preserved() {
        let mut reader = BodyReader::new();
        reader.init(BodyMode::ContentLength(3), b"abcGET /next");
        let body = drain(&mut reader, b"").await.unwrap();
        assert_eq!(&body, b"abc");
        assert_eq!(&reader.leftover()[..], b"GET /next");
    }
}
