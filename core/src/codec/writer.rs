use bytes::{BufMut, BytesMut};
use http::HeaderMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::prelude::{Error, ErrorKind, OrErr, Result};

/// framing state for one message body being written out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Uninit,
    ContentLength { total: usize, written: usize },
    Chunked { written: usize },
    UntilClose { written: usize },
    Done { written: usize },
}

/// body writer over any byte stream, mirror of the reader's framing modes
#[derive(Debug)]
pub struct BodyWriter {
    state: WriteState,
}

impl BodyWriter {
    pub fn new() -> Self {
        BodyWriter {
            state: WriteState::Uninit,
        }
    }

    pub fn init_content_length(&mut self, total: usize) {
        self.state = WriteState::ContentLength { total, written: 0 };
    }

    pub fn init_chunked(&mut self) {
        self.state = WriteState::Chunked { written: 0 };
    }

    pub fn init_until_close(&mut self) {
        self.state = WriteState::UntilClose { written: 0 };
    }

    pub fn finished(&self) -> bool {
        match self.state {
            WriteState::Done { .. } => true,
            WriteState::ContentLength { total, written } => written >= total,
            _ => false,
        }
    }

    pub fn bytes_written(&self) -> usize {
        match self.state {
            WriteState::Uninit => 0,
            WriteState::ContentLength { written, .. } => written,
            WriteState::Chunked { written } => written,
            WriteState::UntilClose { written } => written,
            WriteState::Done { written } => written,
        }
    }

    /// write one body chunk with the initialized framing
    pub async fn write_body<S>(&mut self, stream: &mut S, data: &[u8]) -> Result<Option<usize>>
    where
        S: AsyncWrite + Unpin + Send,
    {
        match self.state {
            WriteState::Done { .. } => Ok(None),
            WriteState::ContentLength { total, written } => {
                if written >= total {
                    return Ok(None);
                }
                let mut to_write = total - written;
                if to_write < data.len() {
                    tracing::warn!("body exceeds content-length {}, truncating", total);
                } else {
                    to_write = data.len();
                }
                stream
                    .write_all(&data[..to_write])
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "write body")?;
                self.state = WriteState::ContentLength {
                    total,
                    written: written + to_write,
                };
                if self.finished() {
                    stream
                        .flush()
                        .await
                        .or_err(ErrorKind::ConnectionTermination, "flush body")?;
                }
                Ok(Some(to_write))
            }
            WriteState::Chunked { written } => {
                // one contiguous frame per chunk: size line, payload, crlf
                let mut frame = BytesMut::with_capacity(data.len() + 16);
                frame.put_slice(format!("{:X}\r\n", data.len()).as_bytes());
                frame.put_slice(data);
                frame.put_slice(b"\r\n");
                stream
                    .write_all(&frame)
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "write chunk")?;
                stream
                    .flush()
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "flush chunk")?;
                self.state = WriteState::Chunked {
                    written: written + data.len(),
                };
                Ok(Some(data.len()))
            }
            WriteState::UntilClose { written } => {
                stream
                    .write_all(data)
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "write body")?;
                stream
                    .flush()
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "flush body")?;
                self.state = WriteState::UntilClose {
                    written: written + data.len(),
                };
                Ok(Some(data.len()))
            }
            WriteState::Uninit => Err(Error::explain(ErrorKind::CodecClient, "body writer not initialized")),
        }
    }

    /// close the body framing; chunked emits the terminal chunk and any
    /// trailers, content-length checks that everything promised was written
    pub async fn finish<S>(
        &mut self,
        stream: &mut S,
        trailers: Option<&HeaderMap>,
    ) -> Result<Option<usize>>
    where
        S: AsyncWrite + Unpin + Send,
    {
        match self.state {
            WriteState::Uninit | WriteState::Done { .. } => Ok(None),
            WriteState::ContentLength { total, written } => {
                self.state = WriteState::Done { written };
                if written < total {
                    return Err(Error::explain(
                        ErrorKind::PrematureResponse,
                        format!("wrote {} of {} body bytes", written, total),
                    ));
                }
                Ok(Some(written))
            }
            WriteState::Chunked { written } => {
                let mut frame = BytesMut::with_capacity(64);
                frame.put_slice(b"0\r\n");
                if let Some(trailers) = trailers {
                    for (name, value) in trailers.iter() {
                        frame.put_slice(name.as_str().as_bytes());
                        frame.put_slice(b": ");
                        frame.put_slice(value.as_bytes());
                        frame.put_slice(b"\r\n");
                    }
                }
                frame.put_slice(b"\r\n");
                stream
                    .write_all(&frame)
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "write last chunk")?;
                self.state = WriteState::Done { written };
                Ok(Some(written))
            }
            WriteState::UntilClose { written } => {
                self.state = WriteState::Done { written };
                Ok(Some(written))
            }
        }
    }
}

impl Default for BodyWriter {
    fn default() -> Self {
        BodyWriter::new()
    }
}
