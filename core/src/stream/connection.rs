use std::os::unix::io::AsRawFd;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{self, AsyncRead, AsyncWrite, BufStream, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

use super::raw::RawStream;
use super::transport::UniqueId;

// large read buffering reduces syscalls; tls layers read in 16k records so
// a big l4 read buffer pays for itself
const BUF_READ_SIZE: usize = 64 * 1024;

// small write buffer to match the mss; userspace decides when to flush,
// which a kernel-side nagle cannot
const BUF_WRITE_SIZE: usize = 1460;

/// a buffered, framed byte stream over one accepted or dialed socket.
/// callers must flush() after writes or data can sit in the buffer.
#[derive(Debug)]
pub struct Connection {
    stream: BufStream<RawStream>,
    rewind_read_buf: Vec<u8>,
}

impl Connection {
    /// push bytes back so the next read returns them first.
    /// used when a codec over-reads past the end of one message.
    pub fn rewind(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.rewind_read_buf.extend_from_slice(data);
        }
    }

    /// tcp only, no-op for unix sockets
    pub fn set_no_delay(&mut self) {
        if let RawStream::Tcp(stream) = self.stream.get_mut() {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("failed to set nodelay: {}", e);
            }
        }
    }
}

impl From<TcpStream> for Connection {
    fn from(tcp_stream: TcpStream) -> Self {
        Connection {
            stream: BufStream::with_capacity(
                BUF_READ_SIZE,
                BUF_WRITE_SIZE,
                RawStream::Tcp(tcp_stream),
            ),
            rewind_read_buf: Vec::new(),
        }
    }
}

impl From<UnixStream> for Connection {
    fn from(unix_stream: UnixStream) -> Self {
        Connection {
            stream: BufStream::with_capacity(
                BUF_READ_SIZE,
                BUF_WRITE_SIZE,
                RawStream::Unix(unix_stream),
            ),
            rewind_read_buf: Vec::new(),
        }
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.stream.get_ref().as_raw_fd()
    }
}

impl UniqueId for Connection {
    fn unique_id(&self) -> i32 {
        self.as_raw_fd()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.rewind_read_buf.is_empty() {
            let n = self.rewind_read_buf.len().min(buf.remaining());
            let head: Vec<u8> = self.rewind_read_buf.drain(..n).collect();
            buf.put_slice(&head);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn rewind_bytes_are_read_first() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"world").await.unwrap();
        });
        let client = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::from(client);
        conn.rewind(b"hello ");
        let mut out = vec![0u8; 6];
        conn.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"hello ");
        let mut rest = vec![0u8; 5];
        conn.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"world");
        server.await.unwrap();
    }
}
