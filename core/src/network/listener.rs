use std::net::SocketAddr as StdSocketAddr;

use tokio::net::{TcpListener, TcpSocket, UnixListener};

use crate::prelude::{ErrorKind, OrErr, Result};
use crate::stream::connection::Connection;
use crate::stream::Stream;

use super::address::Address;

const LISTENER_BACKLOG: u32 = 65535;

/// a bound passive socket vending accepted streams
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    /// bind the given address, tcp or unix
    pub async fn bind(address: &Address) -> Result<Listener> {
        match address {
            Address::Inet4(_) | Address::Inet6(_) => {
                let socket_address = address
                    .socket_addr()
                    .ok_or_else(|| crate::prelude::Error::new(ErrorKind::Internal))?;
                let tcp_socket = match socket_address {
                    StdSocketAddr::V4(_) => TcpSocket::new_v4(),
                    StdSocketAddr::V6(_) => TcpSocket::new_v6(),
                }
                .or_err(ErrorKind::Internal, "create listen socket")?;
                tcp_socket
                    .set_reuseaddr(true)
                    .or_err(ErrorKind::Internal, "set reuseaddr")?;
                tcp_socket
                    .bind(socket_address)
                    .or_err(ErrorKind::Internal, "bind listen socket")?;
                let listener = tcp_socket
                    .listen(LISTENER_BACKLOG)
                    .or_err(ErrorKind::Internal, "listen")?;
                Ok(Listener::Tcp(listener))
            }
            Address::Pipe(path) => {
                // unlink a stale socket from a previous run
                let _ = std::fs::remove_file(path);
                let listener =
                    UnixListener::bind(path).or_err(ErrorKind::Internal, "bind unix socket")?;
                // widen the backlog past the tokio default
                let std_listener = listener
                    .into_std()
                    .or_err(ErrorKind::Internal, "unix listener into std")?;
                let socket: socket2::Socket = std_listener.into();
                socket
                    .listen(LISTENER_BACKLOG as i32)
                    .or_err(ErrorKind::Internal, "unix listen backlog")?;
                let listener = UnixListener::from_std(socket.into())
                    .or_err(ErrorKind::Internal, "unix listener from std")?;
                Ok(Listener::Unix(listener))
            }
        }
    }

    /// accept one connection as a boxed stream plus the peer address
    pub async fn accept(&self) -> Result<(Stream, Address)> {
        match self {
            Listener::Tcp(listener) => {
                let (sock, peer) = listener
                    .accept()
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "tcp accept")?;
                let mut conn = Connection::from(sock);
                conn.set_no_delay();
                Ok((Box::new(conn), Address::from(peer)))
            }
            Listener::Unix(listener) => {
                let (sock, peer) = listener
                    .accept()
                    .await
                    .or_err(ErrorKind::ConnectionTermination, "unix accept")?;
                let path = peer
                    .as_pathname()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok((Box::new(Connection::from(sock)), Address::Pipe(path)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn bind_and_accept_tcp() {
        let addr = Address::parse("127.0.0.1:0").unwrap();
        let listener = Listener::bind(&addr).await.unwrap();
        let local = match &listener {
            Listener::Tcp(l) => l.local_addr().unwrap(),
            _ => unreachable!(),
        };
        let client = tokio::spawn(async move {
            let mut sock = tokio::net::TcpStream::connect(local).await.unwrap();
            sock.write_all(b"ping").await.unwrap();
        });
        let (mut stream, peer) = listener.accept().await.unwrap();
        assert!(peer.port().is_some());
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();
    }
}
