use std::fmt;
use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};

use crate::prelude::{Error, ErrorKind, Result};

/// uniform endpoint representation: ip (v4/v6 with scope) or unix pipe.
/// port 0 means "no port".
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    Inet4(SocketAddrV4),
    Inet6(SocketAddrV6),
    Pipe(String),
}

impl Address {
    /// resolve a `host:port` string (or a unix path prefixed with `unix:`)
    pub fn parse(raw: &str) -> Result<Address> {
        if let Some(path) = raw.strip_prefix("unix:") {
            return Ok(Address::Pipe(path.to_string()));
        }
        let mut addrs = raw
            .to_socket_addrs()
            .map_err(|e| Error::because(ErrorKind::Internal, format!("resolve {}", raw), e))?;
        match addrs.next() {
            Some(addr) => Ok(Address::from(addr)),
            None => Err(Error::explain(
                ErrorKind::Internal,
                format!("{} resolved to nothing", raw),
            )),
        }
    }

    pub fn from_ip_port(ip: IpAddr, port: u16) -> Address {
        match ip {
            IpAddr::V4(v4) => Address::Inet4(SocketAddrV4::new(v4, port)),
            IpAddr::V6(v6) => Address::Inet6(SocketAddrV6::new(v6, port, 0, 0)),
        }
    }

    /// the port, if this address carries one
    pub fn port(&self) -> Option<u16> {
        match self {
            Address::Inet4(a) if a.port() != 0 => Some(a.port()),
            Address::Inet6(a) if a.port() != 0 => Some(a.port()),
            _ => None,
        }
    }

    /// the socket address for connect(), pipes have none
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::Inet4(a) => Some(SocketAddr::V4(*a)),
            Address::Inet6(a) => Some(SocketAddr::V6(*a)),
            Address::Pipe(_) => None,
        }
    }

    pub fn pipe_path(&self) -> Option<&str> {
        match self {
            Address::Pipe(path) => Some(path),
            _ => None,
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Address::Inet4(v4),
            SocketAddr::V6(v6) => Address::Inet6(v6),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Inet4(a) => write!(f, "{}", a),
            Address::Inet6(a) => write!(f, "{}", a),
            Address::Pipe(path) => write!(f, "unix:{}", path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_v4_with_port() {
        let addr = Address::parse("127.0.0.1:8080").unwrap();
        assert_eq!(addr.port(), Some(8080));
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn parse_unix_path() {
        let addr = Address::parse("unix:/tmp/halberd.sock").unwrap();
        assert_eq!(addr.port(), None);
        assert_eq!(addr.pipe_path(), Some("/tmp/halberd.sock"));
        assert_eq!(addr.to_string(), "unix:/tmp/halberd.sock");
    }

    #[test]
    fn zero_port_means_absent() {
        let addr = Address::parse("127.0.0.1:0").unwrap();
        assert_eq!(addr.port(), None);
    }

    #[test]
    fn equality_is_structural() {
        let a = Address::parse("127.0.0.1:80").unwrap();
        let b = Address::parse("127.0.0.1:80").unwrap();
        assert_eq!(a, b);
    }
}
