use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::prelude::Result;

/// stable identity of a stream, taken from the raw fd for real sockets
pub trait UniqueId {
    fn unique_id(&self) -> i32;
}

/// everything a connection byte stream must provide to the engine
pub trait StreamEdge: AsyncRead + AsyncWrite + UniqueId + Unpin + Send + Sync {}

impl<T> StreamEdge for T where T: AsyncRead + AsyncWrite + UniqueId + Unpin + Send + Sync {}

/// boxed dynamic stream, what sessions and pools pass around
pub type Stream = Box<dyn StreamEdge>;

/// seam for tls and friends: wraps a freshly-connected byte stream into the
/// framed stream the codec reads. the default factory is a pass-through.
#[async_trait]
pub trait TransportSocketFactory: Send + Sync {
    /// whether streams from this factory are encrypted
    fn implements_secure_transport(&self) -> bool;

    /// run the transport handshake over the connected stream
    async fn wrap_connection(&self, io: Stream) -> Result<Stream>;
}

/// plaintext pass-through factory
#[derive(Debug, Default)]
pub struct RawTransportSocketFactory;

#[async_trait]
impl TransportSocketFactory for RawTransportSocketFactory {
    fn implements_secure_transport(&self) -> bool {
        false
    }

    async fn wrap_connection(&self, io: Stream) -> Result<Stream> {
        Ok(io)
    }
}
