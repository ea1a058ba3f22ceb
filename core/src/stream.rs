pub mod connection;
pub mod raw;
pub mod transport;

pub use transport::{RawTransportSocketFactory, Stream, TransportSocketFactory, UniqueId};
