pub mod http;
pub mod map;
pub mod tcp;

use std::fmt;

/// why a pool refused or lost a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolFailureReason {
    /// pending queue or connection cap exceeded, failed synchronously
    Overflow,
    /// we could not establish the connection
    LocalConnectionFailure,
    /// the peer failed the connection attempt
    RemoteConnectionFailure,
    /// the connect timer expired
    ConnectionTimeout,
}

impl fmt::Display for PoolFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolFailureReason::Overflow => "overflow",
            PoolFailureReason::LocalConnectionFailure => "local connection failure",
            PoolFailureReason::RemoteConnectionFailure => "remote connection failure",
            PoolFailureReason::ConnectionTimeout => "connection timeout",
        };
        f.write_str(s)
    }
}

/// how hard to drain a pool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainBehavior {
    /// finish in-flight streams, close clients as they free up; idle
    /// clients may still serve new streams until they are recycled
    DrainExisting,
    /// close idle clients now and refuse new streams
    DrainAndDelete,
}

/// a pool that can be told to shed its connections
pub trait DrainablePool: Send + Sync {
    fn drain_connections(&self, behavior: DrainBehavior);
    fn is_idle(&self) -> bool;
}
