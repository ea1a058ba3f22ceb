use std::error::Error as ErrorTrait;
use std::fmt;
use std::result::Result as StdResult;

/// classification of every failure the engine can surface.
/// the kind decides both how a stream is torn down and what the
/// downstream client is told.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// malformed http on the wire, terminal for the stream
    CodecProtocol,
    /// a buffer cap was exceeded
    BufferFlood,
    /// response body ended before the advertised content length
    PrematureResponse,
    /// out-of-order codec call, stream is lost but the connection survives
    CodecClient,
    /// overload manager tripped, shed load with a 503
    Overload,
    /// peer asked us to stop using the connection, drain the pool
    GoAwayGracefulClose,
    /// pool pending queue or connection cap exceeded
    Overflow,
    /// local connect or handshake failure
    LocalConnectionFailure,
    /// remote end failed the connection attempt
    RemoteConnectionFailure,
    /// connect or idle deadline expired
    ConnectionTimeout,
    /// peer closed underneath us
    ConnectionTermination,
    /// anything that has no business happening
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CodecProtocol => "CodecProtocolError",
            ErrorKind::BufferFlood => "BufferFloodError",
            ErrorKind::PrematureResponse => "PrematureResponseError",
            ErrorKind::CodecClient => "CodecClientError",
            ErrorKind::Overload => "OverloadError",
            ErrorKind::GoAwayGracefulClose => "GoAwayGracefulClose",
            ErrorKind::Overflow => "Overflow",
            ErrorKind::LocalConnectionFailure => "LocalConnectionFailure",
            ErrorKind::RemoteConnectionFailure => "RemoteConnectionFailure",
            ErrorKind::ConnectionTimeout => "ConnectionTimeout",
            ErrorKind::ConnectionTermination => "ConnectionTermination",
            ErrorKind::Internal => "InternalError",
        }
    }

    /// status code synthesized downstream when this kind kills a stream
    pub fn response_code(&self) -> u16 {
        match self {
            ErrorKind::CodecProtocol => 400,
            ErrorKind::BufferFlood => 413,
            ErrorKind::Overload => 503,
            ErrorKind::Overflow => 503,
            ErrorKind::LocalConnectionFailure => 503,
            ErrorKind::RemoteConnectionFailure => 503,
            ErrorKind::ConnectionTimeout => 504,
            _ => 502,
        }
    }

    /// short body shipped to the client, never the internal error string
    pub fn public_reason(&self) -> &'static str {
        match self {
            ErrorKind::CodecProtocol => "bad request",
            ErrorKind::BufferFlood => "payload too large",
            ErrorKind::Overload | ErrorKind::Overflow => "upstream overloaded",
            ErrorKind::LocalConnectionFailure | ErrorKind::RemoteConnectionFailure => {
                "upstream connect error"
            }
            ErrorKind::ConnectionTimeout => "upstream timeout",
            _ => "upstream error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// the engine error: a kind, an optional human context and the causing error
pub struct Error {
    pub kind: ErrorKind,
    pub context: Option<String>,
    pub cause: Option<Box<dyn ErrorTrait + Send + Sync>>,
}

/// boxed engine error, what actually travels through `Result`
pub type BoxedError = Box<Error>;

/// result with boxed engine error
pub type Result<T, E = BoxedError> = StdResult<T, E>;

impl Error {
    pub fn new(kind: ErrorKind) -> BoxedError {
        Box::new(Error {
            kind,
            context: None,
            cause: None,
        })
    }

    pub fn explain<C: Into<String>>(kind: ErrorKind, context: C) -> BoxedError {
        Box::new(Error {
            kind,
            context: Some(context.into()),
            cause: None,
        })
    }

    pub fn because<C, E>(kind: ErrorKind, context: C, cause: E) -> BoxedError
    where
        C: Into<String>,
        E: Into<Box<dyn ErrorTrait + Send + Sync>>,
    {
        Box::new(Error {
            kind,
            context: Some(context.into()),
            cause: Some(cause.into()),
        })
    }

    /// rewrap with a new kind, keeping context and cause
    pub fn into_kind(mut self: Box<Self>, kind: ErrorKind) -> BoxedError {
        self.kind = kind;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(c) = &self.context {
            write!(f, ": {}", c)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " caused by: {}", cause)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ErrorTrait for Error {}

/// attach a kind and context when converting foreign errors
pub trait OrErr<T> {
    fn or_err(self, kind: ErrorKind, context: &str) -> Result<T>;
}

impl<T, E> OrErr<T> for StdResult<T, E>
where
    E: Into<Box<dyn ErrorTrait + Send + Sync>>,
{
    fn or_err(self, kind: ErrorKind, context: &str) -> Result<T> {
        self.map_err(|e| Error::because(kind, context, e))
    }
}
