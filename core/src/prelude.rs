pub mod result;

pub use result::{BoxedError, Error, ErrorKind, OrErr, Result};
