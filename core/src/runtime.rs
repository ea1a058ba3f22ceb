pub mod dispatcher;
pub mod tls;

pub use dispatcher::{Dispatcher, Timer};
pub use tls::{Slot, TlsRegistry, Worker};
