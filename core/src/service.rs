pub mod proxy;
pub mod runner;

pub use proxy::HttpProxy;
pub use runner::{Service, ServiceApp};
