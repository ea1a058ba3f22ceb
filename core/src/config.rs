pub mod cluster;
pub mod config;
pub mod route;

pub use config::{load_config, Config};
