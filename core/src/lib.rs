//! halberd proxy engine
//!
//! a layer-7 reverse proxy core: http/1.x codec, upstream clusters and
//! connection pools, load balancing, routing and a per-stream filter chain.
//! the `bin` crate wires a configuration file into a running server.

pub mod balancer;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod filter;
pub mod network;
pub mod pool;
pub mod prelude;
pub mod router;
pub mod runtime;
pub mod server;
pub mod service;
pub mod stream;
pub mod upstream;
