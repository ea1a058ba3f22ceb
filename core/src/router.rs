pub mod config;
pub mod matcher;

pub use config::{DirectResponse, Route, RouteConfig, VirtualHost};
pub use matcher::RouteMatcher;
