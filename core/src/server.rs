pub mod server;

pub use server::{Runtime, Server, ShutdownType};
