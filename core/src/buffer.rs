pub mod chain;

pub use chain::ChainBuffer;
