pub mod manager;
pub mod rewrite;
pub mod router;
pub mod state;
pub mod state_filter;
pub mod types;

pub use manager::{FilterManager, FilterManagerCallbacks};
pub use state::{FilterState, LifeSpan, StateMutability};
pub use types::{
    FilterContext, FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus,
    StreamDecoderFilter, StreamEncoderFilter, StreamFilterBase, StreamResetReason,
};
