pub mod case;
pub mod downstream;
pub mod head;
pub mod reader;
pub mod task;
pub mod upstream;
pub mod util;
pub mod writer;

pub use downstream::Downstream;
pub use head::{RequestHead, ResponseHead};
pub use task::Task;
pub use upstream::UpstreamSession;
