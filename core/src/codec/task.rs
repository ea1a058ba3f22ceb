use bytes::Bytes;
use http::HeaderMap;

use crate::prelude::BoxedError;

use super::head::ResponseHead;

/// one unit of response moving from the upstream session toward the
/// downstream session, with an end-of-stream marker where applicable
#[derive(Debug)]
pub enum Task {
    Header(ResponseHead, bool),
    Body(Option<Bytes>, bool),
    Trailer(Option<Box<HeaderMap>>),
    Done,
    Failed(BoxedError),
}

impl Task {
    pub fn is_end(&self) -> bool {
        match self {
            Task::Header(_, end) => *end,
            Task::Body(_, end) => *end,
            Task::Trailer(_) => true,
            Task::Done => true,
            Task::Failed(_) => true,
        }
    }
}
