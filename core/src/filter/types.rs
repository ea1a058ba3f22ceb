use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;

use crate::buffer::ChainBuffer;
use crate::codec::{RequestHead, ResponseHead};
use crate::router::matcher::RouteMatch;
use crate::upstream::host::Host;

use super::state::FilterState;

/// verdict of a headers callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterHeadersStatus {
    Continue,
    StopIteration,
    StopAllIterationAndBuffer,
    StopAllIterationAndWatermark,
    /// keep iterating but pretend the stream does not end with the headers
    ContinueAndDontEndStream,
}

/// verdict of a data callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterDataStatus {
    Continue,
    StopIterationAndBuffer,
    StopIterationAndWatermark,
    /// stop, the filter took custody of the data itself
    StopIterationNoBuffer,
}

/// verdict of a trailers callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterTrailersStatus {
    Continue,
    StopIteration,
}

/// per-filter iteration posture maintained by the manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterationState {
    Continue,
    StopSingleIteration,
    StopAllBuffer,
    StopAllWatermark,
}

impl IterationState {
    pub fn can_iterate(&self) -> bool {
        matches!(self, IterationState::Continue)
    }

    pub fn stopped_all(&self) -> bool {
        matches!(self, IterationState::StopAllBuffer | IterationState::StopAllWatermark)
    }
}

/// which callback is currently on the stack; distinguishes reentrancy
/// from injection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterCallState(u32);

impl FilterCallState {
    pub const DECODE_HEADERS: FilterCallState = FilterCallState(0x01);
    pub const DECODE_DATA: FilterCallState = FilterCallState(0x02);
    pub const DECODE_TRAILERS: FilterCallState = FilterCallState(0x08);
    pub const ENCODE_HEADERS: FilterCallState = FilterCallState(0x10);
    pub const ENCODE_DATA: FilterCallState = FilterCallState(0x20);
    pub const ENCODE_TRAILERS: FilterCallState = FilterCallState(0x80);
    pub const END_OF_STREAM: FilterCallState = FilterCallState(0x200);

    const DECODING_MASK: u32 = 0x01 | 0x02 | 0x08;
    const ENCODING_MASK: u32 = 0x10 | 0x20 | 0x80;

    pub fn insert(&mut self, other: FilterCallState) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: FilterCallState) {
        self.0 &= !other.0;
    }

    pub fn contains(&self, other: FilterCallState) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_decoding(&self) -> bool {
        self.0 & Self::DECODING_MASK != 0
    }

    pub fn is_encoding(&self) -> bool {
        self.0 & Self::ENCODING_MASK != 0
    }

    pub fn is_idle(&self) -> bool {
        self.0 == 0
    }
}

/// why a stream died before its natural end
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamResetReason {
    LocalReset,
    ConnectionFailure,
    ConnectionTermination,
    Overflow,
    ProtocolError,
}

/// backpressure notifications from the downstream write buffer
pub trait DownstreamWatermarkCallbacks: Send + Sync {
    fn on_above_write_buffer_high_watermark(&self);
    fn on_below_write_buffer_low_watermark(&self);
}

/// context every stream carries alongside the filter chain
#[derive(Default)]
pub struct StreamInfo {
    pub route: Option<RouteMatch>,
    pub upstream_host: Option<Arc<Host>>,
    pub upstream_secure: bool,
    pub response_code: Option<u16>,
}

/// deferred requests a filter makes during a callback; the manager applies
/// them once the callback has returned, so no filter ever holds a live
/// reference back into the manager
pub enum PendingAction {
    LocalReply {
        status: u16,
        body: String,
        headers: Vec<(String, String)>,
    },
    AddDecodedData {
        data: Bytes,
        streaming: bool,
    },
    AddEncodedData {
        data: Bytes,
        streaming: bool,
    },
    InjectDecodedData {
        data: Bytes,
        end_stream: bool,
    },
    RegisterWatermarkCallbacks(Arc<dyn DownstreamWatermarkCallbacks>),
}

/// the window a filter gets into its stream during one callback
pub struct FilterContext<'a> {
    pub filter_state: &'a mut FilterState,
    pub stream_info: &'a mut StreamInfo,
    pub(crate) actions: &'a mut Vec<PendingAction>,
}

impl<'a> FilterContext<'a> {
    /// synthesize a response instead of whatever the stream was doing
    pub fn send_local_reply(&mut self, status: u16, body: &str) {
        self.actions.push(PendingAction::LocalReply {
            status,
            body: body.to_string(),
            headers: Vec::new(),
        });
    }

    pub fn send_local_reply_with_headers(
        &mut self,
        status: u16,
        body: &str,
        headers: Vec<(String, String)>,
    ) {
        self.actions.push(PendingAction::LocalReply {
            status,
            body: body.to_string(),
            headers,
        });
    }

    /// append body bytes owned by this filter to its buffered data
    pub fn add_decoded_data(&mut self, data: Bytes, streaming: bool) {
        self.actions.push(PendingAction::AddDecodedData { data, streaming });
    }

    pub fn add_encoded_data(&mut self, data: Bytes, streaming: bool) {
        self.actions.push(PendingAction::AddEncodedData { data, streaming });
    }

    /// push new body through the filters after this one
    pub fn inject_decoded_data(&mut self, data: Bytes, end_stream: bool) {
        self.actions
            .push(PendingAction::InjectDecodedData { data, end_stream });
    }

    pub fn register_watermark_callbacks(&mut self, cb: Arc<dyn DownstreamWatermarkCallbacks>) {
        self.actions.push(PendingAction::RegisterWatermarkCallbacks(cb));
    }
}

/// lifecycle shared by decoder and encoder filters
pub trait StreamFilterBase: Send {
    fn name(&self) -> &str {
        "filter"
    }

    fn on_destroy(&mut self) {}
}

/// a filter on the request path
pub trait StreamDecoderFilter: StreamFilterBase {
    fn decode_headers(
        &mut self,
        ctx: &mut FilterContext<'_>,
        headers: &mut RequestHead,
        end_stream: bool,
    ) -> FilterHeadersStatus;

    fn decode_data(
        &mut self,
        ctx: &mut FilterContext<'_>,
        data: &mut ChainBuffer,
        end_stream: bool,
    ) -> FilterDataStatus;

    fn decode_trailers(
        &mut self,
        _ctx: &mut FilterContext<'_>,
        _trailers: &mut HeaderMap,
    ) -> FilterTrailersStatus {
        FilterTrailersStatus::Continue
    }

    fn decode_complete(&mut self) {}
}

/// a filter on the response path
pub trait StreamEncoderFilter: StreamFilterBase {
    fn encode_headers(
        &mut self,
        ctx: &mut FilterContext<'_>,
        headers: &mut ResponseHead,
        end_stream: bool,
    ) -> FilterHeadersStatus;

    fn encode_data(
        &mut self,
        ctx: &mut FilterContext<'_>,
        data: &mut ChainBuffer,
        end_stream: bool,
    ) -> FilterDataStatus;

    fn encode_trailers(
        &mut self,
        _ctx: &mut FilterContext<'_>,
        _trailers: &mut HeaderMap,
    ) -> FilterTrailersStatus {
        FilterTrailersStatus::Continue
    }

    fn encode_complete(&mut self) {}
}
