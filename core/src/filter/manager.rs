use bytes::Bytes;
use http::{HeaderMap, Version};

use crate::buffer::ChainBuffer;
use crate::codec::{RequestHead, ResponseHead};
use crate::prelude::{ErrorKind, Result};

use super::state::FilterState;
use super::types::{
    FilterCallState, FilterContext, FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus,
    IterationState, PendingAction, StreamDecoderFilter, StreamEncoderFilter, StreamInfo,
    StreamResetReason,
};

const SERVER_NAME: &str = "halberd";

/// sink for everything that leaves the filter chain toward the client,
/// implemented by the downstream side of the proxy service
pub trait FilterManagerCallbacks: Send {
    fn encode_headers(&mut self, head: ResponseHead, end_stream: bool);
    fn encode_data(&mut self, data: Bytes, end_stream: bool);
    fn encode_trailers(&mut self, trailers: HeaderMap);
    fn end_stream(&mut self);
    fn on_reset_stream(&mut self, reason: StreamResetReason, transport_failure: &str);
    fn disarm_request_timeout(&mut self) {}
    fn rearm_request_timeout(&mut self) {}
}

/// per-filter wrapper state the manager keeps next to each filter
struct ActiveFilterState {
    iteration_state: IterationState,
    /// headers have been delivered to this filter
    processed_headers: bool,
    /// this filter has let its headers through
    headers_continued: bool,
    /// the stop happened in the headers callback; until it resumes, data
    /// waits here without invoking the filter
    stopped_on_headers: bool,
    /// end-of-stream as this filter saw it
    end_stream: bool,
    /// data parked at this filter while iteration is stopped
    buffer: ChainBuffer,
    /// buffered end-of-stream waiting for a resume
    saw_end: bool,
    /// this buffer participates in watermark accounting
    watermark_buffer: bool,
}

impl ActiveFilterState {
    fn new() -> Self {
        ActiveFilterState {
            iteration_state: IterationState::Continue,
            processed_headers: false,
            headers_continued: false,
            stopped_on_headers: false,
            end_stream: false,
            buffer: ChainBuffer::new(),
            saw_end: false,
            watermark_buffer: false,
        }
    }

    /// data and trailers are withheld from the filter itself only when it
    /// stopped in its headers callback or stopped the whole chain; a
    /// filter that stopped mid-data is consuming and keeps receiving
    fn holds_without_delivery(&self) -> bool {
        match self.iteration_state {
            IterationState::StopAllBuffer | IterationState::StopAllWatermark => true,
            IterationState::StopSingleIteration => self.stopped_on_headers,
            IterationState::Continue => false,
        }
    }
}

/// stream-wide state shared by both chains
struct StreamShared {
    request_headers: Option<RequestHead>,
    request_trailers: Option<HeaderMap>,
    response_headers: Option<ResponseHead>,
    response_trailers: Option<HeaderMap>,
    actions: Vec<PendingAction>,
    filter_state: FilterState,
    stream_info: StreamInfo,
    filter_call_state: FilterCallState,
    observed_decode_end_stream: bool,
    observed_encode_end_stream: bool,
    decoder_chain_complete: bool,
    encoder_chain_complete: bool,
    decoder_chain_aborted: bool,
    encoder_chain_aborted: bool,
    latest_data_decoding_filter: Option<usize>,
    latest_data_encoding_filter: Option<usize>,
    buffer_limit: usize,
    high_watermark_count: usize,
    above_high_watermark: bool,
    watermark_cbs: Vec<std::sync::Arc<dyn super::types::DownstreamWatermarkCallbacks>>,
    response_started: bool,
    sent_local_reply: bool,
    under_on_local_reply: bool,
    half_close_enabled: bool,
    stream_end_emitted: bool,
}

/// the per-stream object owning the decoder and encoder chains and their
/// iteration state machine.
///
/// filters never hold a reference back into the manager: everything a
/// filter wants done (local reply, data injection, watermark registration)
/// is queued on the context and applied after the callback returns.
pub struct FilterManager {
    decoder_filters: Vec<Box<dyn StreamDecoderFilter>>,
    encoder_filters: Vec<Box<dyn StreamEncoderFilter>>,
    dstate: Vec<ActiveFilterState>,
    estate: Vec<ActiveFilterState>,
    stream: StreamShared,
    callbacks: Box<dyn FilterManagerCallbacks>,
}

impl FilterManager {
    pub fn new(
        callbacks: Box<dyn FilterManagerCallbacks>,
        buffer_limit: usize,
        half_close_enabled: bool,
    ) -> FilterManager {
        FilterManager {
            decoder_filters: Vec::new(),
            encoder_filters: Vec::new(),
            dstate: Vec::new(),
            estate: Vec::new(),
            stream: StreamShared {
                request_headers: None,
                request_trailers: None,
                response_headers: None,
                response_trailers: None,
                actions: Vec::new(),
                filter_state: FilterState::new(),
                stream_info: StreamInfo::default(),
                filter_call_state: FilterCallState::default(),
                observed_decode_end_stream: false,
                observed_encode_end_stream: false,
                decoder_chain_complete: false,
                encoder_chain_complete: false,
                decoder_chain_aborted: false,
                encoder_chain_aborted: false,
                latest_data_decoding_filter: None,
                latest_data_encoding_filter: None,
                buffer_limit,
                high_watermark_count: 0,
                above_high_watermark: false,
                watermark_cbs: Vec::new(),
                response_started: false,
                sent_local_reply: false,
                under_on_local_reply: false,
                half_close_enabled,
                stream_end_emitted: false,
            },
            callbacks,
        }
    }

    pub fn add_decoder_filter(&mut self, filter: Box<dyn StreamDecoderFilter>) {
        self.decoder_filters.push(filter);
        self.dstate.push(ActiveFilterState::new());
    }

    pub fn add_encoder_filter(&mut self, filter: Box<dyn StreamEncoderFilter>) {
        self.encoder_filters.push(filter);
        self.estate.push(ActiveFilterState::new());
    }

    pub fn filter_state(&self) -> &FilterState {
        &self.stream.filter_state
    }

    pub fn filter_state_mut(&mut self) -> &mut FilterState {
        &mut self.stream.filter_state
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.stream.stream_info
    }

    pub fn stream_info_mut(&mut self) -> &mut StreamInfo {
        &mut self.stream.stream_info
    }

    pub fn request_headers(&self) -> Option<&RequestHead> {
        self.stream.request_headers.as_ref()
    }

    pub fn request_trailers(&self) -> Option<&HeaderMap> {
        self.stream.request_trailers.as_ref()
    }

    pub fn decoder_chain_complete(&self) -> bool {
        self.stream.decoder_chain_complete
    }

    pub fn decoder_chain_aborted(&self) -> bool {
        self.stream.decoder_chain_aborted
    }

    pub fn encoder_chain_complete(&self) -> bool {
        self.stream.encoder_chain_complete
    }

    pub fn sent_local_reply(&self) -> bool {
        self.stream.sent_local_reply
    }

    pub fn high_watermark_count(&self) -> usize {
        self.stream.high_watermark_count
    }

    /// the filter that most recently produced request data; iteration
    /// resumes relative to it
    pub fn latest_data_decoding_filter(&self) -> Option<usize> {
        self.stream.latest_data_decoding_filter
    }

    pub fn latest_data_encoding_filter(&self) -> Option<usize> {
        self.stream.latest_data_encoding_filter
    }

    pub fn is_under_on_local_reply(&self) -> bool {
        self.stream.under_on_local_reply
    }

    // ---------------- decode path ----------------

    /// feed the request head into the decoder chain
    pub fn decode_headers(&mut self, headers: RequestHead, end_stream: bool) {
        self.callbacks.rearm_request_timeout();
        self.stream.observed_decode_end_stream = end_stream;
        self.stream.request_headers = Some(headers);
        self.decode_headers_range(0, end_stream);
    }

    fn decode_headers_range(&mut self, start: usize, end_stream: bool) {
        let n = self.decoder_filters.len();
        let mut data_added_at: Option<usize> = None;
        let mut dont_end_stream = false;
        let mut i = start;
        while i < n {
            if self.stream.decoder_chain_aborted {
                return;
            }
            let filter_end_stream = end_stream && data_added_at.is_none() && !dont_end_stream;
            self.dstate[i].end_stream = filter_end_stream;
            self.stream.filter_call_state.insert(FilterCallState::DECODE_HEADERS);
            if filter_end_stream {
                self.stream.filter_call_state.insert(FilterCallState::END_OF_STREAM);
            }
            let status = {
                let headers = self
                    .stream
                    .request_headers
                    .as_mut()
                    .expect("decode_headers without request head");
                self.decoder_filters[i].decode_headers(
                    &mut FilterContext {
                        filter_state: &mut self.stream.filter_state,
                        stream_info: &mut self.stream.stream_info,
                        actions: &mut self.stream.actions,
                    },
                    headers,
                    filter_end_stream,
                )
            };
            self.stream.filter_call_state.remove(FilterCallState::DECODE_HEADERS);
            self.stream.filter_call_state.remove(FilterCallState::END_OF_STREAM);
            self.dstate[i].processed_headers = true;
            self.process_actions(i, true);
            if self.stream.decoder_chain_aborted {
                return;
            }
            if data_added_at.is_none() && !self.dstate[i].buffer.is_empty() {
                data_added_at = Some(i);
            }
            match status {
                FilterHeadersStatus::Continue => {
                    self.dstate[i].iteration_state = IterationState::Continue;
                    self.dstate[i].headers_continued = true;
                }
                FilterHeadersStatus::ContinueAndDontEndStream => {
                    self.dstate[i].iteration_state = IterationState::Continue;
                    self.dstate[i].headers_continued = true;
                    dont_end_stream = true;
                }
                FilterHeadersStatus::StopIteration => {
                    self.dstate[i].iteration_state = IterationState::StopSingleIteration;
                    self.dstate[i].stopped_on_headers = true;
                    return;
                }
                FilterHeadersStatus::StopAllIterationAndBuffer => {
                    self.dstate[i].iteration_state = IterationState::StopAllBuffer;
                    self.dstate[i].stopped_on_headers = true;
                    return;
                }
                FilterHeadersStatus::StopAllIterationAndWatermark => {
                    self.dstate[i].iteration_state = IterationState::StopAllWatermark;
                    self.dstate[i].stopped_on_headers = true;
                    self.dstate[i].watermark_buffer = true;
                    return;
                }
            }
            i += 1;
        }
        // body added during a headers callback flows to the successors
        if let Some(entry) = data_added_at {
            let mut buf = std::mem::take(&mut self.dstate[entry].buffer);
            self.decode_data_range(entry + 1, &mut buf, end_stream && !dont_end_stream);
            return;
        }
        if end_stream && !dont_end_stream {
            self.maybe_end_decode();
        }
    }

    /// feed one request body chunk into the decoder chain
    pub fn decode_data(&mut self, data: Bytes, end_stream: bool) {
        self.callbacks.rearm_request_timeout();
        if end_stream {
            self.stream.observed_decode_end_stream = true;
        }
        let mut buf = ChainBuffer::from_bytes(data);
        self.decode_data_range(0, &mut buf, end_stream);
    }

    fn decode_data_range(&mut self, start: usize, buf: &mut ChainBuffer, end_stream: bool) {
        let n = self.decoder_filters.len();
        let mut i = start;
        while i < n {
            if self.stream.decoder_chain_aborted {
                return;
            }
            // headers always precede data at every filter
            if !self.dstate[i].processed_headers {
                self.decode_headers_range(i, false);
                if self.stream.decoder_chain_aborted {
                    return;
                }
            }
            if self.dstate[i].holds_without_delivery() {
                // iteration is held at this filter, the data waits with it
                self.dstate[i].buffer.move_from(buf);
                if end_stream {
                    self.dstate[i].saw_end = true;
                }
                self.after_buffering(i, true);
                return;
            }
            self.stream.filter_call_state.insert(FilterCallState::DECODE_DATA);
            if end_stream {
                self.stream.filter_call_state.insert(FilterCallState::END_OF_STREAM);
            }
            let status = self.decoder_filters[i].decode_data(
                &mut FilterContext {
                    filter_state: &mut self.stream.filter_state,
                    stream_info: &mut self.stream.stream_info,
                    actions: &mut self.stream.actions,
                },
                buf,
                end_stream,
            );
            self.stream.filter_call_state.remove(FilterCallState::DECODE_DATA);
            self.stream.filter_call_state.remove(FilterCallState::END_OF_STREAM);
            self.stream.latest_data_decoding_filter = Some(i);
            self.process_actions(i, true);
            if self.stream.decoder_chain_aborted {
                return;
            }
            match status {
                FilterDataStatus::Continue => {
                    self.dstate[i].iteration_state = IterationState::Continue;
                    self.dstate[i].stopped_on_headers = false;
                }
                FilterDataStatus::StopIterationAndBuffer => {
                    self.dstate[i].iteration_state = IterationState::StopSingleIteration;
                    self.dstate[i].buffer.move_from(buf);
                    if end_stream {
                        self.dstate[i].saw_end = true;
                    }
                    self.after_buffering(i, true);
                    return;
                }
                FilterDataStatus::StopIterationAndWatermark => {
                    self.dstate[i].iteration_state = IterationState::StopSingleIteration;
                    self.dstate[i].watermark_buffer = true;
                    self.dstate[i].buffer.move_from(buf);
                    if end_stream {
                        self.dstate[i].saw_end = true;
                    }
                    self.after_buffering(i, true);
                    return;
                }
                FilterDataStatus::StopIterationNoBuffer => {
                    self.dstate[i].iteration_state = IterationState::StopSingleIteration;
                    if end_stream {
                        self.dstate[i].saw_end = true;
                    }
                    return;
                }
            }
            i += 1;
        }
        if end_stream {
            self.maybe_end_decode();
        }
    }

    /// feed the request trailers into the decoder chain
    pub fn decode_trailers(&mut self, trailers: HeaderMap) {
        self.callbacks.rearm_request_timeout();
        self.stream.observed_decode_end_stream = true;
        self.stream.request_trailers = Some(trailers);
        self.decode_trailers_range(0);
    }

    fn decode_trailers_range(&mut self, start: usize) {
        let n = self.decoder_filters.len();
        let mut i = start;
        while i < n {
            if self.stream.decoder_chain_aborted {
                return;
            }
            if self.dstate[i].holds_without_delivery() {
                // trailers wait in the stream until this filter resumes
                return;
            }
            self.stream.filter_call_state.insert(FilterCallState::DECODE_TRAILERS);
            let status = {
                let trailers = self
                    .stream
                    .request_trailers
                    .as_mut()
                    .expect("decode_trailers without trailers");
                self.decoder_filters[i].decode_trailers(
                    &mut FilterContext {
                        filter_state: &mut self.stream.filter_state,
                        stream_info: &mut self.stream.stream_info,
                        actions: &mut self.stream.actions,
                    },
                    trailers,
                )
            };
            self.stream.filter_call_state.remove(FilterCallState::DECODE_TRAILERS);
            self.process_actions(i, true);
            if self.stream.decoder_chain_aborted {
                return;
            }
            // body released during the trailers callback flows ahead of
            // the trailers themselves
            if !self.dstate[i].buffer.is_empty() {
                let mut buf = std::mem::take(&mut self.dstate[i].buffer);
                self.decode_data_range(i + 1, &mut buf, false);
                if self.stream.decoder_chain_aborted {
                    return;
                }
            }
            match status {
                FilterTrailersStatus::Continue => {
                    self.dstate[i].iteration_state = IterationState::Continue;
                    self.dstate[i].stopped_on_headers = false;
                }
                FilterTrailersStatus::StopIteration => {
                    self.dstate[i].iteration_state = IterationState::StopSingleIteration;
                    return;
                }
            }
            i += 1;
        }
        self.maybe_end_decode();
    }

    /// resume a stopped decoder chain.
    /// a stop-all filter replays its buffered data through itself, a plain
    /// stop resumes with the filters after it.
    pub fn continue_decoding(&mut self) {
        let Some(i) = self
            .dstate
            .iter()
            .position(|s| !s.iteration_state.can_iterate())
        else {
            return;
        };
        let stopped_all = self.dstate[i].iteration_state.stopped_all();
        self.dstate[i].iteration_state = IterationState::Continue;
        self.dstate[i].headers_continued = true;
        let mut buf = std::mem::take(&mut self.dstate[i].buffer);
        let saw_end = std::mem::replace(&mut self.dstate[i].saw_end, false);
        self.check_low_watermark();

        if stopped_all {
            if !buf.is_empty() || saw_end {
                self.decode_data_range(i, &mut buf, saw_end);
            }
        } else {
            let next = i + 1;
            if next < self.decoder_filters.len() && !self.dstate[next].processed_headers {
                let headers_end = self.stream.observed_decode_end_stream
                    && buf.is_empty()
                    && self.stream.request_trailers.is_none();
                self.decode_headers_range(next, headers_end);
                if self.stream.decoder_chain_aborted {
                    return;
                }
            }
            if !buf.is_empty() || saw_end {
                self.decode_data_range(next, &mut buf, saw_end);
            }
        }
        if self.stream.decoder_chain_aborted || self.stream.decoder_chain_complete {
            return;
        }
        if self.stream.request_trailers.is_some() {
            self.decode_trailers_range(i);
        }
    }

    // ---------------- encode path ----------------

    /// feed the response head into the encoder chain
    pub fn encode_headers(&mut self, headers: ResponseHead, end_stream: bool) {
        self.stream.observed_encode_end_stream = end_stream;
        self.stream.stream_info.response_code = Some(headers.status.as_u16());
        self.stream.response_headers = Some(headers);
        self.encode_headers_range(0, end_stream);
    }

    fn encode_headers_range(&mut self, start: usize, end_stream: bool) {
        let n = self.encoder_filters.len();
        let mut data_added_at: Option<usize> = None;
        let mut dont_end_stream = false;
        let mut i = start;
        while i < n {
            if self.stream.encoder_chain_aborted {
                return;
            }
            let filter_end_stream = end_stream && data_added_at.is_none() && !dont_end_stream;
            self.estate[i].end_stream = filter_end_stream;
            self.stream.filter_call_state.insert(FilterCallState::ENCODE_HEADERS);
            if filter_end_stream {
                self.stream.filter_call_state.insert(FilterCallState::END_OF_STREAM);
            }
            let status = {
                let headers = self
                    .stream
                    .response_headers
                    .as_mut()
                    .expect("encode_headers without response head");
                self.encoder_filters[i].encode_headers(
                    &mut FilterContext {
                        filter_state: &mut self.stream.filter_state,
                        stream_info: &mut self.stream.stream_info,
                        actions: &mut self.stream.actions,
                    },
                    headers,
                    filter_end_stream,
                )
            };
            self.stream.filter_call_state.remove(FilterCallState::ENCODE_HEADERS);
            self.stream.filter_call_state.remove(FilterCallState::END_OF_STREAM);
            self.estate[i].processed_headers = true;
            self.process_actions(i, false);
            if self.stream.encoder_chain_aborted {
                return;
            }
            if data_added_at.is_none() && !self.estate[i].buffer.is_empty() {
                data_added_at = Some(i);
            }
            match status {
                FilterHeadersStatus::Continue => {
                    self.estate[i].iteration_state = IterationState::Continue;
                    self.estate[i].headers_continued = true;
                }
                FilterHeadersStatus::ContinueAndDontEndStream => {
                    self.estate[i].iteration_state = IterationState::Continue;
                    self.estate[i].headers_continued = true;
                    dont_end_stream = true;
                }
                FilterHeadersStatus::StopIteration => {
                    self.estate[i].iteration_state = IterationState::StopSingleIteration;
                    self.estate[i].stopped_on_headers = true;
                    return;
                }
                FilterHeadersStatus::StopAllIterationAndBuffer => {
                    self.estate[i].iteration_state = IterationState::StopAllBuffer;
                    self.estate[i].stopped_on_headers = true;
                    return;
                }
                FilterHeadersStatus::StopAllIterationAndWatermark => {
                    self.estate[i].iteration_state = IterationState::StopAllWatermark;
                    self.estate[i].stopped_on_headers = true;
                    self.estate[i].watermark_buffer = true;
                    return;
                }
            }
            i += 1;
        }
        // chain complete: the head leaves toward the client
        let effective_end = end_stream && data_added_at.is_none() && !dont_end_stream;
        let head = self
            .stream
            .response_headers
            .clone()
            .expect("response head vanished during encoding");
        self.stream.response_started = true;
        self.callbacks.encode_headers(head, effective_end);
        if let Some(entry) = data_added_at {
            let mut buf = std::mem::take(&mut self.estate[entry].buffer);
            self.encode_data_range(entry + 1, &mut buf, end_stream && !dont_end_stream);
            return;
        }
        if effective_end {
            self.maybe_end_encode();
        }
    }

    /// feed one response body chunk into the encoder chain
    pub fn encode_data(&mut self, data: Bytes, end_stream: bool) {
        if end_stream {
            self.stream.observed_encode_end_stream = true;
        }
        let mut buf = ChainBuffer::from_bytes(data);
        self.encode_data_range(0, &mut buf, end_stream);
    }

    fn encode_data_range(&mut self, start: usize, buf: &mut ChainBuffer, end_stream: bool) {
        let n = self.encoder_filters.len();
        let mut i = start;
        while i < n {
            if self.stream.encoder_chain_aborted {
                return;
            }
            // headers always precede data at every filter
            if !self.estate[i].processed_headers {
                self.encode_headers_range(i, false);
                if self.stream.encoder_chain_aborted {
                    return;
                }
            }
            if self.estate[i].holds_without_delivery() {
                self.estate[i].buffer.move_from(buf);
                if end_stream {
                    self.estate[i].saw_end = true;
                }
                self.after_buffering(i, false);
                return;
            }
            self.stream.filter_call_state.insert(FilterCallState::ENCODE_DATA);
            if end_stream {
                self.stream.filter_call_state.insert(FilterCallState::END_OF_STREAM);
            }
            let status = self.encoder_filters[i].encode_data(
                &mut FilterContext {
                    filter_state: &mut self.stream.filter_state,
                    stream_info: &mut self.stream.stream_info,
                    actions: &mut self.stream.actions,
                },
                buf,
                end_stream,
            );
            self.stream.filter_call_state.remove(FilterCallState::ENCODE_DATA);
            self.stream.filter_call_state.remove(FilterCallState::END_OF_STREAM);
            self.stream.latest_data_encoding_filter = Some(i);
            self.process_actions(i, false);
            if self.stream.encoder_chain_aborted {
                return;
            }
            match status {
                FilterDataStatus::Continue => {
                    self.estate[i].iteration_state = IterationState::Continue;
                    self.estate[i].stopped_on_headers = false;
                }
                FilterDataStatus::StopIterationAndBuffer => {
                    self.estate[i].iteration_state = IterationState::StopSingleIteration;
                    self.estate[i].buffer.move_from(buf);
                    if end_stream {
                        self.estate[i].saw_end = true;
                    }
                    self.after_buffering(i, false);
                    return;
                }
                FilterDataStatus::StopIterationAndWatermark => {
                    self.estate[i].iteration_state = IterationState::StopSingleIteration;
                    self.estate[i].watermark_buffer = true;
                    self.estate[i].buffer.move_from(buf);
                    if end_stream {
                        self.estate[i].saw_end = true;
                    }
                    self.after_buffering(i, false);
                    return;
                }
                FilterDataStatus::StopIterationNoBuffer => {
                    self.estate[i].iteration_state = IterationState::StopSingleIteration;
                    if end_stream {
                        self.estate[i].saw_end = true;
                    }
                    return;
                }
            }
            i += 1;
        }
        // chain complete: the chunk leaves toward the client
        self.callbacks.encode_data(buf.take_all(), end_stream);
        if end_stream {
            self.maybe_end_encode();
        }
    }

    /// feed the response trailers into the encoder chain
    pub fn encode_trailers(&mut self, trailers: HeaderMap) {
        self.stream.observed_encode_end_stream = true;
        self.stream.response_trailers = Some(trailers);
        self.encode_trailers_range(0);
    }

    fn encode_trailers_range(&mut self, start: usize) {
        let n = self.encoder_filters.len();
        let mut i = start;
        while i < n {
            if self.stream.encoder_chain_aborted {
                return;
            }
            if self.estate[i].holds_without_delivery() {
                return;
            }
            self.stream.filter_call_state.insert(FilterCallState::ENCODE_TRAILERS);
            let status = {
                let trailers = self
                    .stream
                    .response_trailers
                    .as_mut()
                    .expect("encode_trailers without trailers");
                self.encoder_filters[i].encode_trailers(
                    &mut FilterContext {
                        filter_state: &mut self.stream.filter_state,
                        stream_info: &mut self.stream.stream_info,
                        actions: &mut self.stream.actions,
                    },
                    trailers,
                )
            };
            self.stream.filter_call_state.remove(FilterCallState::ENCODE_TRAILERS);
            self.process_actions(i, false);
            if self.stream.encoder_chain_aborted {
                return;
            }
            // body released during the trailers callback flows ahead of
            // the trailers themselves
            if !self.estate[i].buffer.is_empty() {
                let mut buf = std::mem::take(&mut self.estate[i].buffer);
                self.encode_data_range(i + 1, &mut buf, false);
                if self.stream.encoder_chain_aborted {
                    return;
                }
            }
            match status {
                FilterTrailersStatus::Continue => {
                    self.estate[i].iteration_state = IterationState::Continue;
                    self.estate[i].stopped_on_headers = false;
                }
                FilterTrailersStatus::StopIteration => {
                    self.estate[i].iteration_state = IterationState::StopSingleIteration;
                    return;
                }
            }
            i += 1;
        }
        if let Some(trailers) = self.stream.response_trailers.clone() {
            self.callbacks.encode_trailers(trailers);
        }
        self.maybe_end_encode();
    }

    /// resume a stopped encoder chain, mirror of `continue_decoding`
    pub fn continue_encoding(&mut self) {
        let Some(i) = self
            .estate
            .iter()
            .position(|s| !s.iteration_state.can_iterate())
        else {
            return;
        };
        let stopped_all = self.estate[i].iteration_state.stopped_all();
        self.estate[i].iteration_state = IterationState::Continue;
        self.estate[i].headers_continued = true;
        let mut buf = std::mem::take(&mut self.estate[i].buffer);
        let saw_end = std::mem::replace(&mut self.estate[i].saw_end, false);
        self.check_low_watermark();

        if stopped_all {
            if !buf.is_empty() || saw_end {
                self.encode_data_range(i, &mut buf, saw_end);
            }
        } else {
            let next = i + 1;
            if next < self.encoder_filters.len() && !self.estate[next].processed_headers {
                let headers_end = self.stream.observed_encode_end_stream
                    && buf.is_empty()
                    && self.stream.response_trailers.is_none();
                self.encode_headers_range(next, headers_end);
                if self.stream.encoder_chain_aborted {
                    return;
                }
            } else if next >= self.encoder_filters.len() && !self.stream.response_started {
                // the stop was at the last filter before anything left
                let headers_end = self.stream.observed_encode_end_stream
                    && buf.is_empty()
                    && self.stream.response_trailers.is_none();
                self.encode_headers_range(next, headers_end);
            }
            if !buf.is_empty() || saw_end {
                self.encode_data_range(next, &mut buf, saw_end);
            }
        }
        if self.stream.encoder_chain_aborted || self.stream.encoder_chain_complete {
            return;
        }
        if self.stream.response_trailers.is_some() {
            self.encode_trailers_range(i);
        }
    }

    // ---------------- shared machinery ----------------

    fn process_actions(&mut self, current: usize, decoding: bool) {
        let actions = std::mem::take(&mut self.stream.actions);
        for action in actions {
            match action {
                PendingAction::LocalReply {
                    status,
                    body,
                    headers,
                } => {
                    if decoding {
                        self.execute_local_reply(status, &body, headers);
                    } else {
                        // a reply cannot preempt a response mid-encode
                        self.stream.encoder_chain_aborted = true;
                        self.reset_stream(
                            StreamResetReason::LocalReset,
                            "local reply during encoding",
                        );
                    }
                }
                PendingAction::AddDecodedData { data, streaming: _ } => {
                    self.dstate[current].buffer.append(data);
                    self.check_high_watermark();
                }
                PendingAction::AddEncodedData { data, streaming: _ } => {
                    self.estate[current].buffer.append(data);
                    self.check_high_watermark();
                }
                PendingAction::InjectDecodedData { data, end_stream } => {
                    if end_stream {
                        self.stream.observed_decode_end_stream = true;
                    }
                    let mut buf = ChainBuffer::from_bytes(data);
                    self.decode_data_range(current + 1, &mut buf, end_stream);
                }
                PendingAction::RegisterWatermarkCallbacks(cb) => {
                    // late registrants catch up to the running counter
                    for _ in 0..self.stream.high_watermark_count {
                        cb.on_above_write_buffer_high_watermark();
                    }
                    self.stream.watermark_cbs.push(cb);
                }
            }
        }
    }

    /// buffer-cap policing after data was parked at a filter
    fn after_buffering(&mut self, index: usize, decoding: bool) {
        let watermark = if decoding {
            self.dstate[index].watermark_buffer
        } else {
            self.estate[index].watermark_buffer
        };
        if watermark {
            self.check_high_watermark();
            return;
        }
        if self.stream.buffer_limit > 0 && self.buffered_bytes() > self.stream.buffer_limit {
            if decoding {
                self.execute_local_reply(
                    ErrorKind::BufferFlood.response_code(),
                    ErrorKind::BufferFlood.public_reason(),
                    Vec::new(),
                );
            } else {
                self.stream.encoder_chain_aborted = true;
                self.reset_stream(StreamResetReason::Overflow, "encode buffer over limit");
            }
        }
    }

    fn buffered_bytes(&self) -> usize {
        self.dstate.iter().map(|s| s.buffer.len()).sum::<usize>()
            + self.estate.iter().map(|s| s.buffer.len()).sum::<usize>()
    }

    fn check_high_watermark(&mut self) {
        if self.stream.buffer_limit == 0 {
            return;
        }
        if !self.stream.above_high_watermark && self.buffered_bytes() > self.stream.buffer_limit {
            self.stream.above_high_watermark = true;
            self.stream.high_watermark_count += 1;
            for cb in &self.stream.watermark_cbs {
                cb.on_above_write_buffer_high_watermark();
            }
        }
    }

    fn check_low_watermark(&mut self) {
        if self.stream.above_high_watermark && self.buffered_bytes() <= self.stream.buffer_limit {
            self.stream.above_high_watermark = false;
            self.stream.high_watermark_count = self.stream.high_watermark_count.saturating_sub(1);
            for cb in &self.stream.watermark_cbs {
                cb.on_below_write_buffer_low_watermark();
            }
        }
    }

    /// synthesize a response; runs the encoder chain exactly once and
    /// halts further decoder callbacks
    pub fn send_local_reply(&mut self, status: u16, body: &str) {
        self.execute_local_reply(status, body, Vec::new());
    }

    pub fn send_local_reply_with_headers(
        &mut self,
        status: u16,
        body: &str,
        headers: Vec<(String, String)>,
    ) {
        self.execute_local_reply(status, body, headers);
    }

    fn execute_local_reply(&mut self, status: u16, body: &str, headers: Vec<(String, String)>) {
        if self.stream.sent_local_reply {
            return;
        }
        self.stream.sent_local_reply = true;
        self.stream.decoder_chain_aborted = true;
        if self.stream.response_started {
            // too late for a clean reply, kill the stream
            self.reset_stream(StreamResetReason::LocalReset, "reply after response started");
            return;
        }
        self.stream.under_on_local_reply = true;
        let head = build_local_reply_head(status, body, &headers);
        self.stream.under_on_local_reply = false;
        let Ok(head) = head else {
            tracing::error!("failed to build local reply head");
            self.reset_stream(StreamResetReason::LocalReset, "local reply build failure");
            return;
        };
        let end_with_headers = body.is_empty();
        self.encode_headers(head, end_with_headers);
        if !body.is_empty() && !self.stream.encoder_chain_aborted {
            self.encode_data(Bytes::copy_from_slice(body.as_bytes()), true);
        }
    }

    /// abort whichever side is mid-flight and tell the codec
    pub fn reset_stream(&mut self, reason: StreamResetReason, transport_failure: &str) {
        if self.stream.filter_call_state.is_decoding() {
            self.stream.decoder_chain_aborted = true;
        } else if self.stream.filter_call_state.is_encoding() {
            self.stream.encoder_chain_aborted = true;
        } else {
            self.stream.decoder_chain_aborted = true;
            self.stream.encoder_chain_aborted = true;
        }
        self.callbacks.on_reset_stream(reason, transport_failure);
    }

    /// close the decode side; no-op when already complete or aborted
    pub fn maybe_end_decode(&mut self) {
        if self.stream.decoder_chain_complete || self.stream.decoder_chain_aborted {
            return;
        }
        if !self.stream.observed_decode_end_stream {
            return;
        }
        self.stream.decoder_chain_complete = true;
        for filter in &mut self.decoder_filters {
            filter.decode_complete();
        }
        self.callbacks.disarm_request_timeout();
        self.maybe_emit_stream_end();
    }

    /// close the encode side; no-op when already complete
    pub fn maybe_end_encode(&mut self) {
        if self.stream.encoder_chain_complete {
            return;
        }
        if !self.stream.observed_encode_end_stream {
            return;
        }
        self.stream.encoder_chain_complete = true;
        for filter in &mut self.encoder_filters {
            filter.encode_complete();
        }
        self.maybe_emit_stream_end();
    }

    fn maybe_emit_stream_end(&mut self) {
        if self.stream.stream_end_emitted || !self.stream.encoder_chain_complete {
            return;
        }
        let decode_settled =
            self.stream.decoder_chain_complete || self.stream.decoder_chain_aborted;
        // with half-close both directions must settle; otherwise the end of
        // the response ends the stream
        if self.stream.half_close_enabled && !decode_settled {
            return;
        }
        self.stream.stream_end_emitted = true;
        self.callbacks.end_stream();
    }
}

impl Drop for FilterManager {
    fn drop(&mut self) {
        for filter in &mut self.decoder_filters {
            filter.on_destroy();
        }
        for filter in &mut self.encoder_filters {
            filter.on_destroy();
        }
    }
}

fn build_local_reply_head(
    status: u16,
    body: &str,
    headers: &[(String, String)],
) -> Result<ResponseHead> {
    let mut head = ResponseHead::build(status, Version::HTTP_11, None)?;
    head.insert_header(http::header::SERVER, SERVER_NAME)?;
    head.insert_header(
        http::header::DATE,
        httpdate::fmt_http_date(std::time::SystemTime::now()),
    )?;
    head.insert_header(http::header::CONTENT_LENGTH, body.len().to_string())?;
    if !body.is_empty() {
        head.insert_header(http::header::CONTENT_TYPE, "text/plain")?;
    }
    for (name, value) in headers {
        head.insert_header(name.clone(), value.clone())?;
    }
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::StreamFilterBase;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// records everything the manager pushes toward the codec
    #[derive(Default)]
    struct Recorded {
        headers: Vec<(u16, bool)>,
        data: Vec<(Vec<u8>, bool)>,
        trailers: usize,
        ended: usize,
        resets: Vec<StreamResetReason>,
        timeout_disarms: usize,
    }

    #[derive(Clone, Default)]
    struct RecordingCallbacks {
        log: Arc<Mutex<Recorded>>,
    }

    impl FilterManagerCallbacks for RecordingCallbacks {
        fn encode_headers(&mut self, head: ResponseHead, end_stream: bool) {
            self.log.lock().headers.push((head.status.as_u16(), end_stream));
        }
        fn encode_data(&mut self, data: Bytes, end_stream: bool) {
            self.log.lock().data.push((data.to_vec(), end_stream));
        }
        fn encode_trailers(&mut self, _trailers: HeaderMap) {
            self.log.lock().trailers += 1;
        }
        fn end_stream(&mut self) {
            self.log.lock().ended += 1;
        }
        fn on_reset_stream(&mut self, reason: StreamResetReason, _failure: &str) {
            self.log.lock().resets.push(reason);
        }
        fn disarm_request_timeout(&mut self) {
            self.log.lock().timeout_disarms += 1;
        }
    }

    /// scripted decoder filter driven by canned statuses
    struct ScriptedDecoder {
        headers_status: FilterHeadersStatus,
        data_status: FilterDataStatus,
        calls: Arc<Mutex<Vec<String>>>,
        reply_on_headers: Option<(u16, String)>,
        tag: &'static str,
    }

    impl ScriptedDecoder {
        fn passthrough(tag: &'static str, calls: Arc<Mutex<Vec<String>>>) -> Box<Self> {
            Box::new(ScriptedDecoder {
                headers_status: FilterHeadersStatus::Continue,
                data_status: FilterDataStatus::Continue,
                calls,
                reply_on_headers: None,
                tag,
            })
        }
    }

    impl StreamFilterBase for ScriptedDecoder {
        fn name(&self) -> &str {
            self.tag
        }
    }

    impl StreamDecoderFilter for ScriptedDecoder {
        fn decode_headers(
            &mut self,
            ctx: &mut FilterContext<'_>,
            _headers: &mut RequestHead,
            end_stream: bool,
        ) -> FilterHeadersStatus {
            self.calls.lock().push(format!("{}:headers:{}", self.tag, end_stream));
            if let Some((status, body)) = self.reply_on_headers.take() {
                ctx.send_local_reply(status, &body);
            }
            self.headers_status
        }

        fn decode_data(
            &mut self,
            _ctx: &mut FilterContext<'_>,
            data: &mut ChainBuffer,
            end_stream: bool,
        ) -> FilterDataStatus {
            self.calls
                .lock()
                .push(format!("{}:data:{}:{}", self.tag, data.len(), end_stream));
            self.data_status
        }

        fn decode_complete(&mut self) {
            self.calls.lock().push(format!("{}:complete", self.tag));
        }
    }

    struct ScriptedEncoder {
        calls: Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    }

    impl StreamFilterBase for ScriptedEncoder {
        fn name(&self) -> &str {
            self.tag
        }
    }

    impl StreamEncoderFilter for ScriptedEncoder {
        fn encode_headers(
            &mut self,
            _ctx: &mut FilterContext<'_>,
            _headers: &mut ResponseHead,
            end_stream: bool,
        ) -> FilterHeadersStatus {
            self.calls
                .lock()
                .push(format!("{}:eheaders:{}", self.tag, end_stream));
            FilterHeadersStatus::Continue
        }

        fn encode_data(
            &mut self,
            _ctx: &mut FilterContext<'_>,
            data: &mut ChainBuffer,
            end_stream: bool,
        ) -> FilterDataStatus {
            self.calls
                .lock()
                .push(format!("{}:edata:{}:{}", self.tag, data.len(), end_stream));
            FilterDataStatus::Continue
        }
    }

    fn head() -> RequestHead {
        let mut h = RequestHead::build("GET", b"/", Version::HTTP_11, None).unwrap();
        h.insert_header(http::header::HOST, "test").unwrap();
        h
    }

    fn manager(log: Arc<Mutex<Recorded>>) -> FilterManager {
        FilterManager::new(Box::new(RecordingCallbacks { log }), 0, false)
    }

    #[test]
    fn headers_flow_through_the_whole_chain() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut fm = manager(log.clone());
        fm.add_decoder_filter(ScriptedDecoder::passthrough("a", calls.clone()));
        fm.add_decoder_filter(ScriptedDecoder::passthrough("b", calls.clone()));
        fm.decode_headers(head(), true);
        assert!(fm.decoder_chain_complete());
        let calls = calls.lock();
        assert_eq!(
            *calls,
            vec![
                "a:headers:true",
                "b:headers:true",
                "a:complete",
                "b:complete"
            ]
        );
        assert_eq!(log.lock().timeout_disarms, 1);
    }

    #[test]
    fn stop_iteration_pauses_and_continue_resumes() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut fm = manager(log);
        fm.add_decoder_filter(Box::new(ScriptedDecoder {
            headers_status: FilterHeadersStatus::StopIteration,
            data_status: FilterDataStatus::Continue,
            calls: calls.clone(),
            reply_on_headers: None,
            tag: "stop",
        }));
        fm.add_decoder_filter(ScriptedDecoder::passthrough("after", calls.clone()));
        fm.decode_headers(head(), false);
        assert_eq!(*calls.lock(), vec!["stop:headers:false"]);

        // data arriving while stopped waits at the stopping filter
        fm.decode_data(Bytes::from_static(b"xyz"), true);
        assert_eq!(calls.lock().len(), 1);

        fm.continue_decoding();
        let calls = calls.lock();
        assert!(calls.contains(&"after:headers:false".to_string()));
        assert!(calls.iter().any(|c| c.starts_with("after:data:3:true")));
        assert!(fm.decoder_chain_complete());
    }

    #[test]
    fn iteration_safety_no_callbacks_after_complete() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut fm = manager(log);
        fm.add_decoder_filter(ScriptedDecoder::passthrough("f", calls.clone()));
        fm.decode_headers(head(), false);
        fm.decode_data(Bytes::from_static(b"ab"), true);
        assert!(fm.decoder_chain_complete());
        let count = calls.lock().len();
        // idempotent end: nothing new fires
        fm.maybe_end_decode();
        fm.maybe_end_decode();
        assert_eq!(calls.lock().len(), count);
        let completes = calls
            .lock()
            .iter()
            .filter(|c| c.ends_with(":complete"))
            .count();
        assert_eq!(completes, 1);
    }

    #[test]
    fn local_reply_stops_the_decoder_and_encodes_once() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut fm = manager(log.clone());
        fm.add_decoder_filter(Box::new(ScriptedDecoder {
            headers_status: FilterHeadersStatus::StopIteration,
            data_status: FilterDataStatus::Continue,
            calls: calls.clone(),
            reply_on_headers: Some((404, "no route".to_string())),
            tag: "replier",
        }));
        fm.add_decoder_filter(ScriptedDecoder::passthrough("never", calls.clone()));
        fm.add_encoder_filter(Box::new(ScriptedEncoder {
            calls: calls.clone(),
            tag: "enc",
        }));

        fm.decode_headers(head(), false);
        assert!(fm.decoder_chain_aborted());
        assert!(fm.sent_local_reply());
        // the decoder chain stopped before "never"
        assert!(!calls.lock().iter().any(|c| c.starts_with("never:")));
        // the encoder chain saw the synthesized response exactly once
        assert_eq!(
            calls
                .lock()
                .iter()
                .filter(|c| c.starts_with("enc:eheaders"))
                .count(),
            1
        );
        let recorded = log.lock();
        assert_eq!(recorded.headers, vec![(404, false)]);
        assert_eq!(recorded.data.len(), 1);
        assert_eq!(recorded.data[0].0, b"no route".to_vec());
        assert!(recorded.data[0].1);
        assert_eq!(recorded.ended, 1);

        // no decoder callback fires after the reply
        let frozen = calls.lock().len();
        fm.decode_data(Bytes::from_static(b"late"), true);
        assert_eq!(calls.lock().len(), frozen);
    }

    #[test]
    fn local_reply_after_response_started_resets() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let mut fm = manager(log.clone());
        let resp = ResponseHead::build(200, Version::HTTP_11, None).unwrap();
        fm.encode_headers(resp, false);
        fm.send_local_reply(500, "too late");
        let recorded = log.lock();
        assert_eq!(recorded.resets, vec![StreamResetReason::LocalReset]);
        // only the original 200 went out
        assert_eq!(recorded.headers, vec![(200, false)]);
    }

    #[test]
    fn stop_all_buffer_replays_through_the_stopping_filter() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut fm = manager(log);
        fm.add_decoder_filter(Box::new(ScriptedDecoder {
            headers_status: FilterHeadersStatus::StopAllIterationAndBuffer,
            data_status: FilterDataStatus::Continue,
            calls: calls.clone(),
            reply_on_headers: None,
            tag: "gate",
        }));
        fm.add_decoder_filter(ScriptedDecoder::passthrough("tail", calls.clone()));
        fm.decode_headers(head(), false);
        fm.decode_data(Bytes::from_static(b"body!"), true);
        // nothing moved past the gate
        assert!(!calls.lock().iter().any(|c| c.starts_with("tail:")));
        fm.continue_decoding();
        let calls = calls.lock();
        // the gate itself replays its buffered data, then the tail sees it
        assert!(calls.iter().any(|c| c.starts_with("gate:data:5:true")));
        assert!(calls.iter().any(|c| c.starts_with("tail:data:5:true")));
        assert!(fm.decoder_chain_complete());
    }

    #[test]
    fn watermark_counter_catches_up_late_registrants() {
        use crate::filter::types::DownstreamWatermarkCallbacks;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting {
            above: AtomicUsize,
            below: AtomicUsize,
        }
        impl DownstreamWatermarkCallbacks for Counting {
            fn on_above_write_buffer_high_watermark(&self) {
                self.above.fetch_add(1, Ordering::SeqCst);
            }
            fn on_below_write_buffer_low_watermark(&self) {
                self.below.fetch_add(1, Ordering::SeqCst);
            }
        }

        let log = Arc::new(Mutex::new(Recorded::default()));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut fm = FilterManager::new(
            Box::new(RecordingCallbacks { log }),
            4, // tiny buffer limit
            false,
        );
        fm.add_decoder_filter(Box::new(ScriptedDecoder {
            headers_status: FilterHeadersStatus::Continue,
            data_status: FilterDataStatus::StopIterationAndWatermark,
            calls: calls.clone(),
            reply_on_headers: None,
            tag: "wm",
        }));
        fm.decode_headers(head(), false);
        fm.decode_data(Bytes::from_static(b"0123456789"), false);
        assert_eq!(fm.high_watermark_count(), 1);

        let counting = Arc::new(Counting {
            above: AtomicUsize::new(0),
            below: AtomicUsize::new(0),
        });
        // a late registrant is caught up to the current counter
        fm.stream
            .watermark_cbs
            .push(counting.clone() as Arc<dyn DownstreamWatermarkCallbacks>);
        for _ in 0..fm.high_watermark_count() {
            counting.on_above_write_buffer_high_watermark();
        }
        assert_eq!(counting.above.load(Ordering::SeqCst), 1);

        fm.continue_decoding();
        assert_eq!(fm.high_watermark_count(), 0);
        assert_eq!(counting.below.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn plain_buffer_overflow_answers_413() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut fm = FilterManager::new(Box::new(RecordingCallbacks { log: log.clone() }), 4, false);
        fm.add_decoder_filter(Box::new(ScriptedDecoder {
            headers_status: FilterHeadersStatus::Continue,
            data_status: FilterDataStatus::StopIterationAndBuffer,
            calls,
            reply_on_headers: None,
            tag: "buf",
        }));
        fm.decode_headers(head(), false);
        fm.decode_data(Bytes::from_static(b"way too much data"), false);
        let recorded = log.lock();
        assert_eq!(recorded.headers.len(), 1);
        assert_eq!(recorded.headers[0].0, 413);
    }

    #[test]
    fn half_close_waits_for_both_sides() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let mut fm = FilterManager::new(
            Box::new(RecordingCallbacks { log: log.clone() }),
            0,
            true, // half close enabled
        );
        let resp = ResponseHead::build(200, Version::HTTP_11, None).unwrap();
        fm.encode_headers(resp, true);
        assert_eq!(log.lock().ended, 0);
        fm.decode_headers(head(), true);
        assert_eq!(log.lock().ended, 1);
    }

    #[test]
    fn encode_end_ends_stream_without_half_close() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let mut fm = manager(log.clone());
        let resp = ResponseHead::build(204, Version::HTTP_11, None).unwrap();
        fm.encode_headers(resp, true);
        assert_eq!(log.lock().ended, 1);
        // idempotent
        fm.maybe_end_encode();
        assert_eq!(log.lock().ended, 1);
    }

    #[test]
    fn reset_during_decode_aborts_the_decoder_side() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let mut fm = manager(log.clone());
        fm.reset_stream(StreamResetReason::ConnectionTermination, "peer went away");
        assert!(fm.decoder_chain_aborted());
        assert_eq!(
            log.lock().resets,
            vec![StreamResetReason::ConnectionTermination]
        );
    }
}
