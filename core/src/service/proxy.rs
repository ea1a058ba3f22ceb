use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Version};
use parking_lot::Mutex;

use crate::codec::{Downstream, RequestHead, ResponseHead, Task};
use crate::filter::manager::{FilterManager, FilterManagerCallbacks};
use crate::filter::rewrite::{RequestRewriteFilter, ResponseRewriteFilter};
use crate::filter::router::{send_pool_failure_reply, RouterFilter, UpstreamPlan, UPSTREAM_PLAN_KEY};
use crate::filter::state_filter::StateFilter;
use crate::filter::types::StreamResetReason;
use crate::network::Address;
use crate::prelude::{Error, ErrorKind};
use crate::router::RouteMatcher;
use crate::runtime::Worker;
use crate::service::runner::ServiceApp;
use crate::stream::Stream;
use crate::upstream::thread_local::HTTP11_PROTOCOL_HASH;
use crate::upstream::ClusterManager;

const DEFAULT_BUFFER_LIMIT: usize = 1024 * 1024;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// response events queued by the filter chain, drained onto the downstream
/// codec between chain invocations
enum OutEvent {
    Headers(ResponseHead, bool),
    Data(Bytes, bool),
    Trailers(HeaderMap),
    End,
    Reset(StreamResetReason, String),
}

#[derive(Clone, Default)]
struct ResponseEmitter {
    queue: Arc<Mutex<VecDeque<OutEvent>>>,
}

impl FilterManagerCallbacks for ResponseEmitter {
    fn encode_headers(&mut self, head: ResponseHead, end_stream: bool) {
        self.queue.lock().push_back(OutEvent::Headers(head, end_stream));
    }

    fn encode_data(&mut self, data: Bytes, end_stream: bool) {
        self.queue.lock().push_back(OutEvent::Data(data, end_stream));
    }

    fn encode_trailers(&mut self, trailers: HeaderMap) {
        self.queue.lock().push_back(OutEvent::Trailers(trailers));
    }

    fn end_stream(&mut self) {
        self.queue.lock().push_back(OutEvent::End);
    }

    fn on_reset_stream(&mut self, reason: StreamResetReason, transport_failure: &str) {
        self.queue
            .lock()
            .push_back(OutEvent::Reset(reason, transport_failure.to_string()));
    }
}

/// what to do with the connection after one exchange
enum Disposition {
    KeepAlive,
    Close,
    /// protocol switch: hand both raw streams to a tunnel
    UpgradeTunnel(Stream),
}

/// the layer-7 proxy app: one instance per worker, shared by every
/// connection that worker accepts
pub struct HttpProxy {
    matcher: RouteMatcher,
    cluster_manager: Arc<ClusterManager>,
    worker: Arc<Worker>,
    buffer_limit: usize,
    idle_timeout: Duration,
    request_timeout: Duration,
}

impl HttpProxy {
    pub fn new(
        matcher: RouteMatcher,
        cluster_manager: Arc<ClusterManager>,
        worker: Arc<Worker>,
    ) -> HttpProxy {
        HttpProxy {
            matcher,
            cluster_manager,
            worker,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn set_buffer_limit(&mut self, limit: usize) {
        self.buffer_limit = limit;
    }

    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        self.idle_timeout = timeout;
    }

    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }
}

#[async_trait]
impl ServiceApp for HttpProxy {
    async fn handle_connection(self: Arc<Self>, stream: Stream, peer: Address) {
        tracing::debug!("connection from {}", peer);
        let mut downstream = Downstream::new(stream);
        loop {
            let request = match tokio::time::timeout(self.idle_timeout, downstream.read_request()).await
            {
                Err(_) => {
                    tracing::debug!("idle timeout on {}", peer);
                    break;
                }
                Ok(Ok(true)) => true,
                Ok(Ok(false)) => break,
                Ok(Err(e)) => {
                    reject(&mut downstream, &e).await;
                    break;
                }
            };
            debug_assert!(request);

            let serve = tokio::time::timeout(
                self.request_timeout,
                self.clone().serve_one(&mut downstream),
            )
            .await;
            match serve {
                Err(_) => {
                    tracing::warn!("request timeout on {}", peer);
                    break;
                }
                Ok(Disposition::KeepAlive) => continue,
                Ok(Disposition::Close) => break,
                Ok(Disposition::UpgradeTunnel(mut upstream_raw)) => {
                    let mut client_raw = downstream.return_stream();
                    let copied =
                        tokio::io::copy_bidirectional(&mut client_raw, &mut upstream_raw).await;
                    tracing::debug!("tunnel from {} closed: {:?}", peer, copied);
                    return;
                }
            }
        }
        downstream.shutdown().await;
    }
}

impl HttpProxy {
    async fn serve_one(self: Arc<Self>, downstream: &mut Downstream) -> Disposition {
        let Some(head) = downstream.request_head().cloned() else {
            return Disposition::Close;
        };

        if head.method == Method::CONNECT {
            return self.serve_connect(downstream, head).await;
        }

        // answer the expectation ourselves, the body is read before any
        // upstream connection exists
        if downstream.is_expecting_continue() && !downstream.is_body_finished() {
            if downstream.write_continue().await.is_err() {
                return Disposition::Close;
            }
        }

        let route = self.matcher.route(&head, rand::random());
        let entry = route.as_ref().and_then(|rm| {
            self.cluster_manager
                .get_thread_local_cluster(&self.worker, &rm.route.cluster_name)
        });
        let host = entry.as_ref().and_then(|e| e.choose_host());
        let request_is_upgrade = downstream.is_upgrade_request();

        let emitter = ResponseEmitter::default();
        let mut fm = FilterManager::new(Box::new(emitter.clone()), self.buffer_limit, false);
        fm.stream_info_mut().route = route;
        fm.stream_info_mut().upstream_host = host.clone();
        fm.stream_info_mut().upstream_secure = host
            .as_ref()
            .map(|h| h.transport_socket_factory().implements_secure_transport())
            .unwrap_or(false);
        fm.add_decoder_filter(Box::new(StateFilter::new()));
        fm.add_decoder_filter(Box::new(RequestRewriteFilter::new()));
        fm.add_decoder_filter(Box::new(RouterFilter::new()));
        fm.add_encoder_filter(Box::new(ResponseRewriteFilter::new()));

        // run the request through the decoder chain. an upgrade request
        // ends at its head: the raw bytes after it belong to the tunnel
        let headers_end = request_is_upgrade || downstream.is_body_finished();
        fm.decode_headers(head, headers_end);
        while !request_is_upgrade
            && !fm.decoder_chain_aborted()
            && !fm.decoder_chain_complete()
            && !downstream.is_body_finished()
        {
            match downstream.read_body().await {
                Ok(Some(chunk)) => fm.decode_data(chunk, false),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("request body error: {}", e);
                    fm.send_local_reply(e.kind.response_code(), e.kind.public_reason());
                    if !flush_events(&emitter, downstream).await {
                        return Disposition::Close;
                    }
                    return Disposition::Close;
                }
            }
        }
        if !request_is_upgrade && !fm.decoder_chain_aborted() && !fm.decoder_chain_complete() {
            match downstream.take_request_trailers() {
                Some(trailers) => fm.decode_trailers(trailers),
                None => fm.decode_data(Bytes::new(), true),
            }
        }

        // a local reply may already sit in the queue
        if !flush_events(&emitter, downstream).await {
            return Disposition::Close;
        }
        if fm.sent_local_reply() {
            return keepalive_disposition(downstream);
        }

        let (Some(entry), Some(host)) = (entry, host) else {
            fm.send_local_reply(503, "no healthy upstream");
            let _ = flush_events(&emitter, downstream).await;
            return keepalive_disposition(downstream);
        };
        let Some(plan) = fm
            .filter_state()
            .get_data::<UpstreamPlan>(UPSTREAM_PLAN_KEY)
        else {
            fm.send_local_reply(500, "upstream error");
            let _ = flush_events(&emitter, downstream).await;
            return keepalive_disposition(downstream);
        };

        // obtain an upstream client from this worker's pool
        let pool = entry.http_pool(&host, *HTTP11_PROTOCOL_HASH);
        let mut client = match pool.new_stream_await().await {
            Ok(client) => client,
            Err(e) => {
                tracing::info!("pool failure for {}: {}", host.address(), e);
                send_pool_failure_reply(&mut fm, &e);
                let _ = flush_events(&emitter, downstream).await;
                return keepalive_disposition(downstream);
            }
        };

        // forward the finalized request
        let mut up_head = match fm.request_headers().cloned() {
            Some(head) => head,
            None => {
                client.release(false);
                return Disposition::Close;
            }
        };
        let body = plan.body.lock().take_all();
        let trailers = plan.trailers.lock().take();
        if !request_is_upgrade {
            // the body was fully collected, its length is authoritative
            up_head.remove_header(http::header::TRANSFER_ENCODING.as_str());
            if body.is_empty() && crate::codec::util::is_bodyless_method(&up_head.method) {
                up_head.remove_header(http::header::CONTENT_LENGTH.as_str());
            } else {
                let _ = up_head
                    .insert_header(http::header::CONTENT_LENGTH, body.len().to_string());
            }
        }

        let sent: crate::prelude::Result<()> = async {
            client.write_request_header(up_head).await?;
            if !body.is_empty() {
                client.write_request_body(&body).await?;
            }
            client.finish_request_body(trailers.as_ref()).await?;
            Ok(())
        }
        .await;
        if let Err(e) = sent {
            tracing::info!("failed to forward to {}: {}", host.address(), e);
            client.release(false);
            send_pool_failure_reply(
                &mut fm,
                &Error::explain(ErrorKind::RemoteConnectionFailure, e.to_string()),
            );
            let _ = flush_events(&emitter, downstream).await;
            return keepalive_disposition(downstream);
        }

        // stream the response back through the encoder chain
        loop {
            match client.read_response_task().await {
                Ok(Task::Header(h, end)) => {
                    if h.status == http::StatusCode::SWITCHING_PROTOCOLS && request_is_upgrade {
                        if downstream.write_response_header(&h, false).await.is_err() {
                            return Disposition::Close;
                        }
                        return Disposition::UpgradeTunnel(client.into_stream());
                    }
                    fm.encode_headers(h, end);
                }
                Ok(Task::Body(chunk, end)) => match chunk {
                    Some(bytes) => fm.encode_data(bytes, end),
                    None => {
                        if end {
                            fm.encode_data(Bytes::new(), true);
                        }
                    }
                },
                Ok(Task::Trailer(Some(trailers))) => fm.encode_trailers(*trailers),
                Ok(Task::Trailer(None)) | Ok(Task::Done) => break,
                Ok(Task::Failed(e)) => {
                    return self
                        .upstream_failure(downstream, &emitter, &mut fm, client, *e)
                        .await;
                }
                Err(e) => {
                    return self
                        .upstream_failure(downstream, &emitter, &mut fm, client, *e)
                        .await;
                }
            }
            if !flush_events(&emitter, downstream).await {
                client.release(false);
                return Disposition::Close;
            }
            if fm.encoder_chain_complete() {
                break;
            }
        }

        let reusable = client.is_connection_reusable();
        client.release(reusable);
        if !flush_events(&emitter, downstream).await {
            return Disposition::Close;
        }
        keepalive_disposition(downstream)
    }

    /// terminal upstream error: synthesize a 5xx when nothing was written
    /// yet, otherwise kill the connection with no further bytes
    async fn upstream_failure(
        &self,
        downstream: &mut Downstream,
        emitter: &ResponseEmitter,
        fm: &mut FilterManager,
        client: crate::pool::http::PooledHttpClient,
        err: crate::prelude::result::Error,
    ) -> Disposition {
        tracing::info!("upstream failure: {}", err);
        client.release(false);
        if downstream.is_response_started() {
            return Disposition::Close;
        }
        fm.send_local_reply(err.kind.response_code(), err.kind.public_reason());
        let _ = flush_events(emitter, downstream).await;
        keepalive_disposition(downstream)
    }

    /// connect tunnels ride the tcp pool, no http framing past the 200
    async fn serve_connect(
        self: Arc<Self>,
        downstream: &mut Downstream,
        head: RequestHead,
    ) -> Disposition {
        let route = self.matcher.route(&head, rand::random());
        let entry = route.as_ref().and_then(|rm| {
            self.cluster_manager
                .get_thread_local_cluster(&self.worker, &rm.route.cluster_name)
        });
        let host = entry.as_ref().and_then(|e| e.choose_host());
        let (Some(entry), Some(host)) = (entry, host) else {
            let status = if route.is_none() { 404 } else { 503 };
            let _ = write_plain_reply(downstream, status).await;
            return Disposition::Close;
        };
        let pool = entry.tcp_pool(&host);
        match pool.new_connection_await().await {
            Ok(conn) => {
                if write_plain_reply(downstream, 200).await.is_err() {
                    return Disposition::Close;
                }
                Disposition::UpgradeTunnel(conn.into_stream())
            }
            Err(e) => {
                tracing::info!("connect tunnel failure for {}: {}", host.address(), e);
                let _ = write_plain_reply(downstream, e.kind.response_code()).await;
                Disposition::Close
            }
        }
    }
}

fn keepalive_disposition(downstream: &Downstream) -> Disposition {
    if downstream.is_session_keepalive() {
        Disposition::KeepAlive
    } else {
        Disposition::Close
    }
}

/// drain queued response events onto the downstream codec.
/// returns false when the connection is no longer usable.
async fn flush_events(emitter: &ResponseEmitter, downstream: &mut Downstream) -> bool {
    loop {
        let event = emitter.queue.lock().pop_front();
        let Some(event) = event else {
            return true;
        };
        let outcome = match event {
            OutEvent::Headers(head, end) => downstream.write_response_header(&head, end).await,
            OutEvent::Data(data, end) => {
                let write = if data.is_empty() {
                    Ok(None)
                } else {
                    downstream.write_response_body(&data).await
                };
                match write {
                    Ok(_) if end => downstream.finish_response(None).await,
                    Ok(_) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            OutEvent::Trailers(trailers) => downstream.finish_response(Some(&trailers)).await,
            OutEvent::End => Ok(()),
            OutEvent::Reset(reason, failure) => {
                tracing::debug!("stream reset {:?}: {}", reason, failure);
                return false;
            }
        };
        if let Err(e) = outcome {
            tracing::debug!("downstream write failed: {}", e);
            return false;
        }
    }
}

async fn reject(downstream: &mut Downstream, err: &crate::prelude::result::Error) {
    tracing::debug!("rejecting connection: {}", err);
    if downstream.is_response_started() {
        return;
    }
    let _ = write_plain_reply(downstream, err.kind.response_code()).await;
}

async fn write_plain_reply(downstream: &mut Downstream, status: u16) -> crate::prelude::Result<()> {
    let mut head = ResponseHead::build(status, Version::HTTP_11, None)?;
    head.insert_header(http::header::SERVER, "halberd")?;
    head.insert_header(http::header::CONTENT_LENGTH, "0")?;
    downstream.write_response_header(&head, true).await
}
