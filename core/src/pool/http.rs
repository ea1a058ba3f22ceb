use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use tokio::net::{TcpStream, UnixStream};

use crate::codec::UpstreamSession;
use crate::network::Address;
use crate::prelude::{Error, ErrorKind, Result};
use crate::stream::connection::Connection;
use crate::stream::Stream;
use crate::upstream::host::Host;
use crate::upstream::resource::PriorityResources;

use super::{DrainBehavior, DrainablePool, PoolFailureReason};

/// consumer of one `new_stream` call; exactly one of the two fires
pub trait HttpPoolCallbacks: Send {
    fn on_pool_ready(self: Box<Self>, client: PooledHttpClient);
    fn on_pool_failure(
        self: Box<Self>,
        reason: PoolFailureReason,
        description: String,
        host: Arc<Host>,
    );
}

struct PendingStream {
    id: u64,
    callbacks: Box<dyn HttpPoolCallbacks>,
    queued_at: Instant,
}

struct IdleClient {
    session: UpstreamSession,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<IdleClient>,
    pending: VecDeque<PendingStream>,
    busy: usize,
    connecting: usize,
    next_pending_id: u64,
    /// released clients close instead of going idle
    drain_on_release: bool,
    /// refuse every new stream
    closed_for_streams: bool,
}

/// what to do once the state lock is dropped; callbacks never run under
/// the lock because they may re-enter the pool
enum Followup {
    Ready(Box<dyn HttpPoolCallbacks>, PooledHttpClient),
    Failure(Box<dyn HttpPoolCallbacks>, PoolFailureReason, String, Arc<Host>),
    Connect,
}

// most idle hits land here without touching the locked list
const HOT_IDLE_SIZE: usize = 16;

/// http/1.1 connection pool for one (host, priority) pair.
///
/// client lifecycle: Connecting -> Ready(idle) -> Busy -> {Ready, closed}.
/// pending streams bind to freed or freshly-connected clients in fifo
/// order; at most one stream rides an http/1.1 client at a time. released
/// clients park in a small lock-free hot queue first, overflowing into the
/// locked idle list.
pub struct HttpConnPool {
    me: Weak<HttpConnPool>,
    host: Arc<Host>,
    priority: u32,
    hot_idle: ArrayQueue<IdleClient>,
    state: Mutex<PoolState>,
}

impl HttpConnPool {
    pub fn new(host: Arc<Host>, priority: u32) -> Arc<HttpConnPool> {
        Arc::new_cyclic(|me| HttpConnPool {
            me: me.clone(),
            host,
            priority,
            hot_idle: ArrayQueue::new(HOT_IDLE_SIZE),
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    fn resources(&self) -> &PriorityResources {
        self.host
            .cluster_info()
            .resource_manager()
            .resources(self.priority)
    }

    pub fn idle_count(&self) -> usize {
        self.hot_idle.len() + self.state.lock().idle.len()
    }

    pub fn busy_count(&self) -> usize {
        self.state.lock().busy
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn connecting_count(&self) -> usize {
        self.state.lock().connecting
    }

    /// ask for an upstream client.
    ///
    /// an idle client binds synchronously through `on_pool_ready`; capacity
    /// permitting, the stream queues (fifo) and a connect may start; with
    /// the pending queue full the call fails synchronously with overflow.
    /// the returned handle cancels the pending entry when dropped.
    pub fn new_stream(
        &self,
        callbacks: Box<dyn HttpPoolCallbacks>,
    ) -> Option<Cancelable> {
        let mut followups: Vec<Followup> = Vec::new();
        let mut handle = None;
        {
            let mut state = self.state.lock();
            if state.closed_for_streams {
                followups.push(Followup::Failure(
                    callbacks,
                    PoolFailureReason::Overflow,
                    "pool is draining".to_string(),
                    self.host.clone(),
                ));
            } else if let Some(idle) = self.hot_idle.pop().or_else(|| state.idle.pop()) {
                state.busy += 1;
                self.host.dec_idle_connections();
                followups.push(Followup::Ready(callbacks, self.make_client(idle.session)));
            } else {
                let res = self.resources();
                if !res.pending_requests.can_create() {
                    followups.push(Followup::Failure(
                        callbacks,
                        PoolFailureReason::Overflow,
                        "pending stream queue full".to_string(),
                        self.host.clone(),
                    ));
                } else {
                    res.pending_requests.inc();
                    let id = state.next_pending_id;
                    state.next_pending_id += 1;
                    state.pending.push_back(PendingStream {
                        id,
                        callbacks,
                        queued_at: Instant::now(),
                    });
                    handle = Some(Cancelable {
                        pool: self.me.clone(),
                        pending_id: id,
                    });
                    if self.may_connect(&state) {
                        state.connecting += 1;
                        res.connections.inc();
                        followups.push(Followup::Connect);
                    }
                }
            }
        }
        self.run_followups(followups);
        handle
    }

    /// awaitable wrapper over the callback surface
    pub async fn new_stream_await(&self) -> Result<PooledHttpClient> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _handle = self.new_stream(Box::new(OneshotCallbacks { tx }));
        match rx.await {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::explain(ErrorKind::Internal, "pool dropped the stream")),
        }
    }

    /// preconnect policy: one dial in flight per queued stream, inside the
    /// per-host and per-cluster caps
    fn may_connect(&self, state: &PoolState) -> bool {
        let res = self.resources();
        let total = self.hot_idle.len() + state.idle.len() + state.busy + state.connecting;
        total < res.max_connections_per_host
            && state.connecting < state.pending.len()
            && res.connections.can_create()
    }

    fn make_client(&self, session: UpstreamSession) -> PooledHttpClient {
        PooledHttpClient {
            session: Some(session),
            pool: self.me.clone(),
            host: self.host.clone(),
            priority: self.priority,
        }
    }

    fn run_followups(&self, followups: Vec<Followup>) {
        for followup in followups {
            match followup {
                Followup::Ready(callbacks, client) => callbacks.on_pool_ready(client),
                Followup::Failure(callbacks, reason, description, host) => {
                    callbacks.on_pool_failure(reason, description, host)
                }
                Followup::Connect => self.spawn_connect(),
            }
        }
    }

    fn spawn_connect(&self) {
        let (Ok(runtime), Some(pool)) = (tokio::runtime::Handle::try_current(), self.me.upgrade())
        else {
            tracing::warn!("no runtime to dial {} from", self.host.address());
            self.abandon_connect();
            return;
        };
        runtime.spawn(async move {
            let timeout = pool.host.cluster_info().connect_timeout();
            let started = Instant::now();
            let dialed = tokio::time::timeout(timeout, dial(pool.host.clone())).await;
            match dialed {
                Ok(Ok(stream)) => {
                    pool.host.record_rtt(started.elapsed());
                    pool.on_connect_success(stream);
                }
                Ok(Err(e)) => {
                    pool.on_connect_failure(
                        PoolFailureReason::LocalConnectionFailure,
                        e.to_string(),
                    );
                }
                Err(_) => {
                    pool.on_connect_failure(
                        PoolFailureReason::ConnectionTimeout,
                        format!("connect timed out after {:?}", timeout),
                    );
                }
            }
        });
    }

    fn abandon_connect(&self) {
        let mut state = self.state.lock();
        state.connecting -= 1;
        self.resources().connections.dec();
    }

    fn on_connect_success(&self, stream: Stream) {
        let mut followups = Vec::new();
        {
            let mut state = self.state.lock();
            state.connecting -= 1;
            self.host.inc_active_connections();
            let session = UpstreamSession::new(stream);
            if state.closed_for_streams {
                // drained while we were dialing
                self.host.dec_active_connections();
                self.resources().connections.dec();
                drop(session);
            } else if let Some(pending) = state.pending.pop_front() {
                self.resources().pending_requests.dec();
                state.busy += 1;
                tracing::debug!(
                    "binding stream pending for {:?} to {}",
                    pending.queued_at.elapsed(),
                    self.host.address()
                );
                followups.push(Followup::Ready(
                    pending.callbacks,
                    self.make_client(session),
                ));
            } else {
                if let Err(idle) = self.hot_idle.push(IdleClient { session }) {
                    state.idle.push(idle);
                }
                self.host.inc_idle_connections();
            }
        }
        self.run_followups(followups);
    }

    fn on_connect_failure(&self, reason: PoolFailureReason, description: String) {
        let mut followups = Vec::new();
        {
            let mut state = self.state.lock();
            state.connecting -= 1;
            let res = self.resources();
            res.connections.dec();
            // every queued stream shares the fate of the failed connect
            while let Some(pending) = state.pending.pop_front() {
                res.pending_requests.dec();
                followups.push(Followup::Failure(
                    pending.callbacks,
                    reason,
                    description.clone(),
                    self.host.clone(),
                ));
            }
        }
        self.run_followups(followups);
    }

    /// a busy client came back; park it, hand it to the queue, or close it
    fn on_client_released(&self, mut session: UpstreamSession, reusable: bool) {
        let over_request_cap = self
            .host
            .cluster_info()
            .protocol_options()
            .max_requests_per_connection
            .map(|max| session.requests_sent() >= max)
            .unwrap_or(false);
        let mut followups = Vec::new();
        {
            let mut state = self.state.lock();
            state.busy -= 1;
            let keep = reusable && !over_request_cap && !state.drain_on_release;
            if keep {
                session.reuse();
                // a freed client serves the queue before going idle
                if let Some(pending) = state.pending.pop_front() {
                    self.resources().pending_requests.dec();
                    state.busy += 1;
                    followups.push(Followup::Ready(
                        pending.callbacks,
                        self.make_client(session),
                    ));
                } else {
                    if let Err(idle) = self.hot_idle.push(IdleClient { session }) {
                        state.idle.push(idle);
                    }
                    self.host.inc_idle_connections();
                }
            } else {
                drop(session);
                self.host.dec_active_connections();
                self.resources().connections.dec();
                // the queue may still need a connection
                if !state.pending.is_empty() && self.may_connect(&state) {
                    state.connecting += 1;
                    self.resources().connections.inc();
                    followups.push(Followup::Connect);
                }
            }
        }
        self.run_followups(followups);
    }

    fn cancel_pending(&self, pending_id: u64) {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|p| p.id != pending_id);
        if state.pending.len() < before {
            self.resources().pending_requests.dec();
        }
    }
}

impl DrainablePool for HttpConnPool {
    fn drain_connections(&self, behavior: DrainBehavior) {
        let mut failed: Vec<(Box<dyn HttpPoolCallbacks>, String)> = Vec::new();
        {
            let mut state = self.state.lock();
            state.drain_on_release = true;
            if behavior == DrainBehavior::DrainAndDelete {
                state.closed_for_streams = true;
                let res = self.resources();
                while let Some(idle) = self.hot_idle.pop() {
                    self.host.dec_idle_connections();
                    self.host.dec_active_connections();
                    res.connections.dec();
                    drop(idle.session);
                }
                for idle in state.idle.drain(..) {
                    self.host.dec_idle_connections();
                    self.host.dec_active_connections();
                    res.connections.dec();
                    drop(idle.session);
                }
                while let Some(pending) = state.pending.pop_front() {
                    res.pending_requests.dec();
                    failed.push((pending.callbacks, "pool deleted".to_string()));
                }
            }
        }
        for (callbacks, description) in failed {
            callbacks.on_pool_failure(
                PoolFailureReason::Overflow,
                description,
                self.host.clone(),
            );
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.busy == 0 && state.connecting == 0 && state.pending.is_empty()
    }
}

async fn dial(host: Arc<Host>) -> Result<Stream> {
    let raw: Stream = match host.address() {
        Address::Pipe(path) => {
            let sock = UnixStream::connect(path).await.map_err(|e| {
                Error::because(ErrorKind::LocalConnectionFailure, "unix connect", e)
            })?;
            Box::new(Connection::from(sock))
        }
        addr => {
            let socket_addr = addr
                .socket_addr()
                .ok_or_else(|| Error::new(ErrorKind::Internal))?;
            let sock = TcpStream::connect(socket_addr).await.map_err(|e| {
                Error::because(ErrorKind::LocalConnectionFailure, "tcp connect", e)
            })?;
            let mut conn = Connection::from(sock);
            conn.set_no_delay();
            Box::new(conn)
        }
    };
    host.transport_socket_factory().wrap_connection(raw).await
}

/// handle for a queued stream; dropping it abandons the queue slot
pub struct Cancelable {
    pool: Weak<HttpConnPool>,
    pending_id: u64,
}

impl Cancelable {
    pub fn cancel(self) {
        // drop does the work
    }
}

impl Drop for Cancelable {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.cancel_pending(self.pending_id);
        }
    }
}

/// a busy pool client: one upstream connection bound to one stream.
/// `release` returns it to the pool; dropping it closes the connection.
pub struct PooledHttpClient {
    session: Option<UpstreamSession>,
    pool: Weak<HttpConnPool>,
    host: Arc<Host>,
    priority: u32,
}

impl std::fmt::Debug for PooledHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledHttpClient").finish_non_exhaustive()
    }
}

impl PooledHttpClient {
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// move the raw stream out for a protocol switch; the connection is
    /// then accounted as closed and never returns to the pool
    pub fn into_stream(mut self) -> crate::stream::Stream {
        let session = self.session.take().expect("client already released");
        if let Some(pool) = self.pool.upgrade() {
            pool.state.lock().busy -= 1;
        }
        self.host.dec_active_connections();
        self.host
            .cluster_info()
            .resource_manager()
            .resources(self.priority)
            .connections
            .dec();
        session.return_stream()
    }

    /// hand the connection back; `reusable` says whether the exchange left
    /// it in a state another stream can use
    pub fn release(mut self, reusable: bool) {
        let Some(session) = self.session.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.on_client_released(session, reusable),
            None => {
                drop(session);
                self.host.dec_active_connections();
                self.host
                    .cluster_info()
                    .resource_manager()
                    .resources(self.priority)
                    .connections
                    .dec();
            }
        }
    }
}

impl Deref for PooledHttpClient {
    type Target = UpstreamSession;

    fn deref(&self) -> &UpstreamSession {
        self.session.as_ref().expect("client already released")
    }
}

impl DerefMut for PooledHttpClient {
    fn deref_mut(&mut self) -> &mut UpstreamSession {
        self.session.as_mut().expect("client already released")
    }
}

impl Drop for PooledHttpClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            // dropped without release: the connection dies with it
            match self.pool.upgrade() {
                Some(pool) => pool.on_client_released(session, false),
                None => {
                    drop(session);
                    self.host.dec_active_connections();
                    self.host
                        .cluster_info()
                        .resource_manager()
                        .resources(self.priority)
                        .connections
                        .dec();
                }
            }
        }
    }
}

struct OneshotCallbacks {
    tx: tokio::sync::oneshot::Sender<Result<PooledHttpClient>>,
}

impl HttpPoolCallbacks for OneshotCallbacks {
    fn on_pool_ready(self: Box<Self>, client: PooledHttpClient) {
        let _ = self.tx.send(Ok(client));
    }

    fn on_pool_failure(
        self: Box<Self>,
        reason: PoolFailureReason,
        description: String,
        _host: Arc<Host>,
    ) {
        let kind = match reason {
            PoolFailureReason::Overflow => ErrorKind::Overflow,
            PoolFailureReason::LocalConnectionFailure => ErrorKind::LocalConnectionFailure,
            PoolFailureReason::RemoteConnectionFailure => ErrorKind::RemoteConnectionFailure,
            PoolFailureReason::ConnectionTimeout => ErrorKind::ConnectionTimeout,
        };
        let _ = self.tx.send(Err(Error::explain(kind, description)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::cluster::ClusterInfo;
    use crate::upstream::resource::ResourceLimits;
    use std::collections::HashMap;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn origin(respond: &'static [u8]) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        use tokio::io::AsyncReadExt;
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {
                                if sock.write_all(respond).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    fn host_for(addr: std::net::SocketAddr, limits: ResourceLimits) -> Arc<Host> {
        let info = ClusterInfo::for_tests_with_limits("pool-test", limits);
        Host::new(
            info,
            Address::from(addr),
            None,
            HashMap::new(),
            Arc::new(crate::stream::RawTransportSocketFactory),
            0,
        )
    }

    const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";

    async fn run_exchange(client: &mut PooledHttpClient) {
        let head = crate::codec::RequestHead::build(
            "GET",
            b"/",
            http::Version::HTTP_11,
            None,
        )
        .unwrap();
        client.write_request_header(head).await.unwrap();
        client.finish_request_body(None).await.unwrap();
        loop {
            let task = client.read_response_task().await.unwrap();
            if task.is_end() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn connect_bind_and_reuse() {
        let addr = origin(OK).await;
        let host = host_for(addr, ResourceLimits::default());
        let pool = HttpConnPool::new(host.clone(), 0);

        let mut client = pool.new_stream_await().await.unwrap();
        assert_eq!(pool.busy_count(), 1);
        run_exchange(&mut client).await;
        let reusable = client.is_connection_reusable();
        assert!(reusable);
        client.release(reusable);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(host.idle_connections(), 1);

        // second stream rides the pooled connection
        let mut client = pool.new_stream_await().await.unwrap();
        assert_eq!(pool.idle_count(), 0);
        run_exchange(&mut client).await;
        client.release(true);
        assert_eq!(host.active_connections(), 1);
    }

    #[tokio::test]
    async fn overflow_is_synchronous() {
        let addr = origin(OK).await;
        let limits = ResourceLimits {
            max_connections_per_host: 1,
            max_pending_requests: 1,
            ..Default::default()
        };
        let host = host_for(addr, limits);
        let pool = HttpConnPool::new(host, 0);

        // first stream occupies the only connection
        let client = pool.new_stream_await().await.unwrap();
        // second pends
        let (tx, _rx) = tokio::sync::oneshot::channel();
        let _pending = pool.new_stream(Box::new(OneshotCallbacks { tx }));
        assert_eq!(pool.pending_count(), 1);
        // third overflows synchronously
        let err = pool.new_stream_await().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
        client.release(true);
    }

    #[tokio::test]
    async fn pending_streams_bind_fifo() {
        let addr = origin(OK).await;
        let limits = ResourceLimits {
            max_connections_per_host: 1,
            ..Default::default()
        };
        let host = host_for(addr, limits);
        let pool = HttpConnPool::new(host, 0);

        let mut first = pool.new_stream_await().await.unwrap();
        let (tx_a, rx_a) = tokio::sync::oneshot::channel();
        let _ha = pool.new_stream(Box::new(OneshotCallbacks { tx: tx_a }));
        let (tx_b, rx_b) = tokio::sync::oneshot::channel();
        let _hb = pool.new_stream(Box::new(OneshotCallbacks { tx: tx_b }));
        assert_eq!(pool.pending_count(), 2);

        run_exchange(&mut first).await;
        first.release(true);

        // a binds before b
        let mut a = rx_a.await.unwrap().unwrap();
        assert_eq!(pool.pending_count(), 1);
        run_exchange(&mut a).await;
        a.release(true);
        let b = rx_b.await.unwrap().unwrap();
        assert_eq!(pool.pending_count(), 0);
        b.release(true);
    }

    #[tokio::test]
    async fn connect_failure_fails_all_pending() {
        // a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let host = host_for(addr, ResourceLimits::default());
        let pool = HttpConnPool::new(host, 0);
        let err = pool.new_stream_await().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalConnectionFailure);
        assert_eq!(pool.pending_count(), 0);
        assert_eq!(pool.connecting_count(), 0);
    }

    #[tokio::test]
    async fn drain_and_delete_rejects_new_streams() {
        let addr = origin(OK).await;
        let host = host_for(addr, ResourceLimits::default());
        let pool = HttpConnPool::new(host.clone(), 0);

        let mut client = pool.new_stream_await().await.unwrap();
        run_exchange(&mut client).await;
        client.release(true);
        assert_eq!(pool.idle_count(), 1);

        pool.drain_connections(DrainBehavior::DrainAndDelete);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(host.active_connections(), 0);
        let err = pool.new_stream_await().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }

    #[tokio::test]
    async fn drain_existing_closes_on_release() {
        let addr = origin(OK).await;
        let host = host_for(addr, ResourceLimits::default());
        let pool = HttpConnPool::new(host.clone(), 0);

        let mut client = pool.new_stream_await().await.unwrap();
        pool.drain_connections(DrainBehavior::DrainExisting);
        run_exchange(&mut client).await;
        client.release(true);
        // not parked idle: the drain closed it
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(host.active_connections(), 0);
    }

    #[tokio::test]
    async fn cancel_removes_the_pending_entry() {
        let addr = origin(OK).await;
        let limits = ResourceLimits {
            max_connections_per_host: 1,
            ..Default::default()
        };
        let host = host_for(addr, limits);
        let pool = HttpConnPool::new(host, 0);
        let _busy = pool.new_stream_await().await.unwrap();
        let (tx, _rx) = tokio::sync::oneshot::channel();
        let handle = pool.new_stream(Box::new(OneshotCallbacks { tx }));
        assert_eq!(pool.pending_count(), 1);
        drop(handle);
        assert_eq!(pool.pending_count(), 0);
    }

    #[tokio::test]
    async fn pool_accounting_stays_under_caps() {
        let addr = origin(OK).await;
        let limits = ResourceLimits {
            max_connections_per_host: 2,
            max_pending_requests: 8,
            ..Default::default()
        };
        let host = host_for(addr, limits);
        let pool = HttpConnPool::new(host, 0);
        let mut clients = Vec::new();
        for _ in 0..2 {
            clients.push(pool.new_stream_await().await.unwrap());
        }
        let (tx, _rx) = tokio::sync::oneshot::channel();
        let _pending = pool.new_stream(Box::new(OneshotCallbacks { tx }));
        let total = pool.idle_count() + pool.busy_count() + pool.connecting_count();
        assert!(total <= 2);
        assert!(pool.pending_count() <= 8);
        for c in clients {
            c.release(true);
        }
    }
}
