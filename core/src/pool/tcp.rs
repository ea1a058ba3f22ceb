use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::{TcpStream, UnixStream};

use crate::network::Address;
use crate::prelude::{Error, ErrorKind, Result};
use crate::stream::connection::Connection;
use crate::stream::Stream;
use crate::upstream::host::Host;
use crate::upstream::resource::PriorityResources;

use super::{DrainBehavior, DrainablePool, PoolFailureReason};

/// consumer of one tcp `new_connection` call
pub trait TcpPoolCallbacks: Send {
    fn on_pool_ready(self: Box<Self>, conn: TcpConnectionData);
    fn on_pool_failure(
        self: Box<Self>,
        reason: PoolFailureReason,
        description: String,
        host: Arc<Host>,
    );
}

struct PendingConn {
    id: u64,
    callbacks: Box<dyn TcpPoolCallbacks>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Stream>,
    pending: VecDeque<PendingConn>,
    busy: usize,
    connecting: usize,
    next_pending_id: u64,
    drain_on_release: bool,
    closed_for_streams: bool,
}

enum Followup {
    Ready(Box<dyn TcpPoolCallbacks>, TcpConnectionData),
    Failure(Box<dyn TcpPoolCallbacks>, PoolFailureReason, String, Arc<Host>),
    Connect,
}

/// raw tcp connection pool for one (host, priority) pair, the transport
/// under connect tunnels and raw tcp routes. same lifecycle as the http
/// pool with the codec surface replaced by a bidirectional stream handle.
pub struct TcpConnPool {
    me: Weak<TcpConnPool>,
    host: Arc<Host>,
    priority: u32,
    state: Mutex<PoolState>,
}

impl TcpConnPool {
    pub fn new(host: Arc<Host>, priority: u32) -> Arc<TcpConnPool> {
        Arc::new_cyclic(|me| TcpConnPool {
            me: me.clone(),
            host,
            priority,
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
        self.state.lock().idle.len()
    }

    pub fn busy_count(&self) -> usize {
        self.state.lock().busy
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// ask for a tunnel to the host; same binding rules as the http pool
    pub fn new_connection(
        &self,
        callbacks: Box<dyn TcpPoolCallbacks>,
    ) -> Option<TcpCancelable> {
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
            } else if let Some(stream) = state.idle.pop() {
                state.busy += 1;
                self.host.dec_idle_connections();
                followups.push(Followup::Ready(callbacks, self.make_conn(stream)));
            } else {
                let res = self.resources();
                if !res.pending_requests.can_create() {
                    followups.push(Followup::Failure(
                        callbacks,
                        PoolFailureReason::Overflow,
                        "pending connection queue full".to_string(),
                        self.host.clone(),
                    ));
                } else {
                    res.pending_requests.inc();
                    let id = state.next_pending_id;
                    state.next_pending_id += 1;
                    state.pending.push_back(PendingConn { id, callbacks });
                    handle = Some(TcpCancelable {
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
    pub async fn new_connection_await(&self) -> Result<TcpConnectionData> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _handle = self.new_connection(Box::new(OneshotCallbacks { tx }));
        match rx.await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::explain(ErrorKind::Internal, "pool dropped the connection")),
        }
    }

    fn may_connect(&self, state: &PoolState) -> bool {
        let res = self.resources();
        let total = state.idle.len() + state.busy + state.connecting;
        total < res.max_connections_per_host
            && state.connecting < state.pending.len()
            && res.connections.can_create()
    }

    fn make_conn(&self, stream: Stream) -> TcpConnectionData {
        TcpConnectionData {
            stream: Some(stream),
            pool: self.me.clone(),
            host: self.host.clone(),
            priority: self.priority,
        }
    }

    fn run_followups(&self, followups: Vec<Followup>) {
        for followup in followups {
            match followup {
                Followup::Ready(callbacks, conn) => callbacks.on_pool_ready(conn),
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
            let mut state = self.state.lock();
            state.connecting -= 1;
            self.resources().connections.dec();
            return;
        };
        runtime.spawn(async move {
            let timeout = pool.host.cluster_info().connect_timeout();
            let dialed = tokio::time::timeout(timeout, dial(pool.host.clone())).await;
            match dialed {
                Ok(Ok(stream)) => pool.on_connect_success(stream),
                Ok(Err(e)) => pool.on_connect_failure(
                    PoolFailureReason::LocalConnectionFailure,
                    e.to_string(),
                ),
                Err(_) => pool.on_connect_failure(
                    PoolFailureReason::ConnectionTimeout,
                    format!("connect timed out after {:?}", timeout),
                ),
            }
        });
    }

    fn on_connect_success(&self, stream: Stream) {
        let mut followups = Vec::new();
        {
            let mut state = self.state.lock();
            state.connecting -= 1;
            self.host.inc_active_connections();
            if state.closed_for_streams {
                self.host.dec_active_connections();
                self.resources().connections.dec();
            } else if let Some(pending) = state.pending.pop_front() {
                self.resources().pending_requests.dec();
                state.busy += 1;
                followups.push(Followup::Ready(pending.callbacks, self.make_conn(stream)));
            } else {
                state.idle.push(stream);
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

    fn on_conn_released(&self, stream: Stream, reusable: bool) {
        let mut followups = Vec::new();
        {
            let mut state = self.state.lock();
            state.busy -= 1;
            if reusable && !state.drain_on_release {
                if let Some(pending) = state.pending.pop_front() {
                    self.resources().pending_requests.dec();
                    state.busy += 1;
                    followups.push(Followup::Ready(pending.callbacks, self.make_conn(stream)));
                } else {
                    state.idle.push(stream);
                    self.host.inc_idle_connections();
                }
            } else {
                drop(stream);
                self.host.dec_active_connections();
                self.resources().connections.dec();
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

impl DrainablePool for TcpConnPool {
    fn drain_connections(&self, behavior: DrainBehavior) {
        let mut failed: Vec<Box<dyn TcpPoolCallbacks>> = Vec::new();
        {
            let mut state = self.state.lock();
            state.drain_on_release = true;
            if behavior == DrainBehavior::DrainAndDelete {
                state.closed_for_streams = true;
                let res = self.resources();
                for stream in state.idle.drain(..) {
                    self.host.dec_idle_connections();
                    self.host.dec_active_connections();
                    res.connections.dec();
                    drop(stream);
                }
                while let Some(pending) = state.pending.pop_front() {
                    res.pending_requests.dec();
                    failed.push(pending.callbacks);
                }
            }
        }
        for callbacks in failed {
            callbacks.on_pool_failure(
                PoolFailureReason::Overflow,
                "pool deleted".to_string(),
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

/// handle for a queued tcp connection request
pub struct TcpCancelable {
    pool: Weak<TcpConnPool>,
    pending_id: u64,
}

impl TcpCancelable {
    pub fn cancel(self) {}
}

impl Drop for TcpCancelable {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.cancel_pending(self.pending_id);
        }
    }
}

/// a checked-out tunnel; gives mutable access to the raw stream
pub struct TcpConnectionData {
    stream: Option<Stream>,
    pool: Weak<TcpConnPool>,
    host: Arc<Host>,
    priority: u32,
}

impl std::fmt::Debug for TcpConnectionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnectionData").finish_non_exhaustive()
    }
}

impl TcpConnectionData {
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn stream(&mut self) -> &mut Stream {
        self.stream.as_mut().expect("connection already released")
    }

    /// move the raw stream out, consuming the pooled identity;
    /// the connection is then accounted as closed
    pub fn into_stream(mut self) -> Stream {
        let stream = self.stream.take().expect("connection already released");
        if let Some(pool) = self.pool.upgrade() {
            let mut state = pool.state.lock();
            state.busy -= 1;
        }
        self.host.dec_active_connections();
        self.host
            .cluster_info()
            .resource_manager()
            .resources(self.priority)
            .connections
            .dec();
        stream
    }

    pub fn release(mut self, reusable: bool) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.on_conn_released(stream, reusable),
            None => {
                drop(stream);
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

impl Drop for TcpConnectionData {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            match self.pool.upgrade() {
                Some(pool) => pool.on_conn_released(stream, false),
                None => {
                    drop(stream);
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
    tx: tokio::sync::oneshot::Sender<Result<TcpConnectionData>>,
}

impl TcpPoolCallbacks for OneshotCallbacks {
    fn on_pool_ready(self: Box<Self>, conn: TcpConnectionData) {
        let _ = self.tx.send(Ok(conn));
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
