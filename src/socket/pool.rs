//! Connection pooling.
//!
//! One [`EndpointPool`] exists per [`EndpointId`]. It bounds the number of
//! live connections, serves idle connections most-recently-used first, and
//! queues requests FIFO once the limit is reached. A connection released by
//! a request that is mid-NTLM handshake can be pinned so that only the same
//! request picks it up again. The pinned slot stays idle and out of
//! dispatch, so its owner always finds it ready and never queues behind
//! other requests.
//!
//! Chromium equivalent: `TransportClientSocketPool` groups.

use crate::base::abort::AbortSignal;
use crate::base::neterror::NetError;
use crate::socket::connection::Connection;
use crate::socket::proxy::ProxySettings;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

/// Default per-endpoint connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 6;

/// Pool partition key: `(scheme, host, port, proxy)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub proxy: Option<String>,
}

impl EndpointId {
    pub fn new(url: &Url, proxy: Option<&ProxySettings>) -> Result<Self, NetError> {
        let scheme = url.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(NetError::UnknownUrlScheme);
        }
        Ok(Self {
            scheme,
            host: url.host_str().ok_or(NetError::InvalidUrl)?.to_ascii_lowercase(),
            port: url.port_or_known_default().ok_or(NetError::InvalidUrl)?,
            proxy: proxy.map(ProxySettings::key),
        })
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)?;
        if let Some(proxy) = &self.proxy {
            write!(f, " via {proxy}")?;
        }
        Ok(())
    }
}

/// Snapshot of one endpoint pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections that exist or are being established.
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    pub queued: usize,
    pub limit: usize,
}

enum Dispatch {
    Reuse(Connection),
    /// Capacity granted; the receiver establishes the connection itself.
    Connect(u64),
    Failed(NetError),
}

struct Slot {
    id: u64,
    // `None` while busy or still connecting.
    conn: Option<Connection>,
    busy: bool,
    pinned: bool,
    idle_since: Instant,
    bound: Option<AbortSignal>,
}

impl Slot {
    fn connecting(id: u64, signal: &AbortSignal) -> Self {
        Self {
            id,
            conn: None,
            busy: true,
            pinned: false,
            idle_since: Instant::now(),
            bound: Some(signal.clone()),
        }
    }

    fn is_idle(&self) -> bool {
        !self.busy && self.conn.is_some()
    }

    fn is_dispatchable(&self) -> bool {
        self.is_idle() && !self.pinned
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Dispatch>,
    signal: AbortSignal,
}

struct PoolState {
    // Front is most recently used.
    slots: VecDeque<Slot>,
    queue: VecDeque<Waiter>,
    limit: usize,
    closed: bool,
}

impl PoolState {
    fn position(&self, id: u64) -> Option<usize> {
        self.slots.iter().position(|s| s.id == id)
    }

    fn purge_abandoned_waiters(&mut self) {
        self.queue.retain(|w| !w.tx.is_closed());
    }
}

enum Admission {
    Idle(Connection),
    Create(u64),
    Queued(u64, oneshot::Receiver<Dispatch>),
}

/// Result of a checkout: a usable connection or permission to open one.
pub enum Checkout {
    Ready(PooledConnection),
    Connect(ConnectPermit),
}

/// Connections for one endpoint.
pub struct EndpointPool {
    endpoint: EndpointId,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointPool")
            .field("endpoint", &self.endpoint)
            .field("stats", &self.stats())
            .finish()
    }
}

fn offer(tx: oneshot::Sender<Dispatch>, conn: Connection) -> Option<Connection> {
    match tx.send(Dispatch::Reuse(conn)) {
        Ok(()) => None,
        Err(Dispatch::Reuse(conn)) => Some(conn),
        Err(_) => None,
    }
}

impl EndpointPool {
    pub fn new(endpoint: EndpointId, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            state: Mutex::new(PoolState {
                slots: VecDeque::new(),
                queue: VecDeque::new(),
                limit: limit.max(1),
                closed: false,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Get a connection for one request, waiting in FIFO order when the
    /// endpoint is saturated.
    ///
    /// The wait ends early when `signal` fires; the request is then removed
    /// from the queue.
    pub async fn checkout(self: &Arc<Self>, signal: &AbortSignal) -> Result<Checkout, NetError> {
        signal.check()?;
        let (waiter_id, mut rx) = match self.admit(signal)? {
            Admission::Idle(conn) => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    conn = conn.id(),
                    "reusing idle connection"
                );
                return Ok(Checkout::Ready(PooledConnection::new(
                    self.clone(),
                    conn,
                    signal.clone(),
                )));
            }
            Admission::Create(id) => {
                tracing::debug!(endpoint = %self.endpoint, conn = id, "opening new connection");
                return Ok(Checkout::Connect(ConnectPermit::new(self.clone(), id, signal.clone())));
            }
            Admission::Queued(id, rx) => (id, rx),
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            waiter = waiter_id,
            "pool saturated, request queued"
        );
        let waited = signal
            .run(None, async { (&mut rx).await.map_err(|_| NetError::PoolClosed) })
            .await;
        let dispatch = match waited {
            Ok(dispatch) => dispatch,
            Err(err) => {
                self.cancel_waiter(waiter_id);
                // Dispatched just before the abort landed.
                if let Ok(dispatch) = rx.try_recv() {
                    self.undo_dispatch(dispatch);
                }
                return Err(err);
            }
        };
        match dispatch {
            Dispatch::Reuse(conn) => Ok(Checkout::Ready(PooledConnection::new(
                self.clone(),
                conn,
                signal.clone(),
            ))),
            Dispatch::Connect(id) => Ok(Checkout::Connect(ConnectPermit::new(
                self.clone(),
                id,
                signal.clone(),
            ))),
            Dispatch::Failed(err) => Err(err),
        }
    }

    fn admit(&self, signal: &AbortSignal) -> Result<Admission, NetError> {
        let mut st = self.lock();
        if st.closed {
            return Err(NetError::PoolClosed);
        }
        st.purge_abandoned_waiters();

        let mut i = 0;
        while i < st.slots.len() {
            if !st.slots[i].is_dispatchable() {
                i += 1;
                continue;
            }
            let Some(mut slot) = st.slots.remove(i) else {
                break;
            };
            let Some(mut conn) = slot.conn.take() else {
                continue;
            };
            if !conn.is_usable() {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    conn = conn.id(),
                    "dropping stale idle connection"
                );
                continue;
            }
            conn.mark_reused();
            slot.busy = true;
            slot.bound = Some(signal.clone());
            st.slots.push_front(slot);
            return Ok(Admission::Idle(conn));
        }

        // Stale removals may have freed capacity that belongs to earlier waiters.
        if !st.queue.is_empty() {
            self.dispatch_locked(&mut st);
        }
        if st.queue.is_empty() && st.slots.len() < st.limit {
            let id = self.next_id();
            st.slots.push_front(Slot::connecting(id, signal));
            return Ok(Admission::Create(id));
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_id();
        st.queue.push_back(Waiter {
            id,
            tx,
            signal: signal.clone(),
        });
        Ok(Admission::Queued(id, rx))
    }

    /// Hand idle connections and free capacity to queued requests, in order.
    fn dispatch_locked(&self, st: &mut PoolState) {
        loop {
            st.purge_abandoned_waiters();
            if st.queue.is_empty() || st.closed {
                return;
            }

            if let Some(i) = st.slots.iter().position(Slot::is_dispatchable) {
                let Some(mut slot) = st.slots.remove(i) else {
                    return;
                };
                let Some(mut conn) = slot.conn.take() else {
                    continue;
                };
                if !conn.is_usable() {
                    tracing::debug!(
                        endpoint = %self.endpoint,
                        conn = conn.id(),
                        "dropping stale idle connection"
                    );
                    continue;
                }
                let Some(waiter) = st.queue.pop_front() else {
                    slot.conn = Some(conn);
                    st.slots.push_front(slot);
                    return;
                };
                conn.mark_reused();
                slot.busy = true;
                slot.bound = Some(waiter.signal.clone());
                if let Some(conn) = offer(waiter.tx, conn) {
                    slot.conn = Some(conn);
                    slot.busy = false;
                    slot.bound = None;
                } else {
                    tracing::debug!(
                        endpoint = %self.endpoint,
                        waiter = waiter.id,
                        conn = slot.id,
                        "dispatched queued request"
                    );
                }
                st.slots.push_front(slot);
                continue;
            }

            if st.slots.len() < st.limit {
                let Some(waiter) = st.queue.pop_front() else {
                    return;
                };
                let id = self.next_id();
                if waiter.tx.send(Dispatch::Connect(id)).is_ok() {
                    tracing::debug!(
                        endpoint = %self.endpoint,
                        waiter = waiter.id,
                        conn = id,
                        "queued request may connect"
                    );
                    st.slots.push_front(Slot::connecting(id, &waiter.signal));
                }
                continue;
            }
            return;
        }
    }

    /// Put back a dispatch whose receiver gave up.
    fn undo_dispatch(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Reuse(conn) => self.checkin(conn, false),
            Dispatch::Connect(id) => self.discard(id),
            Dispatch::Failed(_) => {}
        }
    }

    /// Return a connection after its request finished.
    ///
    /// Connections that cannot be reused are closed. Otherwise the slot goes
    /// idle and, unless pinned, is offered to the FIFO head.
    fn checkin(&self, conn: Connection, pin: bool) {
        let mut st = self.lock();
        let Some(i) = st.position(conn.id()) else {
            tracing::debug!(
                endpoint = %self.endpoint,
                conn = conn.id(),
                "connection evicted while busy, closing"
            );
            return;
        };
        let over_limit = st.slots.len() > st.limit;
        if st.closed || over_limit || !conn.is_usable() {
            st.slots.remove(i);
            tracing::debug!(
                endpoint = %self.endpoint,
                conn = conn.id(),
                keep_alive = conn.keep_alive(),
                over_limit,
                "closing connection on release"
            );
            self.dispatch_locked(&mut st);
            return;
        }

        let Some(mut slot) = st.slots.remove(i) else {
            return;
        };
        slot.busy = false;
        slot.bound = None;
        slot.idle_since = Instant::now();
        slot.pinned = pin;
        slot.conn = Some(conn);
        st.slots.push_front(slot);
        self.dispatch_locked(&mut st);
    }

    /// Drop a busy or connecting slot without reusing it.
    pub fn discard(&self, conn_id: u64) {
        let mut st = self.lock();
        if let Some(i) = st.position(conn_id) {
            st.slots.remove(i);
            tracing::debug!(endpoint = %self.endpoint, conn = conn_id, "connection discarded");
        }
        self.dispatch_locked(&mut st);
    }

    /// Park a connection for the next round of the same handshake.
    ///
    /// Until the ticket is redeemed with [`acquire_pinned`](Self::acquire_pinned)
    /// or dropped, no other request is given this connection.
    pub fn release_pinned(self: &Arc<Self>, conn: Connection) -> PinTicket {
        let conn_id = conn.id();
        self.checkin(conn, true);
        PinTicket {
            pool: self.clone(),
            conn_id,
        }
    }

    /// Take back the exact connection a ticket was issued for.
    ///
    /// Fails with `ConnectionClosed` if that connection has been closed in
    /// the meantime; a different connection is never substituted. A pinned
    /// slot is never dispatched to anyone else, so this does not wait.
    pub fn acquire_pinned(
        self: &Arc<Self>,
        ticket: PinTicket,
        signal: &AbortSignal,
    ) -> Result<PooledConnection, NetError> {
        signal.check()?;
        let conn_id = ticket.conn_id;
        let mut st = self.lock();
        if st.closed {
            return Err(NetError::PoolClosed);
        }
        let Some(i) = st.position(conn_id).filter(|&i| st.slots[i].is_idle()) else {
            return Err(NetError::ConnectionClosed);
        };
        let Some(mut slot) = st.slots.remove(i) else {
            return Err(NetError::ConnectionClosed);
        };
        let Some(mut conn) = slot.conn.take() else {
            return Err(NetError::ConnectionClosed);
        };
        if !conn.is_usable() {
            self.dispatch_locked(&mut st);
            return Err(NetError::ConnectionClosed);
        }
        conn.mark_reused();
        slot.busy = true;
        slot.pinned = false;
        slot.bound = Some(signal.clone());
        st.slots.push_front(slot);
        drop(st);
        tracing::debug!(endpoint = %self.endpoint, conn = conn_id, "reacquired pinned connection");
        Ok(PooledConnection::new(self.clone(), conn, signal.clone()))
    }

    /// Make a pinned connection available to everyone again.
    pub fn unpin(&self, conn_id: u64) {
        let mut st = self.lock();
        if let Some(i) = st.position(conn_id) {
            if st.slots[i].pinned {
                st.slots[i].pinned = false;
                self.dispatch_locked(&mut st);
            }
        }
    }

    /// Remove a queued request. Returns false if it was already dispatched.
    pub fn cancel_waiter(&self, waiter_id: u64) -> bool {
        let mut st = self.lock();
        let before = st.queue.len();
        st.queue.retain(|w| w.id != waiter_id);
        before != st.queue.len()
    }

    /// Close idle connections older than `max_idle`, dead ones, and any in
    /// excess of the limit. Returns how many were closed.
    pub fn recycle(&self, max_idle: Duration) -> usize {
        let mut st = self.lock();
        let now = Instant::now();
        let before = st.slots.len();
        st.slots.retain(|slot| {
            let Some(conn) = slot.conn.as_ref() else {
                return true;
            };
            now.duration_since(slot.idle_since) < max_idle && conn.is_usable()
        });

        // Above the limit (after `set_limit` lowered it): oldest idle first.
        while st.slots.len() > st.limit {
            let Some(i) = st.slots.iter().rposition(Slot::is_idle) else {
                break;
            };
            st.slots.remove(i);
        }

        let closed = before - st.slots.len();
        if closed > 0 {
            tracing::debug!(endpoint = %self.endpoint, closed, "recycled idle connections");
            self.dispatch_locked(&mut st);
        }
        closed
    }

    /// Tear the pool down: close every connection, abort requests bound to
    /// busy ones, and fail everything queued.
    pub fn close(&self) {
        let (bound, queue) = {
            let mut st = self.lock();
            st.closed = true;
            let bound: Vec<AbortSignal> = st.slots.drain(..).filter_map(|s| s.bound).collect();
            let queue: Vec<Waiter> = st.queue.drain(..).collect();
            (bound, queue)
        };
        tracing::debug!(
            endpoint = %self.endpoint,
            aborted = bound.len(),
            queued = queue.len(),
            "closing pool"
        );
        for signal in bound {
            signal.abort_with(NetError::ConnectionAborted);
        }
        for waiter in queue {
            let _ = waiter.tx.send(Dispatch::Failed(NetError::PoolClosed));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Change the connection limit. Raising it dispatches queued requests;
    /// lowering it takes effect as connections are released or recycled.
    pub fn set_limit(&self, limit: usize) {
        let mut st = self.lock();
        st.limit = limit.max(1);
        self.dispatch_locked(&mut st);
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.lock();
        let idle = st.slots.iter().filter(|s| s.is_idle()).count();
        PoolStats {
            live: st.slots.len(),
            idle,
            busy: st.slots.len() - idle,
            queued: st.queue.iter().filter(|w| !w.tx.is_closed()).count(),
            limit: st.limit,
        }
    }

    pub fn live_count(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn idle_count(&self) -> usize {
        self.stats().idle
    }

    pub fn queued_count(&self) -> usize {
        self.stats().queued
    }

    /// True when nothing is live or waiting.
    fn is_empty(&self) -> bool {
        let st = self.lock();
        st.slots.is_empty() && st.queue.is_empty()
    }
}

/// Capacity reserved for a connection the holder is about to establish.
///
/// Dropping the permit without completing it frees the capacity for the
/// next queued request.
pub struct ConnectPermit {
    pool: Arc<EndpointPool>,
    id: u64,
    signal: AbortSignal,
    completed: bool,
}

impl ConnectPermit {
    fn new(pool: Arc<EndpointPool>, id: u64, signal: AbortSignal) -> Self {
        Self {
            pool,
            id,
            signal,
            completed: false,
        }
    }

    /// Id the new [`Connection`] must carry.
    pub fn connection_id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &EndpointId {
        self.pool.endpoint()
    }

    pub fn complete(mut self, conn: Connection) -> Result<PooledConnection, NetError> {
        if conn.id() != self.id {
            tracing::warn!(
                expected = self.id,
                got = conn.id(),
                "connection does not match its permit"
            );
            return Err(NetError::ConnectionFailed);
        }
        self.completed = true;
        Ok(PooledConnection::new(self.pool.clone(), conn, self.signal.clone()))
    }
}

impl Drop for ConnectPermit {
    fn drop(&mut self) {
        if !self.completed {
            self.pool.discard(self.id);
        }
    }
}

/// Keeps a released connection reserved for one request.
pub struct PinTicket {
    pool: Arc<EndpointPool>,
    conn_id: u64,
}

impl PinTicket {
    pub fn connection_id(&self) -> u64 {
        self.conn_id
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }
}

impl Drop for PinTicket {
    fn drop(&mut self) {
        self.pool.unpin(self.conn_id);
    }
}

/// A connection checked out of its pool.
///
/// Dropping it without [`release`](Self::release) discards the connection:
/// its framing state is unknown.
pub struct PooledConnection {
    pool: Arc<EndpointPool>,
    conn: Option<Connection>,
    signal: AbortSignal,
}

impl PooledConnection {
    fn new(pool: Arc<EndpointPool>, conn: Connection, signal: AbortSignal) -> Self {
        signal.bind_read_state(conn.read_state());
        Self {
            pool,
            conn: Some(conn),
            signal,
        }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    fn take(&mut self) -> Option<Connection> {
        let conn = self.conn.take()?;
        self.signal.unbind_read_state(conn.read_state());
        Some(conn)
    }

    /// Return the connection for reuse (or closing, if it is not reusable).
    pub fn release(mut self) {
        if let Some(conn) = self.take() {
            self.pool.checkin(conn, false);
        }
    }

    /// Release but reserve the connection for the same request.
    pub fn release_pinned(mut self) -> Option<PinTicket> {
        let conn = self.take()?;
        Some(self.pool.release_pinned(conn))
    }

    /// Close the connection and free its slot.
    pub fn discard(mut self) {
        if let Some(conn) = self.take() {
            self.pool.discard(conn.id());
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.take() {
            tracing::debug!(conn = conn.id(), "pooled connection dropped before release");
            self.pool.discard(conn.id());
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", self.pool.endpoint())
            .field("conn", &self.conn.as_ref().map(Connection::id))
            .finish()
    }
}

/// Registry of endpoint pools, created lazily per [`EndpointId`].
pub struct ClientSocketPool {
    pools: DashMap<EndpointId, Arc<EndpointPool>>,
    limit: AtomicUsize,
}

impl fmt::Debug for ClientSocketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSocketPool")
            .field("endpoints", &self.pools.len())
            .field("limit", &self.limit.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for ClientSocketPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS)
    }
}

impl ClientSocketPool {
    pub fn new(max_connections_per_endpoint: usize) -> Self {
        Self {
            pools: DashMap::new(),
            limit: AtomicUsize::new(max_connections_per_endpoint.max(1)),
        }
    }

    /// The pool for `endpoint`, created on first use.
    pub fn endpoint(&self, endpoint: &EndpointId) -> Arc<EndpointPool> {
        if let Some(pool) = self.pools.get(endpoint) {
            return pool.clone();
        }
        self.pools
            .entry(endpoint.clone())
            .or_insert_with(|| {
                EndpointPool::new(endpoint.clone(), self.limit.load(Ordering::Relaxed))
            })
            .clone()
    }

    pub fn get(&self, endpoint: &EndpointId) -> Option<Arc<EndpointPool>> {
        self.pools.get(endpoint).map(|p| p.clone())
    }

    /// Apply a new per-endpoint limit to existing and future pools.
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit.max(1), Ordering::Relaxed);
        for pool in self.pools.iter() {
            pool.set_limit(limit);
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Sweep every endpoint; empty pools are dropped from the registry.
    pub fn recycle(&self, max_idle: Duration) -> usize {
        let closed = self.pools.iter().map(|p| p.recycle(max_idle)).sum();
        self.pools.retain(|_, pool| !pool.is_empty() || Arc::strong_count(pool) > 1);
        closed
    }

    /// Total live connections across endpoints.
    pub fn live_count(&self) -> usize {
        self.pools.iter().map(|p| p.live_count()).sum()
    }

    pub fn idle_count(&self) -> usize {
        self.pools.iter().map(|p| p.idle_count()).sum()
    }

    pub fn endpoint_count(&self) -> usize {
        self.pools.len()
    }

    /// Close every endpoint pool and forget them.
    pub fn close_all(&self) {
        for pool in self.pools.iter() {
            pool.close();
        }
        self.pools.clear();
    }

    /// Run [`recycle`](Self::recycle) every `interval` until the registry is dropped.
    pub fn start_recycle_task(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else {
                    return;
                };
                pool.recycle(max_idle);
            }
        })
    }
}
