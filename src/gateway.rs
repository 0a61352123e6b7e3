//! TCP gateway - session termination and order-entry dispatch
//!
//! One OS thread runs a single-threaded reactor driving three kinds of
//! tasks: an acceptor, one task per session, and the back-channel pump that
//! drains ack/report events from the pipeline. Because every task runs on
//! the same thread, the risk queue keeps exactly one producer and all
//! session I/O is single-owner; the shared session map is only locked to
//! insert, remove, or look up a route, never across I/O.
//!
//! Per session: reads land in a bounded 8 KiB buffer, complete frames are
//! extracted, decoded, and dispatched; the embedded client id must equal
//! the session principal byte-for-byte. Outbound acks and trade reports are
//! serialized with a per-session monotone sequence into a bounded 8 KiB
//! write buffer - when a slow session fills it, further events are dropped
//! and counted while inbound parsing continues. Repeated protocol errors
//! beyond the configured threshold terminate the session; a single bad
//! frame does not.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::core_types::{ClientId, OrderId, SeqNum, SessionId, timestamp_ns};
use crate::errors::RejectReason;
use crate::messages::{RiskRequest, SessionEvent};
use crate::metrics::ExchangeStats;
use crate::mpmc::MpmcQueue;
use crate::pool::OrderPool;
use crate::protocol::{
    self, MAX_FRAME_LEN, Message, OrderAckMsg, peek_frame_len, trade_report_from,
};
use crate::shutdown::ShutdownSignal;
use crate::spsc::SpscProducer;

/// Outbound events buffered per session before the drop counter kicks in
const OUTBOUND_CHANNEL_CAP: usize = 256;

/// Session-layer authentication contract.
///
/// The handshake that yields a principal is an external collaborator; the
/// core only needs the resolved identifier. `authenticate` is consulted
/// once per session, on the first order-flow frame.
pub trait SessionAuth: Send + Sync {
    fn authenticate(&self, session: SessionId, claimed: &ClientId) -> Option<ClientId>;
}

/// Trust-on-first-use: the first claimed id becomes the session principal.
/// The simulator default; production deployments supply a real verifier.
pub struct TrustOnFirstUse;

impl SessionAuth for TrustOnFirstUse {
    fn authenticate(&self, _session: SessionId, claimed: &ClientId) -> Option<ClientId> {
        Some(*claimed)
    }
}

/// Bounded per-session I/O buffers.
///
/// Invariant: neither buffer ever exceeds [`MAX_FRAME_LEN`]; inbound
/// backpressure is applied by not reading further.
pub struct SessionBuffers {
    in_buf: Vec<u8>,
    out_buf: Vec<u8>,
    write_offset: usize,
}

impl SessionBuffers {
    pub fn new() -> Self {
        Self {
            in_buf: Vec::with_capacity(MAX_FRAME_LEN),
            out_buf: Vec::with_capacity(MAX_FRAME_LEN),
            write_offset: 0,
        }
    }

    /// Free space in the inbound buffer
    pub fn in_room(&self) -> usize {
        MAX_FRAME_LEN - self.in_buf.len()
    }

    pub fn extend_in(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= self.in_room());
        self.in_buf.extend_from_slice(data);
    }

    pub fn in_bytes(&self) -> &[u8] {
        &self.in_buf
    }

    pub fn drain_in(&mut self, len: usize) {
        self.in_buf.drain(..len);
    }

    pub fn clear_in(&mut self) {
        self.in_buf.clear();
    }

    /// Queue one outbound frame; false when the buffer has no room
    pub fn append_frame(&mut self, frame: &[u8]) -> bool {
        if self.out_buf.len() - self.write_offset + frame.len() > MAX_FRAME_LEN {
            return false;
        }
        // Reclaim the flushed prefix before growing past capacity.
        if self.out_buf.len() + frame.len() > MAX_FRAME_LEN && self.write_offset > 0 {
            self.out_buf.drain(..self.write_offset);
            self.write_offset = 0;
        }
        self.out_buf.extend_from_slice(frame);
        true
    }

    pub fn pending(&self) -> &[u8] {
        &self.out_buf[self.write_offset..]
    }

    pub fn has_pending(&self) -> bool {
        self.write_offset < self.out_buf.len()
    }

    /// Account for `n` bytes written to the socket
    pub fn advance(&mut self, n: usize) {
        self.write_offset += n;
        if self.write_offset == self.out_buf.len() {
            self.out_buf.clear();
            self.write_offset = 0;
        }
    }
}

impl Default for SessionBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending scatter-cancel bookkeeping: `fanout` engines will each answer;
/// exactly one wire ack may leave
struct CancelAgg {
    remaining: u32,
    resolved: bool,
}

/// Fold one engine cancel response into the pending table. Returns the ack
/// to deliver, if this response resolves the cancel.
fn fold_cancel_result(
    pending: &mut FxHashMap<(SessionId, OrderId), CancelAgg>,
    session: SessionId,
    order_id: OrderId,
    found: bool,
    fanout: u32,
) -> Option<SessionEvent> {
    let agg = pending
        .entry((session, order_id))
        .or_insert(CancelAgg {
            remaining: fanout,
            resolved: false,
        });

    let mut ack = None;
    if found && !agg.resolved {
        agg.resolved = true;
        ack = Some(SessionEvent::OrderAck {
            session,
            order_id,
            reason: None,
        });
    }
    agg.remaining = agg.remaining.saturating_sub(1);
    if agg.remaining == 0 {
        let resolved = agg.resolved;
        pending.remove(&(session, order_id));
        if !resolved {
            ack = Some(SessionEvent::OrderAck {
                session,
                order_id,
                reason: Some(RejectReason::NotFound),
            });
        }
    }
    ack
}

type SessionMap = Arc<Mutex<FxHashMap<SessionId, mpsc::Sender<SessionEvent>>>>;

/// Shared state for the worker-thread tasks
struct WorkerCtx {
    config: GatewayConfig,
    pool: Arc<OrderPool>,
    risk_tx: Rc<RefCell<SpscProducer<RiskRequest>>>,
    session_events: Arc<MpmcQueue<SessionEvent>>,
    sessions: SessionMap,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<ExchangeStats>,
    auth: Arc<dyn SessionAuth>,
}

/// Order-entry gateway front end
pub struct Gateway {
    tcp_port: u16,
    config: GatewayConfig,
    pool: Arc<OrderPool>,
    risk_tx: Option<SpscProducer<RiskRequest>>,
    session_events: Arc<MpmcQueue<SessionEvent>>,
    sessions: SessionMap,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<ExchangeStats>,
    auth: Arc<dyn SessionAuth>,
    bound_addr: Arc<OnceLock<SocketAddr>>,
    handle: Option<JoinHandle<()>>,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tcp_port: u16,
        config: GatewayConfig,
        pool: Arc<OrderPool>,
        risk_tx: SpscProducer<RiskRequest>,
        session_events: Arc<MpmcQueue<SessionEvent>>,
        shutdown: Arc<ShutdownSignal>,
        stats: Arc<ExchangeStats>,
        auth: Arc<dyn SessionAuth>,
    ) -> Self {
        Self {
            tcp_port,
            config,
            pool,
            risk_tx: Some(risk_tx),
            session_events,
            sessions: Arc::new(Mutex::new(FxHashMap::default())),
            shutdown,
            stats,
            auth,
            bound_addr: Arc::new(OnceLock::new()),
            handle: None,
        }
    }

    /// Address actually bound, once the listener is up (port 0 supported)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound_addr.get().copied()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Spawn the gateway worker thread (acceptor + sessions + event pump on
    /// one single-threaded reactor)
    pub fn start(&mut self) {
        let Some(risk_tx) = self.risk_tx.take() else {
            return;
        };
        let tcp_port = self.tcp_port;
        let config = self.config.clone();
        let pool = self.pool.clone();
        let session_events = self.session_events.clone();
        let sessions = self.sessions.clone();
        let shutdown = self.shutdown.clone();
        let stats = self.stats.clone();
        let auth = self.auth.clone();
        let bound_addr = self.bound_addr.clone();

        let handle = std::thread::Builder::new()
            .name("gateway".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(error) => {
                        error!(%error, "failed to build gateway runtime");
                        shutdown.request();
                        return;
                    }
                };
                let ctx = WorkerCtx {
                    config,
                    pool,
                    risk_tx: Rc::new(RefCell::new(risk_tx)),
                    session_events,
                    sessions,
                    shutdown,
                    stats,
                    auth,
                };
                let local = tokio::task::LocalSet::new();
                runtime.block_on(local.run_until(gateway_main(Rc::new(ctx), tcp_port, bound_addr)));
            })
            .expect("failed to spawn gateway thread");
        self.handle = Some(handle);
    }

    /// Join the worker after the shutdown flag has been raised
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

async fn gateway_main(ctx: Rc<WorkerCtx>, tcp_port: u16, bound_addr: Arc<OnceLock<SocketAddr>>) {
    let listener = match TcpListener::bind(("0.0.0.0", tcp_port)).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%error, tcp_port, "gateway failed to bind");
            ctx.shutdown.request();
            return;
        }
    };
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "gateway listening");
        let _ = bound_addr.set(addr);
    }

    let pump = tokio::task::spawn_local(event_pump(ctx.clone()));
    accept_loop(&listener, &ctx).await;
    let _ = pump.await;

    // Give session tasks a moment to observe shutdown and flush.
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        let open = ctx.sessions.lock().map(|m| m.len()).unwrap_or(0);
        if open == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    info!("gateway stopped");
}

async fn accept_loop(listener: &TcpListener, ctx: &Rc<WorkerCtx>) {
    let mut next_session: SessionId = 1;
    let mut tick = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if ctx.shutdown.is_requested() {
                    return;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let session_id = next_session;
                    next_session += 1;
                    let _ = stream.set_nodelay(true);
                    let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAP);
                    if let Ok(mut map) = ctx.sessions.lock() {
                        map.insert(session_id, tx);
                    }
                    ctx.stats.sessions_opened.fetch_add(1, Ordering::Relaxed);
                    debug!(session_id, %peer, "session accepted");
                    tokio::task::spawn_local(session_task(ctx.clone(), session_id, stream, rx));
                }
                Err(error) => {
                    warn!(%error, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Per-session mutable state, owned by the session task
struct SessionState {
    id: SessionId,
    buffers: SessionBuffers,
    principal: Option<ClientId>,
    outbound_seq: SeqNum,
    protocol_errors: u32,
    last_activity: Instant,
}

async fn session_task(
    ctx: Rc<WorkerCtx>,
    session_id: SessionId,
    stream: TcpStream,
    mut rx: mpsc::Receiver<SessionEvent>,
) {
    let mut state = SessionState {
        id: session_id,
        buffers: SessionBuffers::new(),
        principal: None,
        outbound_seq: 0,
        protocol_errors: 0,
        last_activity: Instant::now(),
    };
    let idle_limit = Duration::from_millis(ctx.config.heartbeat_interval_ms.saturating_mul(3));
    let mut sweep = tokio::time::interval(Duration::from_millis(250));
    let mut scratch = [0u8; 2048];

    loop {
        let want_write = state.buffers.has_pending();
        tokio::select! {
            biased;
            _ = sweep.tick() => {
                if ctx.shutdown.is_requested() {
                    break;
                }
                if state.last_activity.elapsed() > idle_limit {
                    info!(session_id, "session idle beyond heartbeat window, closing");
                    break;
                }
            }
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        enqueue_event(&ctx, &mut state, event);
                        if try_flush(&stream, &mut state).is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            writable = stream.writable(), if want_write => {
                if writable.is_err() || try_flush(&stream, &mut state).is_err() {
                    break;
                }
            }
            readable = stream.readable() => {
                if readable.is_err() {
                    break;
                }
                match read_and_process(&ctx, &stream, &mut state, &mut scratch) {
                    SessionVerdict::Continue => {}
                    SessionVerdict::Close => break,
                }
                if try_flush(&stream, &mut state).is_err() {
                    break;
                }
            }
        }
    }

    // Best-effort flush of whatever is queued, then teardown. In-flight
    // orders stay in the pipeline; their late acks are discarded.
    let _ = try_flush(&stream, &mut state);
    if let Ok(mut map) = ctx.sessions.lock() {
        map.remove(&session_id);
    }
    ctx.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);
    debug!(session_id, "session closed");
}

enum SessionVerdict {
    Continue,
    Close,
}

fn read_and_process(
    ctx: &WorkerCtx,
    stream: &TcpStream,
    state: &mut SessionState,
    scratch: &mut [u8],
) -> SessionVerdict {
    let room = state.buffers.in_room().min(scratch.len());
    if room == 0 {
        // A full buffer with no extractable frame means the stream cannot
        // resync; drop the buffered bytes and count the error.
        state.buffers.clear_in();
        return record_protocol_error(ctx, state);
    }
    match stream.try_read(&mut scratch[..room]) {
        Ok(0) => SessionVerdict::Close,
        Ok(n) => {
            state.last_activity = Instant::now();
            state.buffers.extend_in(&scratch[..n]);
            extract_frames(ctx, state)
        }
        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => SessionVerdict::Continue,
        Err(error) => {
            debug!(session_id = state.id, %error, "read error");
            SessionVerdict::Close
        }
    }
}

fn extract_frames(ctx: &WorkerCtx, state: &mut SessionState) -> SessionVerdict {
    loop {
        match peek_frame_len(state.buffers.in_bytes()) {
            Ok(None) => return SessionVerdict::Continue,
            Ok(Some(len)) => {
                let verdict = {
                    let frame = &state.buffers.in_bytes()[..len];
                    match protocol::decode_frame(frame) {
                        Ok(message) => {
                            state.protocol_errors = 0;
                            Ok(message)
                        }
                        Err(error) => Err(error),
                    }
                };
                state.buffers.drain_in(len);
                match verdict {
                    Ok(message) => {
                        if let SessionVerdict::Close = dispatch_message(ctx, state, message) {
                            return SessionVerdict::Close;
                        }
                    }
                    Err(error) => {
                        warn!(session_id = state.id, %error, "malformed frame discarded");
                        if let SessionVerdict::Close = record_protocol_error(ctx, state) {
                            return SessionVerdict::Close;
                        }
                    }
                }
            }
            Err(error) => {
                // The length field itself is garbage; the remaining bytes
                // cannot be framed.
                warn!(session_id = state.id, %error, "unframeable input discarded");
                state.buffers.clear_in();
                return record_protocol_error(ctx, state);
            }
        }
    }
}

fn record_protocol_error(ctx: &WorkerCtx, state: &mut SessionState) -> SessionVerdict {
    ctx.stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
    state.protocol_errors += 1;
    if state.protocol_errors >= ctx.config.max_protocol_errors {
        warn!(
            session_id = state.id,
            errors = state.protocol_errors,
            "protocol error threshold reached, closing session"
        );
        SessionVerdict::Close
    } else {
        SessionVerdict::Continue
    }
}

fn dispatch_message(ctx: &WorkerCtx, state: &mut SessionState, message: Message) -> SessionVerdict {
    match message {
        Message::NewOrder(msg) => {
            ctx.stats.incr_submitted();
            let Some(principal) = resolve_principal(ctx, state, &msg.client_id) else {
                send_reject(ctx, state, msg.order_id, RejectReason::Unauthorized);
                return SessionVerdict::Continue;
            };
            if principal != msg.client_id {
                send_reject(ctx, state, msg.order_id, RejectReason::Unauthorized);
                return SessionVerdict::Continue;
            }
            let Some(mut handle) = ctx.pool.acquire() else {
                send_reject(ctx, state, msg.order_id, RejectReason::PoolExhausted);
                return SessionVerdict::Continue;
            };
            ctx.pool.get_mut(&mut handle).populate(
                msg.order_id,
                msg.client_id,
                msg.symbol,
                msg.side,
                msg.order_type,
                msg.quantity,
                msg.price,
                state.id,
                msg.timestamp_ns,
            );
            let request = RiskRequest::NewOrder {
                session: state.id,
                handle,
            };
            if let Err(request) = ctx.risk_tx.borrow_mut().push(request) {
                if let RiskRequest::NewOrder { handle, .. } = request {
                    ctx.pool.release(handle);
                }
                send_reject(ctx, state, msg.order_id, RejectReason::Backpressure);
            }
            SessionVerdict::Continue
        }
        Message::CancelOrder(msg) => {
            let Some(principal) = resolve_principal(ctx, state, &msg.client_id) else {
                send_reject(ctx, state, msg.order_id, RejectReason::Unauthorized);
                return SessionVerdict::Continue;
            };
            if principal != msg.client_id {
                send_reject(ctx, state, msg.order_id, RejectReason::Unauthorized);
                return SessionVerdict::Continue;
            }
            let request = RiskRequest::Cancel {
                session: state.id,
                client_id: msg.client_id,
                order_id: msg.order_id,
                symbol: msg.symbol,
            };
            if ctx.risk_tx.borrow_mut().push(request).is_err() {
                send_reject(ctx, state, msg.order_id, RejectReason::Backpressure);
            }
            SessionVerdict::Continue
        }
        // Heartbeats refresh liveness (already stamped on read), no dispatch.
        Message::Heartbeat(_) => SessionVerdict::Continue,
        // Exchange-to-client types arriving inbound are a client bug.
        Message::OrderAck(_) | Message::TradeReport(_) => record_protocol_error(ctx, state),
    }
}

fn resolve_principal(
    ctx: &WorkerCtx,
    state: &mut SessionState,
    claimed: &ClientId,
) -> Option<ClientId> {
    if let Some(principal) = state.principal {
        return Some(principal);
    }
    let principal = ctx.auth.authenticate(state.id, claimed)?;
    state.principal = Some(principal);
    Some(principal)
}

/// Serialize one back-channel event into the session's outbound buffer
fn enqueue_event(ctx: &WorkerCtx, state: &mut SessionState, event: SessionEvent) {
    match event {
        SessionEvent::OrderAck {
            order_id, reason, ..
        } => enqueue_ack(ctx, state, order_id, reason),
        SessionEvent::TradeReport { trade, .. } => {
            let msg = trade_report_from(&trade, state.outbound_seq + 1, timestamp_ns());
            push_outbound(ctx, state, &protocol::encode_trade_report(&msg));
        }
        // The pump folds cancel results before routing; an unfolded one is
        // delivered as its equivalent ack.
        SessionEvent::CancelResult {
            order_id, found, ..
        } => {
            let reason = if found {
                None
            } else {
                Some(RejectReason::NotFound)
            };
            enqueue_ack(ctx, state, order_id, reason);
        }
    }
}

fn enqueue_ack(
    ctx: &WorkerCtx,
    state: &mut SessionState,
    order_id: OrderId,
    reason: Option<RejectReason>,
) {
    let reason_str = reason.map_or("accepted", |r| r.as_str());
    let msg = OrderAckMsg {
        sequence: state.outbound_seq + 1,
        timestamp_ns: timestamp_ns(),
        order_id,
        accepted: reason.is_none(),
        reason: crate::core_types::BoundedStr::new(reason_str)
            .unwrap_or_else(crate::core_types::BoundedStr::empty),
    };
    push_outbound(ctx, state, &protocol::encode_order_ack(&msg));
}

/// Locally generated rejection ack (gateway-boundary errors)
fn send_reject(ctx: &WorkerCtx, state: &mut SessionState, order_id: OrderId, reason: RejectReason) {
    ctx.stats.incr_rejected(reason);
    enqueue_ack(ctx, state, order_id, Some(reason));
}

fn push_outbound(ctx: &WorkerCtx, state: &mut SessionState, frame: &[u8]) {
    if state.buffers.append_frame(frame) {
        state.outbound_seq += 1;
    } else {
        // Slow consumer: drop the event, keep the session.
        ctx.stats.outbound_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

fn try_flush(stream: &TcpStream, state: &mut SessionState) -> std::io::Result<()> {
    while state.buffers.has_pending() {
        match stream.try_write(state.buffers.pending()) {
            Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
            Ok(n) => state.buffers.advance(n),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Drain the session-event ring and route each event to its session's
/// outbound channel, folding scatter-cancel responses into single acks
async fn event_pump(ctx: Rc<WorkerCtx>) {
    let mut pending_cancels: FxHashMap<(SessionId, OrderId), CancelAgg> = FxHashMap::default();
    loop {
        let mut drained = 0u32;
        while let Some(event) = ctx.session_events.pop() {
            let routed = match event {
                SessionEvent::CancelResult {
                    session,
                    order_id,
                    found,
                    fanout,
                } => fold_cancel_result(&mut pending_cancels, session, order_id, found, fanout),
                other => Some(other),
            };
            if let Some(event) = routed {
                deliver(&ctx, event);
            }
            drained += 1;
            if drained >= 512 {
                break;
            }
        }
        if drained == 0 {
            if ctx.shutdown.is_requested() && ctx.session_events.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

fn deliver(ctx: &WorkerCtx, event: SessionEvent) {
    let target = event.session();
    let tx = ctx
        .sessions
        .lock()
        .ok()
        .and_then(|map| map.get(&target).cloned());
    match tx {
        Some(tx) => match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                ctx.stats.outbound_dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Session tearing down: acks for it are discarded.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        },
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_buffers_bounds() {
        let mut buffers = SessionBuffers::new();
        assert_eq!(buffers.in_room(), MAX_FRAME_LEN);
        buffers.extend_in(&[0u8; 100]);
        assert_eq!(buffers.in_room(), MAX_FRAME_LEN - 100);
        buffers.drain_in(40);
        assert_eq!(buffers.in_room(), MAX_FRAME_LEN - 60);
        buffers.clear_in();
        assert_eq!(buffers.in_room(), MAX_FRAME_LEN);
    }

    #[test]
    fn test_session_buffers_outbound_flow() {
        let mut buffers = SessionBuffers::new();
        assert!(!buffers.has_pending());
        assert!(buffers.append_frame(&[1, 2, 3]));
        assert!(buffers.has_pending());
        assert_eq!(buffers.pending(), &[1, 2, 3]);

        buffers.advance(2);
        assert_eq!(buffers.pending(), &[3]);
        buffers.advance(1);
        assert!(!buffers.has_pending());
        assert_eq!(buffers.pending().len(), 0);
    }

    #[test]
    fn test_session_buffers_reject_when_full() {
        let mut buffers = SessionBuffers::new();
        let chunk = [0u8; 4096];
        assert!(buffers.append_frame(&chunk));
        assert!(buffers.append_frame(&chunk));
        assert!(!buffers.append_frame(&[0u8; 1]), "8 KiB cap enforced");

        // Flushed bytes make room again.
        buffers.advance(4096);
        assert!(buffers.append_frame(&[0u8; 100]));
    }

    #[test]
    fn test_trust_on_first_use() {
        let auth = TrustOnFirstUse;
        let claimed = ClientId::new("C1").unwrap();
        assert_eq!(auth.authenticate(1, &claimed), Some(claimed));
    }

    #[test]
    fn test_fold_cancel_found_first() {
        let mut pending = FxHashMap::default();
        // Scatter to 3 engines; the owner answers first.
        let ack = fold_cancel_result(&mut pending, 1, 42, true, 3);
        assert!(matches!(
            ack,
            Some(SessionEvent::OrderAck { reason: None, .. })
        ));
        // The two not-founds are absorbed.
        assert!(fold_cancel_result(&mut pending, 1, 42, false, 3).is_none());
        assert!(fold_cancel_result(&mut pending, 1, 42, false, 3).is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_fold_cancel_found_last() {
        let mut pending = FxHashMap::default();
        assert!(fold_cancel_result(&mut pending, 1, 42, false, 3).is_none());
        assert!(fold_cancel_result(&mut pending, 1, 42, false, 3).is_none());
        let ack = fold_cancel_result(&mut pending, 1, 42, true, 3);
        assert!(matches!(
            ack,
            Some(SessionEvent::OrderAck { reason: None, .. })
        ));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_fold_cancel_all_not_found() {
        let mut pending = FxHashMap::default();
        assert!(fold_cancel_result(&mut pending, 1, 42, false, 2).is_none());
        let ack = fold_cancel_result(&mut pending, 1, 42, false, 2);
        match ack {
            Some(SessionEvent::OrderAck {
                order_id, reason, ..
            }) => {
                assert_eq!(order_id, 42);
                assert_eq!(reason, Some(RejectReason::NotFound));
            }
            other => panic!("expected single not-found ack, got {other:?}"),
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn test_fold_cancel_single_engine() {
        let mut pending = FxHashMap::default();
        let ack = fold_cancel_result(&mut pending, 1, 7, true, 1);
        assert!(matches!(
            ack,
            Some(SessionEvent::OrderAck { reason: None, .. })
        ));
        assert!(pending.is_empty());

        let ack = fold_cancel_result(&mut pending, 1, 8, false, 1);
        assert!(matches!(
            ack,
            Some(SessionEvent::OrderAck {
                reason: Some(RejectReason::NotFound),
                ..
            })
        ));
        assert!(pending.is_empty());
    }
}
