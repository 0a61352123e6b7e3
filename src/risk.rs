//! Risk engine - deterministic pre-trade checks
//!
//! A single worker pops requests in FIFO order and applies the checks in a
//! fixed sequence; the first failure wins the rejection reason:
//!
//! 1. symbol known
//! 2. quantity within (0, max_order_size]
//! 3. price collar (when enabled)
//! 4. rate window
//! 5. duplicate order id
//! 6. credit (notional cap)
//!
//! Approved orders are forwarded to the owning symbol's engine; a full
//! downstream queue rolls the client-state update back and rejects with
//! "downstream backpressure". All per-client state is confined to this
//! thread.
//!
//! Exposure is increased on submission and never decremented on fill or
//! cancel - a deliberate, documented approximation of the deployed system.
//! The active-order set is pruned by cancels only.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{info, warn};

use crate::config::{RiskConfig, SymbolConfig};
use crate::core_types::{ClientId, OrderId, PRICE_SCALE, Price, Qty, SessionId, Symbol};
use crate::errors::RejectReason;
use crate::messages::{BookCommand, RiskRequest, SessionEvent};
use crate::metrics::ExchangeStats;
use crate::mpmc::MpmcQueue;
use crate::models::{OrderStatus, OrderType};
use crate::pool::{OrderHandle, OrderPool};
use crate::shutdown::ShutdownSignal;
use crate::spsc::{SpscConsumer, SpscProducer};

/// Per-client risk state, confined to the risk thread
#[derive(Debug)]
struct ClientRiskState {
    active_orders: FxHashSet<OrderId>,
    /// Whole currency units: sum of price x qty / 10^4 over submissions
    notional_exposure: u64,
    window_start: Instant,
    orders_in_window: u32,
}

impl ClientRiskState {
    fn new(now: Instant) -> Self {
        Self {
            active_orders: FxHashSet::default(),
            notional_exposure: 0,
            window_start: now,
            orders_in_window: 0,
        }
    }
}

/// Pre-trade risk worker
pub struct RiskEngine {
    limits: RiskConfig,
    /// Known symbols and their collar percentages
    symbols: FxHashMap<Symbol, f64>,
    /// Symbol -> index into `routes`
    route_index: FxHashMap<Symbol, usize>,
    routes: Vec<SpscProducer<BookCommand>>,
    clients: FxHashMap<ClientId, ClientRiskState>,
    input: SpscConsumer<RiskRequest>,
    session_events: Arc<MpmcQueue<SessionEvent>>,
    pool: Arc<OrderPool>,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<ExchangeStats>,
}

impl RiskEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        limits: RiskConfig,
        symbol_configs: &[SymbolConfig],
        engine_routes: Vec<(Symbol, SpscProducer<BookCommand>)>,
        input: SpscConsumer<RiskRequest>,
        session_events: Arc<MpmcQueue<SessionEvent>>,
        pool: Arc<OrderPool>,
        shutdown: Arc<ShutdownSignal>,
        stats: Arc<ExchangeStats>,
    ) -> Self {
        let mut symbols = FxHashMap::default();
        for cfg in symbol_configs {
            if let Some(symbol) = Symbol::new(&cfg.name) {
                symbols.insert(symbol, cfg.price_collar_pct);
            }
        }
        let mut route_index = FxHashMap::default();
        let mut routes = Vec::with_capacity(engine_routes.len());
        for (symbol, producer) in engine_routes {
            route_index.insert(symbol, routes.len());
            routes.push(producer);
        }
        Self {
            limits,
            symbols,
            route_index,
            routes,
            clients: FxHashMap::default(),
            input,
            session_events,
            pool,
            shutdown,
            stats,
        }
    }

    /// Move the worker onto its dedicated thread
    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("risk-engine".into())
            .spawn(move || {
                info!("risk engine started");
                let mut spin_count = 0u32;
                loop {
                    if self.poll() {
                        spin_count = 0;
                    } else {
                        if self.shutdown.is_requested() {
                            break;
                        }
                        spin_count += 1;
                        if spin_count > 100 {
                            thread::yield_now();
                            spin_count = 0;
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                }
                info!("risk engine stopped");
            })
            .expect("failed to spawn risk engine thread")
    }

    /// Pop and process one queued request; false when the input is empty
    pub fn poll(&mut self) -> bool {
        match self.input.pop() {
            Some(request) => {
                self.process(request);
                true
            }
            None => false,
        }
    }

    /// Process one request with the current wall clock
    pub fn process(&mut self, request: RiskRequest) {
        self.process_at(request, Instant::now());
    }

    fn process_at(&mut self, request: RiskRequest, now: Instant) {
        match request {
            RiskRequest::NewOrder { session, handle } => {
                self.process_new_order(session, handle, now)
            }
            RiskRequest::Cancel {
                session,
                client_id,
                order_id,
                symbol,
            } => self.process_cancel(session, client_id, order_id, symbol),
        }
    }

    fn process_new_order(&mut self, session: SessionId, mut handle: OrderHandle, now: Instant) {
        let (order_id, client_id, symbol, quantity, price, order_type) = {
            let order = self.pool.get(&handle);
            (
                order.id,
                order.client_id,
                order.symbol,
                order.quantity,
                order.price,
                order.order_type.unwrap_or(OrderType::Limit),
            )
        };

        if let Err(reason) =
            self.validate_new_order(client_id, symbol, order_id, quantity, price, order_type, now)
        {
            warn!(%client_id, order_id, %reason, "order rejected");
            self.stats.incr_rejected(reason);
            self.pool.get_mut(&mut handle).status = OrderStatus::Rejected;
            self.pool.release(handle);
            self.send_event(SessionEvent::OrderAck {
                session,
                order_id,
                reason: Some(reason),
            });
            return;
        }

        // Symbol validity implies a route; a gap between the two sets is a
        // wiring bug and rejects rather than panics.
        let Some(&engine_idx) = self.route_index.get(&symbol) else {
            let reason = RejectReason::Symbol;
            self.stats.incr_rejected(reason);
            self.pool.get_mut(&mut handle).status = OrderStatus::Rejected;
            self.pool.release(handle);
            self.send_event(SessionEvent::OrderAck {
                session,
                order_id,
                reason: Some(reason),
            });
            return;
        };

        // Checks passed: commit client state, then forward.
        let notional = notional_of(price, quantity);
        let state = self
            .clients
            .entry(client_id)
            .or_insert_with(|| ClientRiskState::new(now));
        state.active_orders.insert(order_id);
        state.notional_exposure += notional;

        match self.routes[engine_idx].push(BookCommand::NewOrder { session, handle }) {
            Ok(()) => {
                self.stats.incr_accepted();
            }
            Err(BookCommand::NewOrder { mut handle, .. }) => {
                // Downstream full: roll the state update back and reject.
                if let Some(state) = self.clients.get_mut(&client_id) {
                    state.active_orders.remove(&order_id);
                    state.notional_exposure -= notional;
                }

                let reason = RejectReason::DownstreamBackpressure;
                warn!(%client_id, order_id, %reason, "order rejected");
                self.stats.incr_rejected(reason);
                self.pool.get_mut(&mut handle).status = OrderStatus::Rejected;
                self.pool.release(handle);
                self.send_event(SessionEvent::OrderAck {
                    session,
                    order_id,
                    reason: Some(reason),
                });
            }
            Err(_) => unreachable!("push returns the rejected command"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_new_order(
        &mut self,
        client_id: ClientId,
        symbol: Symbol,
        order_id: OrderId,
        quantity: Qty,
        price: Price,
        order_type: OrderType,
        now: Instant,
    ) -> Result<(), RejectReason> {
        // 1. Symbol known
        let collar_pct = *self.symbols.get(&symbol).ok_or(RejectReason::Symbol)?;

        // 2. Quantity within limits
        if quantity == 0 || quantity > self.limits.max_order_size {
            return Err(RejectReason::Size);
        }

        // 3. Price collar. With no market-data feed into this stage the
        // reference is the order's own price, which keeps the check
        // deterministic; a better reference can be substituted upstream.
        if self.limits.price_collar_enabled && order_type == OrderType::Limit {
            let reference = price;
            let band = reference as f64 * (collar_pct / 100.0);
            let min = reference as f64 - band;
            let max = reference as f64 + band;
            if (price as f64) < min || (price as f64) > max {
                return Err(RejectReason::Price);
            }
        }

        let state = self
            .clients
            .entry(client_id)
            .or_insert_with(|| ClientRiskState::new(now));

        // 4. Rate window: advance when at least a second has passed, then
        // count this submission against the window.
        if now.duration_since(state.window_start) >= Duration::from_secs(1) {
            state.window_start = now;
            state.orders_in_window = 0;
        }
        if state.orders_in_window >= self.limits.max_orders_per_second {
            return Err(RejectReason::Rate);
        }
        state.orders_in_window += 1;

        // 5. Duplicate order id
        if state.active_orders.contains(&order_id) {
            return Err(RejectReason::Duplicate);
        }

        // 6. Credit
        let notional = notional_of(price, quantity);
        if state.notional_exposure + notional > self.limits.max_notional_per_client {
            return Err(RejectReason::Credit);
        }

        Ok(())
    }

    fn process_cancel(
        &mut self,
        session: SessionId,
        client_id: ClientId,
        order_id: OrderId,
        symbol: Symbol,
    ) {
        let owned = self
            .clients
            .get(&client_id)
            .map(|state| state.active_orders.contains(&order_id))
            .unwrap_or(false);
        if !owned {
            self.stats.incr_rejected(RejectReason::NotOwned);
            self.send_event(SessionEvent::OrderAck {
                session,
                order_id,
                reason: Some(RejectReason::NotOwned),
            });
            return;
        }

        if let Some(state) = self.clients.get_mut(&client_id) {
            state.active_orders.remove(&order_id);
        }

        // Route by symbol when the request names one we know; otherwise
        // scatter - the owning engine cancels, the rest answer not-found and
        // the gateway folds the responses into one ack.
        if let Some(&idx) = self.route_index.get(&symbol) {
            self.forward_cancel(idx, session, order_id, 1);
        } else {
            let fanout = self.routes.len() as u32;
            if fanout == 0 {
                self.send_event(SessionEvent::OrderAck {
                    session,
                    order_id,
                    reason: Some(RejectReason::NotFound),
                });
                return;
            }
            for idx in 0..self.routes.len() {
                self.forward_cancel(idx, session, order_id, fanout);
            }
        }
    }

    /// Cancels are forwarded with spin-wait backpressure; they are small,
    /// already validated, and must not be silently lost
    fn forward_cancel(&mut self, idx: usize, session: SessionId, order_id: OrderId, fanout: u32) {
        let mut command = BookCommand::Cancel {
            session,
            order_id,
            fanout,
        };
        loop {
            match self.routes[idx].push(command) {
                Ok(()) => return,
                Err(returned) => {
                    if self.shutdown.is_requested() {
                        return;
                    }
                    command = returned;
                    self.stats.backpressure_events.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    std::hint::spin_loop();
                }
            }
        }
    }

    fn send_event(&self, event: SessionEvent) {
        let mut event = event;
        loop {
            match self.session_events.push(event) {
                Ok(()) => return,
                Err(returned) => {
                    if self.shutdown.is_requested() {
                        return;
                    }
                    event = returned;
                    self.stats.backpressure_events.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    std::hint::spin_loop();
                }
            }
        }
    }
}

/// Notional in whole currency units: price (x10^4) times quantity, unscaled
#[inline]
fn notional_of(price: Price, quantity: Qty) -> u64 {
    ((price as u128 * quantity as u128) / PRICE_SCALE as u128) as u64
}
