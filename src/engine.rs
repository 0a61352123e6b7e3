//! Matching engine - one worker per symbol
//!
//! Each engine owns one [`OrderBook`] and one SPSC input of
//! [`BookCommand`]s. A command is processed to completion before the next is
//! read, so the market-data stream observes each matching step atomically.
//! Trades and BBO changes go to the shared market-data ring; acks and trade
//! reports go to the session-event ring - the matching thread never touches
//! session buffers.
//!
//! Failure modes: a market order against an empty opposite side is released
//! immediately with a "no liquidity" ack; any invariant violation detected
//! mid-step is fatal and raises the process shutdown flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::core_types::{OrderId, SessionId, Symbol};
use crate::errors::RejectReason;
use crate::messages::{BookCommand, MarketDataEvent, SessionEvent};
use crate::metrics::ExchangeStats;
use crate::mpmc::MpmcQueue;
use crate::models::{OrderStatus, OrderType};
use crate::orderbook::{Execution, OrderBook};
use crate::pool::{OrderHandle, OrderPool};
use crate::shutdown::ShutdownSignal;
use crate::spsc::SpscConsumer;

/// Per-engine counters, readable from outside the worker thread
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub orders_processed: AtomicU64,
    pub trades_executed: AtomicU64,
    pub cancels_processed: AtomicU64,
}

/// Per-symbol matching worker
pub struct MatchingEngine {
    symbol: Symbol,
    book: OrderBook,
    pool: Arc<OrderPool>,
    input: SpscConsumer<BookCommand>,
    market_data: Arc<MpmcQueue<MarketDataEvent>>,
    session_events: Arc<MpmcQueue<SessionEvent>>,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<ExchangeStats>,
    counters: Arc<EngineCounters>,
    /// Reused per command; capacity survives across iterations
    executions: Vec<Execution>,
}

impl MatchingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        pool: Arc<OrderPool>,
        input: SpscConsumer<BookCommand>,
        market_data: Arc<MpmcQueue<MarketDataEvent>>,
        session_events: Arc<MpmcQueue<SessionEvent>>,
        shutdown: Arc<ShutdownSignal>,
        stats: Arc<ExchangeStats>,
    ) -> Self {
        let book = OrderBook::new(symbol, pool.clone());
        Self {
            symbol,
            book,
            pool,
            input,
            market_data,
            session_events,
            shutdown,
            stats,
            counters: Arc::new(EngineCounters::default()),
            executions: Vec::with_capacity(64),
        }
    }

    pub fn counters(&self) -> Arc<EngineCounters> {
        self.counters.clone()
    }

    pub fn symbol(&self) -> Symbol {
        self.symbol
    }

    /// The owned book, for direct-drive tests
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Move the engine onto its dedicated thread.
    ///
    /// The worker pops one command at a time, processes it to completion,
    /// and yields when idle. On shutdown it drains its input queue before
    /// exiting so no order is left owned by a dead queue.
    pub fn spawn(mut self) -> JoinHandle<()> {
        let name = format!("engine-{}", self.symbol);
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                info!(symbol = %self.symbol, "matching engine started");
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
                info!(symbol = %self.symbol, "matching engine stopped");
            })
            .expect("failed to spawn matching engine thread")
    }

    /// Pop and process one queued command; false when the input is empty
    pub fn poll(&mut self) -> bool {
        match self.input.pop() {
            Some(command) => {
                self.process(command);
                true
            }
            None => false,
        }
    }

    /// Process one command to completion
    pub fn process(&mut self, command: BookCommand) {
        match command {
            BookCommand::NewOrder { session, handle } => self.process_new_order(session, handle),
            BookCommand::Cancel {
                session,
                order_id,
                fanout,
            } => self.process_cancel(session, order_id, fanout),
        }
    }

    fn process_new_order(&mut self, session: SessionId, mut handle: OrderHandle) {
        let bbo_before = self.book.bbo();
        self.executions.clear();

        if let Err(violation) = self.book.execute_match(&mut handle, &mut self.executions) {
            error!(symbol = %self.symbol, %violation, "invariant violation while matching");
            self.pool.release(handle);
            self.shutdown.request();
            return;
        }

        let order_id = self.pool.get(&handle).id;
        let execution_count = self.executions.len();

        // Trades first, in execution order, then the resulting book state.
        for i in 0..execution_count {
            let exec = self.executions[i];
            self.counters.trades_executed.fetch_add(1, Ordering::Relaxed);
            self.stats.trades_executed.fetch_add(1, Ordering::Relaxed);
            self.publish_market_data(MarketDataEvent::Trade {
                trade: exec.trade,
                aggressor: exec.aggressor,
            });
            // Both sides get a report; the passive side's session rides on
            // the execution record.
            self.publish_session_event(SessionEvent::TradeReport {
                session: exec.passive_session,
                trade: exec.trade,
            });
            self.publish_session_event(SessionEvent::TradeReport {
                session,
                trade: exec.trade,
            });
        }

        // Terminal placement of the aggressive order.
        let (order_type, remaining, filled_qty) = {
            let order = self.pool.get(&handle);
            (
                order.order_type.unwrap_or(OrderType::Limit),
                order.remaining,
                order.filled_qty(),
            )
        };

        let mut reject: Option<RejectReason> = None;
        match order_type {
            OrderType::Market => {
                // Market orders never rest.
                let order = self.pool.get_mut(&mut handle);
                if remaining > 0 {
                    order.status = OrderStatus::Cancelled;
                    if filled_qty == 0 {
                        reject = Some(RejectReason::NoLiquidity);
                    }
                }
                self.pool.release(handle);
            }
            OrderType::Limit => {
                if remaining > 0 {
                    let order = self.pool.get_mut(&mut handle);
                    order.status = if filled_qty > 0 {
                        OrderStatus::PartiallyFilled
                    } else {
                        OrderStatus::Accepted
                    };
                    self.book.rest(handle);
                } else {
                    self.pool.release(handle);
                }
            }
        }

        if !self.book.is_uncrossed() {
            error!(symbol = %self.symbol, "book crossed after matching step");
            self.shutdown.request();
            return;
        }

        let bbo_after = self.book.bbo();
        if bbo_after != bbo_before {
            self.publish_market_data(MarketDataEvent::Bbo(bbo_after));
        }

        match reject {
            Some(reason) => {
                debug!(symbol = %self.symbol, order_id, %reason, "order rejected by engine");
                self.stats.incr_rejected(reason);
            }
            None => {
                self.counters.orders_processed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.publish_session_event(SessionEvent::OrderAck {
            session,
            order_id,
            reason: reject,
        });
    }

    fn process_cancel(&mut self, session: SessionId, order_id: OrderId, fanout: u32) {
        let bbo_before = self.book.bbo();
        let found = match self.book.cancel(order_id) {
            Some(mut handle) => {
                self.pool.get_mut(&mut handle).status = OrderStatus::Cancelled;
                self.pool.release(handle);
                self.counters.cancels_processed.fetch_add(1, Ordering::Relaxed);
                self.stats.cancels_executed.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        };

        if found {
            let bbo_after = self.book.bbo();
            if bbo_after != bbo_before {
                self.publish_market_data(MarketDataEvent::Bbo(bbo_after));
            }
        }

        self.publish_session_event(SessionEvent::CancelResult {
            session,
            order_id,
            found,
            fanout,
        });
    }

    /// Best-effort market data: a full ring drops the event and counts it
    fn publish_market_data(&self, event: MarketDataEvent) {
        if self.market_data.push(event).is_err() {
            self.stats.md_events_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Acks and reports must not be lost; spin until the gateway drains,
    /// bailing out only on process shutdown
    fn publish_session_event(&self, event: SessionEvent) {
        let mut event = event;
        loop {
            match self.session_events.push(event) {
                Ok(()) => return,
                Err(returned) => {
                    if self.shutdown.is_requested() {
                        return;
                    }
                    event = returned;
                    self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
                    std::hint::spin_loop();
                }
            }
        }
    }
}
