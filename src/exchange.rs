//! Exchange - top-level wiring and lifecycle
//!
//! Builds the arena, rings, and workers from one [`Config`] and owns their
//! lifecycle. Components only ever reference the queues they produce to or
//! consume from; this module is the single place where the topology exists.
//!
//! Start order is leaves-first (publisher, engines, risk, gateway) and
//! teardown is the exact reverse, driven by one shutdown flag plus joins.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use tracing::info;

use crate::config::Config;
use crate::core_types::Symbol;
use crate::engine::{EngineCounters, MatchingEngine};
use crate::errors::ExchangeError;
use crate::gateway::{Gateway, SessionAuth, TrustOnFirstUse};
use crate::messages::{MarketDataEvent, RiskRequest, SessionEvent};
use crate::metrics::ExchangeStats;
use crate::mpmc::MpmcQueue;
use crate::pool::OrderPool;
use crate::publisher::UdpPublisher;
use crate::risk::RiskEngine;
use crate::shutdown::ShutdownSignal;
use crate::spsc::spsc_channel;

/// The assembled trading core
pub struct Exchange {
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<ExchangeStats>,
    pool: Arc<OrderPool>,
    market_data: Arc<MpmcQueue<MarketDataEvent>>,
    session_event_ring: Arc<MpmcQueue<SessionEvent>>,
    engine_counters: Vec<(Symbol, Arc<EngineCounters>)>,
    // Pre-start components; start() moves each onto its thread.
    engines: Vec<MatchingEngine>,
    risk: Option<RiskEngine>,
    publisher: Option<UdpPublisher>,
    gateway: Gateway,
    engine_handles: Vec<JoinHandle<()>>,
    risk_handle: Option<JoinHandle<()>>,
    publisher_handle: Option<JoinHandle<()>>,
    started: bool,
}

impl Exchange {
    /// Build the full topology with the default session authenticator
    pub fn new(config: Config) -> Result<Self, ExchangeError> {
        Self::with_auth(config, Arc::new(TrustOnFirstUse))
    }

    /// Build the full topology with a caller-supplied session authenticator
    pub fn with_auth(
        config: Config,
        auth: Arc<dyn SessionAuth>,
    ) -> Result<Self, ExchangeError> {
        config.validate()?;

        let shutdown = Arc::new(ShutdownSignal::new());
        let stats = Arc::new(ExchangeStats::new());
        let pool = Arc::new(OrderPool::new(config.performance.order_pool_size));
        let ring_capacity = config.performance.queue_capacity;

        let market_data: Arc<MpmcQueue<MarketDataEvent>> =
            Arc::new(MpmcQueue::new(ring_capacity));
        let session_events: Arc<MpmcQueue<SessionEvent>> =
            Arc::new(MpmcQueue::new(ring_capacity));

        // One engine per configured symbol, each with its own SPSC input.
        let mut engines = Vec::with_capacity(config.symbols.len());
        let mut engine_routes = Vec::with_capacity(config.symbols.len());
        let mut engine_counters = Vec::with_capacity(config.symbols.len());
        for symbol_cfg in &config.symbols {
            let symbol = Symbol::new(&symbol_cfg.name).ok_or_else(|| {
                ExchangeError::Config(format!("symbol name '{}' too long", symbol_cfg.name))
            })?;
            if engine_routes.iter().any(|(s, _)| *s == symbol) {
                return Err(ExchangeError::Config(format!(
                    "duplicate symbol '{}'",
                    symbol_cfg.name
                )));
            }
            let (tx, rx) = spsc_channel(ring_capacity);
            let engine = MatchingEngine::new(
                symbol,
                pool.clone(),
                rx,
                market_data.clone(),
                session_events.clone(),
                shutdown.clone(),
                stats.clone(),
            );
            engine_counters.push((symbol, engine.counters()));
            engine_routes.push((symbol, tx));
            engines.push(engine);
        }

        let (risk_tx, risk_rx) = spsc_channel::<RiskRequest>(ring_capacity);
        let risk = RiskEngine::new(
            config.risk.clone(),
            &config.symbols,
            engine_routes,
            risk_rx,
            session_events.clone(),
            pool.clone(),
            shutdown.clone(),
            stats.clone(),
        );

        let publisher = UdpPublisher::new(
            &config.exchange.udp_group,
            config.exchange.udp_port,
            market_data.clone(),
            shutdown.clone(),
            stats.clone(),
        )?;

        let gateway = Gateway::new(
            config.exchange.tcp_port,
            config.gateway.clone(),
            pool.clone(),
            risk_tx,
            session_events.clone(),
            shutdown.clone(),
            stats.clone(),
            auth,
        );

        Ok(Self {
            shutdown,
            stats,
            pool,
            market_data,
            session_event_ring: session_events,
            engine_counters,
            engines,
            risk: Some(risk),
            publisher: Some(publisher),
            gateway,
            engine_handles: Vec::new(),
            risk_handle: None,
            publisher_handle: None,
            started: false,
        })
    }

    /// Spawn every worker, leaves first
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!("exchange starting");

        if let Some(publisher) = self.publisher.take() {
            self.publisher_handle = Some(publisher.spawn());
        }
        for engine in self.engines.drain(..) {
            self.engine_handles.push(engine.spawn());
        }
        if let Some(risk) = self.risk.take() {
            self.risk_handle = Some(risk.spawn());
        }
        self.gateway.start();
    }

    /// Raise the shutdown flag and join every worker in reverse start order
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        info!("exchange stopping");
        self.shutdown.request();

        self.gateway.stop();
        if let Some(handle) = self.risk_handle.take() {
            let _ = handle.join();
        }
        for handle in self.engine_handles.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.publisher_handle.take() {
            let _ = handle.join();
        }

        let snapshot = self.stats.snapshot();
        info!(%snapshot, pool_in_use = self.pool.in_use(), "exchange stopped");
        for (symbol, counters) in &self.engine_counters {
            info!(
                %symbol,
                orders = counters.orders_processed.load(Ordering::Relaxed),
                trades = counters.trades_executed.load(Ordering::Relaxed),
                cancels = counters.cancels_processed.load(Ordering::Relaxed),
                "engine totals"
            );
        }
    }

    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<ExchangeStats> {
        self.stats.clone()
    }

    pub fn pool(&self) -> Arc<OrderPool> {
        self.pool.clone()
    }

    /// Current depth of the shared rings: (market data, session events)
    pub fn queue_depths(&self) -> (usize, usize) {
        (self.market_data.len(), self.session_event_ring.len())
    }

    /// Per-symbol engine counters for health export
    pub fn engine_counters(&self) -> &[(Symbol, Arc<EngineCounters>)] {
        &self.engine_counters
    }

    /// Gateway listen address once bound (supports port 0 in tests)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.gateway.local_addr()
    }

    pub fn session_count(&self) -> usize {
        self.gateway.session_count()
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.stop();
    }
}
