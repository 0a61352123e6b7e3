//! tickmatch - real-time equity exchange simulator core
//!
//! A three-stage order-entry pipeline: a TCP [`gateway`] terminates client
//! sessions and decodes the binary [`protocol`], a [`risk`] worker applies
//! deterministic pre-trade checks, and one matching [`engine`] per symbol
//! drives an [`orderbook`] with price-time priority. Trades and BBO changes
//! fan into a shared MPMC ring drained by the UDP [`publisher`].
//!
//! The hot path allocates nothing: every order lives in the pre-sized
//! [`pool`] arena and moves between stages as a handle through bounded
//! lock-free rings ([`spsc`], [`mpmc`]).
//!
//! # Modules
//!
//! - [`core_types`] - type aliases and bounded wire strings
//! - [`models`] - Order and Trade records
//! - [`pool`] - order arena with lock-free free list
//! - [`spsc`] / [`mpmc`] - bounded ring queues
//! - [`protocol`] - binary frame codec (CRC32, validation, sanitization)
//! - [`orderbook`] - price-time priority ladder
//! - [`engine`] - per-symbol matching worker
//! - [`risk`] - pre-trade checks and per-client state
//! - [`gateway`] - TCP session front end and ack back-channel
//! - [`publisher`] - UDP multicast market data
//! - [`exchange`] - wiring and lifecycle
//! - [`config`] / [`metrics`] / [`shutdown`] / [`errors`] / [`logging`]

// Core types - must be first!
pub mod core_types;

// Configuration and plumbing
pub mod config;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod shutdown;

// Concurrency primitives
pub mod mpmc;
pub mod pool;
pub mod spsc;

// Trading components
pub mod engine;
pub mod exchange;
pub mod gateway;
pub mod messages;
pub mod models;
pub mod orderbook;
pub mod protocol;
pub mod publisher;
pub mod risk;

// Convenient re-exports at crate root
pub use config::Config;
pub use core_types::{ClientId, OrderId, PRICE_SCALE, Price, Qty, SeqNum, SessionId, Symbol, TradeId};
pub use errors::{ExchangeError, ProtocolError, RejectReason};
pub use exchange::Exchange;
pub use messages::{BboUpdate, BookCommand, MarketDataEvent, RiskRequest, SessionEvent};
pub use metrics::{ExchangeStats, StatsSnapshot};
pub use models::{Order, OrderStatus, OrderType, Side, Trade};
pub use orderbook::OrderBook;
pub use pool::{OrderHandle, OrderPool};
pub use shutdown::ShutdownSignal;
