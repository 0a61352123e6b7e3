//! Inter-stage message types
//!
//! Everything that crosses a queue between pipeline stages lives here. Each
//! stage references only the queues it produces to or consumes from, never
//! another stage, so these types are the entire inter-component contract.
//!
//! # Message Flow
//!
//! ```text
//! Gateway -> RiskRequest -> Risk -> BookCommand -> Engine -+-> MarketDataEvent -> Publisher
//!                             |                            |
//!                             +------ SessionEvent <-------+
//!                                         |
//!                                      Gateway
//! ```
//!
//! Messages that carry an [`OrderHandle`] transfer ownership of the arena
//! slot with the message; the sender must not touch the record after a
//! successful push.

use crate::core_types::{ClientId, OrderId, Price, Qty, SessionId, Symbol};
use crate::errors::RejectReason;
use crate::models::{Side, Trade};
use crate::pool::OrderHandle;

// ------------------------------------------------------------
// GATEWAY -> RISK
// ------------------------------------------------------------

/// Order-entry request for the risk stage
#[derive(Debug)]
pub enum RiskRequest {
    /// Validated, pool-resident new order
    NewOrder {
        session: SessionId,
        handle: OrderHandle,
    },
    /// Cancel by id; the symbol may be empty (routing falls back to scatter)
    Cancel {
        session: SessionId,
        client_id: ClientId,
        order_id: OrderId,
        symbol: Symbol,
    },
}

// ------------------------------------------------------------
// RISK -> MATCHING ENGINE
// ------------------------------------------------------------

/// Command for one symbol's matching engine
#[derive(Debug)]
pub enum BookCommand {
    /// Risk-approved order, ready to match
    NewOrder {
        session: SessionId,
        handle: OrderHandle,
    },
    /// Cancel request. `fanout` is how many engines received this cancel so
    /// the gateway can collapse the scatter responses into one ack.
    Cancel {
        session: SessionId,
        order_id: OrderId,
        fanout: u32,
    },
}

// ------------------------------------------------------------
// ENGINE -> PUBLISHER (market data)
// ------------------------------------------------------------

/// Top-of-book snapshot; zero price and quantity when a side is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BboUpdate {
    pub symbol: Symbol,
    pub bid_price: Price,
    pub bid_qty: Qty,
    pub ask_price: Price,
    pub ask_qty: Qty,
}

/// Event on the shared market-data ring
#[derive(Debug, Clone, Copy)]
pub enum MarketDataEvent {
    Trade { trade: Trade, aggressor: Side },
    Bbo(BboUpdate),
}

// ------------------------------------------------------------
// RISK/ENGINE -> GATEWAY (back-channel)
// ------------------------------------------------------------

/// Event addressed to one originating session
#[derive(Debug, Clone, Copy)]
pub enum SessionEvent {
    /// Exactly one per NewOrder. `reason` is `None` on acceptance.
    OrderAck {
        session: SessionId,
        order_id: OrderId,
        reason: Option<RejectReason>,
    },
    /// One per engine that processed a cancel; the gateway aggregates
    /// `fanout` of these into exactly one wire ack.
    CancelResult {
        session: SessionId,
        order_id: OrderId,
        found: bool,
        fanout: u32,
    },
    /// One per execution per side
    TradeReport { session: SessionId, trade: Trade },
}

impl SessionEvent {
    /// The session this event must be routed to
    pub fn session(&self) -> SessionId {
        match self {
            Self::OrderAck { session, .. }
            | Self::CancelResult { session, .. }
            | Self::TradeReport { session, .. } => *session,
        }
    }
}
