//! Order and Trade models
//!
//! `Order` is the single mutable record of the pipeline. It lives in the
//! [`crate::pool::OrderPool`] arena and is owned by exactly one stage at a
//! time; everything else here is a plain value type.

use crate::core_types::{ClientId, OrderId, Price, Qty, SessionId, Symbol, TradeId};

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Side {
    Buy = 1,
    Sell = 2,
}

impl Side {
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Side::Buy),
            2 => Some(Side::Sell),
            _ => None,
        }
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrderType {
    Market = 1,
    Limit = 2,
}

impl OrderType {
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(OrderType::Market),
            2 => Some(OrderType::Limit),
            _ => None,
        }
    }
}

/// Order lifecycle status
///
/// Transitions are monotone along:
/// `Pending -> { Accepted -> { PartiallyFilled -> Filled | Cancelled } | Rejected }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OrderStatus {
    #[default]
    Pending = 0,
    Accepted = 1,
    Rejected = 2,
    Filled = 3,
    PartiallyFilled = 4,
    Cancelled = 5,
}

/// One order record, arena-resident.
///
/// `remaining` is monotone non-increasing and never exceeds `quantity`.
/// `session` tags the originating connection so acks and trade reports can be
/// routed back through queues without the matching thread ever touching
/// session buffers.
#[derive(Debug, Clone, Default)]
pub struct Order {
    pub id: OrderId,
    pub client_id: ClientId,
    pub symbol: Symbol,
    pub side: Option<Side>,
    pub order_type: Option<OrderType>,
    pub quantity: Qty,
    pub remaining: Qty,
    pub price: Price,
    pub status: OrderStatus,
    pub session: SessionId,
    pub submitted_at_ns: u64,
}

impl Order {
    /// Overwrite every field of a recycled arena slot
    #[allow(clippy::too_many_arguments)]
    pub fn populate(
        &mut self,
        id: OrderId,
        client_id: ClientId,
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        quantity: Qty,
        price: Price,
        session: SessionId,
        submitted_at_ns: u64,
    ) {
        self.id = id;
        self.client_id = client_id;
        self.symbol = symbol;
        self.side = Some(side);
        self.order_type = Some(order_type);
        self.quantity = quantity;
        self.remaining = quantity;
        self.price = price;
        self.status = OrderStatus::Pending;
        self.session = session;
        self.submitted_at_ns = submitted_at_ns;
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.remaining == 0
    }

    #[inline]
    pub fn filled_qty(&self) -> Qty {
        self.quantity - self.remaining
    }
}

/// One execution. Immutable once emitted.
///
/// `buy_order_id` is always the Buy side's id regardless of which side was
/// the aggressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trade {
    pub id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub symbol: Symbol,
    pub quantity: Qty,
    pub price: Price,
    pub timestamp_ns: u64,
}
