//! OrderBook - BTreeMap-based price-time priority ladder
//!
//! One book per symbol, owned by exactly one matching engine thread. The
//! book stores pool handles, never order values; the records themselves stay
//! put in the arena.
//!
//! # Key Design:
//! - Asks are keyed by price directly (ascending, lowest = best ask)
//! - Bids are keyed by `u64::MAX - price` so the highest price comes first
//! - Each price level is a FIFO of handles plus an aggregate resting
//!   quantity, maintained incrementally
//! - A hash index order-id -> (price, side) gives O(1) cancel lookup
//!
//! # Complexity:
//! | Operation | Time |
//! |-----------|------|
//! | Rest | O(log n) |
//! | Best price | O(1) amortized |
//! | Cancel | O(1) lookup + O(log n + k) removal |
//! | Match step | O(1) per execution |

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::core_types::{OrderId, Price, Qty, SessionId, Symbol, TradeId, timestamp_ns};
use crate::messages::BboUpdate;
use crate::models::{OrderStatus, OrderType, Side, Trade};
use crate::pool::{OrderHandle, OrderPool};

/// Detected mid-step invariant violation. Fatal: the owning engine logs it
/// and raises the process shutdown flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BookError {
    #[error("remaining quantity underflow on order {0}")]
    QuantityUnderflow(OrderId),
    #[error("aggregate quantity underflow at price {0}")]
    AggregateUnderflow(Price),
    #[error("empty price level survived cleanup at {0}")]
    EmptyLevel(Price),
    #[error("book crossed after matching step")]
    CrossedBook,
}

/// One price level: FIFO of resting handles plus the aggregate remaining
/// quantity, kept equal to the sum over the queue
#[derive(Debug)]
pub struct PriceLevel {
    pub price: Price,
    orders: VecDeque<OrderHandle>,
    total_qty: Qty,
}

impl PriceLevel {
    fn new(price: Price) -> Self {
        Self {
            price,
            orders: VecDeque::new(),
            total_qty: 0,
        }
    }

    #[inline]
    pub fn total_qty(&self) -> Qty {
        self.total_qty
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

/// One execution produced by the match loop
#[derive(Debug, Clone, Copy)]
pub struct Execution {
    pub trade: Trade,
    /// Session that submitted the passive order, for trade-report routing
    pub passive_session: SessionId,
    pub aggressor: Side,
}

/// Aggregated depth row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: Qty,
    pub order_count: u32,
}

/// The per-symbol ladder
pub struct OrderBook {
    symbol: Symbol,
    /// Sell side: price -> level (ascending, first = best ask)
    asks: BTreeMap<u64, PriceLevel>,
    /// Buy side: (MAX - price) -> level (first = best bid)
    bids: BTreeMap<u64, PriceLevel>,
    /// Order index for O(1) cancel lookup
    index: FxHashMap<OrderId, (Price, Side)>,
    pool: Arc<OrderPool>,
    trade_id_counter: TradeId,
}

impl OrderBook {
    pub fn new(symbol: Symbol, pool: Arc<OrderPool>) -> Self {
        Self {
            symbol,
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
            index: FxHashMap::default(),
            pool,
            trade_id_counter: 0,
        }
    }

    #[inline]
    pub fn symbol(&self) -> Symbol {
        self.symbol
    }

    /// Highest resting buy price
    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first_key_value().map(|(k, _)| u64::MAX - k)
    }

    /// Lowest resting sell price
    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first_key_value().map(|(k, _)| *k)
    }

    /// Aggregate quantity at the best bid
    pub fn bid_qty(&self) -> Qty {
        self.bids
            .first_key_value()
            .map(|(_, level)| level.total_qty)
            .unwrap_or(0)
    }

    /// Aggregate quantity at the best ask
    pub fn ask_qty(&self) -> Qty {
        self.asks
            .first_key_value()
            .map(|(_, level)| level.total_qty)
            .unwrap_or(0)
    }

    /// Top-of-book snapshot; zeros for an empty side
    pub fn bbo(&self) -> BboUpdate {
        BboUpdate {
            symbol: self.symbol,
            bid_price: self.best_bid().unwrap_or(0),
            bid_qty: self.bid_qty(),
            ask_price: self.best_ask().unwrap_or(0),
            ask_qty: self.ask_qty(),
        }
    }

    /// Resting orders across both sides
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index.contains_key(&order_id)
    }

    /// Total resting quantity at one price
    pub fn qty_at_price(&self, price: Price, side: Side) -> Qty {
        let level = match side {
            Side::Buy => self.bids.get(&(u64::MAX - price)),
            Side::Sell => self.asks.get(&price),
        };
        level.map(|l| l.total_qty).unwrap_or(0)
    }

    /// Last trade id handed out
    pub fn trade_count(&self) -> TradeId {
        self.trade_id_counter
    }

    /// Match `taker` against the opposite side while a cross exists.
    ///
    /// Executes at the passive order's price, FIFO within each level, best
    /// price first. Fully filled passive orders are unlinked, marked
    /// `Filled`, and released to the pool; emptied levels are removed. One
    /// [`Execution`] is appended to `out` per fill. The taker is left with
    /// its final `remaining`; resting or releasing it is the caller's call.
    pub fn execute_match(
        &mut self,
        taker: &mut OrderHandle,
        out: &mut Vec<Execution>,
    ) -> Result<(), BookError> {
        let Self {
            asks,
            bids,
            index,
            pool,
            trade_id_counter,
            symbol,
        } = self;

        let (taker_id, taker_side, taker_type, taker_price) = {
            let order = pool.get(taker);
            (
                order.id,
                order.side.unwrap_or(Side::Buy),
                order.order_type.unwrap_or(OrderType::Limit),
                order.price,
            )
        };
        let opposite = match taker_side {
            Side::Buy => asks,
            Side::Sell => bids,
        };

        while pool.get(taker).remaining > 0 {
            let Some(mut entry) = opposite.first_entry() else {
                break;
            };
            let level_price = entry.get().price;

            let crosses = match taker_type {
                OrderType::Market => true,
                OrderType::Limit => match taker_side {
                    Side::Buy => taker_price >= level_price,
                    Side::Sell => taker_price <= level_price,
                },
            };
            if !crosses {
                break;
            }

            let level = entry.get_mut();
            let Some(passive) = level.orders.front_mut() else {
                return Err(BookError::EmptyLevel(level_price));
            };

            let (trade, passive_session, passive_filled) = {
                let passive_order = pool.get_mut(passive);
                let passive_id = passive_order.id;
                let passive_sess = passive_order.session;
                let taker_order = pool.get_mut(taker);

                let trade_qty = taker_order.remaining.min(passive_order.remaining);

                taker_order.remaining = taker_order
                    .remaining
                    .checked_sub(trade_qty)
                    .ok_or(BookError::QuantityUnderflow(taker_id))?;
                passive_order.remaining = passive_order
                    .remaining
                    .checked_sub(trade_qty)
                    .ok_or(BookError::QuantityUnderflow(passive_id))?;
                level.total_qty = level
                    .total_qty
                    .checked_sub(trade_qty)
                    .ok_or(BookError::AggregateUnderflow(level_price))?;

                taker_order.status = if taker_order.remaining == 0 {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartiallyFilled
                };
                passive_order.status = if passive_order.remaining == 0 {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartiallyFilled
                };

                *trade_id_counter += 1;
                // Buy order id first regardless of aggressor (market data
                // convention); execution at the passive price.
                let (buy_id, sell_id) = match taker_side {
                    Side::Buy => (taker_id, passive_id),
                    Side::Sell => (passive_id, taker_id),
                };
                (
                    Trade {
                        id: *trade_id_counter,
                        buy_order_id: buy_id,
                        sell_order_id: sell_id,
                        symbol: *symbol,
                        quantity: trade_qty,
                        price: level_price,
                        timestamp_ns: timestamp_ns(),
                    },
                    passive_sess,
                    passive_order.remaining == 0,
                )
            };

            out.push(Execution {
                trade,
                passive_session,
                aggressor: taker_side,
            });

            if passive_filled {
                // Unwrap is safe: we just held a front reference.
                if let Some(done) = level.orders.pop_front() {
                    index.remove(&trade.passive_id(taker_side));
                    pool.release(done);
                }
            }

            if level.orders.is_empty() {
                entry.remove();
            }
        }

        Ok(())
    }

    /// Rest a (possibly partially filled) order at the tail of its level.
    ///
    /// The caller sets the order's status beforehand; the book only links
    /// the handle and maintains the aggregates.
    pub fn rest(&mut self, handle: OrderHandle) {
        let (order_id, price, side, remaining) = {
            let order = self.pool.get(&handle);
            (
                order.id,
                order.price,
                order.side.unwrap_or(Side::Buy),
                order.remaining,
            )
        };
        self.index.insert(order_id, (price, side));

        let level = match side {
            Side::Buy => self
                .bids
                .entry(u64::MAX - price)
                .or_insert_with(|| PriceLevel::new(price)),
            Side::Sell => self
                .asks
                .entry(price)
                .or_insert_with(|| PriceLevel::new(price)),
        };
        level.total_qty += remaining;
        level.orders.push_back(handle);
    }

    /// Unlink an order by id. Returns the handle for the caller to release;
    /// `None` when no book entry exists.
    pub fn cancel(&mut self, order_id: OrderId) -> Option<OrderHandle> {
        let (price, side) = self.index.remove(&order_id)?;
        let Self {
            asks, bids, pool, ..
        } = self;

        let (tree, key) = match side {
            Side::Buy => (bids, u64::MAX - price),
            Side::Sell => (asks, price),
        };
        let level = tree.get_mut(&key)?;

        let pos = level
            .orders
            .iter()
            .position(|h| pool.get(h).id == order_id)?;
        let handle = level.orders.remove(pos)?;
        level.total_qty = level.total_qty.saturating_sub(pool.get(&handle).remaining);

        if level.orders.is_empty() {
            tree.remove(&key);
        }
        Some(handle)
    }

    /// Top `limit` levels per side: bids descending, asks ascending
    pub fn depth(&self, limit: usize) -> (Vec<DepthLevel>, Vec<DepthLevel>) {
        let bids = self
            .bids
            .values()
            .take(limit)
            .map(|level| DepthLevel {
                price: level.price,
                quantity: level.total_qty,
                order_count: level.orders.len() as u32,
            })
            .collect();
        let asks = self
            .asks
            .values()
            .take(limit)
            .map(|level| DepthLevel {
                price: level.price,
                quantity: level.total_qty,
                order_count: level.orders.len() as u32,
            })
            .collect();
        (bids, asks)
    }

    /// No-crossed-book invariant: holds between processing steps
    pub fn is_uncrossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid < ask,
            _ => true,
        }
    }
}

impl Trade {
    /// Id of the passive side of this trade, given the aggressor side
    #[inline]
    fn passive_id(&self, aggressor: Side) -> OrderId {
        match aggressor {
            Side::Buy => self.sell_order_id,
            Side::Sell => self.buy_order_id,
        }
    }
}
