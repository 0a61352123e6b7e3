//! Deterministic risk -> matching pipeline scenarios
//!
//! Drives the real components through their real queues, single-threaded,
//! so every assertion is exact: orders enter through the risk stage, cross
//! in the matching engine, and acks, reports, and market data are observed
//! on the same rings the workers use.

use std::sync::Arc;

use tickmatch::config::{RiskConfig, SymbolConfig};
use tickmatch::core_types::{ClientId, OrderId, SessionId, Symbol};
use tickmatch::engine::MatchingEngine;
use tickmatch::errors::RejectReason;
use tickmatch::messages::{MarketDataEvent, RiskRequest, SessionEvent};
use tickmatch::metrics::ExchangeStats;
use tickmatch::models::{OrderType, Side, Trade};
use tickmatch::mpmc::MpmcQueue;
use tickmatch::pool::OrderPool;
use tickmatch::risk::RiskEngine;
use tickmatch::shutdown::ShutdownSignal;
use tickmatch::spsc::spsc_channel;

struct Pipeline {
    pool: Arc<OrderPool>,
    risk: RiskEngine,
    engine: MatchingEngine,
    session_events: Arc<MpmcQueue<SessionEvent>>,
    market_data: Arc<MpmcQueue<MarketDataEvent>>,
    stats: Arc<ExchangeStats>,
}

fn pipeline(risk_config: RiskConfig) -> Pipeline {
    let pool = Arc::new(OrderPool::new(1024));
    let shutdown = Arc::new(ShutdownSignal::new());
    let stats = Arc::new(ExchangeStats::new());
    let market_data = Arc::new(MpmcQueue::new(1024));
    let session_events = Arc::new(MpmcQueue::new(1024));

    let symbol = Symbol::new("AAPL").unwrap();
    let (engine_tx, engine_rx) = spsc_channel(256);
    let engine = MatchingEngine::new(
        symbol,
        pool.clone(),
        engine_rx,
        market_data.clone(),
        session_events.clone(),
        shutdown.clone(),
        stats.clone(),
    );

    let (_risk_tx, risk_rx) = spsc_channel(256);
    let symbols = vec![SymbolConfig {
        name: "AAPL".into(),
        tick_size: 0.01,
        lot_size: 100,
        price_collar_pct: 10.0,
    }];
    let risk = RiskEngine::new(
        risk_config,
        &symbols,
        vec![(symbol, engine_tx)],
        risk_rx,
        session_events.clone(),
        pool.clone(),
        shutdown,
        stats.clone(),
    );

    Pipeline {
        pool,
        risk,
        engine,
        session_events,
        market_data,
        stats,
    }
}

fn default_risk() -> RiskConfig {
    RiskConfig {
        max_order_size: 10_000,
        max_notional_per_client: 1_000_000_000,
        max_orders_per_second: 10_000,
        price_collar_enabled: false,
    }
}

impl Pipeline {
    fn submit(
        &mut self,
        session: SessionId,
        client: &str,
        id: OrderId,
        side: Side,
        order_type: OrderType,
        qty: u64,
        price: u64,
    ) {
        let mut handle = self.pool.acquire().expect("pool exhausted");
        self.pool.get_mut(&mut handle).populate(
            id,
            ClientId::new(client).unwrap(),
            Symbol::new("AAPL").unwrap(),
            side,
            order_type,
            qty,
            price,
            session,
            0,
        );
        self.risk.process(RiskRequest::NewOrder { session, handle });
        self.drain_engine();
    }

    fn cancel(&mut self, session: SessionId, client: &str, id: OrderId, symbol: Option<&str>) {
        self.risk.process(RiskRequest::Cancel {
            session,
            client_id: ClientId::new(client).unwrap(),
            order_id: id,
            symbol: symbol
                .map(|s| Symbol::new(s).unwrap())
                .unwrap_or_else(Symbol::empty),
        });
        self.drain_engine();
    }

    fn drain_engine(&mut self) {
        while self.engine.poll() {}
    }

    fn events(&self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.session_events.pop()).collect()
    }

    fn trades(&self) -> Vec<(Trade, Side)> {
        std::iter::from_fn(|| self.market_data.pop())
            .filter_map(|e| match e {
                MarketDataEvent::Trade { trade, aggressor } => Some((trade, aggressor)),
                _ => None,
            })
            .collect()
    }
}

fn acks(events: &[SessionEvent]) -> Vec<(SessionId, OrderId, Option<RejectReason>)> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::OrderAck {
                session,
                order_id,
                reason,
            } => Some((*session, *order_id, *reason)),
            _ => None,
        })
        .collect()
}

#[test]
fn simple_cross_full_fill() {
    let mut p = pipeline(default_risk());
    p.submit(1, "C1", 1, Side::Sell, OrderType::Limit, 500, 1_500_000);
    p.submit(2, "C2", 2, Side::Buy, OrderType::Limit, 500, 1_500_000);

    let trades = p.trades();
    assert_eq!(trades.len(), 1);
    let (trade, aggressor) = trades[0];
    assert_eq!(trade.quantity, 500);
    assert_eq!(trade.price, 1_500_000);
    assert_eq!(trade.buy_order_id, 2);
    assert_eq!(trade.sell_order_id, 1);
    assert_eq!(aggressor, Side::Buy);

    let events = p.events();
    let accepted: Vec<_> = acks(&events)
        .into_iter()
        .filter(|(_, _, r)| r.is_none())
        .collect();
    assert_eq!(accepted.len(), 2, "two accepted acks");

    let reports = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::TradeReport { .. }))
        .count();
    assert_eq!(reports, 2, "both sides receive a trade report");

    // Book flat, all slots home.
    let bbo = p.engine.book().bbo();
    assert_eq!((bbo.bid_price, bbo.ask_price), (0, 0));
    assert_eq!(p.pool.in_use(), 0);
    assert_eq!(p.stats.trades_executed.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[test]
fn partial_fill_resting_remainder() {
    let mut p = pipeline(default_risk());
    p.submit(1, "C1", 1, Side::Sell, OrderType::Limit, 1000, 1_500_000);
    p.submit(2, "C2", 2, Side::Buy, OrderType::Limit, 300, 1_500_000);

    let trades = p.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].0.quantity, 300);

    assert_eq!(p.engine.book().best_ask(), Some(1_500_000));
    assert_eq!(p.engine.book().ask_qty(), 700);
    assert_eq!(p.pool.in_use(), 1, "only order 1's remainder is alive");
}

#[test]
fn price_time_priority() {
    let mut p = pipeline(default_risk());
    p.submit(1, "C1", 1, Side::Buy, OrderType::Limit, 100, 1_500_000);
    p.submit(1, "C1", 2, Side::Buy, OrderType::Limit, 200, 1_500_000);
    p.submit(1, "C1", 3, Side::Buy, OrderType::Limit, 300, 1_500_000);
    p.submit(2, "C2", 4, Side::Sell, OrderType::Limit, 150, 1_500_000);

    let trades = p.trades();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].0.buy_order_id, 1);
    assert_eq!(trades[0].0.quantity, 100);
    assert_eq!(trades[1].0.buy_order_id, 2);
    assert_eq!(trades[1].0.quantity, 50);

    assert_eq!(p.engine.book().bid_qty(), 450);
}

#[test]
fn market_order_empty_book() {
    let mut p = pipeline(default_risk());
    let occupancy_before = p.pool.in_use();
    p.submit(1, "C1", 1, Side::Buy, OrderType::Market, 100, 0);

    let events = p.events();
    let acks = acks(&events);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0], (1, 1, Some(RejectReason::NoLiquidity)));

    assert!(p.trades().is_empty(), "no trades");
    assert_eq!(p.pool.in_use(), occupancy_before, "order returned to pool");
}

#[test]
fn risk_rejects_oversize_order() {
    let mut p = pipeline(RiskConfig {
        max_order_size: 10_000,
        ..default_risk()
    });
    p.submit(1, "C1", 1, Side::Buy, OrderType::Limit, 20_000, 1_500_000);

    let events = p.events();
    let acks = acks(&events);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].2, Some(RejectReason::Size));

    assert!(p.engine.book().is_empty(), "engine never invoked");
    assert_eq!(p.pool.in_use(), 0, "pool occupancy unchanged net");
}

#[test]
fn rate_limit_in_arrival_order() {
    let mut p = pipeline(RiskConfig {
        max_orders_per_second: 100,
        ..default_risk()
    });
    // 150 orders land inside one wall-clock second (this loop takes far
    // less); prices keep them from crossing each other.
    for i in 1..=150u64 {
        p.submit(1, "C1", i, Side::Buy, OrderType::Limit, 1, 1_000_000);
    }

    let events = p.events();
    let all = acks(&events);
    assert_eq!(all.len(), 150, "every order gets exactly one ack");
    for (idx, (_, order_id, reason)) in all.iter().enumerate() {
        assert_eq!(*order_id, idx as u64 + 1, "acks in arrival order");
        if idx < 100 {
            assert_eq!(*reason, None, "order {} accepted", idx + 1);
        } else {
            assert_eq!(*reason, Some(RejectReason::Rate), "order {} rate-limited", idx + 1);
        }
    }
}

#[test]
fn cancel_roundtrip_and_not_owned() {
    let mut p = pipeline(default_risk());
    p.submit(1, "C1", 1, Side::Buy, OrderType::Limit, 100, 1_400_000);
    assert!(p.engine.book().contains(1));
    p.events();

    // Cancel without a symbol exercises the scatter path (fanout 1 here).
    p.cancel(1, "C1", 1, None);
    let events = p.events();
    // The engine's CancelResult is folded by the gateway in production; at
    // this level we observe the raw result.
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::CancelResult {
            found: true,
            fanout: 1,
            ..
        }
    )));
    assert!(!p.engine.book().contains(1));
    assert_eq!(p.pool.in_use(), 0);

    // Cancelling again: the id left the active set, so risk rejects it.
    p.cancel(1, "C1", 1, None);
    let events = p.events();
    assert!(acks(&events)
        .iter()
        .any(|(_, _, r)| *r == Some(RejectReason::NotOwned)));

    // A different client can never cancel someone else's order.
    p.submit(1, "C1", 2, Side::Buy, OrderType::Limit, 100, 1_400_000);
    p.events();
    p.cancel(2, "C2", 2, Some("AAPL"));
    let events = p.events();
    assert!(acks(&events)
        .iter()
        .any(|(s, _, r)| *s == 2 && *r == Some(RejectReason::NotOwned)));
    assert!(p.engine.book().contains(2), "order 2 still resting");
}

#[test]
fn conservation_of_quantity() {
    // Mixed flow; for every order, filled + remaining must equal original,
    // summed over the trade tape.
    let mut p = pipeline(default_risk());
    let orders: &[(OrderId, Side, u64, u64)] = &[
        (1, Side::Sell, 400, 1_500_000),
        (2, Side::Sell, 250, 1_499_000),
        (3, Side::Buy, 300, 1_500_000),
        (4, Side::Buy, 500, 1_501_000),
        (5, Side::Sell, 100, 1_490_000),
    ];
    for &(id, side, qty, price) in orders {
        p.submit(1, "C1", id, side, OrderType::Limit, qty, price);
    }

    let trades = p.trades();
    let mut filled: std::collections::HashMap<OrderId, u64> = std::collections::HashMap::new();
    for (trade, _) in &trades {
        *filled.entry(trade.buy_order_id).or_default() += trade.quantity;
        *filled.entry(trade.sell_order_id).or_default() += trade.quantity;
    }

    // An order absent from the book must be fully filled; resting orders
    // are covered by the aggregate check below.
    let book = p.engine.book();
    for &(id, _side, qty, _price) in orders {
        let fill = filled.get(&id).copied().unwrap_or(0);
        assert!(fill <= qty, "order {id} overfilled");
        if !book.contains(id) {
            assert_eq!(fill, qty, "order {id} left the book short");
        }
    }

    // Aggregate conservation: total submitted = total filled x2 sides
    // + total resting.
    let submitted: u64 = orders.iter().map(|o| o.2).sum();
    let traded: u64 = trades.iter().map(|(t, _)| t.quantity).sum();
    let resting: u64 = book.depth(100).0.iter().map(|l| l.quantity).sum::<u64>()
        + book.depth(100).1.iter().map(|l| l.quantity).sum::<u64>();
    assert_eq!(submitted, 2 * traded + resting);

    // Trade ids are monotone from 1.
    for (idx, (trade, _)) in trades.iter().enumerate() {
        assert_eq!(trade.id, idx as u64 + 1);
    }
}

#[test]
fn no_crossed_book_between_steps() {
    let mut p = pipeline(default_risk());
    let flow: &[(OrderId, Side, u64, u64)] = &[
        (1, Side::Buy, 100, 1_500_000),
        (2, Side::Sell, 50, 1_499_000),
        (3, Side::Sell, 200, 1_500_000),
        (4, Side::Buy, 300, 1_502_000),
        (5, Side::Sell, 100, 1_498_000),
    ];
    for &(id, side, qty, price) in flow {
        p.submit(1, "C1", id, side, OrderType::Limit, qty, price);
        assert!(
            p.engine.book().is_uncrossed(),
            "book crossed after order {id}"
        );
    }
}
