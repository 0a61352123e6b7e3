//! End-to-end exchange test over real sockets
//!
//! Boots a full [`Exchange`] (all worker threads), connects TCP clients,
//! submits framed orders, and checks acks, trade reports, and the UDP
//! market-data feed.

use std::io::{Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use tickmatch::config::{
    Config, ExchangeConfig, GatewayConfig, PerformanceConfig, RiskConfig, SymbolConfig,
};
use tickmatch::core_types::{ClientId, Symbol};
use tickmatch::exchange::Exchange;
use tickmatch::models::{OrderType, Side};
use tickmatch::protocol::{
    self, CancelOrderMsg, Message, NewOrderMsg, peek_frame_len,
};
use tickmatch::publisher::{BBO_UPDATE, TRADE_UPDATE};

const DEADLINE: Duration = Duration::from_secs(10);

fn test_config(udp_port: u16) -> Config {
    Config {
        exchange: ExchangeConfig {
            name: "e2e".into(),
            tcp_port: 0,
            udp_group: "127.0.0.1".into(),
            udp_port,
        },
        symbols: vec![
            SymbolConfig {
                name: "AAPL".into(),
                tick_size: 0.01,
                lot_size: 100,
                price_collar_pct: 10.0,
            },
            SymbolConfig {
                name: "MSFT".into(),
                tick_size: 0.01,
                lot_size: 100,
                price_collar_pct: 10.0,
            },
        ],
        risk: RiskConfig {
            max_order_size: 10_000,
            max_notional_per_client: 1_000_000_000,
            max_orders_per_second: 10_000,
            price_collar_enabled: false,
        },
        performance: PerformanceConfig {
            order_pool_size: 1024,
            queue_capacity: 1024,
        },
        gateway: GatewayConfig {
            heartbeat_interval_ms: 60_000,
            max_protocol_errors: 10,
        },
    }
}

/// Blocking test client speaking the binary protocol
struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
    sequence: u64,
    last_rx_sequence: u64,
    client_id: ClientId,
}

impl Client {
    fn connect(addr: std::net::SocketAddr, client_id: &str) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        stream.set_nodelay(true).unwrap();
        Self {
            stream,
            buf: Vec::new(),
            sequence: 0,
            last_rx_sequence: 0,
            client_id: ClientId::new(client_id).unwrap(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn send_order(
        &mut self,
        order_id: u64,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        qty: u64,
        price: u64,
    ) {
        self.send_order_as(order_id, symbol, side, order_type, qty, price, self.client_id);
    }

    #[allow(clippy::too_many_arguments)]
    fn send_order_as(
        &mut self,
        order_id: u64,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        qty: u64,
        price: u64,
        client_id: ClientId,
    ) {
        let msg = NewOrderMsg {
            sequence: self.next_seq(),
            timestamp_ns: 1,
            order_id,
            client_id,
            symbol: Symbol::new(symbol).unwrap(),
            side,
            order_type,
            quantity: qty,
            price,
        };
        self.stream
            .write_all(&protocol::encode_new_order(&msg))
            .expect("send order");
    }

    fn send_cancel(&mut self, order_id: u64, symbol: Option<&str>) {
        let msg = CancelOrderMsg {
            sequence: self.next_seq(),
            timestamp_ns: 1,
            order_id,
            client_id: self.client_id,
            symbol: symbol
                .map(|s| Symbol::new(s).unwrap())
                .unwrap_or_else(Symbol::empty),
        };
        self.stream
            .write_all(&protocol::encode_cancel_order(&msg))
            .expect("send cancel");
    }

    /// Receive the next frame, waiting up to `DEADLINE`
    fn recv(&mut self) -> Message {
        let deadline = Instant::now() + DEADLINE;
        loop {
            if let Ok(Some(len)) = peek_frame_len(&self.buf) {
                let message = protocol::decode_frame(&self.buf[..len]).expect("valid frame");
                self.buf.drain(..len);
                let sequence = match &message {
                    Message::OrderAck(m) => m.sequence,
                    Message::TradeReport(m) => m.sequence,
                    Message::Heartbeat(m) => m.sequence,
                    other => panic!("unexpected inbound type {other:?}"),
                };
                assert!(
                    sequence > self.last_rx_sequence,
                    "outbound session sequence must be monotone ({} after {})",
                    sequence,
                    self.last_rx_sequence
                );
                self.last_rx_sequence = sequence;
                return message;
            }
            assert!(Instant::now() < deadline, "timed out waiting for a frame");
            let mut chunk = [0u8; 1024];
            match self.stream.read(&mut chunk) {
                Ok(0) => panic!("server closed the connection"),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => panic!("read error: {e}"),
            }
        }
    }

    fn recv_ack(&mut self) -> (u64, bool, String) {
        match self.recv() {
            Message::OrderAck(ack) => (ack.order_id, ack.accepted, ack.reason.as_str().to_string()),
            other => panic!("expected ack, got {other:?}"),
        }
    }
}

#[test]
fn full_exchange_over_sockets() {
    // UDP listener doubles as the "multicast group" on loopback.
    let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
    udp.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
    let udp_port = udp.local_addr().unwrap().port();

    let mut exchange = Exchange::new(test_config(udp_port)).unwrap();
    exchange.start();

    let deadline = Instant::now() + DEADLINE;
    let addr = loop {
        if let Some(addr) = exchange.local_addr() {
            break std::net::SocketAddr::new("127.0.0.1".parse().unwrap(), addr.port());
        }
        assert!(Instant::now() < deadline, "gateway never bound");
        std::thread::sleep(Duration::from_millis(10));
    };

    let mut seller = Client::connect(addr, "C1");
    let mut buyer = Client::connect(addr, "C2");

    // Resting sell, then a crossing buy.
    seller.send_order(1, "AAPL", Side::Sell, OrderType::Limit, 500, 1_500_000);
    let (order_id, accepted, reason) = seller.recv_ack();
    assert_eq!(order_id, 1);
    assert!(accepted, "sell rejected: {reason}");

    buyer.send_order(2, "AAPL", Side::Buy, OrderType::Limit, 500, 1_500_000);

    // Buyer sees a trade report and an accepted ack (report first: the
    // engine emits executions before the taker's ack).
    let mut got_report = false;
    let mut got_ack = false;
    while !(got_report && got_ack) {
        match buyer.recv() {
            Message::TradeReport(report) => {
                assert_eq!(report.buy_order_id, 2);
                assert_eq!(report.sell_order_id, 1);
                assert_eq!(report.quantity, 500);
                assert_eq!(report.price, 1_500_000);
                assert_eq!(report.trade_id, 1);
                got_report = true;
            }
            Message::OrderAck(ack) => {
                assert_eq!(ack.order_id, 2);
                assert!(ack.accepted);
                got_ack = true;
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    // The passive side gets its copy of the report.
    match seller.recv() {
        Message::TradeReport(report) => {
            assert_eq!(report.sell_order_id, 1);
            assert_eq!(report.quantity, 500);
        }
        other => panic!("expected seller trade report, got {other:?}"),
    }

    // Market data: at least one BBO update and exactly this trade on the
    // wire, in ring order.
    let mut saw_bbo = false;
    let mut saw_trade = false;
    let md_deadline = Instant::now() + DEADLINE;
    let mut datagram = [0u8; 256];
    while !(saw_bbo && saw_trade) {
        assert!(Instant::now() < md_deadline, "market data never arrived");
        match udp.recv_from(&mut datagram) {
            Ok((n, _)) => {
                assert!(n >= 24);
                let msg_type = u32::from_le_bytes(datagram[0..4].try_into().unwrap());
                if msg_type == BBO_UPDATE {
                    saw_bbo = true;
                } else if msg_type == TRADE_UPDATE {
                    let trade_id = u64::from_le_bytes(datagram[24..32].try_into().unwrap());
                    let qty = u64::from_le_bytes(datagram[40..48].try_into().unwrap());
                    assert_eq!(trade_id, 1);
                    assert_eq!(qty, 500);
                    saw_trade = true;
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => panic!("udp error: {e}"),
        }
    }

    // Principal mismatch: C1's session cannot submit as C2.
    let other = ClientId::new("C2").unwrap();
    seller.send_order_as(3, "AAPL", Side::Sell, OrderType::Limit, 10, 1_500_000, other);
    let (order_id, accepted, reason) = seller.recv_ack();
    assert_eq!(order_id, 3);
    assert!(!accepted);
    assert_eq!(reason, "unauthorized");

    // Cancel round trip: rest an order on MSFT, cancel without a symbol
    // (scatter path), expect one accepted ack.
    seller.send_order(4, "MSFT", Side::Sell, OrderType::Limit, 100, 2_000_000);
    let (_, accepted, _) = seller.recv_ack();
    assert!(accepted);
    seller.send_cancel(4, None);
    let (order_id, accepted, _) = seller.recv_ack();
    assert_eq!(order_id, 4);
    assert!(accepted, "cancel must be acked accepted");

    // Cancelling an unknown id is rejected by the risk stage.
    seller.send_cancel(99, Some("AAPL"));
    let (order_id, accepted, reason) = seller.recv_ack();
    assert_eq!(order_id, 99);
    assert!(!accepted);
    assert_eq!(reason, "not-owned");

    // A malformed frame is discarded without dropping the session.
    let mut bad = protocol::encode_new_order(&NewOrderMsg {
        sequence: 999,
        timestamp_ns: 1,
        order_id: 50,
        client_id: ClientId::new("C1").unwrap(),
        symbol: Symbol::new("AAPL").unwrap(),
        side: Side::Sell,
        order_type: OrderType::Limit,
        quantity: 10,
        price: 1_000_000,
    });
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    seller.stream.write_all(&bad).unwrap();
    seller.send_order(51, "AAPL", Side::Sell, OrderType::Limit, 10, 9_000_000);
    let (order_id, accepted, _) = seller.recv_ack();
    assert_eq!(order_id, 51, "session survives a single bad frame");
    assert!(accepted);

    // Terminal state: order 51 still rests, everything else is back home.
    let stats = exchange.stats();
    drop(seller);
    drop(buyer);
    exchange.stop();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.trades_executed, 1);
    assert!(snapshot.frames_malformed >= 1);
    assert_eq!(exchange.pool().in_use(), 1, "only order 51 remains resting");
}

#[test]
fn pool_exhaustion_rejects_at_gateway() {
    let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let udp_port = udp.local_addr().unwrap().port();
    let mut config = test_config(udp_port);
    config.performance.order_pool_size = 2;

    let mut exchange = Exchange::new(config).unwrap();
    exchange.start();
    let deadline = Instant::now() + DEADLINE;
    let addr = loop {
        if let Some(addr) = exchange.local_addr() {
            break std::net::SocketAddr::new("127.0.0.1".parse().unwrap(), addr.port());
        }
        assert!(Instant::now() < deadline, "gateway never bound");
        std::thread::sleep(Duration::from_millis(10));
    };

    let mut client = Client::connect(addr, "C1");
    // Two resting orders exhaust the arena; the third is rejected at the
    // gateway boundary.
    client.send_order(1, "AAPL", Side::Buy, OrderType::Limit, 10, 1_000_000);
    let (_, accepted, _) = client.recv_ack();
    assert!(accepted);
    client.send_order(2, "AAPL", Side::Buy, OrderType::Limit, 10, 999_000);
    let (_, accepted, _) = client.recv_ack();
    assert!(accepted);

    client.send_order(3, "AAPL", Side::Buy, OrderType::Limit, 10, 998_000);
    let (order_id, accepted, reason) = client.recv_ack();
    assert_eq!(order_id, 3);
    assert!(!accepted);
    assert_eq!(reason, "pool exhausted");

    drop(client);
    exchange.stop();
}
