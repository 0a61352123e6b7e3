//! Market data publisher - UDP multicast fan-out
//!
//! A single worker drains the shared market-data ring and serializes each
//! event into a fixed-layout datagram sent to the configured multicast
//! group (TTL 1, best effort, no retransmission). Outbound order equals the
//! FIFO order this thread observes on the ring.
//!
//! Datagram header (24 bytes, little-endian):
//!
//! ```text
//! offset  field         width
//! 0       type          u32   (201 BBO, 202 trade, 203 depth - reserved)
//! 4       length        u32
//! 8       sequence      u64   (publisher-local, monotone from 1)
//! 16     timestamp_ns  u64   (taken at serialization)
//! ```

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::core_types::timestamp_ns;
use crate::errors::ExchangeError;
use crate::messages::{BboUpdate, MarketDataEvent};
use crate::metrics::ExchangeStats;
use crate::models::{Side, Trade};
use crate::mpmc::MpmcQueue;
use crate::shutdown::ShutdownSignal;

pub const UDP_HEADER_LEN: usize = 24;
pub const BBO_DATAGRAM_LEN: usize = UDP_HEADER_LEN + 40;
pub const TRADE_DATAGRAM_LEN: usize = UDP_HEADER_LEN + 33;

/// Datagram type tags
pub const BBO_UPDATE: u32 = 201;
pub const TRADE_UPDATE: u32 = 202;
/// Reserved for top-N depth; emission is optional and currently off
pub const DEPTH_UPDATE: u32 = 203;

/// UDP multicast publisher worker
pub struct UdpPublisher {
    socket: UdpSocket,
    dest: SocketAddr,
    input: Arc<MpmcQueue<MarketDataEvent>>,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<ExchangeStats>,
    sequence: u64,
}

impl UdpPublisher {
    pub fn new(
        group: &str,
        port: u16,
        input: Arc<MpmcQueue<MarketDataEvent>>,
        shutdown: Arc<ShutdownSignal>,
        stats: Arc<ExchangeStats>,
    ) -> Result<Self, ExchangeError> {
        let dest: SocketAddr = format!("{group}:{port}")
            .parse()
            .map_err(|_| ExchangeError::Config(format!("bad udp destination {group}:{port}")))?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        // Local network only by default.
        socket.set_multicast_ttl_v4(1)?;
        Ok(Self {
            socket,
            dest,
            input,
            shutdown,
            stats,
            sequence: 0,
        })
    }

    /// Move the publisher onto its dedicated thread
    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("md-publisher".into())
            .spawn(move || {
                info!(dest = %self.dest, "market data publisher started");
                let mut spin_count = 0u32;
                loop {
                    match self.input.pop() {
                        Some(event) => {
                            self.publish(&event);
                            spin_count = 0;
                        }
                        None => {
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
                }
                info!("market data publisher stopped");
            })
            .expect("failed to spawn publisher thread")
    }

    fn publish(&mut self, event: &MarketDataEvent) {
        self.sequence += 1;
        let sent = match event {
            MarketDataEvent::Bbo(bbo) => {
                let datagram = encode_bbo_update(self.sequence, bbo);
                self.socket.send_to(&datagram, self.dest)
            }
            MarketDataEvent::Trade { trade, aggressor } => {
                let datagram = encode_trade_update(self.sequence, trade, *aggressor);
                self.socket.send_to(&datagram, self.dest)
            }
        };
        match sent {
            Ok(_) => {
                self.stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                // Best effort: log and move on.
                warn!(%error, "failed to send market data datagram");
            }
        }
    }
}

fn write_udp_header(buf: &mut [u8], msg_type: u32, length: u32, sequence: u64) {
    buf[0..4].copy_from_slice(&msg_type.to_le_bytes());
    buf[4..8].copy_from_slice(&length.to_le_bytes());
    buf[8..16].copy_from_slice(&sequence.to_le_bytes());
    buf[16..24].copy_from_slice(&timestamp_ns().to_le_bytes());
}

/// BBO update (201): symbol, bid price/qty, ask price/qty
pub fn encode_bbo_update(sequence: u64, bbo: &BboUpdate) -> [u8; BBO_DATAGRAM_LEN] {
    let mut buf = [0u8; BBO_DATAGRAM_LEN];
    write_udp_header(&mut buf, BBO_UPDATE, BBO_DATAGRAM_LEN as u32, sequence);
    buf[24..32].copy_from_slice(bbo.symbol.padded());
    buf[32..40].copy_from_slice(&bbo.bid_price.to_le_bytes());
    buf[40..48].copy_from_slice(&bbo.bid_qty.to_le_bytes());
    buf[48..56].copy_from_slice(&bbo.ask_price.to_le_bytes());
    buf[56..64].copy_from_slice(&bbo.ask_qty.to_le_bytes());
    buf
}

/// Trade update (202): trade id, symbol, quantity, price, aggressor side
pub fn encode_trade_update(
    sequence: u64,
    trade: &Trade,
    aggressor: Side,
) -> [u8; TRADE_DATAGRAM_LEN] {
    let mut buf = [0u8; TRADE_DATAGRAM_LEN];
    write_udp_header(&mut buf, TRADE_UPDATE, TRADE_DATAGRAM_LEN as u32, sequence);
    buf[24..32].copy_from_slice(&trade.id.to_le_bytes());
    buf[32..40].copy_from_slice(trade.symbol.padded());
    buf[40..48].copy_from_slice(&trade.quantity.to_le_bytes());
    buf[48..56].copy_from_slice(&trade.price.to_le_bytes());
    buf[56] = aggressor as u8;
    buf
}
