//! Binary wire protocol
//!
//! Little-endian packed frames with a fixed 28-byte header:
//!
//! ```text
//! offset  field        width
//! 0       type         u32
//! 4       length       u32   (total frame length, header included)
//! 8       sequence     u64
//! 16      timestamp    u64   (origination, nanoseconds)
//! 24      checksum     u32   (CRC32 over payload bytes only)
//! ```
//!
//! Payload layouts are fixed-size per type, so the declared length must
//! match the exact known size for the declared type. The codec is pure and
//! stateless: bytes in, either a validated [`Message`] or a tagged
//! [`ProtocolError`] out. The checksum deliberately excludes the header,
//! matching the deployed wire format.

use crate::core_types::{
    BoundedStr, ClientId, MAX_QUANTITY, Price, Qty, SeqNum, Symbol, TradeId,
};
use crate::errors::ProtocolError;
use crate::models::{OrderType, Side, Trade};

pub const HEADER_LEN: usize = 28;
pub const MAX_FRAME_LEN: usize = 8192;

pub const NEW_ORDER_FRAME_LEN: usize = HEADER_LEN + 66;
pub const CANCEL_ORDER_FRAME_LEN: usize = HEADER_LEN + 48;
pub const ORDER_ACK_FRAME_LEN: usize = HEADER_LEN + 41;
pub const TRADE_REPORT_FRAME_LEN: usize = HEADER_LEN + 56;
pub const HEARTBEAT_FRAME_LEN: usize = HEADER_LEN + 8;

/// Wire message type discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    NewOrder = 1,
    CancelOrder = 2,
    OrderAck = 101,
    TradeReport = 102,
    Heartbeat = 200,
}

impl MsgType {
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::NewOrder),
            2 => Some(Self::CancelOrder),
            101 => Some(Self::OrderAck),
            102 => Some(Self::TradeReport),
            200 => Some(Self::Heartbeat),
            _ => None,
        }
    }

    /// Exact frame length for this type
    pub fn frame_len(&self) -> usize {
        match self {
            Self::NewOrder => NEW_ORDER_FRAME_LEN,
            Self::CancelOrder => CANCEL_ORDER_FRAME_LEN,
            Self::OrderAck => ORDER_ACK_FRAME_LEN,
            Self::TradeReport => TRADE_REPORT_FRAME_LEN,
            Self::Heartbeat => HEARTBEAT_FRAME_LEN,
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: MsgType,
    pub length: u32,
    pub sequence: SeqNum,
    pub timestamp_ns: u64,
    pub checksum: u32,
}

/// CRC32 (IEEE 802.3, reversed polynomial 0xEDB88320) over `data`
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

// ------------------------------------------------------------
// DECODED MESSAGES
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOrderMsg {
    pub sequence: SeqNum,
    pub timestamp_ns: u64,
    pub order_id: u64,
    pub client_id: ClientId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Qty,
    pub price: Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOrderMsg {
    pub sequence: SeqNum,
    pub timestamp_ns: u64,
    pub order_id: u64,
    pub client_id: ClientId,
    /// May be empty: the protocol permits cancels without a symbol
    pub symbol: Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderAckMsg {
    pub sequence: SeqNum,
    pub timestamp_ns: u64,
    pub order_id: u64,
    pub accepted: bool,
    pub reason: BoundedStr<32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeReportMsg {
    pub sequence: SeqNum,
    pub timestamp_ns: u64,
    pub trade_id: TradeId,
    pub buy_order_id: u64,
    pub sell_order_id: u64,
    pub symbol: Symbol,
    pub quantity: Qty,
    pub price: Price,
    pub executed_at_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMsg {
    pub sequence: SeqNum,
    pub timestamp_ns: u64,
    pub client_time_ns: u64,
}

/// Any validated frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    NewOrder(NewOrderMsg),
    CancelOrder(CancelOrderMsg),
    OrderAck(OrderAckMsg),
    TradeReport(TradeReportMsg),
    Heartbeat(HeartbeatMsg),
}

// ------------------------------------------------------------
// FRAMING HELPERS
// ------------------------------------------------------------

/// Peek the next frame boundary in a byte stream.
///
/// `Ok(None)` means more bytes are needed; `Err` means the stream carries a
/// header that can never frame a valid message.
pub fn peek_frame_len(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < 8 {
        return Ok(None);
    }
    let length = read_u32(buf, 4) as usize;
    if length < HEADER_LEN || length > MAX_FRAME_LEN {
        return Err(ProtocolError::LengthOutOfBounds);
    }
    if buf.len() < length {
        return Ok(None);
    }
    Ok(Some(length))
}

fn decode_header(frame: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::HeaderTooShort);
    }
    let raw_type = read_u32(frame, 0);
    let length = read_u32(frame, 4);
    if (length as usize) < HEADER_LEN || (length as usize) > MAX_FRAME_LEN {
        return Err(ProtocolError::LengthOutOfBounds);
    }
    let msg_type = MsgType::from_wire(raw_type).ok_or(ProtocolError::UnknownType(raw_type))?;
    Ok(FrameHeader {
        msg_type,
        length,
        sequence: read_u64(frame, 8),
        timestamp_ns: read_u64(frame, 16),
        checksum: read_u32(frame, 24),
    })
}

/// Decode and validate one complete frame.
///
/// Check order: header bounds, known type, exact per-type size, non-zero
/// sequence on inbound order flow, payload CRC, then field validation.
pub fn decode_frame(frame: &[u8]) -> Result<Message, ProtocolError> {
    let header = decode_header(frame)?;
    if header.length as usize != frame.len() || frame.len() != header.msg_type.frame_len() {
        return Err(ProtocolError::SizeMismatch);
    }
    if matches!(header.msg_type, MsgType::NewOrder | MsgType::CancelOrder) && header.sequence == 0 {
        return Err(ProtocolError::ZeroSequence);
    }
    let payload = &frame[HEADER_LEN..];
    if crc32(payload) != header.checksum {
        return Err(ProtocolError::BadChecksum);
    }

    match header.msg_type {
        MsgType::NewOrder => decode_new_order(&header, payload),
        MsgType::CancelOrder => decode_cancel_order(&header, payload),
        MsgType::OrderAck => decode_order_ack(&header, payload),
        MsgType::TradeReport => decode_trade_report(&header, payload),
        MsgType::Heartbeat => Ok(Message::Heartbeat(HeartbeatMsg {
            sequence: header.sequence,
            timestamp_ns: header.timestamp_ns,
            client_time_ns: read_u64(payload, 0),
        })),
    }
}

fn decode_new_order(header: &FrameHeader, payload: &[u8]) -> Result<Message, ProtocolError> {
    let order_id = read_u64(payload, 0);
    let client_id = sanitize_client_id(&payload[8..40])?;
    let symbol = sanitize_symbol(&payload[40..48])?;
    let side = Side::from_wire(payload[48]).ok_or(ProtocolError::IllegalField("side"))?;
    let quantity = read_u64(payload, 49);
    let mut price = read_u64(payload, 57);
    let order_type =
        OrderType::from_wire(payload[65]).ok_or(ProtocolError::IllegalField("order_type"))?;

    if quantity == 0 || quantity > MAX_QUANTITY {
        return Err(ProtocolError::IllegalField("quantity"));
    }
    match order_type {
        OrderType::Limit => {
            if price == 0 {
                return Err(ProtocolError::IllegalField("price"));
            }
        }
        // Market orders have no price; any client-supplied value is noise.
        OrderType::Market => price = 0,
    }

    Ok(Message::NewOrder(NewOrderMsg {
        sequence: header.sequence,
        timestamp_ns: header.timestamp_ns,
        order_id,
        client_id,
        symbol,
        side,
        order_type,
        quantity,
        price,
    }))
}

fn decode_cancel_order(header: &FrameHeader, payload: &[u8]) -> Result<Message, ProtocolError> {
    let order_id = read_u64(payload, 0);
    let client_id = sanitize_client_id(&payload[8..40])?;
    let symbol_raw = &payload[40..48];
    let symbol = if symbol_raw.iter().all(|&b| b == 0) {
        Symbol::empty()
    } else {
        sanitize_symbol(symbol_raw)?
    };
    Ok(Message::CancelOrder(CancelOrderMsg {
        sequence: header.sequence,
        timestamp_ns: header.timestamp_ns,
        order_id,
        client_id,
        symbol,
    }))
}

fn decode_order_ack(header: &FrameHeader, payload: &[u8]) -> Result<Message, ProtocolError> {
    let order_id = read_u64(payload, 0);
    let accepted = match payload[8] {
        1 => true,
        2 => false,
        _ => return Err(ProtocolError::IllegalField("ack_status")),
    };
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&payload[9..41]);
    let reason =
        BoundedStr::<32>::from_padded(&raw).ok_or(ProtocolError::IllegalField("reason"))?;
    Ok(Message::OrderAck(OrderAckMsg {
        sequence: header.sequence,
        timestamp_ns: header.timestamp_ns,
        order_id,
        accepted,
        reason,
    }))
}

fn decode_trade_report(header: &FrameHeader, payload: &[u8]) -> Result<Message, ProtocolError> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&payload[24..32]);
    let symbol = Symbol::from_padded(&raw).ok_or(ProtocolError::IllegalField("symbol"))?;
    Ok(Message::TradeReport(TradeReportMsg {
        sequence: header.sequence,
        timestamp_ns: header.timestamp_ns,
        trade_id: read_u64(payload, 0),
        buy_order_id: read_u64(payload, 8),
        sell_order_id: read_u64(payload, 16),
        symbol,
        quantity: read_u64(payload, 32),
        price: read_u64(payload, 40),
        executed_at_ns: read_u64(payload, 48),
    }))
}

// ------------------------------------------------------------
// STRING SANITIZATION
// ------------------------------------------------------------

/// Normalize a raw symbol field: terminate at the first NUL, strip control
/// bytes, uppercase, then require `[A-Z0-9.-]` and a non-empty result.
pub fn sanitize_symbol(raw: &[u8]) -> Result<Symbol, ProtocolError> {
    let mut bytes = [0u8; 8];
    let mut len = 0usize;
    for &b in raw {
        if b == 0 {
            break;
        }
        if b < 0x20 || b == 0x7F {
            continue;
        }
        let b = b.to_ascii_uppercase();
        if !(b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'.' || b == b'-') {
            return Err(ProtocolError::IllegalField("symbol"));
        }
        if len >= 8 {
            return Err(ProtocolError::IllegalField("symbol"));
        }
        bytes[len] = b;
        len += 1;
    }
    if len == 0 {
        return Err(ProtocolError::IllegalField("symbol"));
    }
    Symbol::from_padded(&bytes).ok_or(ProtocolError::IllegalField("symbol"))
}

/// Normalize a raw client id field: terminate at the first NUL, strip
/// control bytes, then require `[A-Za-z0-9_-]` and a non-empty result.
pub fn sanitize_client_id(raw: &[u8]) -> Result<ClientId, ProtocolError> {
    let mut bytes = [0u8; 32];
    let mut len = 0usize;
    for &b in raw {
        if b == 0 {
            break;
        }
        if b < 0x20 || b == 0x7F {
            continue;
        }
        if !(b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
            return Err(ProtocolError::IllegalField("client_id"));
        }
        if len >= 32 {
            return Err(ProtocolError::IllegalField("client_id"));
        }
        bytes[len] = b;
        len += 1;
    }
    if len == 0 {
        return Err(ProtocolError::IllegalField("client_id"));
    }
    ClientId::from_padded(&bytes).ok_or(ProtocolError::IllegalField("client_id"))
}

// ------------------------------------------------------------
// ENCODERS
// ------------------------------------------------------------

fn write_header(
    frame: &mut [u8],
    msg_type: MsgType,
    sequence: SeqNum,
    timestamp_ns: u64,
) {
    write_u32(frame, 0, msg_type as u32);
    write_u32(frame, 4, msg_type.frame_len() as u32);
    write_u64(frame, 8, sequence);
    write_u64(frame, 16, timestamp_ns);
    let checksum = crc32(&frame[HEADER_LEN..]);
    write_u32(frame, 24, checksum);
}

pub fn encode_new_order(msg: &NewOrderMsg) -> [u8; NEW_ORDER_FRAME_LEN] {
    let mut frame = [0u8; NEW_ORDER_FRAME_LEN];
    {
        let payload = &mut frame[HEADER_LEN..];
        write_u64(payload, 0, msg.order_id);
        payload[8..40].copy_from_slice(msg.client_id.padded());
        payload[40..48].copy_from_slice(msg.symbol.padded());
        payload[48] = msg.side as u8;
        write_u64(payload, 49, msg.quantity);
        write_u64(payload, 57, msg.price);
        payload[65] = msg.order_type as u8;
    }
    write_header(&mut frame, MsgType::NewOrder, msg.sequence, msg.timestamp_ns);
    frame
}

pub fn encode_cancel_order(msg: &CancelOrderMsg) -> [u8; CANCEL_ORDER_FRAME_LEN] {
    let mut frame = [0u8; CANCEL_ORDER_FRAME_LEN];
    {
        let payload = &mut frame[HEADER_LEN..];
        write_u64(payload, 0, msg.order_id);
        payload[8..40].copy_from_slice(msg.client_id.padded());
        payload[40..48].copy_from_slice(msg.symbol.padded());
    }
    write_header(
        &mut frame,
        MsgType::CancelOrder,
        msg.sequence,
        msg.timestamp_ns,
    );
    frame
}

pub fn encode_order_ack(msg: &OrderAckMsg) -> [u8; ORDER_ACK_FRAME_LEN] {
    let mut frame = [0u8; ORDER_ACK_FRAME_LEN];
    {
        let payload = &mut frame[HEADER_LEN..];
        write_u64(payload, 0, msg.order_id);
        payload[8] = if msg.accepted { 1 } else { 2 };
        payload[9..41].copy_from_slice(msg.reason.padded());
    }
    write_header(&mut frame, MsgType::OrderAck, msg.sequence, msg.timestamp_ns);
    frame
}

pub fn encode_trade_report(msg: &TradeReportMsg) -> [u8; TRADE_REPORT_FRAME_LEN] {
    let mut frame = [0u8; TRADE_REPORT_FRAME_LEN];
    {
        let payload = &mut frame[HEADER_LEN..];
        write_u64(payload, 0, msg.trade_id);
        write_u64(payload, 8, msg.buy_order_id);
        write_u64(payload, 16, msg.sell_order_id);
        payload[24..32].copy_from_slice(msg.symbol.padded());
        write_u64(payload, 32, msg.quantity);
        write_u64(payload, 40, msg.price);
        write_u64(payload, 48, msg.executed_at_ns);
    }
    write_header(
        &mut frame,
        MsgType::TradeReport,
        msg.sequence,
        msg.timestamp_ns,
    );
    frame
}

pub fn encode_heartbeat(msg: &HeartbeatMsg) -> [u8; HEARTBEAT_FRAME_LEN] {
    let mut frame = [0u8; HEARTBEAT_FRAME_LEN];
    write_u64(&mut frame[HEADER_LEN..], 0, msg.client_time_ns);
    write_header(&mut frame, MsgType::Heartbeat, msg.sequence, msg.timestamp_ns);
    frame
}

/// Trade-report frame for one side of an execution
pub fn trade_report_from(trade: &Trade, sequence: SeqNum, timestamp_ns: u64) -> TradeReportMsg {
    TradeReportMsg {
        sequence,
        timestamp_ns,
        trade_id: trade.id,
        buy_order_id: trade.buy_order_id,
        sell_order_id: trade.sell_order_id,
        symbol: trade.symbol,
        quantity: trade.quantity,
        price: trade.price,
        executed_at_ns: trade.timestamp_ns,
    }
}

// ------------------------------------------------------------
// LITTLE-ENDIAN PRIMITIVES
// ------------------------------------------------------------

#[inline]
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap_or([0; 4]))
}

#[inline]
fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap_or([0; 8]))
}

#[inline]
fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
