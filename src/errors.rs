//! Error and rejection types
//!
//! `RejectReason` codes travel on the wire inside OrderAck frames and are a
//! stable contract; renaming one is a protocol break. `ProtocolError` never
//! reaches a client - malformed frames are discarded at the gateway.

use thiserror::Error;

/// Why an order or cancel was rejected. `as_str` is the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Symbol not configured
    Symbol,
    /// Quantity outside (0, max_order_size]
    Size,
    /// Price outside the collar band
    Price,
    /// Client exceeded max_orders_per_second
    Rate,
    /// Order id already active for this client
    Duplicate,
    /// Notional cap would be exceeded
    Credit,
    /// Cancel for an order the client does not own
    NotOwned,
    /// Cancel for an order no book holds
    NotFound,
    /// Market order against an empty opposite side
    NoLiquidity,
    /// Embedded client id differs from the session principal
    Unauthorized,
    /// Risk input queue full at the gateway
    Backpressure,
    /// Order arena exhausted at the gateway
    PoolExhausted,
    /// Matching engine input queue full at the risk stage
    DownstreamBackpressure,
}

impl RejectReason {
    pub const COUNT: usize = 13;

    /// Stable wire reason code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Symbol => "symbol",
            Self::Size => "size",
            Self::Price => "price",
            Self::Rate => "rate",
            Self::Duplicate => "duplicate",
            Self::Credit => "credit",
            Self::NotOwned => "not-owned",
            Self::NotFound => "not found",
            Self::NoLiquidity => "no liquidity",
            Self::Unauthorized => "unauthorized",
            Self::Backpressure => "backpressure",
            Self::PoolExhausted => "pool exhausted",
            Self::DownstreamBackpressure => "downstream backpressure",
        }
    }

    /// Dense index for per-reason counters
    pub fn index(&self) -> usize {
        match self {
            Self::Symbol => 0,
            Self::Size => 1,
            Self::Price => 2,
            Self::Rate => 3,
            Self::Duplicate => 4,
            Self::Credit => 5,
            Self::NotOwned => 6,
            Self::NotFound => 7,
            Self::NoLiquidity => 8,
            Self::Unauthorized => 9,
            Self::Backpressure => 10,
            Self::PoolExhausted => 11,
            Self::DownstreamBackpressure => 12,
        }
    }

    /// All variants, in `index()` order
    pub fn all() -> [RejectReason; Self::COUNT] {
        [
            Self::Symbol,
            Self::Size,
            Self::Price,
            Self::Rate,
            Self::Duplicate,
            Self::Credit,
            Self::NotOwned,
            Self::NotFound,
            Self::NoLiquidity,
            Self::Unauthorized,
            Self::Backpressure,
            Self::PoolExhausted,
            Self::DownstreamBackpressure,
        ]
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged reason a wire frame was refused by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame shorter than header")]
    HeaderTooShort,
    #[error("declared length out of bounds")]
    LengthOutOfBounds,
    #[error("unknown message type {0}")]
    UnknownType(u32),
    #[error("declared length does not match message type")]
    SizeMismatch,
    #[error("zero sequence on inbound order flow")]
    ZeroSequence,
    #[error("payload checksum mismatch")]
    BadChecksum,
    #[error("illegal field: {0}")]
    IllegalField(&'static str),
}

/// Errors surfaced while building or running the exchange
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        // These strings are part of the wire contract.
        assert_eq!(RejectReason::Size.as_str(), "size");
        assert_eq!(RejectReason::Rate.as_str(), "rate");
        assert_eq!(RejectReason::NotOwned.as_str(), "not-owned");
        assert_eq!(RejectReason::NotFound.as_str(), "not found");
        assert_eq!(RejectReason::NoLiquidity.as_str(), "no liquidity");
        assert_eq!(RejectReason::PoolExhausted.as_str(), "pool exhausted");
        assert_eq!(
            RejectReason::DownstreamBackpressure.as_str(),
            "downstream backpressure"
        );
    }

    #[test]
    fn test_reason_indices_are_dense_and_unique() {
        let mut seen = [false; RejectReason::COUNT];
        for reason in RejectReason::all() {
            let idx = reason.index();
            assert!(idx < RejectReason::COUNT);
            assert!(!seen[idx], "duplicate index {idx}");
            seen[idx] = true;
        }
    }
}
