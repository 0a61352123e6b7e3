//! Core types used throughout the system
//!
//! Fundamental type aliases and the two bounded inline strings that ride on
//! the wire. They provide semantic meaning and keep the hot path free of heap
//! allocation.

use std::fmt;

/// Order ID - client-supplied, unique per client
pub type OrderId = u64;

/// Trade ID - monotone per matching engine, starting at 1
pub type TradeId = u64;

/// Price - fixed point, scaled by [`PRICE_SCALE`] ("$150.00" = 1_500_000)
pub type Price = u64;

/// Quantity - whole shares
pub type Qty = u64;

/// Sequence number for wire-level ordering
pub type SeqNum = u64;

/// Session ID - opaque key for one TCP connection
pub type SessionId = u64;

/// Fixed-point price scale (4 decimal places)
pub const PRICE_SCALE: u64 = 10_000;

/// Maximum order quantity accepted at the protocol boundary
pub const MAX_QUANTITY: Qty = 1_000_000;

/// Bounded inline ASCII string.
///
/// # Key Design:
/// - Fixed `N`-byte backing array, NUL-padded - no heap, `Copy`, hashable
/// - Used as-is inside wire frames (the padding bytes are part of the layout)
/// - Construction is fallible: over-long input is refused, never truncated
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundedStr<const N: usize> {
    bytes: [u8; N],
    len: u8,
}

impl<const N: usize> BoundedStr<N> {
    /// Create an empty string
    pub const fn empty() -> Self {
        Self {
            bytes: [0u8; N],
            len: 0,
        }
    }

    /// Build from a str; fails if longer than `N` bytes
    pub fn new(s: &str) -> Option<Self> {
        if s.len() > N {
            return None;
        }
        let mut bytes = [0u8; N];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Some(Self {
            bytes,
            len: s.len() as u8,
        })
    }

    /// Build from a NUL-padded fixed array (wire decode path).
    ///
    /// Bytes after the first NUL are ignored. Fails on interior non-ASCII.
    pub fn from_padded(raw: &[u8; N]) -> Option<Self> {
        let len = raw.iter().position(|&b| b == 0).unwrap_or(N);
        if !raw[..len].is_ascii() {
            return None;
        }
        let mut bytes = [0u8; N];
        bytes[..len].copy_from_slice(&raw[..len]);
        Some(Self {
            bytes,
            len: len as u8,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII in the live range.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// The full NUL-padded backing array (wire encode path)
    #[inline]
    pub fn padded(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> Default for BoundedStr<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> fmt::Display for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Trading symbol, at most 8 ASCII bytes
pub type Symbol = BoundedStr<8>;

/// Client principal identifier, at most 32 ASCII bytes
pub type ClientId = BoundedStr<32>;

/// Current wall clock in nanoseconds since the Unix epoch
#[inline]
pub fn timestamp_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
