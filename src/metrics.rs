//! Exchange counters
//!
//! Lock-free health counters incremented by every stage and snapshotted for
//! export. The export format itself (HTTP, logs, dashboards) is an external
//! concern; the core only maintains the numbers.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::RejectReason;

/// Counters shared by all pipeline stages
#[derive(Debug, Default)]
pub struct ExchangeStats {
    /// NewOrder frames that passed the codec and entered the pipeline
    pub orders_submitted: AtomicU64,
    /// Orders approved by the risk stage
    pub orders_accepted: AtomicU64,
    /// Rejections by reason, indexed by [`RejectReason::index`]
    rejections: [AtomicU64; RejectReason::COUNT],
    /// Trades executed across all engines
    pub trades_executed: AtomicU64,
    /// Cancels that removed a resting order
    pub cancels_executed: AtomicU64,
    /// Frames discarded by the codec
    pub frames_malformed: AtomicU64,
    /// Market-data events dropped because the MPMC ring was full
    pub md_events_dropped: AtomicU64,
    /// Outbound acks/reports dropped for slow sessions
    pub outbound_dropped: AtomicU64,
    /// Spin-wait episodes on session-event publication
    pub backpressure_events: AtomicU64,
    /// Sessions accepted over the lifetime of the process
    pub sessions_opened: AtomicU64,
    /// Sessions torn down
    pub sessions_closed: AtomicU64,
    /// Datagrams published to the multicast group
    pub datagrams_sent: AtomicU64,
}

impl ExchangeStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr_submitted(&self) {
        self.orders_submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_accepted(&self) {
        self.orders_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_rejected(&self, reason: RejectReason) {
        self.rejections[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn rejected(&self, reason: RejectReason) -> u64 {
        self.rejections[reason.index()].load(Ordering::Relaxed)
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejections
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut rejections = [0u64; RejectReason::COUNT];
        for (slot, counter) in rejections.iter_mut().zip(self.rejections.iter()) {
            *slot = counter.load(Ordering::Relaxed);
        }
        StatsSnapshot {
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_accepted: self.orders_accepted.load(Ordering::Relaxed),
            rejections,
            trades_executed: self.trades_executed.load(Ordering::Relaxed),
            cancels_executed: self.cancels_executed.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            md_events_dropped: self.md_events_dropped.load(Ordering::Relaxed),
            outbound_dropped: self.outbound_dropped.load(Ordering::Relaxed),
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`ExchangeStats`]
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub orders_submitted: u64,
    pub orders_accepted: u64,
    pub rejections: [u64; RejectReason::COUNT],
    pub trades_executed: u64,
    pub cancels_executed: u64,
    pub frames_malformed: u64,
    pub md_events_dropped: u64,
    pub outbound_dropped: u64,
    pub backpressure_events: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub datagrams_sent: u64,
}

impl StatsSnapshot {
    pub fn rejected_total(&self) -> u64 {
        self.rejections.iter().sum()
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "submitted={} accepted={} rejected={} trades={} cancels={} malformed={} md_dropped={} out_dropped={} sessions={}/{}",
            self.orders_submitted,
            self.orders_accepted,
            self.rejected_total(),
            self.trades_executed,
            self.cancels_executed,
            self.frames_malformed,
            self.md_events_dropped,
            self.outbound_dropped,
            self.sessions_opened,
            self.sessions_closed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_reason_counters() {
        let stats = ExchangeStats::new();
        stats.incr_rejected(RejectReason::Size);
        stats.incr_rejected(RejectReason::Size);
        stats.incr_rejected(RejectReason::Rate);

        assert_eq!(stats.rejected(RejectReason::Size), 2);
        assert_eq!(stats.rejected(RejectReason::Rate), 1);
        assert_eq!(stats.rejected(RejectReason::Credit), 0);
        assert_eq!(stats.rejected_total(), 3);
    }

    #[test]
    fn test_snapshot_display() {
        let stats = ExchangeStats::new();
        stats.incr_submitted();
        stats.incr_accepted();
        stats.trades_executed.fetch_add(5, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.orders_submitted, 1);
        assert_eq!(snap.trades_executed, 5);
        let line = snap.to_string();
        assert!(line.contains("submitted=1"));
        assert!(line.contains("trades=5"));
    }
}
