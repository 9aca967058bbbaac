//! Pipeline statistics
//!
//! Lock-free counters published by the workers and sampled by the
//! scheduler tick. One cache-line-aligned block per worker, one light
//! block per clone group. Aggregation happens off the fast path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-worker counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CoreStats {
    /// Packets entering the graph on this core (RX + generated)
    pub in_packets: AtomicU64,
    /// Packets accepted by a TX queue on this core
    pub out_packets: AtomicU64,
    /// Packets intentionally freed: stoppers, drop verdicts, full rings
    pub dropped: AtomicU64,
    /// Packets failing integrity or layout checks
    pub broken: AtomicU64,
    /// Inner-loop passes that moved at least one packet
    pub busy_polls: AtomicU64,
    /// All inner-loop passes
    pub total_polls: AtomicU64,
}

impl CoreStats {
    #[inline(always)]
    pub(crate) fn record_in(&self, n: u64) {
        self.in_packets.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_out(&self, n: u64) {
        self.out_packets.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_broken(&self, n: u64) {
        self.broken.fetch_add(n, Ordering::Relaxed);
    }
}

/// Per-clone-group activity counters, shared by all clones of a vertex
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct VertexStats {
    /// Packets processed by any clone of the group
    pub packets: AtomicU64,
    /// Passes that had input to process
    pub active_polls: AtomicU64,
}

impl VertexStats {
    #[inline(always)]
    pub(crate) fn record_pass(&self, packets: u64) {
        if packets > 0 {
            self.packets.fetch_add(packets, Ordering::Relaxed);
            self.active_polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Observed packets-per-poll since the given snapshot
    pub(crate) fn packets_per_poll(&self, since: (u64, u64)) -> f64 {
        let packets = self.packets.load(Ordering::Relaxed) - since.0;
        let polls = self.active_polls.load(Ordering::Relaxed) - since.1;
        if polls == 0 {
            0.0
        } else {
            packets as f64 / polls as f64
        }
    }

    pub(crate) fn snapshot(&self) -> (u64, u64) {
        (
            self.packets.load(Ordering::Relaxed),
            self.active_polls.load(Ordering::Relaxed),
        )
    }
}

/// Shared stats registry: one `CoreStats` per worker plus stop-time
/// remainder counts
#[derive(Debug, Default)]
pub struct StatsRegistry {
    pub(crate) cores: parking_lot::RwLock<Vec<Arc<CoreStats>>>,
    /// Handles still sitting in rings when the graph stopped
    pub(crate) queued_at_stop: AtomicU64,
}

impl StatsRegistry {
    pub(crate) fn register_core(&self) -> Arc<CoreStats> {
        let stats = Arc::new(CoreStats::default());
        self.cores.write().push(stats.clone());
        stats
    }

    /// Aggregate counters across workers
    pub fn snapshot(&self) -> PipelineSnapshot {
        let mut snap = PipelineSnapshot::default();
        for core in self.cores.read().iter() {
            snap.in_packets += core.in_packets.load(Ordering::Relaxed);
            snap.out_packets += core.out_packets.load(Ordering::Relaxed);
            snap.dropped += core.dropped.load(Ordering::Relaxed);
            snap.broken += core.broken.load(Ordering::Relaxed);
        }
        snap.queued_at_stop = self.queued_at_stop.load(Ordering::Relaxed);
        snap
    }
}

/// Aggregated pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSnapshot {
    /// Packets that entered the graph (received + generated)
    pub in_packets: u64,
    /// Packets that left through a TX queue
    pub out_packets: u64,
    /// Packets dropped (stoppers, drop verdicts, backpressure)
    pub dropped: u64,
    /// Packets counted broken
    pub broken: u64,
    /// Packets still queued in rings when the graph stopped
    pub queued_at_stop: u64,
}

impl PipelineSnapshot {
    /// Conservation check: everything that entered is accounted for
    pub fn is_conserved(&self) -> bool {
        self.in_packets == self.out_packets + self.dropped + self.broken + self.queued_at_stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_aggregates_cores() {
        let reg = StatsRegistry::default();
        let a = reg.register_core();
        let b = reg.register_core();
        a.record_in(10);
        a.record_out(6);
        b.record_in(5);
        b.record_dropped(9);

        let snap = reg.snapshot();
        assert_eq!(snap.in_packets, 15);
        assert_eq!(snap.out_packets, 6);
        assert_eq!(snap.dropped, 9);
        assert!(snap.is_conserved());
    }

    #[test]
    fn test_packets_per_poll() {
        let v = VertexStats::default();
        let before = v.snapshot();
        v.record_pass(32);
        v.record_pass(16);
        v.record_pass(0); // idle pass is not an active poll
        assert_eq!(v.packets_per_poll(before), 24.0);
    }
}
