//! Per-process quoting counters.

use solver_core::RejectReason;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for the quote path.
#[derive(Debug, Default)]
pub struct QuoterStats {
    received: AtomicU64,
    generated: AtomicU64,
    rejections: [AtomicU64; RejectReason::ALL.len()],
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub generated: u64,
    /// `(reason tag, count)` for every reason, including zeroes.
    pub rejections: Vec<(&'static str, u64)>,
}

impl StatsSnapshot {
    pub fn total_rejections(&self) -> u64 {
        self.rejections.iter().map(|(_, n)| n).sum()
    }
}

impl QuoterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generated(&self) {
        self.generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, reason: RejectReason) {
        self.rejections[Self::index(reason)].fetch_add(1, Ordering::Relaxed);
    }

    fn index(reason: RejectReason) -> usize {
        match reason {
            RejectReason::OrderbookStale => 0,
            RejectReason::InvalidTokenPair => 1,
            RejectReason::SizeOutOfBounds => 2,
            RejectReason::InsufficientLiquidity => 3,
            RejectReason::DirectionNotAllowed => 4,
            RejectReason::PositionCapacityExceeded => 5,
            RejectReason::FundingRateTooNegative => 6,
            RejectReason::NoReferencePrice => 7,
        }
    }

    /// Read all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            rejections: RejectReason::ALL
                .iter()
                .enumerate()
                .map(|(i, r)| (r.as_str(), self.rejections[i].load(Ordering::Relaxed)))
                .collect(),
        }
    }

    /// Read and zero all counters.
    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.swap(0, Ordering::Relaxed),
            generated: self.generated.swap(0, Ordering::Relaxed),
            rejections: RejectReason::ALL
                .iter()
                .enumerate()
                .map(|(i, r)| (r.as_str(), self.rejections[i].swap(0, Ordering::Relaxed)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = QuoterStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_generated();
        stats.record_rejection(RejectReason::OrderbookStale);
        stats.record_rejection(RejectReason::OrderbookStale);
        stats.record_rejection(RejectReason::InvalidTokenPair);

        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.generated, 1);
        assert_eq!(snap.total_rejections(), 3);
        let stale = snap
            .rejections
            .iter()
            .find(|(tag, _)| *tag == "orderbook_stale")
            .unwrap();
        assert_eq!(stale.1, 2);
    }

    #[test]
    fn test_reset_zeroes() {
        let stats = QuoterStats::new();
        stats.record_received();
        stats.record_rejection(RejectReason::NoReferencePrice);

        let first = stats.snapshot_and_reset();
        assert_eq!(first.received, 1);
        assert_eq!(first.total_rejections(), 1);

        let second = stats.snapshot();
        assert_eq!(second.received, 0);
        assert_eq!(second.total_rejections(), 0);
    }
}
