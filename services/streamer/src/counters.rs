//! Service counters
//!
//! Plain monotone counters surfaced through periodic log lines; there is no
//! metrics framework in this service. Shared across tasks via `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing service counters.
#[derive(Debug, Default)]
pub struct Counters {
    /// Trade frames received from the vendor.
    pub ticks_received: AtomicU64,
    /// Ticks dropped because the buffer was full.
    pub ticks_dropped_buffer: AtomicU64,
    /// Ticks dropped because the symbol was not in the cache.
    pub ticks_dropped_unknown: AtomicU64,
    /// Ticks dropped by the trading-hours filter.
    pub ticks_dropped_off_hours: AtomicU64,
    /// Batches processed by the drain task.
    pub batches_processed: AtomicU64,
    /// Minute rows upserted.
    pub minute_rows_written: AtomicU64,
    /// Aggregated rows upserted (open + closed buckets).
    pub aggregated_rows_written: AtomicU64,
    /// Higher-timeframe writes skipped by the backfill gate.
    pub gate_denials: AtomicU64,
    /// Closed buckets evicted without a write (ceded to the resampler).
    pub closed_ceded: AtomicU64,
    /// Socket reconnect attempts.
    pub reconnects: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time snapshot for logging.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            ticks_dropped_buffer: self.ticks_dropped_buffer.load(Ordering::Relaxed),
            ticks_dropped_unknown: self.ticks_dropped_unknown.load(Ordering::Relaxed),
            ticks_dropped_off_hours: self.ticks_dropped_off_hours.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            minute_rows_written: self.minute_rows_written.load(Ordering::Relaxed),
            aggregated_rows_written: self.aggregated_rows_written.load(Ordering::Relaxed),
            gate_denials: self.gate_denials.load(Ordering::Relaxed),
            closed_ceded: self.closed_ceded.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of [`Counters`] at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub ticks_received: u64,
    pub ticks_dropped_buffer: u64,
    pub ticks_dropped_unknown: u64,
    pub ticks_dropped_off_hours: u64,
    pub batches_processed: u64,
    pub minute_rows_written: u64,
    pub aggregated_rows_written: u64,
    pub gate_denials: u64,
    pub closed_ceded: u64,
    pub reconnects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = Counters::new();
        Counters::incr(&counters.ticks_received);
        Counters::add(&counters.ticks_received, 2);
        Counters::incr(&counters.gate_denials);

        let snap = counters.snapshot();
        assert_eq!(snap.ticks_received, 3);
        assert_eq!(snap.gate_denials, 1);
        assert_eq!(snap.batches_processed, 0);
    }
}
