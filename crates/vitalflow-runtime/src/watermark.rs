//! Watermark tracking across key partitions.
//!
//! Each partition records the maximum event time it has observed; the global
//! watermark is the minimum across all partitions that have seen data, minus
//! a fixed skew allowance. The global value never recedes once advanced.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const UNSEEN: i64 = i64::MIN;

/// Shared handle through which one partition reports event-time progress.
///
/// Cheap to clone; updates are a single relaxed `fetch_max`, so the hot
/// path never contends with the watermark reduction.
#[derive(Debug, Clone)]
pub struct PartitionProgress {
    max_seen_ms: Arc<AtomicI64>,
}

impl PartitionProgress {
    fn new() -> Self {
        Self {
            max_seen_ms: Arc::new(AtomicI64::new(UNSEEN)),
        }
    }

    /// Record an observed event time. Older timestamps are ignored.
    pub fn observe(&self, event_time: DateTime<Utc>) {
        self.max_seen_ms
            .fetch_max(event_time.timestamp_millis(), Ordering::Relaxed);
    }

    /// The maximum event time this partition has seen, if any.
    pub fn max_seen(&self) -> Option<DateTime<Utc>> {
        match self.max_seen_ms.load(Ordering::Relaxed) {
            UNSEEN => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

/// Reduces per-partition progress into the global watermark.
pub struct WatermarkTracker {
    partitions: Vec<PartitionProgress>,
    skew: Duration,
    current: Option<DateTime<Utc>>,
}

impl WatermarkTracker {
    pub fn new(partitions: usize, skew: Duration) -> Self {
        Self {
            partitions: (0..partitions).map(|_| PartitionProgress::new()).collect(),
            skew,
            current: None,
        }
    }

    /// Handle for the given partition to report progress through.
    pub fn progress(&self, partition: usize) -> PartitionProgress {
        self.partitions[partition].clone()
    }

    /// The current global watermark, if any partition has reported.
    pub fn current(&self) -> Option<DateTime<Utc>> {
        self.current
    }

    /// Recompute the global watermark from partition progress.
    ///
    /// Partitions that have seen no data yet are skipped so an idle shard
    /// does not hold the watermark back forever. Returns the new value only
    /// when it advanced.
    pub fn advance(&mut self) -> Option<DateTime<Utc>> {
        let mut min_seen: Option<DateTime<Utc>> = None;
        for p in &self.partitions {
            if let Some(seen) = p.max_seen() {
                min_seen = Some(match min_seen {
                    Some(m) if m <= seen => m,
                    _ => seen,
                });
            }
        }

        let candidate = min_seen? - self.skew;
        match self.current {
            // Watermark never recedes
            Some(wm) if candidate <= wm => None,
            _ => {
                self.current = Some(candidate);
                self.current
            }
        }
    }
}
