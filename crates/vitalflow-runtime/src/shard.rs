//! Keyed shards: account routing and per-shard aggregation workers.
//!
//! Records are hashed by account onto a fixed set of shard tasks. Each shard
//! owns one arena per window stream plus its slice of watermark progress, so
//! all aggregation state is single-writer and the workers never share locks.
//! The late-record policy lives here: anything older than
//! `watermark - allowed_lateness` is dropped before it reaches an arena.

use crate::aggregation::{AggregationArena, MeanState, SumState};
use crate::join::{FiredMean, FiredSum, JoinInput};
use crate::metrics::Metrics;
use crate::timestamp::TimestampedRecord;
use crate::watermark::PartitionProgress;
use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use vitalflow_core::{PipelineConfig, StepsSummary};

/// Stream labels used in logs and metrics.
pub const STEPS_SHORT_STREAM: &str = "steps_short";
pub const STEPS_LONG_STREAM: &str = "steps_long";
pub const GLUCOSE_STREAM: &str = "glucose";

#[derive(Debug, thiserror::Error)]
#[error("shard {0} channel closed")]
pub struct ShardSendError(pub usize);

/// Messages flowing from the shards into the join stage.
///
/// Watermark markers travel in-band, after the aggregates of the advance
/// that produced them. A consumer that respects arrival order therefore
/// never closes a join slot while that slot's inputs are still in flight.
#[derive(Debug, Clone)]
pub enum JoinFeed {
    Input(JoinInput),
    Watermark {
        shard: usize,
        watermark: DateTime<Utc>,
    },
}

/// Hash-routes records to their owning shard.
///
/// The same account always lands on the same shard, which is what makes
/// per-shard arenas safe without any cross-task coordination.
pub struct ShardRouter {
    senders: Vec<mpsc::Sender<TimestampedRecord>>,
}

impl ShardRouter {
    pub fn new(senders: Vec<mpsc::Sender<TimestampedRecord>>) -> Self {
        Self { senders }
    }

    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }

    pub fn shard_for(&self, account: &str) -> usize {
        let mut hasher = FxHasher::default();
        account.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Deliver a record to its shard, applying backpressure when the shard
    /// queue is full.
    pub async fn route(&self, record: TimestampedRecord) -> Result<(), ShardSendError> {
        let idx = self.shard_for(&record.record.account);
        self.senders[idx]
            .send(record)
            .await
            .map_err(|_| ShardSendError(idx))
    }
}

/// One shard task: three arenas, a progress handle, and the late-drop gate.
pub struct ShardWorker {
    id: usize,
    steps_short: AggregationArena<SumState>,
    steps_long: AggregationArena<SumState>,
    glucose: AggregationArena<MeanState>,
    allowed_lateness: Duration,
    progress: PartitionProgress,
    watermark: Option<DateTime<Utc>>,
    late_dropped: u64,
    metrics: Metrics,
    join_tx: mpsc::Sender<JoinFeed>,
    steps_tx: mpsc::Sender<StepsSummary>,
}

impl ShardWorker {
    pub fn new(
        id: usize,
        config: &PipelineConfig,
        progress: PartitionProgress,
        metrics: Metrics,
        join_tx: mpsc::Sender<JoinFeed>,
        steps_tx: mpsc::Sender<StepsSummary>,
    ) -> Self {
        let lateness = config.allowed_lateness();
        Self {
            id,
            steps_short: AggregationArena::new(
                STEPS_SHORT_STREAM,
                config.short_steps_window(),
                lateness,
            ),
            steps_long: AggregationArena::new(
                STEPS_LONG_STREAM,
                config.long_steps_window(),
                lateness,
            ),
            glucose: AggregationArena::new(GLUCOSE_STREAM, config.glucose_window(), lateness),
            allowed_lateness: lateness,
            progress,
            watermark: None,
            late_dropped: 0,
            metrics,
            join_tx,
            steps_tx,
        }
    }

    /// Consume records and watermark updates until the record channel closes,
    /// then flush whatever is still pending.
    pub async fn run(
        mut self,
        mut records: mpsc::Receiver<TimestampedRecord>,
        mut watermarks: watch::Receiver<Option<DateTime<Utc>>>,
    ) {
        loop {
            tokio::select! {
                maybe = records.recv() => match maybe {
                    Some(record) => self.ingest(record),
                    None => break,
                },
                changed = watermarks.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let update = *watermarks.borrow_and_update();
                    if let Some(wm) = update {
                        self.on_watermark(wm).await;
                    }
                }
            }
        }
        // Input is final: advance to this shard's own progress so every
        // completed window fires before the flush. Local progress is never
        // behind the watermarks already processed, so this stays monotone.
        if let Some(max_seen) = self.progress.max_seen() {
            if self.watermark.map_or(true, |wm| max_seen > wm) {
                self.on_watermark(max_seen).await;
            }
        }
        self.flush_pending().await;
        info!(
            shard = self.id,
            late_dropped = self.late_dropped,
            "shard stopped"
        );
    }

    fn ingest(&mut self, record: TimestampedRecord) {
        self.progress.observe(record.event_time);

        // A record at exactly `watermark - allowed_lateness` is still accepted
        if let Some(wm) = self.watermark {
            if record.event_time < wm - self.allowed_lateness {
                self.late_dropped += 1;
                self.metrics.record_late_drop();
                debug!(
                    shard = self.id,
                    account = %record.record.account,
                    event_time = %record.event_time,
                    watermark = %wm,
                    "dropping record beyond allowed lateness"
                );
                return;
            }
        }

        let account = &record.record.account;
        self.steps_short
            .apply(account, record.event_time, record.record.steps_count);
        self.steps_long
            .apply(account, record.event_time, record.record.steps_count);
        self.glucose
            .apply(account, record.event_time, record.record.glucose_level);
    }

    async fn on_watermark(&mut self, watermark: DateTime<Utc>) {
        self.watermark = Some(watermark);

        let short = self.steps_short.advance(watermark);
        self.metrics
            .record_fired(STEPS_SHORT_STREAM, short.fired.len() as u64);
        self.metrics
            .record_evicted(STEPS_SHORT_STREAM, short.evicted as u64);
        for fired in short.fired {
            let sum = FiredSum {
                account: fired.account,
                window: fired.window,
                total_steps: fired.accumulator.total(),
            };
            if self
                .join_tx
                .send(JoinFeed::Input(JoinInput::Steps(sum)))
                .await
                .is_err()
            {
                return;
            }
        }

        let glucose = self.glucose.advance(watermark);
        self.metrics
            .record_fired(GLUCOSE_STREAM, glucose.fired.len() as u64);
        self.metrics
            .record_evicted(GLUCOSE_STREAM, glucose.evicted as u64);
        for fired in glucose.fired {
            let mean = FiredMean {
                account: fired.account,
                window: fired.window,
                avg_glucose: fired.accumulator.mean(),
            };
            if self
                .join_tx
                .send(JoinFeed::Input(JoinInput::Glucose(mean)))
                .await
                .is_err()
            {
                return;
            }
        }

        let long = self.steps_long.advance(watermark);
        self.metrics
            .record_fired(STEPS_LONG_STREAM, long.fired.len() as u64);
        self.metrics
            .record_evicted(STEPS_LONG_STREAM, long.evicted as u64);
        for fired in long.fired {
            let summary = StepsSummary {
                account: fired.account,
                total_steps: fired.accumulator.total(),
            };
            if self.steps_tx.send(summary).await.is_err() {
                return;
            }
        }

        // Marker last: everything fired by this advance precedes it in the
        // channel, including from advances where nothing fired at all.
        let _ = self
            .join_tx
            .send(JoinFeed::Watermark {
                shard: self.id,
                watermark,
            })
            .await;
    }

    async fn flush_pending(&mut self) {
        for fired in self.steps_short.drain() {
            let sum = FiredSum {
                account: fired.account,
                window: fired.window,
                total_steps: fired.accumulator.total(),
            };
            if self
                .join_tx
                .send(JoinFeed::Input(JoinInput::Steps(sum)))
                .await
                .is_err()
            {
                break;
            }
        }
        for fired in self.glucose.drain() {
            let mean = FiredMean {
                account: fired.account,
                window: fired.window,
                avg_glucose: fired.accumulator.mean(),
            };
            if self
                .join_tx
                .send(JoinFeed::Input(JoinInput::Glucose(mean)))
                .await
                .is_err()
            {
                break;
            }
        }
        for fired in self.steps_long.drain() {
            let summary = StepsSummary {
                account: fired.account,
                total_steps: fired.accumulator.total(),
            };
            if self.steps_tx.send(summary).await.is_err() {
                break;
            }
        }
    }
}
