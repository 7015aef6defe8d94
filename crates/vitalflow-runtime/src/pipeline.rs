//! Pipeline assembly and lifecycle.
//!
//! `Pipeline` wires a pointer source, the record loader, keyed shard
//! workers, the watermark task, the co-group joiner with enrichment, and the
//! sinks into one runnable unit. Stages talk over bounded channels; shutdown
//! flows downstream from the source: the pointer channel closes, shards
//! flush, the joiner drains, and the sinks are flushed last.

use crate::enrichment::{EnrichmentDispatcher, Recommender};
use crate::join::{CoGroupJoiner, JoinedPair};
use crate::metrics::Metrics;
use crate::shard::{JoinFeed, ShardRouter, ShardWorker};
use crate::sink::Sink;
use crate::source::{PointerSource, RecordLoader};
use crate::timestamp::{parse_pointer_time, TimestampedRecord};
use crate::watermark::WatermarkTracker;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use vitalflow_core::{ConfigError, FilePointer, JoinedSummary, PipelineConfig, StepsSummary};

/// Counters accumulated over one pipeline run.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineReport {
    pub pointers: u64,
    pub malformed_pointers: u64,
    pub load_failures: u64,
    pub records: u64,
    pub malformed_records: u64,
    pub steps_published: u64,
    pub joined_published: u64,
    pub partial_joins: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct IngestTally {
    pointers: u64,
    malformed_pointers: u64,
    load_failures: u64,
    records: u64,
    malformed_records: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct JoinTally {
    published: u64,
    partial: u64,
}

/// A fully assembled pipeline, ready to run once.
pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn PointerSource>,
    loader: Arc<dyn RecordLoader>,
    recommender: Arc<dyn Recommender>,
    sink: Arc<dyn Sink>,
    metrics: Metrics,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn PointerSource>,
        loader: Arc<dyn RecordLoader>,
        recommender: Arc<dyn Recommender>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            loader,
            recommender,
            sink,
            metrics: Metrics::new(),
        })
    }

    /// Shared metrics registry, for serving through a `MetricsServer`.
    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// Run until the source is exhausted, then drain every stage in order.
    pub async fn run(self) -> Result<PipelineReport> {
        let Pipeline {
            config,
            mut source,
            loader,
            recommender,
            sink,
            metrics,
        } = self;

        let mut tracker = WatermarkTracker::new(config.partitions, config.watermark_skew());
        let (watermark_tx, _watermark_seed) = watch::channel(None);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        // Shard workers, one arena set each
        let (join_tx, join_rx) = mpsc::channel(config.channel_capacity);
        let (steps_tx, steps_rx) = mpsc::channel(config.channel_capacity);
        let mut record_txs = Vec::with_capacity(config.partitions);
        let mut shard_handles = Vec::with_capacity(config.partitions);
        for shard_id in 0..config.partitions {
            let (record_tx, record_rx) = mpsc::channel(config.channel_capacity);
            record_txs.push(record_tx);
            let worker = ShardWorker::new(
                shard_id,
                &config,
                tracker.progress(shard_id),
                metrics.clone(),
                join_tx.clone(),
                steps_tx.clone(),
            );
            shard_handles.push(tokio::spawn(worker.run(record_rx, watermark_tx.subscribe())));
        }
        // The stage tasks must observe channel closure once the workers stop
        drop(join_tx);
        drop(steps_tx);
        let router = ShardRouter::new(record_txs);

        // Join + enrichment + joined sink writes
        let joiner = CoGroupJoiner::new(
            config.output_period_secs(),
            config.allowed_lateness(),
            config.join_buffer_capacity,
        );
        let dispatcher = EnrichmentDispatcher::new(recommender, config.enrichment_timeout());
        let join_handle = tokio::spawn(join_stage(
            join_rx,
            config.partitions,
            joiner,
            dispatcher,
            sink.clone(),
            metrics.clone(),
        ));

        // Direct step totals from the long stream
        let steps_handle = tokio::spawn(steps_stage(steps_rx, sink.clone()));

        // Periodic watermark reduction
        let interval = config.watermark_interval();
        let watermark_metrics = metrics.clone();
        let watermark_handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(wm) = tracker.advance() {
                            watermark_metrics.set_watermark(wm);
                            if watermark_tx.send(Some(wm)).is_err() {
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        // Pointer source feeding the inline ingest loop
        let (line_tx, line_rx) = mpsc::channel(config.channel_capacity);
        let source_name = source.name().to_string();
        let source_handle = tokio::spawn(async move { source.run(line_tx).await });

        info!(
            source = %source_name,
            loader = loader.name(),
            partitions = config.partitions,
            "pipeline started"
        );

        let ingest = ingest_stage(line_rx, &router, loader.as_ref(), &metrics).await;

        // Source finished (or failed); drain downstream before reporting
        let source_result = source_handle.await?;

        drop(router);
        for handle in shard_handles {
            handle.await?;
        }
        let join_tally = join_handle.await?;
        let steps_published = steps_handle.await?;

        let _ = shutdown_tx.send(true);
        watermark_handle.await?;

        sink.flush().await?;
        sink.close().await?;
        source_result?;

        let report = PipelineReport {
            pointers: ingest.pointers,
            malformed_pointers: ingest.malformed_pointers,
            load_failures: ingest.load_failures,
            records: ingest.records,
            malformed_records: ingest.malformed_records,
            steps_published,
            joined_published: join_tally.published,
            partial_joins: join_tally.partial,
        };
        info!(
            pointers = report.pointers,
            records = report.records,
            steps_published = report.steps_published,
            joined_published = report.joined_published,
            partial_joins = report.partial_joins,
            "pipeline finished"
        );
        Ok(report)
    }
}

/// Decode pointers, load their record batches, and route records to shards.
async fn ingest_stage(
    mut lines: mpsc::Receiver<String>,
    router: &ShardRouter,
    loader: &dyn RecordLoader,
    metrics: &Metrics,
) -> IngestTally {
    let mut tally = IngestTally::default();

    while let Some(line) = lines.recv().await {
        tally.pointers += 1;
        metrics.record_pointer();

        let pointer: FilePointer = match serde_json::from_str(&line) {
            Ok(pointer) => pointer,
            Err(e) => {
                tally.malformed_pointers += 1;
                metrics.record_malformed("pointer", 1);
                warn!(error = %e, "skipping undecodable pointer message");
                continue;
            }
        };
        if let Err(e) = parse_pointer_time(&pointer) {
            tally.malformed_pointers += 1;
            metrics.record_malformed("pointer", 1);
            warn!(error = %e, "skipping pointer with bad event_time");
            continue;
        }

        let batch = match loader.load(&pointer).await {
            Ok(batch) => batch,
            Err(e) => {
                tally.load_failures += 1;
                metrics.record_malformed("load", 1);
                warn!(
                    object = %pointer.object_path(),
                    error = %e,
                    "failed to load record batch"
                );
                continue;
            }
        };

        if batch.malformed_lines > 0 {
            tally.malformed_records += batch.malformed_lines;
            metrics.record_malformed("record_line", batch.malformed_lines);
        }
        tally.records += batch.records.len() as u64;
        metrics.record_records(batch.records.len() as u64);

        for record in batch.records {
            match TimestampedRecord::try_from_record(record) {
                Ok(stamped) => {
                    if router.route(stamped).await.is_err() {
                        warn!("shards shut down mid-ingest; stopping");
                        return tally;
                    }
                }
                Err(e) => {
                    tally.malformed_records += 1;
                    metrics.record_malformed("event", 1);
                    debug!(error = %e, "skipping malformed record");
                }
            }
        }
    }

    tally
}

/// Join fired aggregates on the output grid, enrich, and publish.
///
/// Slot closing is driven by the in-band markers each shard appends after
/// its aggregates, reduced to a minimum across shards. Channel order then
/// guarantees every input a closing watermark covers has already been
/// pushed, so a slot never closes ahead of its own data.
async fn join_stage(
    mut feeds: mpsc::Receiver<JoinFeed>,
    partitions: usize,
    mut joiner: CoGroupJoiner,
    dispatcher: EnrichmentDispatcher,
    sink: Arc<dyn Sink>,
    metrics: Metrics,
) -> JoinTally {
    let mut tally = JoinTally::default();
    let mut forced_seen = 0u64;
    let mut marks: Vec<Option<DateTime<Utc>>> = vec![None; partitions];
    let mut closed_at: Option<DateTime<Utc>> = None;

    while let Some(feed) = feeds.recv().await {
        let ready = match feed {
            JoinFeed::Input(input) => joiner.push(input),
            JoinFeed::Watermark { shard, watermark } => {
                marks[shard] = Some(watermark);
                match joint_watermark(&marks) {
                    Some(wm) if closed_at.map_or(true, |prev| wm > prev) => {
                        closed_at = Some(wm);
                        joiner.close(wm)
                    }
                    _ => Vec::new(),
                }
            }
        };

        publish_pairs(&ready, &dispatcher, sink.as_ref(), &metrics, &mut tally).await;

        let stats = joiner.stats();
        metrics.set_join_buffer(stats.buffered_slots);
        while forced_seen < stats.forced_evictions {
            metrics.record_forced_eviction();
            forced_seen += 1;
        }
    }

    // Inputs are final: whatever never completed goes out as a partial row
    let drained = joiner.drain();
    publish_pairs(&drained, &dispatcher, sink.as_ref(), &metrics, &mut tally).await;
    metrics.set_join_buffer(0);
    tally
}

/// Minimum watermark over all shards; `None` until every shard has marked.
fn joint_watermark(marks: &[Option<DateTime<Utc>>]) -> Option<DateTime<Utc>> {
    let mut min = None;
    for mark in marks {
        let mark = (*mark)?;
        min = Some(match min {
            Some(m) if m <= mark => m,
            _ => mark,
        });
    }
    min
}

async fn publish_pairs(
    pairs: &[JoinedPair],
    dispatcher: &EnrichmentDispatcher,
    sink: &dyn Sink,
    metrics: &Metrics,
    tally: &mut JoinTally,
) {
    for pair in pairs {
        metrics.record_join_emit(pair.partial);
        if pair.partial {
            tally.partial += 1;
        }

        let started = Instant::now();
        let recommendation = match dispatcher
            .dispatch(&pair.account, pair.total_steps, pair.avg_glucose)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                metrics.record_enrichment_failure(e.reason());
                warn!(
                    account = pair.account.as_ref(),
                    error = %e,
                    "recommendation lookup failed, publishing without one"
                );
                String::new()
            }
        };
        metrics.record_enrichment(dispatcher.provider_name(), started.elapsed().as_secs_f64());

        let summary = JoinedSummary {
            account: pair.account.clone(),
            total_steps: pair.total_steps,
            avg_glucose: pair.avg_glucose,
            recommendation,
        };
        if let Err(e) = sink.publish_joined(&summary).await {
            error!("Sink {} error: {}", sink.name(), e);
        } else {
            tally.published += 1;
        }
    }
}

/// Publish long-stream step totals as they fire.
async fn steps_stage(mut summaries: mpsc::Receiver<StepsSummary>, sink: Arc<dyn Sink>) -> u64 {
    let mut published = 0u64;
    while let Some(summary) = summaries.recv().await {
        if let Err(e) = sink.publish_steps(&summary).await {
            error!("Sink {} error: {}", sink.name(), e);
        } else {
            published += 1;
        }
    }
    published
}
