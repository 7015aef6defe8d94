//! Vitalflow Runtime - Windowed aggregation and join engine
//!
//! This crate turns a replayed stream of file pointers into published
//! per-account summaries: records are loaded, sharded by account, folded
//! into event-time windows, fired by watermarks and joined on a common
//! output grid before enrichment and publication.

pub mod aggregation;
pub mod enrichment;
pub mod generator;
pub mod join;
pub mod metrics;
pub mod pipeline;
pub mod shard;
pub mod sink;
pub mod source;
pub mod timestamp;
pub mod watermark;

pub use aggregation::{
    Accumulator, AdvanceOutcome, AggregationArena, FiredWindow, MeanState, SumState, WindowPhase,
};
pub use enrichment::{
    EnrichmentDispatcher, EnrichmentError, HttpRecommender, Recommender, StaticRecommender,
};
pub use generator::{generate, GeneratedSet, GeneratorConfig};
pub use join::{CoGroupJoiner, FiredMean, FiredSum, JoinInput, JoinStats, JoinedPair};
pub use metrics::{Metrics, MetricsServer};
pub use pipeline::{Pipeline, PipelineReport};
pub use shard::{JoinFeed, ShardRouter, ShardWorker};
pub use sink::{CollectingSink, ConsoleSink, FileSink, HttpSink, MultiSink, Sink};
pub use source::{
    DirLoader, FileSource, LoadError, LoadedBatch, MemoryLoader, MemorySource, PointerSource,
    RecordLoader, SourceError,
};
pub use timestamp::{parse_pointer_time, MalformedEvent, TimestampedRecord};
pub use watermark::{PartitionProgress, WatermarkTracker};
