//! Vitalflow core - shared data model for the streaming aggregation engine.
//!
//! This crate holds the wire-level record types, window specifications with
//! their assignment arithmetic, and the immutable pipeline configuration.

pub mod config;
pub mod record;
pub mod window;

pub use config::{ConfigError, PipelineConfig};
pub use record::{AccountId, BiometricRecord, FilePointer, JoinedSummary, StepsSummary};
pub use window::{WindowRange, WindowSpec, WindowSpecError};
