//! Engine configuration.
//!
//! One immutable struct constructed at startup, validated once, and shared
//! via `Arc` into every component; nothing in the engine consults ambient
//! process state.

use crate::window::{WindowSpec, WindowSpecError};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error types. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid window specification: {0}")]
    Window(#[from] WindowSpecError),

    #[error("partitions must be at least 1")]
    NoPartitions,

    #[error("{name} must be positive (got {value})")]
    NonPositive { name: &'static str, value: i64 },

    #[error("allowed lateness must not be negative (got {0}s)")]
    NegativeLateness(i64),

    #[error(
        "join grid misaligned: short step window is {steps}s but glucose period is {period}s"
    )]
    MisalignedJoinGrid { steps: i64, period: i64 },
}

/// Immutable pipeline configuration.
///
/// Defaults mirror the production pipeline: 5-minute and 10-minute step
/// sums, a 15-minute glucose mean advancing every 5 minutes, and 5 minutes
/// of allowed lateness throughout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Short step-sum window size in seconds (tumbling; feeds the join).
    pub short_steps_secs: i64,

    /// Long step-sum window size in seconds (tumbling; published directly).
    pub long_steps_secs: i64,

    /// Glucose-mean window size in seconds (sliding).
    pub glucose_size_secs: i64,

    /// Glucose-mean window advance period in seconds.
    pub glucose_period_secs: i64,

    /// Grace period after a window's end during which late data still
    /// updates its result.
    pub allowed_lateness_secs: i64,

    /// Number of key partitions; per-key state lives on exactly one.
    pub partitions: usize,

    /// Fixed skew subtracted from per-partition progress when reducing the
    /// global watermark.
    pub watermark_skew_secs: i64,

    /// Interval between watermark reductions, in milliseconds.
    pub watermark_interval_ms: u64,

    /// Enrichment call timeout, in milliseconds.
    pub enrichment_timeout_ms: u64,

    /// Maximum buffered join slots before the oldest is force-emitted.
    pub join_buffer_capacity: usize,

    /// Capacity of the bounded channels between pipeline stages.
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            short_steps_secs: 300,
            long_steps_secs: 600,
            glucose_size_secs: 900,
            glucose_period_secs: 300,
            allowed_lateness_secs: 300,
            partitions: 4,
            watermark_skew_secs: 0,
            watermark_interval_ms: 200,
            enrichment_timeout_ms: 2_000,
            join_buffer_capacity: 4_096,
            channel_capacity: 1_024,
        }
    }
}

impl PipelineConfig {
    /// Validate every invariant the engine relies on. Called once before
    /// any component is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.short_steps_window().validate()?;
        self.long_steps_window().validate()?;
        self.glucose_window().validate()?;

        if self.allowed_lateness_secs < 0 {
            return Err(ConfigError::NegativeLateness(self.allowed_lateness_secs));
        }
        if self.partitions == 0 {
            return Err(ConfigError::NoPartitions);
        }
        if self.watermark_skew_secs < 0 {
            return Err(ConfigError::NonPositive {
                name: "watermark_skew_secs",
                value: self.watermark_skew_secs,
            });
        }
        for (name, value) in [
            (
                "watermark_interval_ms",
                self.watermark_interval_ms as i64,
            ),
            ("enrichment_timeout_ms", self.enrichment_timeout_ms as i64),
            ("join_buffer_capacity", self.join_buffer_capacity as i64),
            ("channel_capacity", self.channel_capacity as i64),
        ] {
            if value <= 0 {
                return Err(ConfigError::NonPositive { name, value });
            }
        }

        // The join matches step sums and glucose means on a common grid,
        // so the short step window must equal the glucose period.
        if self.short_steps_secs != self.glucose_period_secs {
            return Err(ConfigError::MisalignedJoinGrid {
                steps: self.short_steps_secs,
                period: self.glucose_period_secs,
            });
        }
        Ok(())
    }

    pub fn short_steps_window(&self) -> WindowSpec {
        WindowSpec::tumbling(self.short_steps_secs)
    }

    pub fn long_steps_window(&self) -> WindowSpec {
        WindowSpec::tumbling(self.long_steps_secs)
    }

    pub fn glucose_window(&self) -> WindowSpec {
        WindowSpec::sliding(self.glucose_size_secs, self.glucose_period_secs)
    }

    pub fn allowed_lateness(&self) -> Duration {
        Duration::seconds(self.allowed_lateness_secs)
    }

    pub fn watermark_skew(&self) -> Duration {
        Duration::seconds(self.watermark_skew_secs)
    }

    /// Width of the join output grid in seconds.
    pub fn output_period_secs(&self) -> i64 {
        self.glucose_period_secs
    }

    pub fn enrichment_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.enrichment_timeout_ms)
    }

    pub fn watermark_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.watermark_interval_ms)
    }
}
