//! Recommendation enrichment for joined step/glucose summaries.
//!
//! Providers implement [`Recommender`]; the [`EnrichmentDispatcher`] wraps a
//! constructed-once provider with a call timeout. Failures never drop the
//! joined record: the caller degrades to an empty recommendation.

mod http;

pub use http::HttpRecommender;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Error during a recommendation lookup.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("timeout after {0}ms")]
    Timeout(u64),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("parse error: {0}")]
    Parse(String),
}

impl EnrichmentError {
    /// Stable failure label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            EnrichmentError::Timeout(_) => "timeout",
            EnrichmentError::Connection(_) => "connection",
            EnrichmentError::Parse(_) => "parse",
        }
    }
}

/// Produces a lifestyle recommendation from aggregated indicators.
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    async fn recommend(
        &self,
        account: &str,
        total_steps: i64,
        avg_glucose: f64,
    ) -> Result<String, EnrichmentError>;
}

/// Rule-based recommender for offline runs and tests. Deterministic, no I/O.
pub struct StaticRecommender;

#[async_trait]
impl Recommender for StaticRecommender {
    fn name(&self) -> &str {
        "static"
    }

    async fn recommend(
        &self,
        _account: &str,
        total_steps: i64,
        avg_glucose: f64,
    ) -> Result<String, EnrichmentError> {
        let text = if avg_glucose >= 180.0 {
            "Average glucose is elevated; a short walk and fewer fast carbs would help."
        } else if avg_glucose > 0.0 && avg_glucose < 70.0 {
            "Average glucose is low; consider a small snack."
        } else if total_steps < 300 {
            "Activity is light for this window; a brisk 10-minute walk is a good target."
        } else {
            "Activity and glucose look balanced; keep it up."
        };
        Ok(text.to_string())
    }
}

/// Holds one reusable provider and applies the configured call timeout.
///
/// The provider (and any client inside it) is constructed once at startup
/// and shared; nothing is instantiated per record.
pub struct EnrichmentDispatcher {
    provider: Arc<dyn Recommender>,
    timeout: std::time::Duration,
}

impl EnrichmentDispatcher {
    pub fn new(provider: Arc<dyn Recommender>, timeout: std::time::Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one lookup under the timeout.
    pub async fn dispatch(
        &self,
        account: &str,
        total_steps: i64,
        avg_glucose: f64,
    ) -> Result<String, EnrichmentError> {
        let timeout_ms = self.timeout.as_millis() as u64;
        match tokio::time::timeout(
            self.timeout,
            self.provider.recommend(account, total_steps, avg_glucose),
        )
        .await
        {
            Ok(result) => {
                if result.is_ok() {
                    debug!(
                        provider = self.provider.name(),
                        account, "recommendation produced"
                    );
                }
                result
            }
            Err(_) => Err(EnrichmentError::Timeout(timeout_ms)),
        }
    }
}
