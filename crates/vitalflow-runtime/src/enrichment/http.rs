//! HTTP recommendation provider.
//!
//! Posts the aggregated indicators plus a templated prompt to a generative
//! endpoint and reads back `{"recommendation": "..."}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EnrichmentError, Recommender};

#[derive(Debug, Serialize)]
struct RecommendationRequest<'a> {
    account: &'a str,
    total_steps: i64,
    avg_glucose: f64,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct RecommendationResponse {
    recommendation: String,
}

/// Recommender backed by an HTTP endpoint.
///
/// The `reqwest::Client` is built once here and reused for every call; the
/// per-call deadline is enforced by the dispatcher.
pub struct HttpRecommender {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpRecommender {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn prompt(total_steps: i64, avg_glucose: f64) -> String {
        format!(
            "Based on the following patient data: average glucose {avg_glucose:.1} mg/dL \
             and {total_steps} steps counted over the last window, give a short lifestyle \
             recommendation covering both indicators."
        )
    }
}

#[async_trait]
impl Recommender for HttpRecommender {
    fn name(&self) -> &str {
        "http"
    }

    async fn recommend(
        &self,
        account: &str,
        total_steps: i64,
        avg_glucose: f64,
    ) -> Result<String, EnrichmentError> {
        let body = RecommendationRequest {
            account,
            total_steps,
            avg_glucose,
            prompt: Self::prompt(total_steps, avg_glucose),
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| EnrichmentError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EnrichmentError::Connection(format!(
                "HTTP {} from {}",
                response.status(),
                self.endpoint
            )));
        }

        let parsed: RecommendationResponse = response
            .json()
            .await
            .map_err(|e| EnrichmentError::Parse(e.to_string()))?;

        debug!(account, "recommendation received");
        Ok(parsed.recommendation)
    }
}
