//! Vitalflow CLI library - testable assembly helpers
//!
//! The binary stays thin: everything that turns a configuration file into
//! pipeline collaborators lives here so the tests can exercise it.

pub mod config;

use anyhow::Result;
use std::sync::Arc;
use vitalflow_runtime::enrichment::{HttpRecommender, Recommender, StaticRecommender};
use vitalflow_runtime::sink::{ConsoleSink, FileSink, HttpSink, MultiSink, Sink};

use config::{EnrichmentConfig, SinksConfig};

/// Build the configured sink set; multiple sinks are fanned out through a
/// `MultiSink`.
pub fn build_sink(sinks: &SinksConfig) -> Result<Arc<dyn Sink>> {
    let mut built: Vec<Box<dyn Sink>> = Vec::new();

    if sinks.console {
        let console = ConsoleSink::new("console");
        built.push(Box::new(if sinks.pretty {
            console
        } else {
            console.compact()
        }));
    }

    match (&sinks.steps_file, &sinks.joined_file) {
        (Some(steps), Some(joined)) => {
            built.push(Box::new(FileSink::new("files", steps, joined)?));
        }
        (None, None) => {}
        (Some(_), None) => {
            anyhow::bail!("sinks.steps_file requires sinks.joined_file to be set");
        }
        (None, Some(_)) => {
            anyhow::bail!("sinks.joined_file requires sinks.steps_file to be set");
        }
    }

    if let Some(url) = &sinks.http_url {
        built.push(Box::new(HttpSink::new("http", url.clone())));
    }

    match built.len() {
        0 => anyhow::bail!("no sinks configured; enable at least one under [sinks]"),
        1 => Ok(Arc::from(built.remove(0))),
        _ => {
            let mut multi = MultiSink::new("outputs");
            for sink in built {
                multi = multi.add(sink);
            }
            Ok(Arc::new(multi))
        }
    }
}

/// Pick the recommendation provider: the HTTP service when an endpoint is
/// configured, the built-in threshold rules otherwise.
pub fn build_recommender(enrichment: &EnrichmentConfig) -> Arc<dyn Recommender> {
    match &enrichment.endpoint {
        Some(endpoint) => Arc::new(HttpRecommender::new(endpoint.clone())),
        None => Arc::new(StaticRecommender),
    }
}
