//! Sink implementations for publishing pipeline results

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;
use vitalflow_core::{JoinedSummary, StepsSummary};

/// Trait for result sinks
///
/// Step totals and joined summaries are separate result streams, mirroring
/// the two downstream destinations they feed.
#[async_trait]
pub trait Sink: Send + Sync + std::fmt::Debug {
    /// Name of this sink
    fn name(&self) -> &str;

    /// Publish a step-count summary
    async fn publish_steps(&self, summary: &StepsSummary) -> Result<()>;

    /// Publish an enriched joined summary
    async fn publish_joined(&self, summary: &JoinedSummary) -> Result<()>;

    /// Flush any buffered data
    async fn flush(&self) -> Result<()>;

    /// Close the sink
    async fn close(&self) -> Result<()>;
}

/// Console sink - prints to stdout
#[derive(Debug)]
pub struct ConsoleSink {
    name: String,
    pretty: bool,
}

impl ConsoleSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pretty: true,
        }
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_steps(&self, summary: &StepsSummary) -> Result<()> {
        if self.pretty {
            println!("STEPS   {} | total={}", summary.account, summary.total_steps);
        } else {
            println!("{}", serde_json::to_string(summary)?);
        }
        Ok(())
    }

    async fn publish_joined(&self, summary: &JoinedSummary) -> Result<()> {
        if self.pretty {
            println!(
                "JOINED  {} | steps={} glucose={:.1} | {}",
                summary.account, summary.total_steps, summary.avg_glucose, summary.recommendation
            );
        } else {
            println!("{}", serde_json::to_string(summary)?);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// File sink - writes JSON lines, one file per result stream
#[allow(dead_code)]
#[derive(Debug)]
pub struct FileSink {
    name: String,
    steps_path: PathBuf,
    joined_path: PathBuf,
    steps_file: Arc<Mutex<File>>,
    joined_file: Arc<Mutex<File>>,
}

impl FileSink {
    pub fn new(
        name: impl Into<String>,
        steps_path: impl Into<PathBuf>,
        joined_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let steps_path = steps_path.into();
        let joined_path = joined_path.into();
        let steps_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&steps_path)?;
        let joined_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&joined_path)?;

        Ok(Self {
            name: name.into(),
            steps_path,
            joined_path,
            steps_file: Arc::new(Mutex::new(steps_file)),
            joined_file: Arc::new(Mutex::new(joined_file)),
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_steps(&self, summary: &StepsSummary) -> Result<()> {
        let json = serde_json::to_string(summary)?;
        let mut file = self.steps_file.lock().await;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    async fn publish_joined(&self, summary: &JoinedSummary) -> Result<()> {
        let json = serde_json::to_string(summary)?;
        let mut file = self.joined_file.lock().await;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.steps_file.lock().await.flush()?;
        self.joined_file.lock().await.flush()?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}

/// HTTP webhook sink
#[derive(Debug)]
pub struct HttpSink {
    name: String,
    url: String,
    client: reqwest::Client,
    headers: IndexMap<String, String>,
}

impl HttpSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            headers: IndexMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    async fn post<T: serde::Serialize + Sync>(&self, body: &T) -> Result<()> {
        let mut req = self.client.post(&self.url);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req = req.header("Content-Type", "application/json");
        req = req.json(body);

        match req.send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    error!("HTTP sink {} got status {}", self.name, resp.status());
                }
            }
            Err(e) => {
                error!("HTTP sink {} error: {}", self.name, e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_steps(&self, summary: &StepsSummary) -> Result<()> {
        self.post(summary).await
    }

    async fn publish_joined(&self, summary: &JoinedSummary) -> Result<()> {
        self.post(summary).await
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Multi-sink that broadcasts to multiple sinks
#[derive(Debug)]
pub struct MultiSink {
    name: String,
    sinks: Vec<Box<dyn Sink>>,
}

impl MultiSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sinks: Vec::new(),
        }
    }

    pub fn add(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl Sink for MultiSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_steps(&self, summary: &StepsSummary) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.publish_steps(summary).await {
                error!("Sink {} error: {}", sink.name(), e);
            }
        }
        Ok(())
    }

    async fn publish_joined(&self, summary: &JoinedSummary) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.publish_joined(summary).await {
                error!("Sink {} error: {}", sink.name(), e);
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.flush().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.close().await?;
        }
        Ok(())
    }
}

/// In-memory sink that records published summaries, for tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    steps: Arc<Mutex<Vec<StepsSummary>>>,
    joined: Arc<Mutex<Vec<JoinedSummary>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn steps(&self) -> Vec<StepsSummary> {
        self.steps.lock().await.clone()
    }

    pub async fn joined(&self) -> Vec<JoinedSummary> {
        self.joined.lock().await.clone()
    }
}

#[async_trait]
impl Sink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn publish_steps(&self, summary: &StepsSummary) -> Result<()> {
        self.steps.lock().await.push(summary.clone());
        Ok(())
    }

    async fn publish_joined(&self, summary: &JoinedSummary) -> Result<()> {
        self.joined.lock().await.push(summary.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
