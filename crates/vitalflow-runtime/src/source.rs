//! Pointer sources and record loaders.
//!
//! A [`PointerSource`] delivers raw pointer messages (one JSON object per
//! message) into the pipeline; a [`RecordLoader`] resolves a decoded pointer
//! to the biometric records it references. Fetching, decompression and line
//! decoding all live behind the loader trait, opaque to the engine.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info};
use vitalflow_core::{BiometricRecord, FilePointer};

/// Errors from a pointer source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("downstream channel closed")]
    ChannelClosed,
}

/// Errors from a record loader.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers raw pointer messages to the pipeline.
#[async_trait]
pub trait PointerSource: Send {
    fn name(&self) -> &str;

    /// Run until the source is exhausted or the receiver hangs up.
    async fn run(&mut self, tx: mpsc::Sender<String>) -> Result<(), SourceError>;
}

/// A batch of decoded records plus the count of undecodable lines.
#[derive(Debug, Default)]
pub struct LoadedBatch {
    pub records: Vec<BiometricRecord>,
    pub malformed_lines: u64,
}

/// Resolves a pointer to the decoded records it references.
#[async_trait]
pub trait RecordLoader: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, pointer: &FilePointer) -> Result<LoadedBatch, LoadError>;
}

/// Replays pointer messages from a JSONL file.
///
/// Blank lines and `#` comments are skipped. An optional throttle inserts a
/// fixed pause between messages for paced demos.
pub struct FileSource {
    name: String,
    path: PathBuf,
    throttle: Option<std::time::Duration>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: "file".to_string(),
            path: path.into(),
            throttle: None,
        }
    }

    pub fn with_throttle(mut self, throttle: std::time::Duration) -> Self {
        self.throttle = Some(throttle);
        self
    }
}

#[async_trait]
impl PointerSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, tx: mpsc::Sender<String>) -> Result<(), SourceError> {
        let file = tokio::fs::File::open(&self.path).await?;
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut sent = 0u64;

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if tx.send(trimmed.to_string()).await.is_err() {
                return Err(SourceError::ChannelClosed);
            }
            sent += 1;
            if let Some(pause) = self.throttle {
                tokio::time::sleep(pause).await;
            }
        }

        info!(path = %self.path.display(), sent, "pointer file replayed");
        Ok(())
    }
}

/// In-memory pointer source for tests and scripted runs.
pub struct MemorySource {
    name: String,
    messages: Vec<String>,
}

impl MemorySource {
    pub fn new(messages: Vec<String>) -> Self {
        Self {
            name: "memory".to_string(),
            messages,
        }
    }
}

#[async_trait]
impl PointerSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, tx: mpsc::Sender<String>) -> Result<(), SourceError> {
        for message in self.messages.drain(..) {
            if tx.send(message).await.is_err() {
                return Err(SourceError::ChannelClosed);
            }
        }
        Ok(())
    }
}

/// Loads record files from a local directory tree laid out as
/// `root/bucket/folder/file`, one JSON record per line.
pub struct DirLoader {
    root: PathBuf,
}

impl DirLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RecordLoader for DirLoader {
    fn name(&self) -> &str {
        "dir"
    }

    async fn load(&self, pointer: &FilePointer) -> Result<LoadedBatch, LoadError> {
        let path = self
            .root
            .join(&pointer.bucket_name)
            .join(&pointer.folder_name)
            .join(&pointer.file_name);

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::NotFound(path.display().to_string())
            } else {
                LoadError::Io(e)
            }
        })?;

        let mut batch = LoadedBatch::default();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<BiometricRecord>(trimmed) {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    batch.malformed_lines += 1;
                    debug!(path = %path.display(), error = %e, "skipping undecodable record line");
                }
            }
        }
        Ok(batch)
    }
}

/// In-memory loader keyed by file name, for tests and scripted runs.
#[derive(Default)]
pub struct MemoryLoader {
    batches: FxHashMap<String, Vec<BiometricRecord>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(
        mut self,
        file_name: impl Into<String>,
        records: Vec<BiometricRecord>,
    ) -> Self {
        self.batches.insert(file_name.into(), records);
        self
    }
}

#[async_trait]
impl RecordLoader for MemoryLoader {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, pointer: &FilePointer) -> Result<LoadedBatch, LoadError> {
        match self.batches.get(&pointer.file_name) {
            Some(records) => Ok(LoadedBatch {
                records: records.clone(),
                malformed_lines: 0,
            }),
            None => Err(LoadError::NotFound(pointer.file_name.clone())),
        }
    }
}
