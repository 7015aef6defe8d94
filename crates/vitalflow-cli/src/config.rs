//! Configuration file support for Vitalflow
//!
//! Supports both YAML and TOML configuration files.
//!
//! # Example YAML configuration:
//! ```yaml
//! # Vitalflow configuration file
//!
//! # Pointer log to replay
//! pointer_file: /data/pointers.jsonl
//!
//! # Root directory holding the record batches
//! data_dir: /data
//!
//! # Engine settings (windows, watermarks, partitioning)
//! pipeline:
//!   partitions: 4
//!   allowed_lateness_secs: 300
//!
//! # Result sinks
//! sinks:
//!   console: true
//!   steps_file: /out/steps.jsonl
//!   joined_file: /out/joined.jsonl
//!
//! # Recommendation service
//! enrichment:
//!   endpoint: "http://localhost:8600/recommend"
//!
//! # Prometheus endpoint
//! metrics:
//!   enabled: true
//!   port: 9090
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vitalflow_core::PipelineConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Pointer log to replay (one JSON pointer per line)
    pub pointer_file: Option<PathBuf>,

    /// Root directory the loader resolves object paths against
    pub data_dir: Option<PathBuf>,

    /// Engine configuration (windows, lateness, partitions, buffers)
    pub pipeline: PipelineConfig,

    /// Result sink configuration
    pub sinks: SinksConfig,

    /// Recommendation service configuration
    pub enrichment: EnrichmentConfig,

    /// Metrics endpoint configuration
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Result sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    /// Print published summaries to stdout
    pub console: bool,

    /// Human-readable console lines instead of JSON
    pub pretty: bool,

    /// File for step summaries (JSON lines); requires `joined_file` too
    pub steps_file: Option<PathBuf>,

    /// File for joined summaries (JSON lines); requires `steps_file` too
    pub joined_file: Option<PathBuf>,

    /// POST every summary to this URL
    pub http_url: Option<String>,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            console: true,
            pretty: true,
            steps_file: None,
            joined_file: None,
            http_url: None,
        }
    }
}

/// Recommendation service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Recommendation endpoint; the built-in threshold rules are used when
    /// not set
    pub endpoint: Option<String>,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics
    pub enabled: bool,

    /// Bind address
    pub bind: String,

    /// Metrics port
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => {
                // Try YAML first, then TOML
                Self::from_yaml(&content).or_else(|_| Self::from_toml(&content))
            }
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Self {
            pointer_file: Some(PathBuf::from("/data/pointers.jsonl")),
            data_dir: Some(PathBuf::from("/data")),
            pipeline: PipelineConfig::default(),
            sinks: SinksConfig {
                console: true,
                pretty: false,
                steps_file: Some(PathBuf::from("/out/steps.jsonl")),
                joined_file: Some(PathBuf::from("/out/joined.jsonl")),
                http_url: None,
            },
            enrichment: EnrichmentConfig {
                endpoint: Some("http://localhost:8600/recommend".to_string()),
            },
            metrics: MetricsConfig {
                enabled: true,
                bind: "127.0.0.1".to_string(),
                port: 9090,
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Generate example YAML configuration
    pub fn example_yaml() -> String {
        serde_yaml::to_string(&Self::example()).unwrap_or_default()
    }

    /// Generate example TOML configuration
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.pointer_file.is_none());
        assert!(config.sinks.console);
        assert_eq!(config.pipeline.partitions, 4);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
pointer_file: /data/pointers.jsonl
data_dir: /data
pipeline:
  partitions: 8
  allowed_lateness_secs: 120
sinks:
  console: false
  http_url: "http://sink:8080/results"
metrics:
  enabled: true
  port: 9100
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.pointer_file,
            Some(PathBuf::from("/data/pointers.jsonl"))
        );
        assert_eq!(config.pipeline.partitions, 8);
        assert_eq!(config.pipeline.allowed_lateness_secs, 120);
        // Unset engine knobs keep their defaults
        assert_eq!(config.pipeline.short_steps_secs, 300);
        assert!(!config.sinks.console);
        assert_eq!(
            config.sinks.http_url.as_deref(),
            Some("http://sink:8080/results")
        );
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
pointer_file = "/data/pointers.jsonl"

[pipeline]
partitions = 2

[enrichment]
endpoint = "http://recs:8600/recommend"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(
            config.pointer_file,
            Some(PathBuf::from("/data/pointers.jsonl"))
        );
        assert_eq!(config.pipeline.partitions, 2);
        assert_eq!(
            config.enrichment.endpoint.as_deref(),
            Some("http://recs:8600/recommend")
        );
    }

    #[test]
    fn test_example_round_trips() {
        let config = Config::from_yaml(&Config::example_yaml()).unwrap();
        assert!(config.metrics.enabled);
        assert!(config.pipeline.validate().is_ok());

        let config = Config::from_toml(&Config::example_toml()).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/data")));
    }

    #[test]
    fn test_parsed_pipeline_can_fail_validation() {
        let yaml = r#"
pipeline:
  partitions: 0
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.pipeline.validate().is_err());
    }
}
