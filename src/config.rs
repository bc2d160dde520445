//! Configuration for the conversion pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a conversion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source data configuration
    pub source: SourceConfig,

    /// Input cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Target store configuration
    pub target: TargetConfig,

    /// Execution configuration
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Source data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// S3 bucket containing the source objects.
    /// Mutually exclusive with local_path.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Local filesystem directory containing the source objects.
    /// Mutually exclusive with bucket.
    #[serde(default)]
    pub local_path: Option<String>,

    /// AWS region for the source bucket
    #[serde(default = "default_region")]
    pub region: String,

    /// Whether the source bucket is public (anonymous access, no credentials)
    #[serde(default = "default_true")]
    pub anonymous: bool,

    /// Ordered object keys of the source files, one per input unit
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Size of one record in bytes
    #[serde(default = "default_record_bytes")]
    pub record_bytes: u64,

    /// Number of records in each source file
    #[serde(default = "default_records_per_input")]
    pub records_per_input: u64,
}

/// Input cache configuration.
///
/// When enabled, the plan includes an input-caching stage that copies every
/// source file into the cache store before any chunk is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable input caching
    #[serde(default)]
    pub enabled: bool,

    /// S3 bucket for cached inputs. Mutually exclusive with local_path.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Local filesystem directory for cached inputs.
    /// Mutually exclusive with bucket.
    #[serde(default)]
    pub local_path: Option<String>,

    /// Key prefix within the cache store
    #[serde(default)]
    pub prefix: Option<String>,

    /// Maximum memory for the in-process block cache in GB
    #[serde(default = "default_block_cache_gb")]
    pub block_cache_gb: f64,
}

/// Target store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Local filesystem path for the output store.
    /// If set, output is written to local disk instead of S3.
    /// Mutually exclusive with bucket/prefix.
    #[serde(default)]
    pub local_path: Option<String>,

    /// Output S3 bucket (required if local_path is not set)
    #[serde(default)]
    pub bucket: Option<String>,

    /// Output S3 path prefix (required if local_path is not set)
    #[serde(default)]
    pub prefix: Option<String>,

    /// Number of records per target chunk
    #[serde(default = "default_records_per_chunk")]
    pub records_per_chunk: u64,
}

impl TargetConfig {
    /// Check if output is to local filesystem.
    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }

    /// Get the output path as a display string (local path or s3:// URI).
    pub fn path_display(&self) -> String {
        if let Some(path) = &self.local_path {
            path.clone()
        } else {
            format!(
                "s3://{}/{}",
                self.bucket.as_deref().unwrap_or(""),
                self.prefix.as_deref().unwrap_or("")
            )
        }
    }
}

/// Execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Number of concurrent invocations within one mapped stage
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Retry configuration for failed invocations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Optional path to save metrics JSON after the run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            worker_threads: None,
            enable_metrics: true,
            metrics_interval_secs: 10,
            retry: RetryConfig::default(),
            metrics_output_path: None,
        }
    }
}

/// Retry configuration for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.source.bucket, &self.source.local_path) {
            (Some(_), Some(_)) => {
                anyhow::bail!("Cannot specify both source bucket and local_path");
            }
            (None, None) => {
                anyhow::bail!("Must specify either source bucket or local_path");
            }
            _ => {}
        }

        match (&self.target.local_path, &self.target.bucket, &self.target.prefix) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                anyhow::bail!("Cannot specify both target local_path and bucket/prefix");
            }
            (None, None, _) | (None, _, None) => {
                anyhow::bail!("Must specify either target local_path or both bucket and prefix");
            }
            _ => {}
        }

        if self.cache.enabled {
            match (&self.cache.bucket, &self.cache.local_path) {
                (Some(_), Some(_)) => {
                    anyhow::bail!("Cannot specify both cache bucket and local_path");
                }
                (None, None) => {
                    anyhow::bail!("Cache is enabled but has no bucket or local_path");
                }
                _ => {}
            }
        }

        if self.source.record_bytes == 0 {
            anyhow::bail!("Record size must be > 0");
        }
        if self.source.records_per_input == 0 {
            anyhow::bail!("Records per input must be > 0");
        }
        if self.target.records_per_chunk == 0 {
            anyhow::bail!("Records per chunk must be > 0");
        }
        if self.execution.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_true() -> bool {
    true
}
fn default_record_bytes() -> u64 {
    1024
}
fn default_records_per_input() -> u64 {
    1024
}
fn default_records_per_chunk() -> u64 {
    4096
}
fn default_concurrency() -> usize {
    16
}
fn default_metrics_interval() -> u64 {
    10
}
fn default_max_retries() -> usize {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    10000
}
fn default_block_cache_gb() -> f64 {
    1.0
}
