//! Configuration types for tripdata-loader
//!
//! Everything here is static: it is loaded once at startup (JSON file plus CLI
//! overrides) and handed to components as plain values.

use crate::error::{Error, Result};
use crate::types::{ArtifactFormat, Category};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which months and taxi types to process
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// First day of the range (inclusive; normalized to the first of its month)
    #[serde(default = "default_start")]
    pub start: NaiveDate,

    /// Last day of the range (inclusive)
    #[serde(default = "default_end")]
    pub end: NaiveDate,

    /// Taxi types to process (default: `["yellow"]`)
    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,

    /// Published file format (default: parquet)
    #[serde(default)]
    pub format: ArtifactFormat,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            categories: default_categories(),
            format: ArtifactFormat::default(),
        }
    }
}

/// Public archive the artifacts are downloaded from
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL; the canonical artifact name is appended to it.
    ///
    /// May contain a `{category}` placeholder for archives that group files by
    /// taxi type, e.g. `https://github.com/DataTalksClub/nyc-tlc-data/releases/download/{category}/`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for a whole download request (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl SourceConfig {
    /// Resolve the download URL for a canonical name within a category
    pub fn url_for(&self, category: &Category, canonical_name: &str) -> String {
        let base = self.base_url.replace("{category}", category.as_str());
        if base.ends_with('/') {
            format!("{}{}", base, canonical_name)
        } else {
            format!("{}/{}", base, canonical_name)
        }
    }
}

/// Local staging area
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Directory holding downloaded artifacts (default: "./staging")
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

/// Object store backend selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process store; contents vanish with the process (dry runs and tests)
    #[default]
    Memory,

    /// A directory on the local filesystem; the container is a subdirectory of `root`
    Local {
        /// Parent directory of the container directory
        root: PathBuf,
    },

    /// Amazon S3 or an S3-compatible service; credentials come from the environment
    S3 {
        /// Region (falls back to `AWS_REGION`)
        #[serde(default)]
        region: Option<String>,
        /// Custom endpoint for S3-compatible services
        #[serde(default)]
        endpoint: Option<String>,
        /// Allow plain HTTP endpoints
        #[serde(default)]
        allow_http: bool,
    },

    /// Google Cloud Storage
    Gcs {
        /// Service account JSON file (falls back to the environment)
        #[serde(default)]
        service_account_path: Option<PathBuf>,
    },
}

/// Durable destination for staged artifacts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Bucket / container identifier
    #[serde(default)]
    pub container: String,

    /// Optional key prefix, e.g. `"raw/"`
    #[serde(default)]
    pub prefix: Option<String>,

    /// Files larger than this are streamed as sequential multipart uploads (default: 8 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Backend implementation
    #[serde(default)]
    pub backend: StoreBackend,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            container: String::new(),
            prefix: None,
            chunk_size: default_chunk_size(),
            backend: StoreBackend::default(),
        }
    }
}

/// Retry policy for upload attempts
///
/// The default is a fixed 5 second pause between at most 3 attempts. A
/// `backoff_multiplier` above 1.0 turns it into exponential backoff capped at
/// `max_backoff`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts (default: 5 seconds)
    #[serde(default = "default_backoff", with = "duration_serde")]
    pub backoff: Duration,

    /// Multiplier applied to the pause after each failure (default: 1.0, i.e. fixed)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for the pause (default: 60 seconds)
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,

    /// Add random jitter to pauses (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff: default_max_backoff(),
            jitter: false,
        }
    }
}

/// Main configuration for a loader run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Months and taxi types to process
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Source archive
    #[serde(default)]
    pub source: SourceConfig,

    /// Local staging area
    #[serde(default)]
    pub staging: StagingConfig,

    /// Destination object store
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Upload retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Worker pool width for both phases (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Config {
    /// Load a configuration from a JSON file and validate it
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers", "worker pool width must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "at least one upload attempt is required",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be >= 1.0",
            ));
        }
        if self.destination.container.trim().is_empty() {
            return Err(Error::config(
                "destination.container",
                "destination container must be set",
            ));
        }
        if self.destination.chunk_size == 0 {
            return Err(Error::config(
                "destination.chunk_size",
                "chunk size must be positive",
            ));
        }
        if matches!(
            self.destination.backend,
            StoreBackend::S3 { .. } | StoreBackend::Gcs { .. }
        ) && self.destination.chunk_size < MIN_CLOUD_PART_SIZE
        {
            return Err(Error::config(
                "destination.chunk_size",
                format!(
                    "chunk size {} is below the {} byte minimum part size of cloud object stores",
                    self.destination.chunk_size, MIN_CLOUD_PART_SIZE
                ),
            ));
        }
        if self.schedule.categories.is_empty() {
            return Err(Error::config(
                "schedule.categories",
                "at least one category is required",
            ));
        }
        let probe = self.source.base_url.replace("{category}", "probe");
        let url = url::Url::parse(&probe).map_err(|e| {
            Error::config(
                "source.base_url",
                format!("invalid base URL '{}': {}", self.source.base_url, e),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(
                "source.base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        Ok(())
    }
}

fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default()
}

fn default_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 12, 31).unwrap_or_default()
}

fn default_categories() -> Vec<Category> {
    Category::new("yellow").into_iter().collect()
}

fn default_base_url() -> String {
    "https://d37ci6vzurychx.cloudfront.net/trip-data/".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

/// Smallest non-final multipart part S3 and GCS accept
const MIN_CLOUD_PART_SIZE: usize = 5 * 1024 * 1024;

fn default_chunk_size() -> usize {
    8 * 1024 * 1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

fn default_workers() -> usize {
    4
}

// Duration serialization helper (whole seconds, fractional allowed on input)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
