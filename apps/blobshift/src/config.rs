//! Run configuration.
//!
//! Configuration is a TOML file naming the source object, the destination
//! and the transfer tuning:
//!
//! ```toml
//! part_size = 104857600
//! max_in_flight = 2
//!
//! [source]
//! root = "/srv/blobs"
//! container = "media"
//! object = "movie.mkv"
//!
//! [destination]
//! root = "/mnt/archive"
//! bucket = "videos"
//! key = "2024/movie.mkv"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use blobshift_copy::{ObjectTarget, SourceLocator, TransferOptions, TransferRequest};
use blobshift_transfer::{DEFAULT_PART_SIZE, PartSize};
use serde::{Deserialize, Serialize};

/// Where the object is read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory holding one sub-directory per container.
    pub root: PathBuf,
    pub container: String,
    pub object: String,
}

/// Where the object is written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Directory holding one sub-directory per bucket.
    pub root: PathBuf,
    pub bucket: String,
    pub key: String,

    /// Create the bucket directory if it does not exist.
    #[serde(default)]
    pub create_bucket: bool,
}

/// Transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,

    /// Part size in bytes.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Concurrent part uploads.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Deadline for each range read and part upload, in seconds.
    #[serde(default)]
    pub io_timeout_secs: Option<u64>,

    /// Re-hash the destination file after a successful copy.
    #[serde(default)]
    pub verify: bool,
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_max_in_flight() -> usize {
    1
}

impl Config {
    /// Loads configuration from `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Builds the engine request described by this configuration.
    pub fn request(&self) -> anyhow::Result<TransferRequest> {
        let part_size = PartSize::new(self.part_size).context("part_size must be positive")?;
        let options = TransferOptions {
            max_in_flight: self.max_in_flight.max(1),
            io_timeout: self.io_timeout_secs.map(Duration::from_secs),
        };

        Ok(TransferRequest::new(
            SourceLocator::new(&self.source.container, &self.source.object),
            ObjectTarget::new(&self.destination.bucket, &self.destination.key),
        )
        .with_part_size(part_size)
        .with_options(options))
    }
}
