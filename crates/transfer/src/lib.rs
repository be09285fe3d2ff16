//! Byte-level building blocks for chunked object transfer.
//!
//! - [`checksum`]: ordered SHA-256 accumulation over transferred ranges.
//! - [`plan`]: part-size arithmetic and multipart protocol limits.
//! - [`progress`]: sliding-window throughput measurement.
//! - [`validation`]: object key validation for path-backed stores.

pub mod checksum;
pub mod plan;
pub mod progress;
pub mod validation;

pub use checksum::{ChecksumAccumulator, Sha256Digest, file_sha256_hex, sha256_hex};
pub use plan::{
    DEFAULT_PART_SIZE, MultipartLimits, PartPlan, PartRange, PartSize, PartSizeError, PlanError,
};
pub use progress::ThroughputMeter;
pub use validation::validate_object_key;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object key: {0}")]
    InvalidKey(String),
}
