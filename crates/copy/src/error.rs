//! Error taxonomy for a copy run.
//!
//! Collaborator failures ([`SourceError`], [`SinkError`]) are wrapped by the
//! phase that observed them. [`CopyError`] is the primary error of a failed
//! run; [`AbortError`] is only ever reported next to it as a warning.

use std::time::Duration;

use blobshift_transfer::PlanError;
use serde::Serialize;

/// Failure reported by a [`BlobSource`](crate::BlobSource).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by an [`ObjectSink`](crate::ObjectSink).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },

    #[error("part {part_number} is {size} bytes, below the {min} byte minimum")]
    EntityTooSmall { part_number: u32, size: u64, min: u64 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// The source failed its preconditions; no destination resource exists.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("source container not found: {0}")]
    SourceContainerNotFound(String),

    #[error("source object not found: {container}/{object}")]
    SourceObjectNotFound { container: String, object: String },

    #[error("checking source failed: {0}")]
    Source(#[source] SourceError),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// A range read or part upload failed mid-transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("reading {length} bytes at offset {offset} for part {part_number} failed: {source}")]
    RangeReadFailed {
        part_number: u32,
        offset: u64,
        length: u64,
        source: SourceError,
    },

    #[error("uploading part {part_number} failed: {source}")]
    PartUploadFailed { part_number: u32, source: SinkError },
}

/// The destination rejected the final commit.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completing upload failed: {0}")]
    CommitFailed(#[source] SinkError),
}

/// Misuse of an upload session's protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("upload session {0} is already closed")]
    SessionClosed(String),

    #[error("part {got} dispatched out of order, expected part {expected}")]
    OutOfOrder { expected: u32, got: u32 },

    #[error("part {0} was never dispatched")]
    UnknownPart(u32),

    #[error("part {0} was already acknowledged")]
    DuplicatePart(u32),

    #[error("only {acknowledged} of {dispatched} parts were acknowledged")]
    IncompleteParts { dispatched: u32, acknowledged: u32 },
}

/// Releasing an upload session failed.
#[derive(Debug, thiserror::Error)]
pub enum AbortError {
    #[error("aborting upload {upload_id} failed: {source}")]
    Rejected { upload_id: String, source: SinkError },

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Primary error of a failed copy run.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("initiating upload to {target} failed: {source}")]
    SessionInitiateFailed { target: String, source: SinkError },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("cancelled")]
    Cancelled,
}

/// Machine-matchable class of a failed run, carried in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceContainerNotFound,
    SourceObjectNotFound,
    SourceUnavailable,
    PlanRejected,
    SessionInitiateFailed,
    RangeReadFailed,
    PartUploadFailed,
    CommitFailed,
    ProtocolViolation,
    Cancelled,
    /// The committed object does not hash to the digest of the bytes sent.
    DigestMismatch,
}

impl CopyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CopyError::Validation(ValidationError::SourceContainerNotFound(_)) => {
                ErrorKind::SourceContainerNotFound
            }
            CopyError::Validation(ValidationError::SourceObjectNotFound { .. }) => {
                ErrorKind::SourceObjectNotFound
            }
            CopyError::Validation(ValidationError::Source(_)) => ErrorKind::SourceUnavailable,
            CopyError::Validation(ValidationError::Plan(_)) => ErrorKind::PlanRejected,
            CopyError::SessionInitiateFailed { .. } => ErrorKind::SessionInitiateFailed,
            CopyError::Transfer(TransferError::RangeReadFailed { .. }) => {
                ErrorKind::RangeReadFailed
            }
            CopyError::Transfer(TransferError::PartUploadFailed { .. }) => {
                ErrorKind::PartUploadFailed
            }
            CopyError::Completion(CompletionError::CommitFailed(_)) => ErrorKind::CommitFailed,
            CopyError::Coordinator(_) => ErrorKind::ProtocolViolation,
            CopyError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
