//! Data types for a copy run.

use std::fmt;
use std::time::Duration;

use blobshift_transfer::{PartSize, Sha256Digest};
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, ErrorKind};

/// Where the object is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    pub container: String,
    pub object: String,
}

impl SourceLocator {
    pub fn new(container: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.object)
    }
}

/// Where the object is written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTarget {
    pub bucket: String,
    pub key: String,
}

impl ObjectTarget {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Destination-assigned multipart upload identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadId(pub String);

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token the destination returns for an accepted part (ETag-like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartToken(pub String);

/// A part reference sent with the completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub token: PartToken,
}

/// Tuning knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Upper bound on outstanding part uploads. Reads and digest updates stay
    /// sequential regardless. Values below 1 are treated as 1.
    pub max_in_flight: usize,
    /// Deadline applied to each range read and each part upload.
    pub io_timeout: Option<Duration>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            io_timeout: None,
        }
    }
}

/// Input of a copy run.
///
/// The source and sink clients are passed to
/// [`ChunkedTransferEngine::run`](crate::ChunkedTransferEngine::run) and only
/// borrowed for the duration of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: SourceLocator,
    pub target: ObjectTarget,
    pub part_size: PartSize,
    pub options: TransferOptions,
}

impl TransferRequest {
    /// A request with the default 100 MiB part size and sequential uploads.
    pub fn new(source: SourceLocator, target: ObjectTarget) -> Self {
        Self {
            source,
            target,
            part_size: PartSize::default(),
            options: TransferOptions::default(),
        }
    }

    pub fn with_part_size(mut self, part_size: PartSize) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }
}

/// Lifecycle of a copy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Idle,
    Validating,
    /// Terminal: the source failed its checks, nothing was allocated.
    ValidationFailed,
    /// Terminal: the destination refused to open a session.
    InitiateFailed,
    SessionOpen,
    Transferring,
    Completing,
    /// Terminal: the object was committed.
    Completed,
    Aborting,
    /// Terminal: the session was released after a failure.
    Aborted,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::ValidationFailed
                | TransferState::InitiateFailed
                | TransferState::Completed
                | TransferState::Aborted
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, ValidationFailed)
                | (Validating, InitiateFailed)
                | (Validating, SessionOpen)
                | (SessionOpen, Transferring)
                | (Transferring, Completing)
                | (Completing, Completed)
                | (SessionOpen | Transferring | Completing, Aborting)
                | (Aborting, Aborted)
        )
    }
}

/// Outcome of a copy run.
///
/// Either `success` with `location` and `digest`, or a failure with
/// `message` and `error_kind`. `warning` is only set next to a failure, when
/// releasing the upload session failed as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Uppercase hex SHA-256 of the transferred bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub state: TransferState,
    /// Parts acknowledged by the destination.
    pub parts: u32,
    /// Bytes acknowledged by the destination.
    pub bytes: u64,
}

impl TransferResponse {
    pub fn completed(location: String, digest: Sha256Digest, parts: u32, bytes: u64) -> Self {
        Self {
            success: true,
            location: Some(location),
            digest: Some(digest.to_hex()),
            message: None,
            warning: None,
            error_kind: None,
            state: TransferState::Completed,
            parts,
            bytes,
        }
    }

    pub fn failed(
        error: &CopyError,
        state: TransferState,
        warning: Option<String>,
        parts: u32,
        bytes: u64,
    ) -> Self {
        Self {
            success: false,
            location: None,
            digest: None,
            message: Some(error.to_string()),
            warning,
            error_kind: Some(error.kind()),
            state,
            parts,
            bytes,
        }
    }

    /// Turns a completed response into a failure because the committed
    /// object hashed to `actual`. The state stays `Completed`: the object
    /// exists at the destination, it is just not the one that was sent.
    pub fn digest_mismatch(self, actual: &str) -> Self {
        let expected = self.digest.as_deref().unwrap_or("-");
        Self {
            success: false,
            location: None,
            digest: None,
            message: Some(format!(
                "destination digest mismatch: expected {expected}, file has {actual}"
            )),
            warning: None,
            error_kind: Some(ErrorKind::DigestMismatch),
            state: self.state,
            parts: self.parts,
            bytes: self.bytes,
        }
    }
}

/// Progress event emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    StateChanged {
        from: TransferState,
        to: TransferState,
    },
    /// The destination acknowledged a part.
    PartUploaded {
        part_number: u32,
        size: u64,
        /// Bytes not yet acknowledged.
        remaining: u64,
    },
    Completed {
        location: String,
        digest: String,
    },
    Failed {
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use blobshift_transfer::ChecksumAccumulator;

    #[test]
    fn request_defaults() {
        let req = TransferRequest::new(
            SourceLocator::new("media", "movie.mkv"),
            ObjectTarget::new("archive", "2024/movie.mkv"),
        );
        assert_eq!(req.part_size.get(), 100 * 1024 * 1024);
        assert_eq!(req.options.max_in_flight, 1);
        assert!(req.options.io_timeout.is_none());
        assert_eq!(req.source.to_string(), "media/movie.mkv");
        assert_eq!(req.target.to_string(), "archive/2024/movie.mkv");
    }

    #[test]
    fn state_machine_edges() {
        use TransferState::*;
        assert!(Idle.can_transition_to(Validating));
        assert!(Validating.can_transition_to(ValidationFailed));
        assert!(Transferring.can_transition_to(Aborting));
        assert!(Completing.can_transition_to(Aborting));
        assert!(!Validating.can_transition_to(Aborting));
        assert!(!Completed.can_transition_to(Aborting));
        assert!(!Idle.can_transition_to(Transferring));

        for s in [ValidationFailed, InitiateFailed, Completed, Aborted] {
            assert!(s.is_terminal());
        }
        assert!(!Aborting.is_terminal());
    }

    #[test]
    fn completed_response_shape() {
        let resp = TransferResponse::completed(
            "memory://archive/a.bin".into(),
            ChecksumAccumulator::new().finalize(),
            0,
            0,
        );
        assert!(resp.success);
        assert!(resp.location.is_some());
        assert!(resp.digest.is_some());
        assert!(resp.message.is_none());
        assert!(resp.error_kind.is_none());
    }

    #[test]
    fn failed_response_shape() {
        let err = CopyError::from(ValidationError::SourceContainerNotFound("media".into()));
        let resp = TransferResponse::failed(&err, TransferState::ValidationFailed, None, 0, 0);
        assert!(!resp.success);
        assert!(resp.location.is_none());
        assert!(resp.digest.is_none());
        assert_eq!(resp.error_kind, Some(ErrorKind::SourceContainerNotFound));
        assert!(resp.message.unwrap().contains("media"));
    }

    #[test]
    fn digest_mismatch_response_shape() {
        let resp = TransferResponse::completed(
            "memory://archive/a.bin".into(),
            ChecksumAccumulator::new().finalize(),
            0,
            0,
        )
        .digest_mismatch("00FF");
        assert!(!resp.success);
        assert!(resp.location.is_none());
        assert!(resp.digest.is_none());
        assert_eq!(resp.error_kind, Some(ErrorKind::DigestMismatch));
        let message = resp.message.unwrap();
        assert!(message.contains("E3B0C442"));
        assert!(message.contains("00FF"));
    }

    #[test]
    fn response_json_omits_empty_fields() {
        let resp = TransferResponse::completed(
            "memory://archive/a.bin".into(),
            ChecksumAccumulator::new().finalize(),
            0,
            0,
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["state"], "completed");
        assert!(json.get("message").is_none());
        assert!(json.get("warning").is_none());
    }
}
