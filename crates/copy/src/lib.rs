//! Single-object copy between a blob store and a multipart object store.
//!
//! This crate implements the **transfer logic** only. Concrete stores plug
//! in through the [`BlobSource`] and [`ObjectSink`] traits; a local
//! filesystem implementation ships in [`fs`]. In-memory stores with fault
//! injection live in `memory` behind the `testing` feature.
//!
//! # Pipeline
//!
//! 1. **Validate**: the source container and object exist, the object is
//!    sized and the part plan fits the destination's limits
//! 2. **Initiate**: open a multipart upload session
//! 3. **Transfer**: read each range in order, feed the SHA-256 digest,
//!    upload the part
//! 4. **Complete**: finalize the digest and commit the ordered part list
//!
//! Any failure after step 2 aborts the session before the run reports back.

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod fs;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod sink;
pub mod source;
pub mod types;
pub mod validator;

// Re-export primary types for convenience.
pub use coordinator::{MultipartUploadCoordinator, PartUpload, UploadSession};
pub use engine::ChunkedTransferEngine;
pub use error::{
    AbortError, CompletionError, CoordinatorError, CopyError, ErrorKind, SinkError, SourceError,
    TransferError, ValidationError,
};
pub use fs::{FsBlobSource, FsObjectSink};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryBlobSource, MemoryObjectSink, SinkCall, SinkFaults, SourceFaults};
pub use sink::{ObjectSink, SinkFuture};
pub use source::{BlobSource, SourceFuture};
pub use types::{
    CompletedPart, ObjectTarget, PartToken, SourceLocator, TransferEvent, TransferOptions,
    TransferRequest, TransferResponse, TransferState, UploadId,
};
pub use validator::{SourceHandle, Validator};
