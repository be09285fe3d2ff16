//! Destination multipart object store capability.

use std::future::Future;
use std::pin::Pin;

use blobshift_transfer::MultipartLimits;

use crate::error::SinkError;
use crate::types::{CompletedPart, ObjectTarget, PartToken, UploadId};

/// A boxed future returned by [`ObjectSink`] methods.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SinkError>> + Send + 'a>>;

/// Multipart upload protocol of a destination store.
///
/// Every `initiate` opens a distinct session. A session must end with exactly
/// one `complete` or `abort`; uncommitted parts keep consuming storage until
/// it is aborted.
pub trait ObjectSink: Send + Sync {
    /// Opens a new upload session for `target`.
    fn initiate<'a>(&'a self, target: &'a ObjectTarget) -> SinkFuture<'a, UploadId>;

    /// Uploads one part. The protocol does not require contiguous numbers.
    fn upload_part<'a>(
        &'a self,
        target: &'a ObjectTarget,
        upload_id: &'a UploadId,
        part_number: u32,
        data: Vec<u8>,
    ) -> SinkFuture<'a, PartToken>;

    /// Commits the object from `parts` (ascending part numbers) and returns
    /// its location. May reject a session whose parts were all accepted.
    fn complete<'a>(
        &'a self,
        target: &'a ObjectTarget,
        upload_id: &'a UploadId,
        parts: &'a [CompletedPart],
    ) -> SinkFuture<'a, String>;

    /// Discards the session and any uploaded parts.
    fn abort<'a>(&'a self, target: &'a ObjectTarget, upload_id: &'a UploadId)
    -> SinkFuture<'a, ()>;

    /// Protocol limits used to reject impossible plans before `initiate`.
    fn limits(&self) -> MultipartLimits {
        MultipartLimits::default()
    }
}
