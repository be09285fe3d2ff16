//! Stateful wrapper around one multipart upload session.
//!
//! The coordinator hands out part numbers strictly in order starting at 1,
//! tracks which parts the destination acknowledged, and makes sure the
//! session ends in exactly one `complete` or `abort`.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::error::{
    AbortError, CompletionError, CoordinatorError, CopyError, SinkError, TransferError,
};
use crate::sink::ObjectSink;
use crate::types::{CompletedPart, ObjectTarget, PartToken, UploadId};

/// An in-flight part upload. Resolves to the part number and the
/// destination's answer.
pub type PartUpload<'a> = Pin<Box<dyn Future<Output = (u32, Result<PartToken, SinkError>)> + Send + 'a>>;

/// Destination-side session state: id, target and acknowledged parts.
#[derive(Debug, Clone)]
pub struct UploadSession {
    upload_id: UploadId,
    target: ObjectTarget,
    parts: BTreeMap<u32, PartToken>,
}

impl UploadSession {
    pub fn upload_id(&self) -> &UploadId {
        &self.upload_id
    }

    pub fn target(&self) -> &ObjectTarget {
        &self.target
    }

    /// Acknowledged parts in ascending part-number order.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.parts
            .iter()
            .map(|(&part_number, token)| CompletedPart {
                part_number,
                token: token.clone(),
            })
            .collect()
    }
}

/// Drives initiate → parts → complete/abort for one session.
pub struct MultipartUploadCoordinator<'a> {
    sink: &'a dyn ObjectSink,
    session: UploadSession,
    next_part: u32,
    closed: bool,
}

impl<'a> MultipartUploadCoordinator<'a> {
    /// Opens a new session on `sink`.
    pub async fn initiate(sink: &'a dyn ObjectSink, target: ObjectTarget) -> Result<Self, SinkError> {
        let upload_id = sink.initiate(&target).await?;
        debug!(upload_id = %upload_id, target = %target, "upload session opened");
        Ok(Self {
            sink,
            session: UploadSession {
                upload_id,
                target,
                parts: BTreeMap::new(),
            },
            next_part: 1,
            closed: false,
        })
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn upload_id(&self) -> &UploadId {
        &self.session.upload_id
    }

    /// Parts handed to the destination so far.
    pub fn dispatched(&self) -> u32 {
        self.next_part - 1
    }

    /// Parts the destination acknowledged so far.
    pub fn acknowledged(&self) -> u32 {
        self.session.parts.len() as u32
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Starts uploading part `part_number`, which must be the next number in
    /// sequence. The returned future does not borrow the coordinator, so
    /// several uploads may be outstanding while others are recorded.
    pub fn dispatch_part(
        &mut self,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<PartUpload<'a>, CoordinatorError> {
        self.ensure_open()?;
        if part_number != self.next_part {
            return Err(CoordinatorError::OutOfOrder {
                expected: self.next_part,
                got: part_number,
            });
        }
        self.next_part += 1;

        let sink = self.sink;
        let target = self.session.target.clone();
        let upload_id = self.session.upload_id.clone();
        Ok(Box::pin(async move {
            let result = sink
                .upload_part(&target, &upload_id, part_number, data)
                .await;
            (part_number, result)
        }))
    }

    /// Records the destination's token for a dispatched part.
    pub fn record_part(&mut self, part_number: u32, token: PartToken) -> Result<(), CoordinatorError> {
        self.ensure_open()?;
        if part_number == 0 || part_number >= self.next_part {
            return Err(CoordinatorError::UnknownPart(part_number));
        }
        if self.session.parts.contains_key(&part_number) {
            return Err(CoordinatorError::DuplicatePart(part_number));
        }
        self.session.parts.insert(part_number, token);
        Ok(())
    }

    /// Uploads the next part and records its token.
    pub async fn upload_part(&mut self, part_number: u32, data: Vec<u8>) -> Result<PartToken, CopyError> {
        let (part_number, result) = self.dispatch_part(part_number, data)?.await;
        let token = result.map_err(|source| TransferError::PartUploadFailed {
            part_number,
            source,
        })?;
        self.record_part(part_number, token.clone())?;
        Ok(token)
    }

    /// Commits the object. Every dispatched part must be acknowledged; the
    /// list sent to the destination is ordered by part number and may be
    /// empty. On failure the session stays open and must be aborted.
    pub async fn complete(&mut self) -> Result<String, CopyError> {
        self.ensure_open()?;
        let dispatched = self.dispatched();
        let acknowledged = self.acknowledged();
        if acknowledged != dispatched {
            return Err(CoordinatorError::IncompleteParts {
                dispatched,
                acknowledged,
            }
            .into());
        }

        let parts = self.session.completed_parts();
        let location = self
            .sink
            .complete(&self.session.target, &self.session.upload_id, &parts)
            .await
            .map_err(CompletionError::CommitFailed)?;

        self.closed = true;
        debug!(upload_id = %self.session.upload_id, parts = parts.len(), "upload session completed");
        Ok(location)
    }

    /// Releases the session. Only one abort is attempted: the session is
    /// closed even when the destination reports a failure.
    pub async fn abort(&mut self) -> Result<(), AbortError> {
        self.ensure_open()?;
        self.closed = true;

        self.sink
            .abort(&self.session.target, &self.session.upload_id)
            .await
            .map_err(|source| AbortError::Rejected {
                upload_id: self.session.upload_id.to_string(),
                source,
            })?;

        debug!(upload_id = %self.session.upload_id, "upload session aborted");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), CoordinatorError> {
        if self.closed {
            Err(CoordinatorError::SessionClosed(self.session.upload_id.to_string()))
        } else {
            Ok(())
        }
    }
}

impl Drop for MultipartUploadCoordinator<'_> {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                upload_id = %self.session.upload_id,
                target = %self.session.target,
                "upload session dropped while open; destination storage may be orphaned"
            );
        }
    }
}
