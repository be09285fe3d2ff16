//! Chunked transfer engine.
//!
//! Runs one source object through validate → initiate → parts → complete,
//! aborting the upload session on any failure after it was opened. Progress
//! is reported on an event channel, and the run can be cancelled.

use std::time::Duration;

use blobshift_transfer::{ChecksumAccumulator, PartPlan, PartRange, Sha256Digest, ThroughputMeter};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{MultipartUploadCoordinator, PartUpload};
use crate::error::{CopyError, SinkError, SourceError, TransferError, ValidationError};
use crate::sink::ObjectSink;
use crate::source::BlobSource;
use crate::types::{
    PartToken, TransferEvent, TransferRequest, TransferResponse, TransferState,
};
use crate::validator::Validator;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Copies single objects from a [`BlobSource`] to an [`ObjectSink`].
pub struct ChunkedTransferEngine {
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
    cancel: CancellationToken,
}

impl Default for ChunkedTransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedTransferEngine {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are dropped rather than awaited when the receiver lags, so an
    /// untaken or slow receiver never stalls a run.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Returns the token that cancels runs of this engine.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Copies `request.source` to `request.target`.
    ///
    /// Never fails: every outcome, including collaborator errors and
    /// cancellation, is reported in the returned [`TransferResponse`].
    pub async fn run(
        &self,
        request: &TransferRequest,
        source: &dyn BlobSource,
        sink: &dyn ObjectSink,
    ) -> TransferResponse {
        let mut run = TransferRun {
            request,
            source,
            events_tx: &self.events_tx,
            cancel: &self.cancel,
            state: TransferState::Idle,
            parts: 0,
            bytes: 0,
            meter: ThroughputMeter::default(),
        };

        run.transition(TransferState::Validating);
        let plan = match run.validate(sink).await {
            Ok(plan) => plan,
            Err(err) => {
                run.transition(TransferState::ValidationFailed);
                return run.fail(err, None);
            }
        };

        let mut coordinator =
            match MultipartUploadCoordinator::initiate(sink, request.target.clone()).await {
                Ok(coordinator) => coordinator,
                Err(source) => {
                    run.transition(TransferState::InitiateFailed);
                    let err = CopyError::SessionInitiateFailed {
                        target: request.target.to_string(),
                        source,
                    };
                    return run.fail(err, None);
                }
            };
        run.transition(TransferState::SessionOpen);

        match run.transfer(&mut coordinator, &plan).await {
            Ok((location, digest)) => run.succeed(location, digest),
            Err(err) => {
                run.transition(TransferState::Aborting);
                let warning = match coordinator.abort().await {
                    Ok(()) => None,
                    Err(abort_err) => {
                        warn!(
                            upload_id = %coordinator.upload_id(),
                            error = %abort_err,
                            "failed to abort upload session"
                        );
                        Some(abort_err.to_string())
                    }
                };
                run.transition(TransferState::Aborted);
                run.fail(err, warning)
            }
        }
    }
}

/// Mutable state of a single run.
struct TransferRun<'a> {
    request: &'a TransferRequest,
    source: &'a dyn BlobSource,
    events_tx: &'a mpsc::Sender<TransferEvent>,
    cancel: &'a CancellationToken,
    state: TransferState,
    parts: u32,
    bytes: u64,
    meter: ThroughputMeter,
}

type UploadOutcome = (u32, Result<PartToken, SinkError>);

impl<'a> TransferRun<'a> {
    async fn validate(&self, sink: &dyn ObjectSink) -> Result<PartPlan, CopyError> {
        let handle = Validator::new(self.source)
            .validate(&self.request.source)
            .await?;
        let plan = PartPlan::new(handle.length, self.request.part_size, &sink.limits())
            .map_err(ValidationError::from)?;

        debug!(
            source = %handle.locator,
            length = plan.object_len(),
            part_size = plan.part_size().get(),
            parts = plan.part_count(),
            "transfer planned"
        );
        Ok(plan)
    }

    /// Streams every part and commits the object.
    ///
    /// Reads are sequential and feed the checksum before their part is
    /// dispatched, so the digest follows source byte order whatever order
    /// the uploads finish in.
    async fn transfer(
        &mut self,
        coordinator: &mut MultipartUploadCoordinator<'a>,
        plan: &PartPlan,
    ) -> Result<(String, Sha256Digest), CopyError> {
        self.transition(TransferState::Transferring);

        let max_in_flight = self.request.options.max_in_flight.max(1);
        let mut checksum = ChecksumAccumulator::new();
        let mut in_flight: FuturesUnordered<PartUpload<'_>> = FuturesUnordered::new();

        for range in plan.parts() {
            while in_flight.len() >= max_in_flight {
                if let Some(outcome) = self.next_upload(&mut in_flight).await? {
                    self.acknowledge(coordinator, plan, outcome)?;
                }
            }

            self.check_cancelled()?;
            let data = self.read_part(&range).await?;
            checksum.update(&data);

            let upload = coordinator.dispatch_part(range.number, data)?;
            in_flight.push(timed_upload(range.number, upload, self.request.options.io_timeout));
        }

        while let Some(outcome) = self.next_upload(&mut in_flight).await? {
            self.acknowledge(coordinator, plan, outcome)?;
        }

        self.check_cancelled()?;
        self.transition(TransferState::Completing);

        let digest = checksum.finalize();
        let location = coordinator.complete().await?;
        Ok((location, digest))
    }

    async fn read_part(&self, range: &PartRange) -> Result<Vec<u8>, CopyError> {
        let read_failed = |source: SourceError| TransferError::RangeReadFailed {
            part_number: range.number,
            offset: range.offset,
            length: range.length,
            source,
        };

        let read = self
            .source
            .read_range(&self.request.source, range.offset, range.length);
        let result = match self.request.options.io_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .unwrap_or_else(|_| Err(SourceError::Timeout(limit))),
            None => read.await,
        };

        let data = result.map_err(read_failed)?;
        if data.len() as u64 != range.length {
            return Err(read_failed(SourceError::ShortRead {
                expected: range.length,
                actual: data.len() as u64,
            })
            .into());
        }
        Ok(data)
    }

    /// Waits for the next upload to finish, or for cancellation.
    async fn next_upload(
        &self,
        in_flight: &mut FuturesUnordered<PartUpload<'_>>,
    ) -> Result<Option<UploadOutcome>, CopyError> {
        if in_flight.is_empty() {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CopyError::Cancelled),
            outcome = in_flight.next() => Ok(outcome),
        }
    }

    fn acknowledge(
        &mut self,
        coordinator: &mut MultipartUploadCoordinator<'a>,
        plan: &PartPlan,
        (part_number, result): UploadOutcome,
    ) -> Result<(), CopyError> {
        let token = result.map_err(|source| TransferError::PartUploadFailed {
            part_number,
            source,
        })?;
        coordinator.record_part(part_number, token)?;

        let size = plan.part(part_number).map_or(0, |range| range.length);
        self.parts += 1;
        self.bytes += size;
        self.meter.record(size);

        let remaining = plan.object_len() - self.bytes;
        debug!(
            part = part_number,
            size,
            remaining,
            bytes_per_sec = self.meter.bytes_per_second() as u64,
            eta = ?self.meter.eta(remaining),
            "part uploaded"
        );
        self.emit(TransferEvent::PartUploaded {
            part_number,
            size,
            remaining,
        });
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), CopyError> {
        if self.cancel.is_cancelled() {
            Err(CopyError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, next: TransferState) {
        let allowed = self.state.can_transition_to(next);
        if !allowed {
            error!(from = ?self.state, to = ?next, "invalid transfer state transition");
        }
        debug_assert!(allowed, "invalid transition {:?} -> {:?}", self.state, next);
        let from = std::mem::replace(&mut self.state, next);
        debug!(from = ?from, to = ?next, "transfer state changed");
        self.emit(TransferEvent::StateChanged { from, to: next });
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events_tx.try_send(event);
    }

    fn succeed(&mut self, location: String, digest: Sha256Digest) -> TransferResponse {
        self.transition(TransferState::Completed);
        info!(
            source = %self.request.source,
            location = %location,
            digest = %digest,
            parts = self.parts,
            bytes = self.bytes,
            elapsed = ?self.meter.elapsed(),
            bytes_per_sec = self.meter.bytes_per_second() as u64,
            "transfer completed"
        );
        self.emit(TransferEvent::Completed {
            location: location.clone(),
            digest: digest.to_hex(),
        });
        TransferResponse::completed(location, digest, self.parts, self.bytes)
    }

    fn fail(&self, err: CopyError, warning: Option<String>) -> TransferResponse {
        error!(
            source = %self.request.source,
            target = %self.request.target,
            state = ?self.state,
            error = %err,
            "transfer failed"
        );
        self.emit(TransferEvent::Failed {
            error: err.to_string(),
        });
        TransferResponse::failed(&err, self.state, warning, self.parts, self.bytes)
    }
}

/// Bounds an upload by `limit`, reporting expiry as a destination timeout.
fn timed_upload<'a>(
    part_number: u32,
    upload: PartUpload<'a>,
    limit: Option<Duration>,
) -> PartUpload<'a> {
    match limit {
        None => upload,
        Some(limit) => Box::pin(async move {
            tokio::time::timeout(limit, upload)
                .await
                .unwrap_or_else(|_| (part_number, Err(SinkError::Timeout(limit))))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBlobSource, MemoryObjectSink, SinkFaults};
    use crate::types::{ObjectTarget, SourceLocator};
    use blobshift_transfer::{MultipartLimits, PartSize, sha256_hex};

    fn request(part_size: u64) -> TransferRequest {
        TransferRequest::new(
            SourceLocator::new("media", "clip.bin"),
            ObjectTarget::new("archive", "clip.bin"),
        )
        .with_part_size(PartSize::new(part_size).unwrap())
    }

    #[tokio::test]
    async fn small_object_round_trip() {
        let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let source = MemoryBlobSource::new();
        source.insert("media", "clip.bin", content.clone());
        let sink = MemoryObjectSink::new(MultipartLimits::unlimited());

        let engine = ChunkedTransferEngine::new();
        let resp = engine.run(&request(300), &source, &sink).await;

        assert!(resp.success, "{resp:?}");
        assert_eq!(resp.state, TransferState::Completed);
        assert_eq!(resp.parts, 4);
        assert_eq!(resp.bytes, 1000);
        assert_eq!(resp.digest.as_deref(), Some(sha256_hex(&content).as_str()));
        assert_eq!(sink.object("archive", "clip.bin").unwrap(), content);
    }

    #[tokio::test]
    async fn emits_state_changes_in_order() {
        let source = MemoryBlobSource::new();
        source.insert("media", "clip.bin", vec![1; 10]);
        let sink = MemoryObjectSink::new(MultipartLimits::unlimited());

        let mut engine = ChunkedTransferEngine::new();
        let mut events = engine.take_events().unwrap();
        let resp = engine.run(&request(4), &source, &sink).await;
        assert!(resp.success);
        drop(engine);

        let mut states = Vec::new();
        let mut parts = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                TransferEvent::StateChanged { to, .. } => states.push(to),
                TransferEvent::PartUploaded { part_number, remaining, .. } => {
                    parts.push((part_number, remaining))
                }
                _ => {}
            }
        }

        use TransferState::*;
        assert_eq!(
            states,
            vec![Validating, SessionOpen, Transferring, Completing, Completed]
        );
        assert_eq!(parts, vec![(1, 6), (2, 2), (3, 0)]);
    }

    async fn edges_of(
        source: &MemoryBlobSource,
        sink: &MemoryObjectSink,
    ) -> Vec<(TransferState, TransferState)> {
        let mut engine = ChunkedTransferEngine::new();
        let mut events = engine.take_events().unwrap();
        engine.run(&request(4), source, sink).await;
        drop(engine);

        let mut edges = Vec::new();
        while let Some(event) = events.recv().await {
            if let TransferEvent::StateChanged { from, to } = event {
                edges.push((from, to));
            }
        }
        edges
    }

    #[tokio::test]
    async fn every_emitted_edge_is_allowed() {
        let source = MemoryBlobSource::new();
        source.insert("media", "clip.bin", vec![5; 10]);

        let ok = MemoryObjectSink::new(MultipartLimits::unlimited());
        let failing = MemoryObjectSink::with_faults(
            MultipartLimits::unlimited(),
            SinkFaults {
                fail_part: Some(2),
                ..SinkFaults::default()
            },
        );

        let succeeded = edges_of(&source, &ok).await;
        let aborted = edges_of(&source, &failing).await;
        assert_eq!(succeeded.last().map(|e| e.1), Some(TransferState::Completed));
        assert_eq!(aborted.last().map(|e| e.1), Some(TransferState::Aborted));

        for (from, to) in succeeded.into_iter().chain(aborted) {
            assert!(from.can_transition_to(to), "{from:?} -> {to:?}");
        }
    }

    #[tokio::test]
    async fn plan_rejected_before_initiate() {
        let source = MemoryBlobSource::new();
        source.insert("media", "clip.bin", vec![0; 100]);
        let sink = MemoryObjectSink::new(MultipartLimits {
            max_parts: 3,
            ..MultipartLimits::unlimited()
        });

        let resp = ChunkedTransferEngine::new()
            .run(&request(10), &source, &sink)
            .await;
        assert!(!resp.success);
        assert_eq!(resp.state, TransferState::ValidationFailed);
        assert_eq!(resp.error_kind, Some(crate::ErrorKind::PlanRejected));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn take_events_once() {
        let mut engine = ChunkedTransferEngine::new();
        assert!(engine.take_events().is_some());
        assert!(engine.take_events().is_none());
    }

    #[tokio::test]
    async fn untaken_events_never_block() {
        let source = MemoryBlobSource::new();
        source.insert("media", "clip.bin", vec![3; 600]);
        let sink = MemoryObjectSink::new(MultipartLimits::unlimited());

        // 600 parts produce far more events than the channel holds.
        let resp = ChunkedTransferEngine::new()
            .run(&request(1), &source, &sink)
            .await;
        assert!(resp.success);
        assert_eq!(resp.parts, 600);
    }
}
