//! In-memory collaborators with failure injection.
//!
//! Both stores record what was asked of them so callers can assert on the
//! exact protocol traffic of a run.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use blobshift_transfer::{MultipartLimits, sha256_hex};

use crate::error::{SinkError, SourceError};
use crate::sink::{ObjectSink, SinkFuture};
use crate::source::{BlobSource, SourceFuture};
use crate::types::{CompletedPart, ObjectTarget, PartToken, SourceLocator, UploadId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Failures a [`MemoryBlobSource`] injects. Read numbers count `read_range`
/// calls from 1.
#[derive(Debug, Clone, Default)]
pub struct SourceFaults {
    pub fail_read: Option<u32>,
    pub short_read: Option<u32>,
    pub read_delay: Option<Duration>,
    pub unavailable: bool,
}

/// Blob store holding containers of objects in memory.
#[derive(Default)]
pub struct MemoryBlobSource {
    containers: Mutex<HashMap<String, HashMap<String, Arc<Vec<u8>>>>>,
    faults: SourceFaults,
    reads: AtomicU32,
}

impl MemoryBlobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: SourceFaults) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }

    pub fn create_container(&self, container: &str) {
        lock(&self.containers)
            .entry(container.to_string())
            .or_default();
    }

    /// Stores an object, creating its container if needed.
    pub fn insert(&self, container: &str, object: &str, data: Vec<u8>) {
        lock(&self.containers)
            .entry(container.to_string())
            .or_default()
            .insert(object.to_string(), Arc::new(data));
    }

    /// Number of `read_range` calls so far.
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    fn get(&self, locator: &SourceLocator) -> Option<Arc<Vec<u8>>> {
        lock(&self.containers)
            .get(&locator.container)
            .and_then(|objects| objects.get(&locator.object))
            .cloned()
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.faults.unavailable {
            Err(SourceError::Unavailable("injected outage".into()))
        } else {
            Ok(())
        }
    }
}

impl BlobSource for MemoryBlobSource {
    fn container_exists<'a>(&'a self, container: &'a str) -> SourceFuture<'a, bool> {
        Box::pin(async move {
            self.check_available()?;
            Ok(lock(&self.containers).contains_key(container))
        })
    }

    fn object_exists<'a>(&'a self, locator: &'a SourceLocator) -> SourceFuture<'a, bool> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.get(locator).is_some())
        })
    }

    fn length<'a>(&'a self, locator: &'a SourceLocator) -> SourceFuture<'a, u64> {
        Box::pin(async move {
            self.check_available()?;
            self.get(locator)
                .map(|data| data.len() as u64)
                .ok_or_else(|| SourceError::Unavailable(format!("{locator} vanished")))
        })
    }

    fn read_range<'a>(
        &'a self,
        locator: &'a SourceLocator,
        offset: u64,
        length: u64,
    ) -> SourceFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.faults.read_delay {
                tokio::time::sleep(delay).await;
            }
            if self.faults.fail_read == Some(read) {
                return Err(SourceError::Unavailable(format!(
                    "injected failure on read {read}"
                )));
            }

            let data = self
                .get(locator)
                .ok_or_else(|| SourceError::Unavailable(format!("{locator} vanished")))?;
            let start = usize::try_from(offset)
                .map_err(|_| SourceError::InvalidName(format!("offset {offset}")))?
                .min(data.len());
            let end = usize::try_from(offset.saturating_add(length))
                .unwrap_or(usize::MAX)
                .min(data.len());
            let mut chunk = data[start..end].to_vec();

            if self.faults.short_read == Some(read) {
                chunk.truncate(chunk.len() / 2);
            }
            Ok(chunk)
        })
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Failures a [`MemoryObjectSink`] injects.
#[derive(Debug, Clone, Default)]
pub struct SinkFaults {
    pub fail_initiate: bool,
    /// Reject uploads of this part number.
    pub fail_part: Option<u32>,
    pub fail_complete: bool,
    pub fail_abort: bool,
    /// Delay applied to every part upload.
    pub part_delay: Option<Duration>,
    /// Per-part delays, overriding `part_delay`.
    pub part_delays: HashMap<u32, Duration>,
}

/// One request received by a [`MemoryObjectSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Initiate {
        target: ObjectTarget,
    },
    UploadPart {
        upload_id: UploadId,
        part_number: u32,
        size: u64,
    },
    Complete {
        upload_id: UploadId,
        part_numbers: Vec<u32>,
    },
    Abort {
        upload_id: UploadId,
    },
}

struct PendingUpload {
    target: ObjectTarget,
    parts: BTreeMap<u32, Vec<u8>>,
}

#[derive(Default)]
struct SinkState {
    next_id: u64,
    uploads: HashMap<UploadId, PendingUpload>,
    objects: HashMap<(String, String), Vec<u8>>,
    calls: Vec<SinkCall>,
}

/// Multipart object store kept in memory.
///
/// Parts are tokenized by their SHA-256; `complete` checks tokens, order
/// and the minimum non-final part size before assembling the object.
pub struct MemoryObjectSink {
    limits: MultipartLimits,
    faults: SinkFaults,
    state: Mutex<SinkState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryObjectSink {
    pub fn new(limits: MultipartLimits) -> Self {
        Self::with_faults(limits, SinkFaults::default())
    }

    pub fn with_faults(limits: MultipartLimits, faults: SinkFaults) -> Self {
        Self {
            limits,
            faults,
            state: Mutex::new(SinkState::default()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// A committed object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.state)
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<SinkCall> {
        lock(&self.state).calls.clone()
    }

    /// Sessions neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        lock(&self.state).uploads.len()
    }

    /// Highest number of part uploads observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn location(target: &ObjectTarget) -> String {
        format!("memory://{}/{}", target.bucket, target.key)
    }

    fn part_delay(&self, part_number: u32) -> Option<Duration> {
        self.faults
            .part_delays
            .get(&part_number)
            .copied()
            .or(self.faults.part_delay)
    }

    fn store_part(
        &self,
        upload_id: &UploadId,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<PartToken, SinkError> {
        if part_number == 0 || part_number > self.limits.max_parts {
            return Err(SinkError::InvalidPart {
                part_number,
                reason: format!("part numbers run from 1 to {}", self.limits.max_parts),
            });
        }
        if data.len() as u64 > self.limits.max_part_size {
            return Err(SinkError::InvalidPart {
                part_number,
                reason: format!("{} bytes exceed the part maximum", data.len()),
            });
        }

        let token = PartToken(sha256_hex(&data));
        let mut state = lock(&self.state);
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| SinkError::NoSuchUpload(upload_id.to_string()))?;
        upload.parts.insert(part_number, data);
        Ok(token)
    }

    fn assemble(&self, upload_id: &UploadId, parts: &[CompletedPart]) -> Result<String, SinkError> {
        let mut state = lock(&self.state);
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| SinkError::NoSuchUpload(upload_id.to_string()))?;

        let mut object = Vec::new();
        let mut previous = 0;
        for (index, part) in parts.iter().enumerate() {
            if part.part_number <= previous {
                return Err(SinkError::InvalidPart {
                    part_number: part.part_number,
                    reason: "parts must be in ascending order".into(),
                });
            }
            previous = part.part_number;

            let data = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| SinkError::InvalidPart {
                    part_number: part.part_number,
                    reason: "part was never uploaded".into(),
                })?;
            if sha256_hex(data) != part.token.0 {
                return Err(SinkError::InvalidPart {
                    part_number: part.part_number,
                    reason: "token does not match uploaded data".into(),
                });
            }
            let is_last = index + 1 == parts.len();
            if !is_last && (data.len() as u64) < self.limits.min_part_size {
                return Err(SinkError::EntityTooSmall {
                    part_number: part.part_number,
                    size: data.len() as u64,
                    min: self.limits.min_part_size,
                });
            }
            object.extend_from_slice(data);
        }

        let Some(upload) = state.uploads.remove(upload_id) else {
            return Err(SinkError::NoSuchUpload(upload_id.to_string()));
        };
        let location = Self::location(&upload.target);
        state
            .objects
            .insert((upload.target.bucket, upload.target.key), object);
        Ok(location)
    }
}

impl ObjectSink for MemoryObjectSink {
    fn initiate<'a>(&'a self, target: &'a ObjectTarget) -> SinkFuture<'a, UploadId> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(SinkCall::Initiate {
                target: target.clone(),
            });
            if self.faults.fail_initiate {
                return Err(SinkError::NoSuchBucket(target.bucket.clone()));
            }

            state.next_id += 1;
            let upload_id = UploadId(format!("mem-upload-{}", state.next_id));
            state.uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    target: target.clone(),
                    parts: BTreeMap::new(),
                },
            );
            Ok(upload_id)
        })
    }

    fn upload_part<'a>(
        &'a self,
        _target: &'a ObjectTarget,
        upload_id: &'a UploadId,
        part_number: u32,
        data: Vec<u8>,
    ) -> SinkFuture<'a, PartToken> {
        Box::pin(async move {
            lock(&self.state).calls.push(SinkCall::UploadPart {
                upload_id: upload_id.clone(),
                part_number,
                size: data.len() as u64,
            });

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.part_delay(part_number) {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.faults.fail_part == Some(part_number) {
                return Err(SinkError::Rejected(format!(
                    "injected failure for part {part_number}"
                )));
            }
            self.store_part(upload_id, part_number, data)
        })
    }

    fn complete<'a>(
        &'a self,
        _target: &'a ObjectTarget,
        upload_id: &'a UploadId,
        parts: &'a [CompletedPart],
    ) -> SinkFuture<'a, String> {
        Box::pin(async move {
            lock(&self.state).calls.push(SinkCall::Complete {
                upload_id: upload_id.clone(),
                part_numbers: parts.iter().map(|p| p.part_number).collect(),
            });
            if self.faults.fail_complete {
                return Err(SinkError::Rejected("injected commit failure".into()));
            }
            self.assemble(upload_id, parts)
        })
    }

    fn abort<'a>(
        &'a self,
        _target: &'a ObjectTarget,
        upload_id: &'a UploadId,
    ) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(SinkCall::Abort {
                upload_id: upload_id.clone(),
            });
            if self.faults.fail_abort {
                return Err(SinkError::Rejected("injected abort failure".into()));
            }
            state
                .uploads
                .remove(upload_id)
                .map(|_| ())
                .ok_or_else(|| SinkError::NoSuchUpload(upload_id.to_string()))
        })
    }

    fn limits(&self) -> MultipartLimits {
        self.limits
    }
}
