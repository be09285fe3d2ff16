//! Local filesystem collaborators.
//!
//! [`FsBlobSource`] maps containers to directories and objects to files
//! under a root. [`FsObjectSink`] maps buckets to directories and stages
//! multipart uploads under `<root>/.multipart/<upload-id>/` until they are
//! completed or aborted.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use blobshift_transfer::{ChecksumAccumulator, MultipartLimits, sha256_hex, validate_object_key};
use tracing::debug;

use crate::error::{SinkError, SourceError};
use crate::sink::{ObjectSink, SinkFuture};
use crate::source::{BlobSource, SourceFuture};
use crate::types::{CompletedPart, ObjectTarget, PartToken, SourceLocator, UploadId};

/// Staging directory name under the sink root.
pub const STAGING_DIR: &str = ".multipart";

const COPY_BUFFER: usize = 64 * 1024;

fn join_error(e: tokio::task::JoinError) -> io::Error {
    io::Error::other(format!("task join error: {e}"))
}

/// Container and bucket names are a single path segment.
fn is_single_segment(name: &str) -> bool {
    validate_object_key(name).is_ok()
        && !name.contains(['/', '\\'])
        && name != STAGING_DIR
}

// ---------------------------------------------------------------------------
// FsBlobSource
// ---------------------------------------------------------------------------

/// Reads objects from files under `root/<container>/<object>`.
#[derive(Debug, Clone)]
pub struct FsBlobSource {
    root: PathBuf,
}

impl FsBlobSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn container_path(&self, container: &str) -> Result<PathBuf, SourceError> {
        if !is_single_segment(container) {
            return Err(SourceError::InvalidName(container.to_string()));
        }
        Ok(self.root.join(container))
    }

    fn object_path(&self, locator: &SourceLocator) -> Result<PathBuf, SourceError> {
        validate_object_key(&locator.object)
            .map_err(|e| SourceError::InvalidName(e.to_string()))?;
        Ok(self.container_path(&locator.container)?.join(&locator.object))
    }
}

async fn metadata(path: &Path) -> Result<Option<fs::Metadata>, io::Error> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl BlobSource for FsBlobSource {
    fn container_exists<'a>(&'a self, container: &'a str) -> SourceFuture<'a, bool> {
        Box::pin(async move {
            let path = self.container_path(container)?;
            Ok(metadata(&path).await?.is_some_and(|m| m.is_dir()))
        })
    }

    fn object_exists<'a>(&'a self, locator: &'a SourceLocator) -> SourceFuture<'a, bool> {
        Box::pin(async move {
            let path = self.object_path(locator)?;
            Ok(metadata(&path).await?.is_some_and(|m| m.is_file()))
        })
    }

    fn length<'a>(&'a self, locator: &'a SourceLocator) -> SourceFuture<'a, u64> {
        Box::pin(async move {
            let path = self.object_path(locator)?;
            Ok(tokio::fs::metadata(&path).await?.len())
        })
    }

    /// Returns fewer bytes than asked only when the file ends early.
    fn read_range<'a>(
        &'a self,
        locator: &'a SourceLocator,
        offset: u64,
        length: u64,
    ) -> SourceFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let path = self.object_path(locator)?;
            let data = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
                let mut file = File::open(&path)?;
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
                file.take(length).read_to_end(&mut buf)?;
                Ok(buf)
            })
            .await
            .map_err(join_error)??;
            Ok(data)
        })
    }
}

// ---------------------------------------------------------------------------
// FsObjectSink
// ---------------------------------------------------------------------------

/// Writes objects to `root/<bucket>/<key>` through staged multipart uploads.
///
/// Each part is stored as its own file and its token is the SHA-256 of its
/// bytes. `complete` re-hashes every part while concatenating them, so a
/// part modified on disk after upload is rejected.
#[derive(Debug, Clone)]
pub struct FsObjectSink {
    root: PathBuf,
    limits: MultipartLimits,
}

impl FsObjectSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_limits(root, MultipartLimits::default())
    }

    pub fn with_limits(root: impl Into<PathBuf>, limits: MultipartLimits) -> Self {
        Self {
            root: root.into(),
            limits,
        }
    }

    /// Path a committed object for `target` lives at.
    pub fn object_path(&self, target: &ObjectTarget) -> Result<PathBuf, SinkError> {
        if !is_single_segment(&target.bucket) {
            return Err(SinkError::NoSuchBucket(target.bucket.clone()));
        }
        validate_object_key(&target.key).map_err(|e| SinkError::InvalidKey(e.to_string()))?;
        Ok(self.root.join(&target.bucket).join(&target.key))
    }

    fn staging_path(&self, upload_id: &UploadId) -> Result<PathBuf, SinkError> {
        if !is_single_segment(&upload_id.0) {
            return Err(SinkError::NoSuchUpload(upload_id.to_string()));
        }
        Ok(self.root.join(STAGING_DIR).join(&upload_id.0))
    }

    fn staged_session(&self, upload_id: &UploadId) -> Result<PathBuf, SinkError> {
        let staging = self.staging_path(upload_id)?;
        if staging.is_dir() {
            Ok(staging)
        } else {
            Err(SinkError::NoSuchUpload(upload_id.to_string()))
        }
    }
}

fn part_file(staging: &Path, part_number: u32) -> PathBuf {
    staging.join(format!("part-{part_number:05}"))
}

/// Writes `data` next to `path` and renames it into place.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

/// Appends `part` to `out`, returning the SHA-256 of the appended bytes.
fn append_part(part: &Path, out: &mut File) -> io::Result<(String, u64)> {
    let mut input = File::open(part)?;
    let mut checksum = ChecksumAccumulator::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        checksum.update(&buf[..n]);
        out.write_all(&buf[..n])?;
    }
    let size = checksum.bytes();
    Ok((checksum.finalize().to_hex(), size))
}

fn assemble(
    staging: &Path,
    destination: &Path,
    parts: &[CompletedPart],
    min_part_size: u64,
) -> Result<(), SinkError> {
    let assembled = staging.join("assembled.tmp");
    let mut out = File::create(&assembled)?;

    let mut previous = 0;
    for (index, part) in parts.iter().enumerate() {
        if part.part_number <= previous {
            return Err(SinkError::InvalidPart {
                part_number: part.part_number,
                reason: "parts must be in ascending order".into(),
            });
        }
        previous = part.part_number;

        let path = part_file(staging, part.part_number);
        if !path.is_file() {
            return Err(SinkError::InvalidPart {
                part_number: part.part_number,
                reason: "part was never uploaded".into(),
            });
        }

        let (digest, size) = append_part(&path, &mut out)?;
        if digest != part.token.0 {
            return Err(SinkError::InvalidPart {
                part_number: part.part_number,
                reason: "token does not match uploaded data".into(),
            });
        }
        let is_last = index + 1 == parts.len();
        if !is_last && size < min_part_size {
            return Err(SinkError::EntityTooSmall {
                part_number: part.part_number,
                size,
                min: min_part_size,
            });
        }
    }
    out.sync_all()?;
    drop(out);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&assembled, destination)?;
    fs::remove_dir_all(staging)?;
    Ok(())
}

impl ObjectSink for FsObjectSink {
    fn initiate<'a>(&'a self, target: &'a ObjectTarget) -> SinkFuture<'a, UploadId> {
        Box::pin(async move {
            self.object_path(target)?;
            let bucket = self.root.join(&target.bucket);
            if !metadata(&bucket).await?.is_some_and(|m| m.is_dir()) {
                return Err(SinkError::NoSuchBucket(target.bucket.clone()));
            }

            let upload_id = UploadId(uuid::Uuid::new_v4().to_string());
            tokio::fs::create_dir_all(self.staging_path(&upload_id)?).await?;
            debug!(upload_id = %upload_id, target = %target, "staging directory created");
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

            let staging = self.staged_session(upload_id)?;
            let token = tokio::task::spawn_blocking(move || -> io::Result<PartToken> {
                let token = PartToken(sha256_hex(&data));
                write_atomic(&part_file(&staging, part_number), &data)?;
                Ok(token)
            })
            .await
            .map_err(join_error)??;
            Ok(token)
        })
    }

    fn complete<'a>(
        &'a self,
        target: &'a ObjectTarget,
        upload_id: &'a UploadId,
        parts: &'a [CompletedPart],
    ) -> SinkFuture<'a, String> {
        Box::pin(async move {
            let destination = self.object_path(target)?;
            let staging = self.staged_session(upload_id)?;
            let parts = parts.to_vec();
            let min_part_size = self.limits.min_part_size;

            let dest = destination.clone();
            tokio::task::spawn_blocking(move || assemble(&staging, &dest, &parts, min_part_size))
                .await
                .map_err(join_error)??;

            debug!(upload_id = %upload_id, path = %destination.display(), "object committed");
            Ok(format!("file://{}", destination.display()))
        })
    }

    fn abort<'a>(
        &'a self,
        _target: &'a ObjectTarget,
        upload_id: &'a UploadId,
    ) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            let staging = self.staging_path(upload_id)?;
            match tokio::fs::remove_dir_all(&staging).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(SinkError::NoSuchUpload(upload_id.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn limits(&self) -> MultipartLimits {
        self.limits
    }
}
