//! Incremental SHA-256 over an ordered sequence of byte chunks.
//!
//! Digests render as uppercase hex with no separators.

use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::Error;

// ---------------------------------------------------------------------------
// One-shot helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the uppercase hex digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut acc = ChecksumAccumulator::new();
    acc.update(data);
    acc.finalize().to_hex()
}

/// Computes SHA-256 of an entire file and returns the uppercase hex digest.
pub fn file_sha256_hex(path: &Path) -> Result<String, Error> {
    let mut file = std::fs::File::open(path)?;
    let mut acc = ChecksumAccumulator::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        acc.update(&buf[..n]);
    }
    Ok(acc.finalize().to_hex())
}

// ---------------------------------------------------------------------------
// Sha256Digest
// ---------------------------------------------------------------------------

/// A finished 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Uppercase hex without separators, the form reported to callers.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Lowercase hex, for comparing against tools such as `sha256sum`.
    pub fn to_lower_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Digest({})", self.to_hex())
    }
}

impl Serialize for Sha256Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// ChecksumAccumulator
// ---------------------------------------------------------------------------

/// Incremental SHA-256 over chunks supplied in source byte order.
///
/// The accumulator cannot reorder input: each [`update`](Self::update) is
/// appended to the running state. [`finalize`](Self::finalize) takes the
/// accumulator by value, so a second finalize or an update after finalize
/// does not compile:
///
/// ```compile_fail
/// use blobshift_transfer::ChecksumAccumulator;
///
/// let mut acc = ChecksumAccumulator::new();
/// acc.update(b"abc");
/// let _digest = acc.finalize();
/// acc.update(b"def");
/// ```
///
/// Finalizing without any update yields the digest of the empty input.
#[derive(Clone, Default)]
pub struct ChecksumAccumulator {
    hasher: Sha256,
    bytes: u64,
    updates: u64,
}

impl ChecksumAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the digest input.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
        self.updates += 1;
    }

    /// Total bytes fed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Number of `update` calls so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Consumes the accumulator and returns the digest.
    pub fn finalize(self) -> Sha256Digest {
        Sha256Digest(self.hasher.finalize().into())
    }
}

impl fmt::Debug for ChecksumAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumAccumulator")
            .field("bytes", &self.bytes)
            .field("updates", &self.updates)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855";

    #[test]
    fn sha256_hex_deterministic() {
        let c1 = sha256_hex(b"hello world");
        let c2 = sha256_hex(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn sha256_hex_is_uppercase() {
        let c = sha256_hex(b"abc");
        assert_eq!(
            c,
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
        assert!(!c.chars().any(|ch| ch.is_ascii_lowercase()));
    }

    #[test]
    fn finalize_without_updates_is_empty_digest() {
        let acc = ChecksumAccumulator::new();
        assert_eq!(acc.updates(), 0);
        assert_eq!(acc.finalize().to_hex(), EMPTY_SHA256);
    }

    #[test]
    fn chunked_updates_match_single_update() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let whole = sha256_hex(&data);

        for chunk_size in [1, 7, 64, 4096, 9_999, 10_000] {
            let mut acc = ChecksumAccumulator::new();
            for chunk in data.chunks(chunk_size) {
                acc.update(chunk);
            }
            assert_eq!(acc.bytes(), data.len() as u64);
            assert_eq!(acc.finalize().to_hex(), whole, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn order_matters() {
        let mut forward = ChecksumAccumulator::new();
        forward.update(b"AAAA");
        forward.update(b"BBBB");

        let mut reversed = ChecksumAccumulator::new();
        reversed.update(b"BBBB");
        reversed.update(b"AAAA");

        assert_ne!(forward.finalize(), reversed.finalize());
    }

    #[test]
    fn empty_update_does_not_change_digest() {
        let mut acc = ChecksumAccumulator::new();
        acc.update(b"");
        assert_eq!(acc.updates(), 1);
        assert_eq!(acc.finalize().to_hex(), EMPTY_SHA256);
    }

    #[test]
    fn digest_formats() {
        let mut acc = ChecksumAccumulator::new();
        acc.update(b"abc");
        let digest = acc.finalize();
        assert_eq!(digest.to_lower_hex(), digest.to_hex().to_lowercase());
        assert_eq!(digest.to_string(), digest.to_hex());
        assert_eq!(digest.as_bytes()[0], 0xBA);
    }

    #[test]
    fn file_checksum_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let data = b"test content for checksum";
        let path = dir.path().join("test.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(data)
            .unwrap();

        assert_eq!(file_sha256_hex(&path).unwrap(), sha256_hex(data));
    }

    #[test]
    fn file_checksum_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = file_sha256_hex(&dir.path().join("missing.bin"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
