//! Part-size arithmetic for multipart transfers.
//!
//! For an object of length `L` and part size `P` the plan yields
//! `ceil(L / P)` contiguous ranges, all of length `P` except possibly the
//! last. A zero-length object yields no parts.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// Default part size: 100 MiB.
pub const DEFAULT_PART_SIZE: u64 = 100 * 1024 * 1024;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

const DEFAULT_NONZERO: NonZeroU64 = match NonZeroU64::new(DEFAULT_PART_SIZE) {
    Some(size) => size,
    None => panic!("default part size is zero"),
};

/// Error returned for a zero part size.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("part size must be greater than zero")]
pub struct PartSizeError;

/// A validated, non-zero part size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PartSize(NonZeroU64);

impl PartSize {
    pub fn new(bytes: u64) -> Result<Self, PartSizeError> {
        NonZeroU64::new(bytes).map(Self).ok_or(PartSizeError)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl Default for PartSize {
    fn default() -> Self {
        Self(DEFAULT_NONZERO)
    }
}

impl TryFrom<u64> for PartSize {
    type Error = PartSizeError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartSize> for u64 {
    fn from(size: PartSize) -> Self {
        size.get()
    }
}

// ---------------------------------------------------------------------------
// MultipartLimits
// ---------------------------------------------------------------------------

/// Protocol limits imposed by a destination's multipart convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartLimits {
    /// Largest allowed part.
    pub max_part_size: u64,
    /// Largest allowed number of parts per object.
    pub max_parts: u32,
    /// Smallest allowed part, except for the final one. Checked by the
    /// destination when the upload is completed, not by the plan.
    pub min_part_size: u64,
}

impl MultipartLimits {
    /// Limits that accept any plan.
    pub const fn unlimited() -> Self {
        Self {
            max_part_size: u64::MAX,
            max_parts: u32::MAX,
            min_part_size: 0,
        }
    }
}

impl Default for MultipartLimits {
    /// The S3 convention: 5 GiB parts, 10 000 parts, 5 MiB minimum.
    fn default() -> Self {
        Self {
            max_part_size: 5 * GIB,
            max_parts: 10_000,
            min_part_size: 5 * MIB,
        }
    }
}

/// A plan that cannot be executed within the destination's limits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("part size {part_size} exceeds the destination maximum of {max} bytes")]
    PartSizeTooLarge { part_size: u64, max: u64 },

    #[error("{parts} parts exceed the destination maximum of {max} parts per object")]
    TooManyParts { parts: u64, max: u32 },
}

// ---------------------------------------------------------------------------
// PartPlan
// ---------------------------------------------------------------------------

/// One planned part: a 1-based number and a byte range of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub number: u32,
    pub offset: u64,
    pub length: u64,
}

impl PartRange {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Partition of an object into fixed-size ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    object_len: u64,
    part_size: PartSize,
    part_count: u32,
}

impl PartPlan {
    /// Plans `object_len` bytes in parts of `part_size`, rejecting plans the
    /// destination could not accept.
    pub fn new(
        object_len: u64,
        part_size: PartSize,
        limits: &MultipartLimits,
    ) -> Result<Self, PlanError> {
        let size = part_size.get();
        if size > limits.max_part_size {
            return Err(PlanError::PartSizeTooLarge {
                part_size: size,
                max: limits.max_part_size,
            });
        }

        let parts = object_len.div_ceil(size);
        if parts > u64::from(limits.max_parts) {
            return Err(PlanError::TooManyParts {
                parts,
                max: limits.max_parts,
            });
        }

        Ok(Self {
            object_len,
            part_size,
            // Bounded by `max_parts` above.
            part_count: parts as u32,
        })
    }

    pub fn object_len(&self) -> u64 {
        self.object_len
    }

    pub fn part_size(&self) -> PartSize {
        self.part_size
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    pub fn is_empty(&self) -> bool {
        self.part_count == 0
    }

    /// Returns part `number` (1-based), or `None` if out of range.
    pub fn part(&self, number: u32) -> Option<PartRange> {
        if number == 0 || number > self.part_count {
            return None;
        }
        let size = self.part_size.get();
        let offset = u64::from(number - 1) * size;
        let length = size.min(self.object_len - offset);
        Some(PartRange {
            number,
            offset,
            length,
        })
    }

    /// Iterates parts in ascending order.
    pub fn parts(&self) -> Parts {
        Parts {
            plan: *self,
            next: 1,
        }
    }
}

/// Iterator over the parts of a [`PartPlan`].
#[derive(Debug, Clone)]
pub struct Parts {
    plan: PartPlan,
    next: u64,
}

impl Iterator for Parts {
    type Item = PartRange;

    fn next(&mut self) -> Option<PartRange> {
        let part = self.plan.part(u32::try_from(self.next).ok()?)?;
        self.next += 1;
        Some(part)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (u64::from(self.plan.part_count) + 1 - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Parts {}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(len: u64, size: u64) -> PartPlan {
        PartPlan::new(len, PartSize::new(size).unwrap(), &MultipartLimits::unlimited()).unwrap()
    }

    #[test]
    fn zero_part_size_rejected() {
        assert_eq!(PartSize::new(0), Err(PartSizeError));
        assert!(PartSize::try_from(0u64).is_err());
    }

    #[test]
    fn default_part_size_is_100_mib() {
        assert_eq!(PartSize::default().get(), 104_857_600);
    }

    #[test]
    fn part_size_deserializes_from_integer() {
        #[derive(Deserialize)]
        struct Wrapper {
            size: PartSize,
        }
        let w: Wrapper = serde_json::from_str(r#"{"size": 4096}"#).unwrap();
        assert_eq!(w.size.get(), 4096);
        assert!(serde_json::from_str::<Wrapper>(r#"{"size": 0}"#).is_err());
    }

    #[test]
    fn zero_length_object_has_no_parts() {
        let p = plan(0, 10);
        assert!(p.is_empty());
        assert_eq!(p.parts().count(), 0);
        assert!(p.part(1).is_none());
    }

    #[test]
    fn uneven_split() {
        let mib = 1024 * 1024;
        let p = plan(250 * mib, 100 * mib);
        let lengths: Vec<u64> = p.parts().map(|r| r.length).collect();
        assert_eq!(lengths, vec![100 * mib, 100 * mib, 50 * mib]);

        let offsets: Vec<u64> = p.parts().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 100 * mib, 200 * mib]);
    }

    #[test]
    fn exact_multiple_keeps_full_last_part() {
        let p = plan(30, 10);
        assert_eq!(p.part_count(), 3);
        assert_eq!(p.part(3).unwrap().length, 10);
        assert_eq!(p.part(3).unwrap().end(), 30);
    }

    #[test]
    fn part_larger_than_object() {
        let p = plan(5, 100);
        assert_eq!(p.part_count(), 1);
        assert_eq!(p.part(1).unwrap().length, 5);
    }

    #[test]
    fn iterator_reports_exact_len() {
        let p = plan(95, 10);
        let mut parts = p.parts();
        assert_eq!(parts.len(), 10);
        parts.next();
        assert_eq!(parts.len(), 9);
    }

    #[test]
    fn rejects_part_above_max() {
        let limits = MultipartLimits::default();
        let err = PartPlan::new(1, PartSize::new(6 * GIB).unwrap(), &limits).unwrap_err();
        assert!(matches!(err, PlanError::PartSizeTooLarge { .. }));
    }

    #[test]
    fn rejects_too_many_parts() {
        let limits = MultipartLimits::default();
        // 10 001 parts of 5 MiB.
        let len = 10_001 * 5 * MIB;
        let err = PartPlan::new(len, PartSize::new(5 * MIB).unwrap(), &limits).unwrap_err();
        assert_eq!(
            err,
            PlanError::TooManyParts {
                parts: 10_001,
                max: 10_000
            }
        );

        // Exactly at the limit is fine.
        let ok = PartPlan::new(10_000 * 5 * MIB, PartSize::new(5 * MIB).unwrap(), &limits).unwrap();
        assert_eq!(ok.part_count(), 10_000);
    }

    #[test]
    fn huge_object_tiny_parts_does_not_overflow() {
        let err = PartPlan::new(u64::MAX, PartSize::new(1).unwrap(), &MultipartLimits::default())
            .unwrap_err();
        assert!(matches!(err, PlanError::TooManyParts { .. }));
    }
}
