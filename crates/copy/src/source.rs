//! Source blob store capability.

use std::future::Future;
use std::pin::Pin;

use crate::error::SourceError;
use crate::types::SourceLocator;

/// A boxed future returned by [`BlobSource`] methods.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Read-only access to a container/object blob store.
///
/// Implementations may be shared by unrelated runs; the engine only reads.
pub trait BlobSource: Send + Sync {
    /// Returns whether `container` exists.
    fn container_exists<'a>(&'a self, container: &'a str) -> SourceFuture<'a, bool>;

    /// Returns whether the object exists inside its container.
    fn object_exists<'a>(&'a self, locator: &'a SourceLocator) -> SourceFuture<'a, bool>;

    /// Returns the object length in bytes.
    fn length<'a>(&'a self, locator: &'a SourceLocator) -> SourceFuture<'a, u64>;

    /// Reads `[offset, offset + length)` of the object.
    fn read_range<'a>(
        &'a self,
        locator: &'a SourceLocator,
        offset: u64,
        length: u64,
    ) -> SourceFuture<'a, Vec<u8>>;
}
