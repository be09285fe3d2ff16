//! Source precondition checks run before any destination resource exists.

use tracing::debug;

use crate::error::ValidationError;
use crate::source::BlobSource;
use crate::types::SourceLocator;

/// A source object that passed validation, with its length captured once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHandle {
    pub locator: SourceLocator,
    pub length: u64,
}

pub struct Validator<'a> {
    source: &'a dyn BlobSource,
}

impl<'a> Validator<'a> {
    pub fn new(source: &'a dyn BlobSource) -> Self {
        Self { source }
    }

    /// Checks the container, then the object, then reads the length.
    ///
    /// The container is checked first so a missing container is never
    /// reported as a missing object.
    pub async fn validate(&self, locator: &SourceLocator) -> Result<SourceHandle, ValidationError> {
        let container_found = self
            .source
            .container_exists(&locator.container)
            .await
            .map_err(ValidationError::Source)?;
        if !container_found {
            return Err(ValidationError::SourceContainerNotFound(
                locator.container.clone(),
            ));
        }

        let object_found = self
            .source
            .object_exists(locator)
            .await
            .map_err(ValidationError::Source)?;
        if !object_found {
            return Err(ValidationError::SourceObjectNotFound {
                container: locator.container.clone(),
                object: locator.object.clone(),
            });
        }

        let length = self
            .source
            .length(locator)
            .await
            .map_err(ValidationError::Source)?;
        debug!(source = %locator, length, "source validated");

        Ok(SourceHandle {
            locator: locator.clone(),
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobSource;

    #[tokio::test]
    async fn existing_object_yields_length() {
        let source = MemoryBlobSource::new();
        source.insert("media", "clip.mp4", vec![7; 1234]);

        let handle = Validator::new(&source)
            .validate(&SourceLocator::new("media", "clip.mp4"))
            .await
            .unwrap();
        assert_eq!(handle.length, 1234);
    }

    #[tokio::test]
    async fn missing_container_wins_over_missing_object() {
        let source = MemoryBlobSource::new();
        let err = Validator::new(&source)
            .validate(&SourceLocator::new("nope", "clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::SourceContainerNotFound(c) if c == "nope"));
    }

    #[tokio::test]
    async fn missing_object() {
        let source = MemoryBlobSource::new();
        source.create_container("media");
        let err = Validator::new(&source)
            .validate(&SourceLocator::new("media", "clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::SourceObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_object_is_valid() {
        let source = MemoryBlobSource::new();
        source.insert("media", "empty", Vec::new());
        let handle = Validator::new(&source)
            .validate(&SourceLocator::new("media", "empty"))
            .await
            .unwrap();
        assert_eq!(handle.length, 0);
    }
}
