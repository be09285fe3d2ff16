use std::path::{Component, Path};

use crate::Error;

/// Validates that an object key or container name can be joined onto a
/// store root without escaping it.
///
/// Rejects:
/// - Empty keys
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
/// - Keys that name no file (`.`, `./`)
pub fn validate_object_key(key: &str) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::InvalidKey("empty key".into()));
    }

    let path = Path::new(key);

    if path.is_absolute() {
        return Err(Error::InvalidKey(format!("absolute path not allowed: {key}")));
    }

    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(Error::InvalidKey(format!(
                    "parent directory traversal not allowed: {key}"
                )));
            }
            Component::Prefix(_) => {
                return Err(Error::InvalidKey(format!("path prefix not allowed: {key}")));
            }
            Component::RootDir => {
                return Err(Error::InvalidKey(format!("absolute path not allowed: {key}")));
            }
            Component::CurDir => {}
            Component::Normal(_) => normal += 1,
        }
    }

    if normal == 0 {
        return Err(Error::InvalidKey(format!("key names no object: {key}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key() {
        assert!(validate_object_key("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_object_key("../../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_nested_parent_dir_traversal() {
        assert!(validate_object_key("backups/../../../escape").is_err());
    }

    #[test]
    fn rejects_absolute_unix_path() {
        assert!(validate_object_key("/tmp/malicious").is_err());
    }

    #[test]
    fn rejects_current_dir_only() {
        assert!(validate_object_key(".").is_err());
        assert!(validate_object_key("./").is_err());
    }

    #[test]
    fn accepts_simple_key() {
        assert!(validate_object_key("video.mp4").is_ok());
    }

    #[test]
    fn accepts_prefixed_key() {
        assert!(validate_object_key("2024/archive/video.mp4").is_ok());
    }

    #[test]
    fn accepts_dotfile() {
        assert!(validate_object_key(".manifest/index.json").is_ok());
    }

    #[test]
    fn accepts_current_dir_prefix() {
        assert!(validate_object_key("./video.mp4").is_ok());
    }

    #[test]
    fn error_names_the_key() {
        let err = validate_object_key("../file.txt").unwrap_err();
        assert!(matches!(err, Error::InvalidKey(ref msg) if msg.contains("../file.txt")));
    }
}
