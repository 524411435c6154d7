//! Error types for jsondb.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors returned by store operations.
///
/// Errors are `Clone` because a batched read delivers the same outcome to
/// every waiting caller. I/O errors are shared behind an `Arc` for that.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The root directory could not be inspected or created.
    #[error("root path {} is invalid: {source}", .path.display())]
    RootPathInvalid {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The root path exists but is not a directory.
    #[error("path {} is not a directory", .path.display())]
    RootNotDirectory { path: PathBuf },

    /// A filesystem call failed.
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// A document on disk is not valid JSON.
    #[error("invalid JSON in {}\n{message}", .path.display())]
    InvalidJson { path: PathBuf, message: String },

    /// A record could not be encoded for writing.
    #[error("failed to encode record for {path}: {message}")]
    Encode { path: String, message: String },

    /// A document did not match the requested type.
    #[error("failed to decode record at {path}: {message}")]
    Decode { path: String, message: String },

    /// A read returned a directory listing where a record was expected.
    #[error("expected a record at {path} but found a listing")]
    NotARecord { path: String },

    /// The operation was dropped before it could report an outcome.
    #[error("operation on {path} was abandoned before completing")]
    Abandoned { path: String },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// True when the failure was a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io { source, .. } | Error::RootPathInvalid { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }

    /// The underlying I/O error kind, if this is an I/O failure.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io { source, .. } | Error::RootPathInvalid { source, .. } => {
                Some(source.kind())
            }
            _ => None,
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn io_error_keeps_source() {
        let e = Error::io(
            "/db/a.json",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(format!("{}", e).contains("/db/a.json"));
        assert!(e.source().is_some());
        assert_eq!(e.io_kind(), Some(io::ErrorKind::PermissionDenied));
        assert!(!e.is_not_found());
    }

    #[test]
    fn not_found_detection() {
        let e = Error::io("/db/x", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(e.is_not_found());

        let e = Error::Abandoned {
            path: "x".to_string(),
        };
        assert!(!e.is_not_found());
        assert_eq!(e.io_kind(), None);
    }

    #[test]
    fn invalid_json_names_the_file() {
        let e = Error::InvalidJson {
            path: PathBuf::from("/db/broken.json"),
            message: "expected value at line 1 column 1".to_string(),
        };
        let text = format!("{}", e);
        assert!(text.contains("/db/broken.json"));
        assert!(text.contains("expected value"));
    }

    #[test]
    fn clones_share_the_io_source() {
        let e = Error::io("/db/a.json", io::Error::other("boom"));
        let copy = e.clone();
        match (&e, &copy) {
            (Error::Io { source: a, .. }, Error::Io { source: b, .. }) => {
                assert!(Arc::ptr_eq(a, b));
            }
            _ => unreachable!(),
        }
    }
}
