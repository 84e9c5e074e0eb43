//! Run-level errors
//!
//! Retryable upload failures never reach this level; they are absorbed by the
//! ledger. Everything here stops the run.

use crate::store::UploadError;
use std::io;
use std::path::PathBuf;

/// Failure reading the local archive
#[derive(Debug)]
pub enum ArchiveError {
    /// Archive could not be opened
    Open { path: PathBuf, source: io::Error },
    /// Archive path is not a regular file (it must be re-readable per sweep)
    NotAFile(PathBuf),
    /// Malformed or truncated archive
    Read(io::Error),
    /// Entry name that cannot be mapped under the destination
    InvalidPath(String),
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Open { path, source } => {
                write!(f, "opening archive {}: {}", path.display(), source)
            }
            ArchiveError::NotAFile(path) => {
                write!(f, "archive {} is not a regular file", path.display())
            }
            ArchiveError::Read(e) => write!(f, "reading archive: {}", e),
            ArchiveError::InvalidPath(p) => write!(f, "invalid entry path in archive: {}", p),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Open { source, .. } => Some(source),
            ArchiveError::Read(e) => Some(e),
            _ => None,
        }
    }
}

/// Fatal outcome of an upload run
#[derive(Debug)]
pub enum RunError {
    /// Definitive failure for one entry
    Upload {
        ordinal: u64,
        path: String,
        error: UploadError,
    },
    /// Transient failures exceeded the retry limit
    RetriesExhausted {
        ordinal: u64,
        path: String,
        attempts: u32,
        error: UploadError,
    },
    Archive(ArchiveError),
    /// A worker task panicked or was cancelled
    Worker(String),
}

impl RunError {
    /// Remote path of the entry that stopped the run, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            RunError::Upload { path, .. } | RunError::RetriesExhausted { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Upload {
                ordinal,
                path,
                error,
            } => write!(f, "uploading {} (entry {}): {}", path, ordinal, error),
            RunError::RetriesExhausted {
                ordinal,
                path,
                attempts,
                error,
            } => write!(
                f,
                "uploading {} (entry {}) failed {} times, last error: {}",
                path, ordinal, attempts, error
            ),
            RunError::Archive(e) => write!(f, "{}", e),
            RunError::Worker(msg) => write!(f, "worker failed: {}", msg),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Upload { error, .. } | RunError::RetriesExhausted { error, .. } => {
                Some(error)
            }
            RunError::Archive(e) => Some(e),
            RunError::Worker(_) => None,
        }
    }
}

impl From<ArchiveError> for RunError {
    fn from(e: ArchiveError) -> Self {
        RunError::Archive(e)
    }
}

impl From<tokio::task::JoinError> for RunError {
    fn from(e: tokio::task::JoinError) -> Self {
        RunError::Worker(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = RunError::RetriesExhausted {
            ordinal: 7,
            path: "/dest/a".to_string(),
            attempts: 4,
            error: UploadError::status(500, "boom"),
        };
        assert_eq!(
            err.to_string(),
            "uploading /dest/a (entry 7) failed 4 times, last error: boom (status 500)"
        );
        assert_eq!(err.path(), Some("/dest/a"));

        let err = RunError::from(ArchiveError::InvalidPath("../x".to_string()));
        assert_eq!(err.to_string(), "invalid entry path in archive: ../x");
        assert_eq!(err.path(), None);
    }
}
