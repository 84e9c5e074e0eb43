//! Upload Error Taxonomy
//!
//! Every store failure is an `UploadError` carrying an optional
//! missing-parent code and an optional numeric status. `classify` decides
//! how the coordination engine reacts:
//!
//! | Condition                         | Class           |
//! |-----------------------------------|-----------------|
//! | `code` is set                     | `MissingParent` |
//! | `status < 500`                    | `Definitive`    |
//! | `status >= 500` or no status      | `Transient`     |

use std::io::{Error as IoError, ErrorKind};

/// Recognized "missing parent directory" codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// POSIX-style `ENOENT`, reported by filesystem-like backends
    Enoent,
    /// WebHDFS `RemoteException` of type `FileNotFoundException`
    FileNotFound,
}

impl ErrorCode {
    /// Map a backend-reported code name to a recognized code
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ENOENT" => Some(ErrorCode::Enoent),
            "FileNotFoundException" | "java.io.FileNotFoundException" => {
                Some(ErrorCode::FileNotFound)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Enoent => "ENOENT",
            ErrorCode::FileNotFound => "FileNotFoundException",
        }
    }
}

/// How the engine treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retryable in a later sweep, up to the configured limit
    Transient,
    /// Client/protocol failure; fatal on first occurrence
    Definitive,
    /// Parent directory missing; routed to directory creation
    MissingParent,
}

/// Failure reported by an `UploadClient`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadError {
    pub code: Option<ErrorCode>,
    pub status: Option<u16>,
    pub message: String,
}

impl UploadError {
    /// Failure with no status (connectivity, timeouts)
    pub fn transient(message: impl Into<String>) -> Self {
        UploadError {
            code: None,
            status: None,
            message: message.into(),
        }
    }

    /// Failure carrying an HTTP-style status
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        UploadError {
            code: None,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Missing parent directory failure
    pub fn missing_parent(code: ErrorCode, message: impl Into<String>) -> Self {
        UploadError {
            code: Some(code),
            status: None,
            message: message.into(),
        }
    }

    pub fn classify(&self) -> ErrorClass {
        if self.code.is_some() {
            return ErrorClass::MissingParent;
        }
        match self.status {
            Some(status) if status < 500 => ErrorClass::Definitive,
            _ => ErrorClass::Transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.classify() == ErrorClass::Transient
    }

    /// Reclassify a missing-parent failure that persisted after the
    /// directory was created. The result is always `Definitive`.
    pub fn into_definitive(self) -> Self {
        let status = match self.status {
            Some(status) if status < 500 => status,
            _ => 404,
        };
        UploadError {
            code: None,
            status: Some(status),
            message: self.message,
        }
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.status) {
            (Some(code), Some(status)) => {
                write!(f, "{} ({}, status {})", self.message, code.as_str(), status)
            }
            (Some(code), None) => write!(f, "{} ({})", self.message, code.as_str()),
            (None, Some(status)) => write!(f, "{} (status {})", self.message, status),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<IoError> for UploadError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => UploadError::missing_parent(ErrorCode::Enoent, e.to_string()),
            ErrorKind::PermissionDenied => UploadError::status(403, e.to_string()),
            ErrorKind::AlreadyExists => UploadError::status(409, e.to_string()),
            ErrorKind::InvalidInput => UploadError::status(400, e.to_string()),
            _ => UploadError::transient(e.to_string()),
        }
    }
}
