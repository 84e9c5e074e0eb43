//! Remote Store Client Abstraction
//!
//! The coordination engine talks to the destination file system only through
//! the `UploadClient` trait:
//!
//! - `upload`: write one file, pulling bytes from a suspended `EntryBody`
//! - `create_dir_all`: recursive, idempotent directory creation
//! - `close`: release pooled connections
//!
//! Implementations:
//! - `InMemoryUploadClient`: hierarchical in-memory store for tests and dry runs
//! - `LocalFsUploadClient`: a directory tree on local disk
//! - `SimulatedUploadClient`: fault-injecting wrapper for DST
//! - `WebHdfsClient`: WebHDFS REST API (feature `webhdfs`)

pub mod body;
pub mod error;
pub mod local_fs;
pub mod memory;
pub mod simulated;
#[cfg(feature = "webhdfs")]
pub mod webhdfs;

pub use body::{BodySender, EntryBody};
pub use error::{ErrorClass, ErrorCode, UploadError};
pub use local_fs::LocalFsUploadClient;
pub use memory::{InMemoryUploadClient, InMemoryStats};
pub use simulated::{SimulatedClientConfig, SimulatedClientStats, SimulatedUploadClient};
#[cfg(feature = "webhdfs")]
pub use webhdfs::{WebHdfsClient, WebHdfsConfig};

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

/// Per-request options forwarded to the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Replica count for stores that support it
    pub replication: Option<u16>,
    /// Extra request headers, in order
    pub headers: Vec<(String, String)>,
    /// Replace an existing file at the destination
    pub overwrite: bool,
}

/// Destination store client
pub trait UploadClient: Send + Sync + 'static {
    /// Upload `body` to `path`. On failure before any byte was pulled the
    /// body is left untouched and can be retried.
    fn upload<'a>(
        &'a self,
        path: &'a str,
        body: &'a mut EntryBody,
        options: &'a UploadOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>>;

    /// Create `path` and all missing ancestors. Succeeds if it already exists.
    fn create_dir_all<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>>;

    /// Release pooled connections
    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Parent directory of a remote path, or `None` for top-level paths whose
/// parent is the root (which always exists).
pub fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let (parent, _) = trimmed.rsplit_once('/')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

/// Destination store selected from an endpoint string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `memory:` - nothing leaves the process
    Memory,
    /// `file:///dir` or a bare path
    LocalFs(PathBuf),
    /// `http://namenode:9870` / `https://...`
    WebHdfs(String),
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Endpoint {
        if endpoint == "memory:" || endpoint == "memory://" {
            Endpoint::Memory
        } else if let Some(path) = endpoint.strip_prefix("file://") {
            Endpoint::LocalFs(PathBuf::from(path))
        } else if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Endpoint::WebHdfs(endpoint.trim_end_matches('/').to_string())
        } else {
            Endpoint::LocalFs(PathBuf::from(endpoint))
        }
    }
}
