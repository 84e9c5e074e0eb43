//! Local filesystem store
//!
//! Remote paths are resolved under a base directory. Parents are never
//! created implicitly: a missing parent surfaces as `ENOENT` and goes through
//! the same directory-creation path as a remote store would.
//!
//! A failed write removes the partial file, so a retry with
//! `overwrite = false` does not trip over its own leftovers.

use super::{EntryBody, UploadClient, UploadError, UploadOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct LocalFsUploadClient {
    base_path: PathBuf,
}

impl LocalFsUploadClient {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalFsUploadClient {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Full path for a remote path; leading slashes are relative to the base
    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path.trim_start_matches('/'))
    }
}

impl UploadClient for LocalFsUploadClient {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        body: &'a mut EntryBody,
        options: &'a UploadOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>> {
        Box::pin(async move {
            let full = self.full_path(path);
            let mut open = tokio::fs::OpenOptions::new();
            open.write(true);
            if options.overwrite {
                open.create(true).truncate(true);
            } else {
                open.create_new(true);
            }
            // NotFound here means the parent is missing; nothing pulled yet
            let mut file = open.open(&full).await?;

            let written = async {
                while let Some(chunk) = body.next_chunk().await {
                    let chunk = chunk.map_err(|e| {
                        UploadError::transient(format!("reading body for {}: {}", path, e))
                    })?;
                    file.write_all(&chunk).await.map_err(|e| {
                        UploadError::transient(format!("writing {}: {}", full.display(), e))
                    })?;
                }
                file.flush().await.map_err(|e| {
                    UploadError::transient(format!("flushing {}: {}", full.display(), e))
                })
            }
            .await;

            if written.is_err() {
                drop(file);
                if let Err(e) = tokio::fs::remove_file(&full).await {
                    warn!(path = %full.display(), error = %e, "failed to remove partial file");
                }
            }
            written
        })
    }

    fn create_dir_all<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(self.full_path(path))
                .await
                .map_err(|e| match e.kind() {
                    // A file in the way is not a missing parent
                    std::io::ErrorKind::NotFound => UploadError::transient(e.to_string()),
                    _ => UploadError::from(e),
                })
        })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}
