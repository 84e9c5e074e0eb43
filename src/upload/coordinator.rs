//! Upload Coordinator - one entry, with the missing-parent fallback
//!
//! ```text
//! upload ──ok──────────────────────────────────────────► Ok
//!    │
//!    ├─ENOENT / FileNotFoundException─► ensure_dir(parent) ─err─► Err(create error)
//!    │                                        │ok
//!    │                                        ▼
//!    │                                  upload (once) ──ok──► Ok
//!    │                                        └─missing parent again─► Err(definitive)
//!    └─other──────────────────────────────────────────────► Err(unchanged)
//! ```

use super::mkdir::DirectoryCreateCoordinator;
use crate::store::{parent_dir, EntryBody, ErrorClass, UploadClient, UploadError, UploadOptions};
use std::sync::Arc;
use tracing::debug;

pub struct UploadCoordinator<C: UploadClient + ?Sized> {
    client: Arc<C>,
    dirs: DirectoryCreateCoordinator<C>,
}

impl<C: UploadClient + ?Sized> UploadCoordinator<C> {
    pub fn new(client: Arc<C>) -> Self {
        UploadCoordinator {
            dirs: DirectoryCreateCoordinator::new(client.clone()),
            client,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn directories(&self) -> &DirectoryCreateCoordinator<C> {
        &self.dirs
    }

    /// Upload one entry, creating its parent directory on demand
    pub async fn upload_entry(
        &self,
        path: &str,
        body: &mut EntryBody,
        options: &UploadOptions,
    ) -> Result<(), UploadError> {
        let err = match self.client.upload(path, body, options).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        if err.classify() != ErrorClass::MissingParent {
            return Err(err);
        }

        // Top-level paths have no parent to create
        let Some(parent) = parent_dir(path) else {
            return Err(err.into_definitive());
        };
        if body.is_started() {
            return Err(UploadError::transient(format!(
                "{} failed after streaming {} bytes, cannot replay: {}",
                path,
                body.received(),
                err
            )));
        }

        debug!(path, parent, "parent directory missing");
        self.dirs.ensure_dir(parent).await?;

        // Exactly one retry; a second missing parent is not re-entered
        self.client
            .upload(path, body, options)
            .await
            .map_err(|err| match err.classify() {
                ErrorClass::MissingParent => err.into_definitive(),
                _ => err,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ErrorCode, InMemoryUploadClient};
    use std::time::Duration;

    fn options() -> UploadOptions {
        UploadOptions {
            overwrite: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_direct_upload() {
        let store = InMemoryUploadClient::new();
        store.seed_dir("/dest");
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()));

        let mut body = EntryBody::from_bytes(&b"abc"[..]);
        coordinator
            .upload_entry("/dest/a.txt", &mut body, &options())
            .await
            .unwrap();
        assert_eq!(store.stats().total_create_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_parent_creates_and_retries() {
        let store = InMemoryUploadClient::new();
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()));

        let mut body = EntryBody::from_bytes(&b"abc"[..]);
        coordinator
            .upload_entry("/dest/x/a.txt", &mut body, &options())
            .await
            .unwrap();

        assert_eq!(store.get("/dest/x/a.txt").unwrap().as_ref(), b"abc");
        assert_eq!(store.stats().creates("/dest/x"), 1);
        assert_eq!(store.stats().attempts("/dest/x/a.txt"), 2);
    }

    #[tokio::test]
    async fn test_three_racers_one_create() {
        let store = InMemoryUploadClient::new().with_mkdir_latency(Duration::from_millis(30));
        let coordinator = Arc::new(UploadCoordinator::new(Arc::new(store.clone())));

        let mut tasks = Vec::new();
        for i in 0..3 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move {
                let path = format!("/dest/dir/{}.txt", i);
                let mut body = EntryBody::from_bytes(format!("file {}", i).into_bytes());
                coordinator.upload_entry(&path, &mut body, &options()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.stats().creates("/dest/dir"), 1);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_second_missing_parent_is_definitive() {
        let store = InMemoryUploadClient::new();
        store.inject_failures(
            "/dest/a.txt",
            vec![
                UploadError::missing_parent(ErrorCode::FileNotFound, "no parent"),
                UploadError::missing_parent(ErrorCode::FileNotFound, "still no parent"),
            ],
        );
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()));

        let mut body = EntryBody::from_bytes(&b"abc"[..]);
        let err = coordinator
            .upload_entry("/dest/a.txt", &mut body, &options())
            .await
            .unwrap_err();

        assert_eq!(err.classify(), ErrorClass::Definitive);
        assert_eq!(store.stats().attempts("/dest/a.txt"), 2);
        assert_eq!(store.stats().creates("/dest"), 1);
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let store = InMemoryUploadClient::new();
        store.inject_mkdir_failures("/dest", vec![UploadError::status(500, "mkdir boom")]);
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()));

        let mut body = EntryBody::from_bytes(&b"abc"[..]);
        let err = coordinator
            .upload_entry("/dest/a.txt", &mut body, &options())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(store.stats().attempts("/dest/a.txt"), 1);
    }

    #[tokio::test]
    async fn test_top_level_missing_parent_is_definitive() {
        let store = InMemoryUploadClient::new();
        store.inject_failures(
            "/a.txt",
            vec![UploadError::missing_parent(ErrorCode::Enoent, "no root")],
        );
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()));

        let mut body = EntryBody::from_bytes(&b"abc"[..]);
        let err = coordinator
            .upload_entry("/a.txt", &mut body, &options())
            .await
            .unwrap_err();
        assert_eq!(err.classify(), ErrorClass::Definitive);
        assert_eq!(store.stats().total_create_calls(), 0);
    }

    #[tokio::test]
    async fn test_other_errors_unchanged() {
        let store = InMemoryUploadClient::new();
        store.seed_dir("/dest");
        store.inject_failures("/dest/a.txt", vec![UploadError::status(403, "denied")]);
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()));

        let mut body = EntryBody::from_bytes(&b"abc"[..]);
        let err = coordinator
            .upload_entry("/dest/a.txt", &mut body, &options())
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(403));
        assert_eq!(store.stats().total_create_calls(), 0);
    }
}
