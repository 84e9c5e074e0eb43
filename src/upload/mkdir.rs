//! Directory Create Coordinator
//!
//! Collapses concurrent "create missing parent" requests for the same
//! directory into one `create_dir_all` call. The first caller for a path
//! issues the request; callers arriving while it is outstanding queue a
//! waiter and receive the same outcome.

use crate::store::{UploadClient, UploadError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

type Waiter = oneshot::Sender<Result<(), UploadError>>;

pub struct DirectoryCreateCoordinator<C: UploadClient + ?Sized> {
    client: Arc<C>,
    /// A key exists iff a create for that path is outstanding
    pending: Mutex<HashMap<String, Vec<Waiter>>>,
    issued: AtomicU64,
    coalesced: AtomicU64,
}

/// Removes the pending entry if the initiating task is dropped before the
/// create resolves. Waiters then see a closed channel.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, Vec<Waiter>>>,
    dir: &'a str,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.lock().remove(self.dir);
        }
    }
}

impl<C: UploadClient + ?Sized> DirectoryCreateCoordinator<C> {
    pub fn new(client: Arc<C>) -> Self {
        DirectoryCreateCoordinator {
            client,
            pending: Mutex::new(HashMap::new()),
            issued: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Ensure `dir` exists, sharing an outstanding create if there is one
    pub async fn ensure_dir(&self, dir: &str) -> Result<(), UploadError> {
        let rx = {
            let mut pending = self.pending.lock();
            match pending.get_mut(dir) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    pending.insert(dir.to_string(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = rx {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(dir, "joining outstanding directory create");
            return rx.await.unwrap_or_else(|_| {
                Err(UploadError::transient(format!(
                    "directory create for {} abandoned",
                    dir
                )))
            });
        }

        let mut guard = PendingGuard {
            pending: &self.pending,
            dir,
            armed: true,
        };

        self.issued.fetch_add(1, Ordering::Relaxed);
        debug!(dir, "creating directory");
        let result = self.client.create_dir_all(dir).await;

        // Remove the marker and release waiters in one step
        let waiters = self.pending.lock().remove(dir).unwrap_or_default();
        guard.armed = false;
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Create calls sent to the store
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Callers that shared another caller's create
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryUploadClient;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_creates_coalesce() {
        let store = InMemoryUploadClient::new().with_mkdir_latency(Duration::from_millis(50));
        let coordinator = Arc::new(DirectoryCreateCoordinator::new(Arc::new(store.clone())));

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.ensure_dir("/dest/a").await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.stats().creates("/dest/a"), 1);
        assert_eq!(coordinator.issued(), 1);
        assert_eq!(coordinator.coalesced(), 2);
        assert_eq!(coordinator.outstanding(), 0);
        assert!(store.dir_exists("/dest/a"));
    }

    #[tokio::test]
    async fn test_waiters_share_failure() {
        let store = InMemoryUploadClient::new().with_mkdir_latency(Duration::from_millis(50));
        store.inject_mkdir_failures("/d", vec![UploadError::status(503, "busy")]);
        let coordinator = Arc::new(DirectoryCreateCoordinator::new(Arc::new(store.clone())));

        let a = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.ensure_dir("/d").await })
        };
        let b = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.ensure_dir("/d").await })
        };

        let a = a.await.unwrap().unwrap_err();
        let b = b.await.unwrap().unwrap_err();
        assert_eq!(a, b);
        assert_eq!(a.status, Some(503));
        assert_eq!(store.stats().creates("/d"), 1);
    }

    #[tokio::test]
    async fn test_sequential_creates_are_not_coalesced() {
        let store = InMemoryUploadClient::new();
        let coordinator = DirectoryCreateCoordinator::new(Arc::new(store.clone()));

        coordinator.ensure_dir("/x").await.unwrap();
        coordinator.ensure_dir("/x").await.unwrap();

        assert_eq!(coordinator.issued(), 2);
        assert_eq!(coordinator.coalesced(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_initiator_releases_marker() {
        let store = InMemoryUploadClient::new().with_mkdir_latency(Duration::from_millis(200));
        let coordinator = Arc::new(DirectoryCreateCoordinator::new(Arc::new(store.clone())));

        let initiator = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.ensure_dir("/slow").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.ensure_dir("/slow").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        initiator.abort();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_transient());
        assert_eq!(coordinator.outstanding(), 0);
    }
}
