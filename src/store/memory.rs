//! In-memory hierarchical store
//!
//! Unlike a flat object store, uploads fail with `ENOENT` when the parent
//! directory does not exist, so the directory-creation path is exercised
//! exactly as against a real file system. Used by unit tests, DST and the
//! `memory:` dry-run endpoint.

use super::{parent_dir, EntryBody, ErrorCode, UploadClient, UploadError, UploadOptions};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters observed by tests and DST invariant checks
#[derive(Debug, Clone, Default)]
pub struct InMemoryStats {
    /// Upload calls per path, including failed ones
    pub upload_attempts: HashMap<String, u64>,
    /// `create_dir_all` calls per requested path
    pub create_calls: HashMap<String, u64>,
    /// Highest number of simultaneous creates seen for any single path
    pub max_concurrent_creates: u32,
}

impl InMemoryStats {
    pub fn total_create_calls(&self) -> u64 {
        self.create_calls.values().sum()
    }

    pub fn attempts(&self, path: &str) -> u64 {
        self.upload_attempts.get(path).copied().unwrap_or(0)
    }

    pub fn creates(&self, path: &str) -> u64 {
        self.create_calls.get(path).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct Hierarchy {
    dirs: HashSet<String>,
    files: HashMap<String, Bytes>,
    creates_in_flight: HashMap<String, u32>,
    /// Scripted failures returned, in order, before an upload touches the store
    upload_faults: HashMap<String, VecDeque<UploadError>>,
    mkdir_faults: HashMap<String, VecDeque<UploadError>>,
    stats: InMemoryStats,
}

impl Hierarchy {
    fn dir_exists(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    /// Every ancestor of `path` (excluding the root) followed by `path`
    fn ancestors(path: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = Some(path.trim_end_matches('/'));
        while let Some(p) = current {
            if p.is_empty() {
                break;
            }
            out.push(p.to_string());
            current = parent_dir(p);
        }
        out.reverse();
        out
    }
}

/// Hierarchical in-memory store; clones share state
#[derive(Debug, Clone, Default)]
pub struct InMemoryUploadClient {
    state: Arc<RwLock<Hierarchy>>,
    mkdir_latency: Option<Duration>,
    closed: Arc<AtomicBool>,
}

impl InMemoryUploadClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `create_dir_all` call, widening the window in which
    /// concurrent uploads race on the same missing directory
    pub fn with_mkdir_latency(mut self, latency: Duration) -> Self {
        self.mkdir_latency = Some(latency);
        self
    }

    /// Queue failures for the next uploads to `path`
    pub fn inject_failures(&self, path: &str, errors: impl IntoIterator<Item = UploadError>) {
        self.state
            .write()
            .upload_faults
            .entry(path.to_string())
            .or_default()
            .extend(errors);
    }

    /// Queue failures for the next creates of `path`
    pub fn inject_mkdir_failures(&self, path: &str, errors: impl IntoIterator<Item = UploadError>) {
        self.state
            .write()
            .mkdir_faults
            .entry(path.to_string())
            .or_default()
            .extend(errors);
    }

    /// Pre-create a directory without counting it as a create call
    pub fn seed_dir(&self, path: &str) {
        let mut state = self.state.write();
        for dir in Hierarchy::ancestors(path) {
            state.dirs.insert(dir);
        }
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.state.read().files.get(path).cloned()
    }

    pub fn dir_exists(&self, path: &str) -> bool {
        self.state.read().dir_exists(path)
    }

    /// Stored file paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.read().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.state.read().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().files.is_empty()
    }

    pub fn stats(&self) -> InMemoryStats {
        self.state.read().stats.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), UploadError> {
        if self.is_closed() {
            return Err(UploadError::transient("client closed"));
        }
        Ok(())
    }

    /// Validate the destination before any byte is pulled
    fn check_destination(&self, path: &str, options: &UploadOptions) -> Result<(), UploadError> {
        let mut state = self.state.write();
        *state
            .stats
            .upload_attempts
            .entry(path.to_string())
            .or_insert(0) += 1;

        if let Some(err) = state.upload_faults.get_mut(path).and_then(|q| q.pop_front()) {
            return Err(err);
        }

        if let Some(parent) = parent_dir(path) {
            if state.files.contains_key(parent) {
                return Err(UploadError::status(
                    409,
                    format!("parent of {} is a file", path),
                ));
            }
            if !state.dir_exists(parent) {
                return Err(UploadError::missing_parent(
                    ErrorCode::Enoent,
                    format!("parent directory {} does not exist", parent),
                ));
            }
        }

        if state.dir_exists(path) {
            return Err(UploadError::status(409, format!("{} is a directory", path)));
        }
        if !options.overwrite && state.files.contains_key(path) {
            return Err(UploadError::status(409, format!("{} already exists", path)));
        }
        Ok(())
    }
}

impl UploadClient for InMemoryUploadClient {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        body: &'a mut EntryBody,
        options: &'a UploadOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_open()?;
            self.check_destination(path, options)?;

            let data = body
                .read_to_end()
                .await
                .map_err(|e| UploadError::transient(format!("reading body for {}: {}", path, e)))?;

            self.state.write().files.insert(path.to_string(), data);
            Ok(())
        })
    }

    fn create_dir_all<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_open()?;
            let path = path.trim_end_matches('/');
            {
                let mut state = self.state.write();
                *state.stats.create_calls.entry(path.to_string()).or_insert(0) += 1;
                let in_flight = state.creates_in_flight.entry(path.to_string()).or_insert(0);
                *in_flight += 1;
                let in_flight = *in_flight;
                if in_flight > state.stats.max_concurrent_creates {
                    state.stats.max_concurrent_creates = in_flight;
                }
            }

            if let Some(latency) = self.mkdir_latency {
                tokio::time::sleep(latency).await;
            }

            let mut state = self.state.write();
            if let Some(count) = state.creates_in_flight.get_mut(path) {
                *count -= 1;
                if *count == 0 {
                    state.creates_in_flight.remove(path);
                }
            }

            if let Some(err) = state.mkdir_faults.get_mut(path).and_then(|q| q.pop_front()) {
                return Err(err);
            }

            let ancestors = Hierarchy::ancestors(path);
            if let Some(file) = ancestors.iter().find(|dir| state.files.contains_key(*dir)) {
                return Err(UploadError::status(409, format!("{} is a file", file)));
            }
            for dir in ancestors {
                state.dirs.insert(dir);
            }
            Ok(())
        })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
        })
    }
}
