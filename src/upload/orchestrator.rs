//! Pass Orchestrator - drives the run to convergence
//!
//! ```text
//!   InitialFanout ──(parallel scans)──► begin_sweep ──empty──► Done
//!                                            │  ▲
//!                                     non-empty │
//!                                            ▼  │
//!                                   RetrySweep (one scan)
//! ```
//!
//! The first fatal outcome ends the run: the pass's `JoinSet` is dropped,
//! aborting every worker and its in-flight uploads. Completed uploads are not
//! rolled back.

use super::archive::ArchiveEntryStream;
use super::config::UploadConfig;
use super::coordinator::UploadCoordinator;
use super::error::RunError;
use super::ledger::RetryLedger;
use super::worker::{ScanContext, ScanWorker};
use crate::store::UploadClient;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Not started yet
    Idle,
    InitialFanout,
    RetrySweep { sweep: u32, pending: usize },
    Done,
    /// Stopped by a fatal error
    Failed,
}

/// Summary of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Entries uploaded (each counted once)
    pub uploaded: u64,
    /// Full archive scans performed
    pub scans: u64,
    /// Retry sweeps after the initial fan-out
    pub sweeps: u32,
    /// Retryable failures absorbed along the way
    pub deferred: u64,
    /// Non-empty file entries in the archive
    pub entries: u64,
    /// Zero-size files skipped
    pub empty: u64,
    /// Directory creates sent to the store
    pub directories_created: u64,
    /// Callers that shared another caller's directory create
    pub creates_coalesced: u64,
}

pub struct PassOrchestrator<C: UploadClient + ?Sized> {
    config: UploadConfig,
    ctx: ScanContext<C>,
    state: PassState,
}

impl<C: UploadClient + ?Sized> PassOrchestrator<C> {
    pub fn new(client: Arc<C>, stream: ArchiveEntryStream, config: UploadConfig) -> Self {
        let ctx = ScanContext {
            stream: Arc::new(stream),
            ledger: Arc::new(RetryLedger::new(config.retries)),
            coordinator: Arc::new(UploadCoordinator::new(client)),
            options: Arc::new(config.upload_options()),
            completions: None,
        };
        PassOrchestrator {
            config,
            ctx,
            state: PassState::Idle,
        }
    }

    /// Send each uploaded remote path to `sink` as soon as it completes
    pub fn with_completion_sink(mut self, sink: mpsc::UnboundedSender<String>) -> Self {
        self.ctx.completions = Some(sink);
        self
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ctx.ledger
    }

    /// Run the fan-out and retry sweeps until nothing is left to retry
    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let mut report = RunReport::default();

        let result = self.run_passes(&mut report).await;
        if let Err(e) = result {
            self.state = PassState::Failed;
            return Err(e);
        }

        self.state = PassState::Done;
        self.ctx.coordinator.client().close().await;

        let dirs = self.ctx.coordinator.directories();
        report.directories_created = dirs.issued();
        report.creates_coalesced = dirs.coalesced();

        info!(
            uploaded = report.uploaded,
            entries = report.entries,
            scans = report.scans,
            sweeps = report.sweeps,
            deferred = report.deferred,
            directories_created = report.directories_created,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upload complete"
        );
        Ok(report)
    }

    async fn run_passes(&mut self, report: &mut RunReport) -> Result<(), RunError> {
        self.state = PassState::InitialFanout;
        info!(
            archive = %self.ctx.stream.path().display(),
            dest = self.ctx.stream.dest(),
            parallel = self.config.parallel,
            "starting initial fan-out"
        );
        self.run_pass(self.config.parallel, report).await?;

        loop {
            let need_retry = self.ctx.ledger.begin_sweep();
            if need_retry.is_empty() {
                return Ok(());
            }

            report.sweeps += 1;
            self.state = PassState::RetrySweep {
                sweep: report.sweeps,
                pending: need_retry.len(),
            };
            info!(
                sweep = report.sweeps,
                pending = need_retry.len(),
                "starting retry sweep"
            );
            self.run_pass(1, report).await?;
        }
    }

    /// Launch `workers` concurrent scans and wait for all of them
    async fn run_pass(&self, workers: usize, report: &mut RunReport) -> Result<(), RunError> {
        let mut set = JoinSet::new();
        for id in 0..workers {
            set.spawn(ScanWorker::new(id, self.ctx.clone()).run());
        }

        while let Some(joined) = set.join_next().await {
            let worker = joined??;
            debug!(
                worker = worker.worker,
                claimed = worker.scan.claimed,
                "worker done"
            );
            report.scans += 1;
            report.uploaded += worker.uploaded;
            report.deferred += worker.deferred;
            report.entries = report.entries.max(worker.scan.entries);
            report.empty = report.empty.max(worker.scan.empty);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryUploadClient, UploadError};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn archive(files: &[(&str, &[u8])]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        {
            let mut builder = tar::Builder::new(&mut file);
            for (path, data) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, path, *data).unwrap();
            }
            builder.finish().unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn orchestrator(
        store: &InMemoryUploadClient,
        file: &NamedTempFile,
        config: UploadConfig,
    ) -> PassOrchestrator<InMemoryUploadClient> {
        let stream = ArchiveEntryStream::open(
            file.path(),
            "/dest",
            config.chunk_size,
            config.chunk_queue_depth,
        )
        .unwrap();
        PassOrchestrator::new(Arc::new(store.clone()), stream, config)
    }

    #[tokio::test]
    async fn test_clean_run_single_pass() {
        let file = archive(&[("a/1", &b"one"[..]), ("a/2", &b"two"[..]), ("b/3", &b"three"[..])]);
        let store = InMemoryUploadClient::new();
        let mut orch = orchestrator(&store, &file, UploadConfig::test());

        let report = orch.run().await.unwrap();

        assert_eq!(orch.state(), PassState::Done);
        assert_eq!(report.uploaded, 3);
        assert_eq!(report.sweeps, 0);
        assert_eq!(report.scans, UploadConfig::test().parallel as u64);
        assert_eq!(store.paths(), vec!["/dest/a/1", "/dest/a/2", "/dest/b/3"]);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_transient_failure_retried_in_sweep() {
        let file = archive(&[("x", &b"data"[..])]);
        let store = InMemoryUploadClient::new();
        store.seed_dir("/dest");
        store.inject_failures("/dest/x", vec![UploadError::status(500, "boom")]);
        let mut orch = orchestrator(&store, &file, UploadConfig::test());

        let report = orch.run().await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.sweeps, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(orch.ledger().retry_count(0), None);
        assert_eq!(store.get("/dest/x").unwrap().as_ref(), b"data");
    }

    #[tokio::test]
    async fn test_definitive_failure_stops_run() {
        let file = archive(&[("x", &b"data"[..])]);
        let store = InMemoryUploadClient::new();
        store.seed_dir("/dest");
        store.inject_failures("/dest/x", vec![UploadError::status(403, "denied")]);
        let mut orch = orchestrator(&store, &file, UploadConfig::test());

        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, RunError::Upload { ordinal: 0, .. }));
        assert_eq!(orch.state(), PassState::Failed);
        assert!(!store.is_closed());
    }
}
