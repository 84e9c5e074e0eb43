//! Scan Worker
//!
//! One worker is one full scan of the archive. The blocking scanner claims
//! entries through the ledger and hands them over a channel; each claimed
//! entry becomes an upload task in the worker's `JoinSet`, which doubles as
//! its in-flight counter. A worker is done when the scan has finished and
//! the set has drained.
//!
//! ```text
//! spawn_blocking(scan) ──ClaimedEntry──► run() ──spawn──► JoinSet<process_entry>
//!        ▲                                                    │
//!        └───────────── RetryLedger (claim / outcome) ◄───────┘
//! ```

use super::archive::{ArchiveEntryStream, ClaimedEntry, ScanSummary};
use super::coordinator::UploadCoordinator;
use super::error::RunError;
use super::ledger::{Disposition, RetryLedger};
use crate::store::{UploadClient, UploadOptions};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

/// Shared by every worker of a run
pub(crate) struct ScanContext<C: UploadClient + ?Sized> {
    pub stream: Arc<ArchiveEntryStream>,
    pub ledger: Arc<RetryLedger>,
    pub coordinator: Arc<UploadCoordinator<C>>,
    pub options: Arc<UploadOptions>,
    pub completions: Option<mpsc::UnboundedSender<String>>,
}

impl<C: UploadClient + ?Sized> Clone for ScanContext<C> {
    fn clone(&self) -> Self {
        ScanContext {
            stream: self.stream.clone(),
            ledger: self.ledger.clone(),
            coordinator: self.coordinator.clone(),
            options: self.options.clone(),
            completions: self.completions.clone(),
        }
    }
}

/// Outcome of one claimed entry that did not stop the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Uploaded,
    Deferred,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub worker: usize,
    pub scan: ScanSummary,
    pub uploaded: u64,
    pub deferred: u64,
}

pub(crate) struct ScanWorker<C: UploadClient + ?Sized> {
    id: usize,
    ctx: ScanContext<C>,
}

impl<C: UploadClient + ?Sized> ScanWorker<C> {
    pub fn new(id: usize, ctx: ScanContext<C>) -> Self {
        ScanWorker { id, ctx }
    }

    /// Scan the archive once and wait for every upload this scan started.
    /// Returns on the first fatal outcome; dropping the in-flight set aborts
    /// the remaining uploads and the scanner stops at its next send.
    pub async fn run(self) -> Result<WorkerReport, RunError> {
        let mut report = WorkerReport {
            worker: self.id,
            ..Default::default()
        };

        let (entry_tx, mut entry_rx) = mpsc::channel::<ClaimedEntry>(1);
        let stream = self.ctx.stream.clone();
        let ledger = self.ctx.ledger.clone();
        let scan = tokio::task::spawn_blocking(move || {
            stream.scan(
                |header| ledger.try_claim(header.ordinal),
                |entry| entry_tx.blocking_send(entry).is_ok(),
            )
        });

        let mut in_flight: JoinSet<Result<EntryOutcome, RunError>> = JoinSet::new();
        loop {
            tokio::select! {
                entry = entry_rx.recv() => match entry {
                    Some(entry) => {
                        debug!(
                            worker = self.id,
                            ordinal = entry.header.ordinal,
                            path = %entry.header.remote_path,
                            "claimed entry"
                        );
                        in_flight.spawn(process_entry(self.ctx.clone(), entry));
                    }
                    // Scanner finished and dropped its sender
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    absorb(&mut report, joined)?;
                }
            }
        }

        report.scan = scan.await??;

        while let Some(joined) = in_flight.join_next().await {
            absorb(&mut report, joined)?;
        }

        debug!(
            worker = self.id,
            claimed = report.scan.claimed,
            uploaded = report.uploaded,
            deferred = report.deferred,
            "scan complete"
        );
        Ok(report)
    }
}

fn absorb(
    report: &mut WorkerReport,
    joined: Result<Result<EntryOutcome, RunError>, JoinError>,
) -> Result<(), RunError> {
    match joined?? {
        EntryOutcome::Uploaded => report.uploaded += 1,
        EntryOutcome::Deferred => report.deferred += 1,
    }
    Ok(())
}

/// Upload one claimed entry and record the outcome in the ledger
async fn process_entry<C: UploadClient + ?Sized>(
    ctx: ScanContext<C>,
    entry: ClaimedEntry,
) -> Result<EntryOutcome, RunError> {
    let ClaimedEntry { header, mut body } = entry;
    let ordinal = header.ordinal;

    let error = match ctx
        .coordinator
        .upload_entry(&header.remote_path, &mut body, &ctx.options)
        .await
    {
        Ok(()) => {
            ctx.ledger.record_success(ordinal);
            if let Some(completions) = &ctx.completions {
                let _ = completions.send(header.remote_path);
            }
            return Ok(EntryOutcome::Uploaded);
        }
        Err(error) => error,
    };

    match ctx.ledger.record_failure(ordinal, &error) {
        Disposition::Deferred { attempts } => {
            warn!(
                ordinal,
                path = %header.remote_path,
                attempts,
                error = %error,
                "upload failed, deferring to next sweep"
            );
            // Dropping the body releases the scanner past this entry
            drop(body);
            Ok(EntryOutcome::Deferred)
        }
        Disposition::Exhausted { attempts } => {
            error!(ordinal, path = %header.remote_path, attempts, error = %error, "retries exhausted");
            Err(RunError::RetriesExhausted {
                ordinal,
                path: header.remote_path,
                attempts,
                error,
            })
        }
        Disposition::Fatal => {
            error!(ordinal, path = %header.remote_path, error = %error, "upload failed");
            Err(RunError::Upload {
                ordinal,
                path: header.remote_path,
                error,
            })
        }
    }
}
