//! Upload Engine
//!
//! Uploads every non-empty file of a tar archive to a hierarchical store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      PassOrchestrator                        │
//! │     InitialFanout (N scans) → RetrySweep (1 scan)* → Done    │
//! └──────────────┬───────────────────────────────────────────────┘
//!                │ spawns
//!   ┌────────────▼─────────────┐      claim / outcome    ┌─────────────┐
//!   │ ScanWorker × N           │◄───────────────────────►│ RetryLedger │
//!   │  ArchiveEntryStream      │                         └─────────────┘
//!   └────────────┬─────────────┘
//!                │ upload_entry
//!   ┌────────────▼─────────────┐  missing parent  ┌────────────────────────────┐
//!   │ UploadCoordinator        │─────────────────►│ DirectoryCreateCoordinator │
//!   └────────────┬─────────────┘                  └──────────────┬─────────────┘
//!                └───────────────► UploadClient ◄────────────────┘
//! ```

pub mod archive;
pub mod config;
pub mod coordinator;
pub mod dst;
pub mod error;
pub mod ledger;
pub mod mkdir;
pub mod orchestrator;
mod worker;

pub use archive::{remote_path, ArchiveEntryStream, ClaimedEntry, EntryHeader, ScanSummary};
pub use config::{ConfigError, UploadConfig, PARALLEL_MAX};
pub use coordinator::UploadCoordinator;
pub use dst::{
    run_dst_batch, summarize_batch, UploadDSTConfig, UploadDSTHarness, UploadDSTResult,
    UploadWorkload,
};
pub use error::{ArchiveError, RunError};
pub use ledger::{Disposition, LedgerStats, RetryLedger};
pub use mkdir::DirectoryCreateCoordinator;
pub use orchestrator::{PassOrchestrator, PassState, RunReport};
pub use worker::WorkerReport;
