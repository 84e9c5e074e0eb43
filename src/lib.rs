//! tar-upload
//!
//! Uploads the files of a tar archive to a hierarchical store with
//! concurrent scanning workers, deduplicated parent-directory creation and
//! multi-pass retries.
//!
//! - `store`: the `UploadClient` trait and its backends
//! - `upload`: ledger, coordinators and the pass orchestrator
//! - `io`, `buggify`: seeded randomness and fault injection for simulation
//! - `observability`: logging setup

pub mod buggify;
pub mod io;
pub mod observability;
pub mod store;
pub mod upload;

pub use store::{EntryBody, UploadClient, UploadError, UploadOptions};
pub use upload::{PassOrchestrator, RetryLedger, RunError, RunReport, UploadConfig};
