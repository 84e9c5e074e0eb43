//! Deterministic Simulation Testing for the Upload Engine
//!
//! Shadow-state harness:
//! - Seeded random archives (nested directories, zero-size files, varied sizes)
//! - Fault injection at the store client layer
//! - Invariant checks against the stored result after each run
//! - Seed-based reproducibility of workload and fault decisions
//!
//! ```text
//! for seed in 0..100 {
//!     let mut harness = UploadDSTHarness::new(UploadDSTConfig::chaos(seed))?;
//!     harness.run().await;
//!     harness.check_invariants();  // violations carry the seed
//! }
//! ```
//!
//! Only transient faults are injected, so a run either converges or stops
//! with `RetriesExhausted`. Any other fatal error is a violation.

use super::archive::ArchiveEntryStream;
use super::config::UploadConfig;
use super::error::RunError;
use super::orchestrator::{PassOrchestrator, RunReport};
use crate::buggify::FaultStats;
use crate::io::simulation::SimulatedRng;
use crate::io::Rng;
use crate::store::{
    InMemoryUploadClient, SimulatedClientConfig, SimulatedClientStats, SimulatedUploadClient,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

static ARCHIVE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Configuration for upload DST
#[derive(Debug, Clone)]
pub struct UploadDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Store client fault configuration
    pub client_config: SimulatedClientConfig,
    /// Engine configuration
    pub upload_config: UploadConfig,
    /// File entries in the generated archive
    pub entries: usize,
    /// Deepest directory nesting below the destination
    pub max_depth: usize,
    /// Directory names drawn per level
    pub dir_fanout: u64,
    /// Probability a file is empty
    pub empty_probability: f64,
    /// Largest generated file in bytes
    pub max_file_size: u64,
    /// Destination directory in the store
    pub dest: String,
}

impl Default for UploadDSTConfig {
    fn default() -> Self {
        UploadDSTConfig {
            seed: 0,
            client_config: SimulatedClientConfig::default(),
            upload_config: UploadConfig::test(),
            entries: 40,
            max_depth: 3,
            dir_fanout: 3,
            empty_probability: 0.1,
            max_file_size: 12 * 1024,
            dest: "/dst".to_string(),
        }
    }
}

impl UploadDSTConfig {
    pub fn new(seed: u64) -> Self {
        UploadDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no faults
    pub fn calm(seed: u64) -> Self {
        UploadDSTConfig {
            seed,
            client_config: SimulatedClientConfig::no_faults(),
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        UploadDSTConfig {
            seed,
            client_config: SimulatedClientConfig::default(),
            upload_config: UploadConfig {
                retries: 5,
                ..UploadConfig::test()
            },
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        UploadDSTConfig {
            seed,
            client_config: SimulatedClientConfig::high_chaos(),
            upload_config: UploadConfig {
                parallel: 4,
                retries: 10,
                ..UploadConfig::test()
            },
            entries: 60,
            max_depth: 4,
            ..Default::default()
        }
    }
}

/// One generated archive member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadFile {
    pub archive_path: String,
    pub data: Vec<u8>,
}

/// Random archive generator
pub struct UploadWorkload {
    rng: SimulatedRng,
    config: UploadDSTConfig,
}

impl UploadWorkload {
    pub fn new(config: UploadDSTConfig) -> Self {
        UploadWorkload {
            rng: SimulatedRng::new(config.seed),
            config,
        }
    }

    /// Generate the archive contents, in archive order
    pub fn generate(&mut self) -> Vec<WorkloadFile> {
        let mut files = Vec::with_capacity(self.config.entries);
        for i in 0..self.config.entries {
            let depth = self.rng.gen_range(0, self.config.max_depth as u64 + 1);
            let mut path = String::new();
            for level in 0..depth {
                let dir = self.rng.gen_range(0, self.config.dir_fanout.max(1));
                path.push_str(&format!("l{}d{}/", level, dir));
            }
            path.push_str(&format!("f{:03}.bin", i));

            let size = if self.rng.gen_bool(self.config.empty_probability) {
                0
            } else {
                self.rng.gen_range(1, self.config.max_file_size.max(1) + 1)
            };
            let data = (0..size).map(|_| self.rng.next_u64() as u8).collect();

            files.push(WorkloadFile {
                archive_path: path,
                data,
            });
        }
        // Interleave directories instead of keeping generation order
        self.rng.shuffle(&mut files);
        files
    }

    /// Write `files` as a tar archive, with a directory entry ahead of the
    /// first file in each directory
    pub fn write_archive(files: &[WorkloadFile], path: &Path) -> std::io::Result<()> {
        let mut builder = tar::Builder::new(File::create(path)?);
        let mut dirs_written = HashSet::new();

        for file in files {
            if let Some((dir, _)) = file.archive_path.rsplit_once('/') {
                if dirs_written.insert(dir.to_string()) {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_cksum();
                    builder.append_data(&mut header, format!("{}/", dir), std::io::empty())?;
                }
            }

            let mut header = tar::Header::new_gnu();
            header.set_size(file.data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, &file.archive_path, file.data.as_slice())?;
        }

        builder.into_inner()?;
        Ok(())
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct UploadDSTResult {
    /// Seed used
    pub seed: u64,
    /// File entries in the archive
    pub files: u64,
    /// Zero-size files among them
    pub empty_files: u64,
    /// Completion records emitted
    pub completions: u64,
    /// Run report when the run converged
    pub report: Option<RunReport>,
    /// Fatal error when it did not
    pub fatal: Option<String>,
    /// Client fault statistics
    pub client_stats: SimulatedClientStats,
    /// Per-site fault decisions
    pub fault_stats: FaultStats,
    /// Directory creates that reached the store
    pub create_calls: u64,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
}

impl UploadDSTResult {
    pub fn new(seed: u64) -> Self {
        UploadDSTResult {
            seed,
            files: 0,
            empty_files: 0,
            completions: 0,
            report: None,
            fatal: None,
            client_stats: SimulatedClientStats::default(),
            fault_stats: FaultStats::default(),
            create_calls: 0,
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    /// Whether the run uploaded everything
    pub fn converged(&self) -> bool {
        self.report.is_some()
    }

    pub fn summary(&self) -> String {
        let outcome = match (&self.report, &self.fatal) {
            (Some(report), _) => format!(
                "converged in {} sweeps ({} scans)",
                report.sweeps, report.scans
            ),
            (None, Some(fatal)) => format!("stopped: {}", fatal),
            (None, None) => "not run".to_string(),
        };
        format!(
            "Seed {}: {} files ({} empty), {} uploaded, {} injected faults, {} creates, {}, {} violations",
            self.seed,
            self.files,
            self.empty_files,
            self.completions,
            self.client_stats.injected_failures(),
            self.create_calls,
            outcome,
            self.invariant_violations.len()
        )
    }
}

/// Type alias for the simulated client
type DSTClient = SimulatedUploadClient<InMemoryUploadClient, SimulatedRng>;

/// Main DST harness for the upload engine
pub struct UploadDSTHarness {
    config: UploadDSTConfig,
    files: Vec<WorkloadFile>,
    archive_path: PathBuf,
    store: InMemoryUploadClient,
    client: Arc<DSTClient>,
    completions: Vec<String>,
    outcome: Option<Result<RunReport, RunError>>,
    result: UploadDSTResult,
}

impl UploadDSTHarness {
    /// Generate the workload and write its archive to a temp file
    pub fn new(config: UploadDSTConfig) -> std::io::Result<Self> {
        let files = UploadWorkload::new(config.clone()).generate();
        let archive_path = std::env::temp_dir().join(format!(
            "tar-upload-dst-{}-{}-{}.tar",
            std::process::id(),
            config.seed,
            ARCHIVE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        UploadWorkload::write_archive(&files, &archive_path)?;

        let store = InMemoryUploadClient::new();
        let rng = SimulatedRng::new(config.seed.wrapping_add(1)); // Different seed for client
        let client = Arc::new(SimulatedUploadClient::new(
            store.clone(),
            rng,
            config.client_config.clone(),
        ));

        let mut result = UploadDSTResult::new(config.seed);
        result.files = files.len() as u64;
        result.empty_files = files.iter().filter(|f| f.data.is_empty()).count() as u64;

        Ok(UploadDSTHarness {
            config,
            files,
            archive_path,
            store,
            client,
            completions: Vec::new(),
            outcome: None,
            result,
        })
    }

    pub fn files(&self) -> &[WorkloadFile] {
        &self.files
    }

    /// Run the orchestrator to completion or the first fatal error
    pub async fn run(&mut self) {
        let upload_config = self.config.upload_config.clone();
        let stream = match ArchiveEntryStream::open(
            &self.archive_path,
            self.config.dest.clone(),
            upload_config.chunk_size,
            upload_config.chunk_queue_depth,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                self.outcome = Some(Err(RunError::Archive(e)));
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut orchestrator = PassOrchestrator::new(self.client.clone(), stream, upload_config)
            .with_completion_sink(tx);
        let outcome = orchestrator.run().await;
        drop(orchestrator);

        while let Ok(path) = rx.try_recv() {
            self.completions.push(path);
        }
        self.outcome = Some(outcome);
    }

    fn remote_path(&self, file: &WorkloadFile) -> String {
        format!(
            "{}/{}",
            self.config.dest.trim_end_matches('/'),
            file.archive_path
        )
    }

    /// Check invariants after the run
    pub fn check_invariants(&mut self) {
        let Some(outcome) = self.outcome.take() else {
            self.result
                .invariant_violations
                .push("check_invariants called before run".to_string());
            return;
        };

        // Invariant 1: only retry exhaustion may stop a run with transient faults
        match &outcome {
            Ok(report) => self.result.report = Some(report.clone()),
            Err(e) => {
                self.result.fatal = Some(e.to_string());
                if !matches!(e, RunError::RetriesExhausted { .. }) {
                    self.result
                        .invariant_violations
                        .push(format!("Unexpected fatal error: {}", e));
                }
            }
        }

        let expected: HashMap<String, u32> = self
            .files
            .iter()
            .filter(|f| !f.data.is_empty())
            .map(|f| (self.remote_path(f), crc32fast::hash(&f.data)))
            .collect();
        let empty: HashSet<String> = self
            .files
            .iter()
            .filter(|f| f.data.is_empty())
            .map(|f| self.remote_path(f))
            .collect();

        // Invariant 2: no duplicate completion records
        let mut seen = BTreeSet::new();
        for path in &self.completions {
            if !seen.insert(path.clone()) {
                self.result
                    .invariant_violations
                    .push(format!("Duplicate completion record for {}", path));
            }
        }

        // Invariant 3: zero-size entries never emitted or stored
        for path in &empty {
            if seen.contains(path) {
                self.result
                    .invariant_violations
                    .push(format!("Zero-size entry {} was emitted", path));
            }
            if self.store.get(path).is_some() {
                self.result
                    .invariant_violations
                    .push(format!("Zero-size entry {} was stored", path));
            }
        }

        // Invariant 4: every completion is stored with the archive's bytes
        for path in &seen {
            match (expected.get(path), self.store.get(path)) {
                (Some(crc), Some(stored)) if crc32fast::hash(&stored) == *crc => {}
                (Some(_), Some(_)) => self
                    .result
                    .invariant_violations
                    .push(format!("Stored bytes of {} do not match the archive", path)),
                (Some(_), None) => self
                    .result
                    .invariant_violations
                    .push(format!("{} reported complete but not stored", path)),
                (None, _) => self
                    .result
                    .invariant_violations
                    .push(format!("Unexpected completion record {}", path)),
            }
        }

        // Invariant 5: a converged run uploaded exactly the non-empty entries
        if outcome.is_ok() {
            if seen.len() != expected.len() {
                self.result.invariant_violations.push(format!(
                    "Converged with {} completions, expected {}",
                    seen.len(),
                    expected.len()
                ));
            }
            let stored: HashSet<String> = self.store.paths().into_iter().collect();
            for path in expected.keys() {
                if !stored.contains(path) {
                    self.result
                        .invariant_violations
                        .push(format!("{} missing from store", path));
                }
            }
            if stored.len() != expected.len() {
                self.result.invariant_violations.push(format!(
                    "Store holds {} files, expected {}",
                    stored.len(),
                    expected.len()
                ));
            }
            if !self.store.is_closed() {
                self.result
                    .invariant_violations
                    .push("Client not closed after a converged run".to_string());
            }
        }

        // Invariant 6: never two outstanding creates for one directory
        let store_stats = self.store.stats();
        if store_stats.max_concurrent_creates > 1 {
            self.result.invariant_violations.push(format!(
                "{} concurrent creates for one directory",
                store_stats.max_concurrent_creates
            ));
        }

        // Invariant 7: without create failures each directory is created at most once
        if self.config.client_config.mkdir_fail_prob == 0.0 {
            for (dir, calls) in &store_stats.create_calls {
                if *calls > 1 {
                    self.result
                        .invariant_violations
                        .push(format!("Directory {} created {} times", dir, calls));
                }
            }
        }

        self.result.completions = self.completions.len() as u64;
        self.result.create_calls = store_stats.total_create_calls();
        self.result.client_stats = self.client.stats();
        self.result.fault_stats = self.client.fault_stats();
    }

    /// Get the result
    pub fn result(&self) -> &UploadDSTResult {
        &self.result
    }

    /// Consume and return the result
    pub fn into_result(self) -> UploadDSTResult {
        self.result.clone()
    }
}

impl Drop for UploadDSTHarness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.archive_path);
    }
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    config_fn: impl Fn(u64) -> UploadDSTConfig,
) -> Vec<UploadDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let config = config_fn(seed);

        let mut harness = match UploadDSTHarness::new(config) {
            Ok(harness) => harness,
            Err(e) => {
                let mut result = UploadDSTResult::new(seed);
                result
                    .invariant_violations
                    .push(format!("Writing archive failed: {}", e));
                results.push(result);
                continue;
            }
        };
        harness.run().await;
        harness.check_invariants();

        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[UploadDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let converged = results.iter().filter(|r| r.converged()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_uploads: u64 = results.iter().map(|r| r.completions).sum();
    let total_faults: u64 = results
        .iter()
        .map(|r| r.client_stats.injected_failures())
        .sum();
    let total_sweeps: u32 = results
        .iter()
        .filter_map(|r| r.report.as_ref())
        .map(|r| r.sweeps)
        .sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {}/{} converged, {} uploads, {} injected faults, {} sweeps",
        passed, total, converged, total, total_uploads, total_faults, total_sweeps
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_deterministic() {
        let a = UploadWorkload::new(UploadDSTConfig::calm(7)).generate();
        let b = UploadWorkload::new(UploadDSTConfig::calm(7)).generate();
        let c = UploadWorkload::new(UploadDSTConfig::calm(8)).generate();

        assert_eq!(a, b, "Same seed should produce the same archive");
        assert_ne!(a, c);
    }

    #[test]
    fn test_workload_shape() {
        let config = UploadDSTConfig {
            entries: 200,
            ..UploadDSTConfig::calm(3)
        };
        let files = UploadWorkload::new(config).generate();

        assert_eq!(files.len(), 200);
        assert!(files.iter().any(|f| f.data.is_empty()));
        assert!(files.iter().any(|f| f.archive_path.matches('/').count() >= 2));
        assert!(files.iter().all(|f| f.data.len() as u64 <= 12 * 1024));
    }

    #[tokio::test]
    async fn test_dst_harness_calm() {
        let mut harness = UploadDSTHarness::new(UploadDSTConfig::calm(42)).unwrap();
        harness.run().await;
        harness.check_invariants();

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {:?}",
            result.invariant_violations
        );
        assert!(result.converged());
        assert_eq!(result.completions, result.files - result.empty_files);
        assert_eq!(result.report.as_ref().map(|r| r.sweeps), Some(0));
    }

    #[tokio::test]
    async fn test_dst_harness_with_faults() {
        let mut harness = UploadDSTHarness::new(UploadDSTConfig::moderate(123)).unwrap();
        harness.run().await;
        harness.check_invariants();

        let result = harness.result();
        assert!(
            result.is_success(),
            "{}: {:?}",
            result.summary(),
            result.invariant_violations
        );
        println!("{}", result.summary());
    }

    #[tokio::test]
    async fn test_dst_batch_calm() {
        let results = run_dst_batch(1000, 5, UploadDSTConfig::calm).await;

        let summary = summarize_batch(&results);
        println!("{}", summary);

        assert!(
            results.iter().all(|r| r.is_success() && r.converged()),
            "All calm runs should pass: {}",
            summary
        );
    }
}
