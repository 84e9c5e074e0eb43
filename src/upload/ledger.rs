//! Retry Ledger - shared progress state of all scan workers
//!
//! ```text
//!              ordinals:  0   1   2   3   4   5   6
//!   claimed by fan-out:  [x] [x] [x] [x]  .   .   .
//!                                         ^ frontier (next unclaimed)
//!   need_retry (sweep):      {1}     {3}
//! ```
//!
//! Every claim, outcome and pass transition goes through one mutex, so
//! check-then-claim is a single critical section even when workers run on
//! different threads.

use crate::store::{ErrorClass, UploadError};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// What the worker must do after a failed upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retryable; the ordinal is queued for the next sweep
    Deferred { attempts: u32 },
    /// Definitive failure; stop the run
    Fatal,
    /// Retryable, but the retry limit is spent; stop the run
    Exhausted { attempts: u32 },
}

impl Disposition {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Disposition::Deferred { .. })
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Next unclaimed ordinal of the current pass
    frontier: u64,
    /// Ordinals carried over from the previous pass
    need_retry: BTreeSet<u64>,
    /// Consecutive failures per ordinal; cleared on success
    retry_count: HashMap<u64, u32>,
    /// Ordinals that failed retryably in the current pass
    failing: BTreeSet<u64>,
    completed: u64,
    pass: u32,
}

/// Snapshot of ledger counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub frontier: u64,
    pub pending_retry: usize,
    pub failing: usize,
    pub outstanding_failures: usize,
    pub completed: u64,
    pub pass: u32,
}

pub struct RetryLedger {
    retries: u32,
    state: Mutex<LedgerState>,
}

impl RetryLedger {
    /// Ledger allowing `retries` retryable failures per ordinal
    pub fn new(retries: u32) -> Self {
        RetryLedger {
            retries,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Atomically decide whether this worker owns `ordinal` in the current
    /// pass. Each ordinal is claimed at most once per pass.
    pub fn try_claim(&self, ordinal: u64) -> bool {
        let mut state = self.state.lock();
        if ordinal >= state.frontier {
            state.frontier = ordinal + 1;
            // A fan-out claim never races a sweep claim, but keep the sets disjoint
            state.need_retry.remove(&ordinal);
            true
        } else {
            state.need_retry.remove(&ordinal)
        }
    }

    pub fn record_success(&self, ordinal: u64) {
        let mut state = self.state.lock();
        state.retry_count.remove(&ordinal);
        state.failing.remove(&ordinal);
        state.completed += 1;
    }

    /// Classify a failed upload and update the retry bookkeeping
    pub fn record_failure(&self, ordinal: u64, error: &UploadError) -> Disposition {
        match error.classify() {
            ErrorClass::Definitive | ErrorClass::MissingParent => Disposition::Fatal,
            ErrorClass::Transient => {
                let mut state = self.state.lock();
                let count = state.retry_count.entry(ordinal).or_insert(0);
                *count += 1;
                let attempts = *count;
                if attempts > self.retries {
                    Disposition::Exhausted { attempts }
                } else {
                    state.failing.insert(ordinal);
                    Disposition::Deferred { attempts }
                }
            }
        }
    }

    /// Start the next pass: the ordinals that failed in the pass just ended
    /// become the retry set. Returns that set (empty means the run is done).
    pub fn begin_sweep(&self) -> BTreeSet<u64> {
        let mut state = self.state.lock();
        let failing = std::mem::take(&mut state.failing);
        state.need_retry = failing.clone();
        state.pass += 1;
        failing
    }

    /// Failure count for an ordinal with failures outstanding
    pub fn retry_count(&self, ordinal: u64) -> Option<u32> {
        self.state.lock().retry_count.get(&ordinal).copied()
    }

    pub fn stats(&self) -> LedgerStats {
        let state = self.state.lock();
        LedgerStats {
            frontier: state.frontier,
            pending_retry: state.need_retry.len(),
            failing: state.failing.len(),
            outstanding_failures: state.retry_count.len(),
            completed: state.completed,
            pass: state.pass,
        }
    }
}
