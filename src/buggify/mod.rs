//! BUGGIFY - FoundationDB-Style Fault Injection
//!
//! Every decision point in the simulated upload client is a potential fault
//! injection site. Decisions are drawn from a caller-supplied `Rng`, so a
//! seeded run replays the exact same fault sequence.
//!
//! The injector is a plain value owned by the component that injects faults.
//! Upload tasks hop between runtime threads, so per-thread state would split
//! one run's statistics across threads.
//!
//! # Usage
//!
//! ```ignore
//! use crate::buggify::{faults, FaultInjector};
//!
//! let mut injector = FaultInjector::new(FaultConfig::new());
//!
//! // Uses the configured probability for the fault
//! if buggify!(injector, &mut rng, faults::upload::SLOW_REQUEST) {
//!     delay *= 10;
//! }
//!
//! // With an explicit probability
//! if buggify!(injector, &mut rng, faults::mkdir::SERVER_ERROR, 0.5) {
//!     return Err(UploadError::status(503, "injected"));
//! }
//! ```

pub mod config;
pub mod faults;

pub use config::FaultConfig;
pub use faults::ALL_FAULTS;

use crate::io::Rng;
use std::collections::BTreeMap;

/// Check/trigger counters per fault ID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultStats {
    checks: BTreeMap<&'static str, u64>,
    triggers: BTreeMap<&'static str, u64>,
}

impl FaultStats {
    pub fn checks(&self, fault_id: &str) -> u64 {
        self.checks.get(fault_id).copied().unwrap_or(0)
    }

    pub fn triggers(&self, fault_id: &str) -> u64 {
        self.triggers.get(fault_id).copied().unwrap_or(0)
    }

    pub fn total_triggers(&self) -> u64 {
        self.triggers.values().sum()
    }

    pub fn trigger_rate(&self, fault_id: &str) -> f64 {
        match self.checks(fault_id) {
            0 => 0.0,
            checks => self.triggers(fault_id) as f64 / checks as f64,
        }
    }

    /// One line per fault that was checked at least once
    pub fn summary(&self) -> String {
        let mut out = String::from("Faults:");
        for fault_id in self.checks.keys() {
            out.push_str(&format!(
                "\n  {}: {}/{} ({:.2}%)",
                fault_id,
                self.triggers(fault_id),
                self.checks(fault_id),
                self.trigger_rate(fault_id) * 100.0
            ));
        }
        out
    }
}

/// Fault decisions plus the statistics of every decision made
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    config: FaultConfig,
    stats: FaultStats,
}

impl FaultInjector {
    pub fn new(config: FaultConfig) -> Self {
        FaultInjector {
            config,
            stats: FaultStats::default(),
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    pub fn stats(&self) -> &FaultStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = FaultStats::default();
    }

    /// Roll for `fault_id` at its configured probability
    pub fn check<R: Rng>(&mut self, rng: &mut R, fault_id: &'static str) -> bool {
        let probability = self.config.get(fault_id);
        self.roll(rng, fault_id, probability)
    }

    /// Roll for `fault_id` at `probability`; the global switch still applies
    pub fn check_with<R: Rng>(
        &mut self,
        rng: &mut R,
        fault_id: &'static str,
        probability: f64,
    ) -> bool {
        let probability = if self.config.enabled {
            probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.roll(rng, fault_id, probability)
    }

    fn roll<R: Rng>(&mut self, rng: &mut R, fault_id: &'static str, probability: f64) -> bool {
        *self.stats.checks.entry(fault_id).or_insert(0) += 1;
        // No draw for impossible faults, so adding a disabled site keeps old seeds stable
        if probability <= 0.0 {
            return false;
        }
        let triggered = rng.gen_bool(probability);
        if triggered {
            *self.stats.triggers.entry(fault_id).or_insert(0) += 1;
        }
        triggered
    }
}

/// BUGGIFY macro - the main interface for fault injection
#[macro_export]
macro_rules! buggify {
    ($injector:expr, $rng:expr, $fault_id:expr) => {
        $injector.check($rng, $fault_id)
    };
    ($injector:expr, $rng:expr, $fault_id:expr, $prob:expr) => {
        $injector.check_with($rng, $fault_id, $prob)
    };
}
