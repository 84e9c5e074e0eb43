//! Per-fault probability configuration

use super::faults;
use std::collections::HashMap;

/// Probabilities for registered faults plus a global switch
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub enabled: bool,
    probabilities: HashMap<&'static str, f64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultConfig {
    /// Enabled, with low default probabilities
    pub fn new() -> Self {
        let mut probabilities = HashMap::new();
        probabilities.insert(faults::upload::SERVER_ERROR, 0.02);
        probabilities.insert(faults::upload::CONNECTION_RESET, 0.01);
        probabilities.insert(faults::upload::MID_STREAM_FAILURE, 0.005);
        probabilities.insert(faults::upload::SLOW_REQUEST, 0.05);
        probabilities.insert(faults::mkdir::SERVER_ERROR, 0.02);
        probabilities.insert(faults::mkdir::SLOW_REQUEST, 0.10);
        FaultConfig {
            enabled: true,
            probabilities,
        }
    }

    /// No faults at all
    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            probabilities: HashMap::new(),
        }
    }

    /// Override one fault's probability
    pub fn with(mut self, fault_id: &'static str, probability: f64) -> Self {
        self.probabilities
            .insert(fault_id, probability.clamp(0.0, 1.0));
        self
    }

    /// Probability for a fault; 0.0 when disabled or unknown
    pub fn get(&self, fault_id: &str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        self.probabilities.get(fault_id).copied().unwrap_or(0.0)
    }
}
