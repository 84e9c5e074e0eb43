//! Randomness Abstraction
//!
//! Fault injection and workload generation draw from an `Rng` so that a
//! simulated run can be replayed from its seed.

pub mod simulation;

pub use simulation::SimulatedRng;

/// Source of randomness for fault decisions and workloads
pub trait Rng: Send + 'static {
    fn next_u64(&mut self) -> u64;

    /// Returns true with the given probability (clamped to [0, 1])
    fn gen_bool(&mut self, probability: f64) -> bool;

    /// Uniform value in `[min, max)`; returns `min` when the range is empty
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    fn shuffle<T>(&mut self, slice: &mut [T]);
}
