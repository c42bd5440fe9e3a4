//! I/O Abstractions
//!
//! Randomness is the only nondeterministic input the core consumes (retry
//! jitter, simulated faults and latency). It is injected through the [`Rng`]
//! trait so that simulation runs replay exactly from a seed.
//!
//! - `ProductionRng`: OS-seeded, used by default
//! - `simulation::SimulatedRng`: ChaCha8 seeded, used by tests and DST

pub mod simulation;

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Source of randomness
pub trait Rng: Send + 'static {
    fn next_u64(&mut self) -> u64;

    fn gen_bool(&mut self, probability: f64) -> bool;

    /// Uniform value in `[min, max)`; returns `min` when the range is empty
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    fn shuffle<T>(&mut self, slice: &mut [T]);
}

/// OS-seeded RNG for production use
pub struct ProductionRng {
    inner: StdRng,
}

impl ProductionRng {
    pub fn new() -> Self {
        ProductionRng {
            inner: StdRng::from_entropy(),
        }
    }
}

impl Default for ProductionRng {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProductionRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductionRng").finish()
    }
}

impl Rng for ProductionRng {
    fn next_u64(&mut self) -> u64 {
        use rand::RngCore;
        self.inner.next_u64()
    }

    fn gen_bool(&mut self, probability: f64) -> bool {
        use rand::Rng;
        self.inner.gen_bool(probability.clamp(0.0, 1.0))
    }

    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        use rand::Rng;
        if min >= max {
            return min;
        }
        self.inner.gen_range(min..max)
    }

    fn shuffle<T>(&mut self, slice: &mut [T]) {
        use rand::seq::SliceRandom;
        slice.shuffle(&mut self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_rng_range() {
        let mut rng = ProductionRng::new();
        for _ in 0..1000 {
            let v = rng.gen_range(10, 20);
            assert!((10..20).contains(&v));
        }
        assert_eq!(rng.gen_range(5, 5), 5);
        assert_eq!(rng.gen_range(7, 3), 7);
    }

    #[test]
    fn test_production_rng_bool_extremes() {
        let mut rng = ProductionRng::new();
        assert!(!rng.gen_bool(0.0));
        assert!(rng.gen_bool(1.0));
        // Out-of-range probabilities are clamped rather than panicking
        assert!(rng.gen_bool(7.5));
    }
}
