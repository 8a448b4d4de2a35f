//! Reservoir sampling (Algorithm R)
//!
//! Fixed-size uniform random sample of a stream of unknown length. The
//! first `capacity` items fill the reservoir; item `i > capacity` then
//! replaces a random slot with probability `capacity / i`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fixed-capacity uniform sampler
pub struct ReservoirSampler<T> {
    capacity: usize,
    seen: u64,
    sample: Vec<T>,
    rng: StdRng,
}

impl<T> ReservoirSampler<T> {
    /// Sampler with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// Deterministic sampler for tests
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        Self {
            capacity,
            seen: 0,
            sample: Vec::with_capacity(capacity.min(1024)),
            rng,
        }
    }

    /// Offer one stream item
    pub fn add(&mut self, item: T) {
        self.seen += 1;
        if self.sample.len() < self.capacity {
            self.sample.push(item);
            return;
        }
        let slot = self.rng.gen_range(0..self.seen);
        if (slot as usize) < self.capacity {
            self.sample[slot as usize] = item;
        }
    }

    /// Total items offered so far
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Current sample size
    pub fn len(&self) -> usize {
        self.sample.len()
    }

    /// True when nothing has been sampled
    pub fn is_empty(&self) -> bool {
        self.sample.is_empty()
    }

    /// Consume the sampler, yielding the sample
    pub fn into_sample(self) -> Vec<T> {
        self.sample
    }
}
