//! HyperLogLog cardinality estimation
//!
//! 2^P registers, each holding the maximum leading-zero run observed for
//! hashes routed to it. The harmonic-mean estimate gets the usual
//! small-range linear-counting correction. With P = 12 the standard
//! error is about 1.6%, plenty for selectivity estimation.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64_with_seed;

const P: u32 = 12;
const REGISTER_COUNT: usize = 1 << P;
const HASH_SEED: u64 = 0x6c61_7474_6963_65;

/// Streaming distinct-count estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperLogLog {
    registers: Vec<u8>,
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperLogLog {
    /// Empty estimator
    pub fn new() -> Self {
        Self { registers: vec![0; REGISTER_COUNT] }
    }

    /// Observe one value
    pub fn add(&mut self, value: &[u8]) {
        let hash = xxh3_64_with_seed(value, HASH_SEED);
        let register = (hash >> (64 - P)) as usize;
        let remainder = hash << P;
        // rank = position of the first set bit in the remainder, 1-based
        let rank = (remainder.leading_zeros() + 1).min(64 - P + 1) as u8;
        if rank > self.registers[register] {
            self.registers[register] = rank;
        }
    }

    /// Estimated number of distinct values observed
    pub fn estimate(&self) -> u64 {
        let m = REGISTER_COUNT as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);

        let mut sum = 0.0;
        let mut zero_registers = 0usize;
        for &r in &self.registers {
            sum += 1.0 / ((1u64 << r) as f64);
            if r == 0 {
                zero_registers += 1;
            }
        }
        let raw = alpha * m * m / sum;

        let estimate = if raw <= 2.5 * m && zero_registers > 0 {
            // linear counting for small cardinalities
            m * (m / zero_registers as f64).ln()
        } else {
            raw
        };
        estimate.round() as u64
    }

    /// Merge another estimator into this one
    pub fn merge(&mut self, other: &HyperLogLog) {
        for (a, b) in self.registers.iter_mut().zip(other.registers.iter()) {
            *a = (*a).max(*b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_estimates_zero() {
        assert_eq!(HyperLogLog::new().estimate(), 0);
    }

    #[test]
    fn test_small_cardinality_is_exactish() {
        let mut hll = HyperLogLog::new();
        for i in 0..50u64 {
            hll.add(&i.to_be_bytes());
        }
        let estimate = hll.estimate();
        assert!((45..=55).contains(&estimate), "estimate {}", estimate);
    }

    #[test]
    fn test_duplicates_do_not_inflate() {
        let mut hll = HyperLogLog::new();
        for _ in 0..10 {
            for i in 0..100u64 {
                hll.add(&i.to_be_bytes());
            }
        }
        let estimate = hll.estimate();
        assert!((90..=110).contains(&estimate), "estimate {}", estimate);
    }

    #[test]
    fn test_large_cardinality_within_error() {
        let mut hll = HyperLogLog::new();
        let n = 100_000u64;
        for i in 0..n {
            hll.add(&i.to_be_bytes());
        }
        let estimate = hll.estimate() as f64;
        let error = (estimate - n as f64).abs() / n as f64;
        assert!(error < 0.05, "relative error {:.3}", error);
    }

    #[test]
    fn test_merge() {
        let mut a = HyperLogLog::new();
        let mut b = HyperLogLog::new();
        for i in 0..1000u64 {
            a.add(&i.to_be_bytes());
        }
        for i in 500..1500u64 {
            b.add(&i.to_be_bytes());
        }
        a.merge(&b);
        let estimate = a.estimate() as f64;
        let error = (estimate - 1500.0).abs() / 1500.0;
        assert!(error < 0.1, "relative error {:.3}", error);
    }
}
