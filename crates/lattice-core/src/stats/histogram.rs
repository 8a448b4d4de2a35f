//! Value-aware histograms
//!
//! Built from a reservoir sample: every distinct sampled value becomes
//! its own bucket, counts scaled by `total_seen / sample_len` so bucket
//! counts approximate the full population. When the sample has more
//! distinct values than the bucket budget, adjacent values merge into
//! range buckets of near-equal depth.

use crate::filter::CompareOp;
use crate::tuple::TupleElement;
use serde::{Deserialize, Serialize};

/// One histogram bucket covering `[lower, upper]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Inclusive lower bound
    pub lower: TupleElement,
    /// Inclusive upper bound
    pub upper: TupleElement,
    /// Estimated row count in the bucket
    pub count: u64,
    /// Estimated distinct values in the bucket
    pub distinct_count: u64,
}

/// Ordered sequence of buckets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Buckets in ascending bound order
    pub buckets: Vec<Bucket>,
    /// Total estimated row count across buckets
    pub total_count: u64,
}

impl Histogram {
    /// Build from a sample. `total_seen` is the full population size the
    /// sample was drawn from; counts are scaled accordingly.
    pub fn from_sample(
        mut sample: Vec<TupleElement>,
        total_seen: u64,
        bucket_count: usize,
    ) -> Histogram {
        if sample.is_empty() || bucket_count == 0 {
            return Histogram::default();
        }
        sample.sort();
        let sample_len = sample.len() as u64;
        let scale = total_seen as f64 / sample_len as f64;

        // run-length encode the sorted sample into (value, count)
        let mut runs: Vec<(TupleElement, u64)> = Vec::new();
        for value in sample {
            match runs.last_mut() {
                Some((last, count)) if *last == value => *count += 1,
                _ => runs.push((value, 1)),
            }
        }

        let per_bucket = runs.len().div_ceil(bucket_count);
        let mut buckets = Vec::with_capacity(bucket_count.min(runs.len()));
        let mut total = 0u64;
        for chunk in runs.chunks(per_bucket.max(1)) {
            let raw: u64 = chunk.iter().map(|(_, c)| c).sum();
            let count = ((raw as f64) * scale).round().max(1.0) as u64;
            total += count;
            buckets.push(Bucket {
                lower: chunk[0].0.clone(),
                upper: chunk[chunk.len() - 1].0.clone(),
                count,
                distinct_count: chunk.len() as u64,
            });
        }
        Histogram { buckets, total_count: total }
    }

    /// True when the histogram carries no information
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() || self.total_count == 0
    }

    /// Estimated selectivity of `value <op> literal` over the indexed
    /// column, in `[0, 1]`. Callers clamp.
    pub fn estimate(&self, op: CompareOp, value: &TupleElement) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        match op {
            CompareOp::Eq => Some(self.estimate_eq(value)),
            CompareOp::NotEq => Some(1.0 - self.estimate_eq(value)),
            CompareOp::Lt => Some(self.estimate_below(value, false)),
            CompareOp::Le => Some(self.estimate_below(value, true)),
            CompareOp::Gt => Some(1.0 - self.estimate_below(value, true)),
            CompareOp::Ge => Some(1.0 - self.estimate_below(value, false)),
            CompareOp::StartsWith | CompareOp::Contains => None,
        }
    }

    fn estimate_eq(&self, value: &TupleElement) -> f64 {
        let total = self.total_count as f64;
        for bucket in &self.buckets {
            if value < &bucket.lower {
                return 0.0;
            }
            if value <= &bucket.upper {
                // assume even spread over the bucket's distinct values
                let share = bucket.count as f64 / bucket.distinct_count.max(1) as f64;
                return share / total;
            }
        }
        0.0
    }

    /// Fraction of rows strictly below `value` (or `<=` when inclusive)
    fn estimate_below(&self, value: &TupleElement, inclusive: bool) -> f64 {
        let total = self.total_count as f64;
        let mut below = 0.0;
        for bucket in &self.buckets {
            if value < &bucket.lower {
                break;
            }
            if value > &bucket.upper {
                below += bucket.count as f64;
                continue;
            }
            // partial bucket: single-value buckets are exact, range
            // buckets assume half the mass below the probe
            if bucket.lower == bucket.upper {
                if inclusive {
                    below += bucket.count as f64;
                }
            } else {
                below += bucket.count as f64 * 0.5;
            }
            break;
        }
        (below / total).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn int_sample(values: &[i64]) -> Vec<TupleElement> {
        values.iter().map(|&v| TupleElement::Int(v)).collect()
    }

    #[test]
    fn test_empty_inputs_produce_empty_histogram() {
        assert!(Histogram::from_sample(vec![], 100, 10).is_empty());
        assert!(Histogram::from_sample(int_sample(&[1]), 1, 0).is_empty());
    }

    #[test]
    fn test_value_aware_buckets() {
        // full population sampled: 60% ones, 30% twos, 10% threes
        let mut values = vec![1i64; 60];
        values.extend(vec![2i64; 30]);
        values.extend(vec![3i64; 10]);
        let h = Histogram::from_sample(int_sample(&values), 100, 100);
        assert_eq!(h.buckets.len(), 3);
        assert_eq!(h.total_count, 100);

        assert_relative_eq!(
            h.estimate(CompareOp::Eq, &TupleElement::Int(1)).unwrap(),
            0.6,
            epsilon = 0.01
        );
        assert_relative_eq!(
            h.estimate(CompareOp::Lt, &TupleElement::Int(2)).unwrap(),
            0.6,
            epsilon = 0.01
        );
        assert_relative_eq!(
            h.estimate(CompareOp::Gt, &TupleElement::Int(1)).unwrap(),
            0.4,
            epsilon = 0.01
        );
    }

    #[test]
    fn test_counts_scale_to_population() {
        // 10-element sample of a 1000-row population
        let h = Histogram::from_sample(int_sample(&[1, 1, 1, 1, 2, 2, 2, 3, 3, 4]), 1000, 100);
        assert_eq!(h.total_count, 1000);
        assert_relative_eq!(
            h.estimate(CompareOp::Eq, &TupleElement::Int(1)).unwrap(),
            0.4,
            epsilon = 0.01
        );
    }

    #[test]
    fn test_probe_outside_range() {
        let h = Histogram::from_sample(int_sample(&[5, 6, 7]), 3, 10);
        assert_relative_eq!(
            h.estimate(CompareOp::Eq, &TupleElement::Int(100)).unwrap(),
            0.0
        );
        assert_relative_eq!(
            h.estimate(CompareOp::Lt, &TupleElement::Int(0)).unwrap(),
            0.0
        );
        assert_relative_eq!(
            h.estimate(CompareOp::Gt, &TupleElement::Int(0)).unwrap(),
            1.0
        );
    }

    #[test]
    fn test_bucket_budget_merges_values() {
        let values: Vec<i64> = (0..100).collect();
        let h = Histogram::from_sample(int_sample(&values), 100, 10);
        assert!(h.buckets.len() <= 10);
        let below_half = h.estimate(CompareOp::Lt, &TupleElement::Int(50)).unwrap();
        assert!((0.35..=0.65).contains(&below_half), "got {}", below_half);
    }
}
