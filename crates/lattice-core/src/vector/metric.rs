//! Vector distance metrics
//!
//! All metrics are distances: smaller is closer. Cosine similarity and
//! dot product are negated/complemented accordingly so one ascending
//! sort serves every metric.

use crate::schema::VectorMetric;

/// Distance between two equal-length vectors under the given metric
pub fn distance(metric: VectorMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        VectorMetric::Cosine => cosine_distance(a, b),
        VectorMetric::Euclidean => euclidean_distance(a, b),
        VectorMetric::DotProduct => -dot(a, b),
    }
}

/// `1 - cosine similarity`; zero-norm vectors are maximally distant
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / (norm_a * norm_b)
}

/// L2 distance
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance() {
        let a = [1.0, 0.0, 0.0];
        let b = [1.0, 0.0, 0.0];
        let c = [0.0, 1.0, 0.0];
        assert!(cosine_distance(&a, &b).abs() < 1e-6);
        assert!((cosine_distance(&a, &c) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert!((euclidean_distance(&a, &b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot_metric_prefers_larger_products() {
        let q = [1.0, 1.0];
        let near = [2.0, 2.0];
        let far = [0.1, 0.1];
        assert!(
            distance(VectorMetric::DotProduct, &q, &near)
                < distance(VectorMetric::DotProduct, &q, &far)
        );
    }

    #[test]
    fn test_zero_norm_is_maximally_distant() {
        let zero = [0.0, 0.0];
        let unit = [1.0, 0.0];
        assert_eq!(cosine_distance(&zero, &unit), 1.0);
    }
}
