//! Distance metrics
//!
//! Metric kinds as understood by the native library, their wire codes, and
//! reference distance kernels used by the simulated collaborator.

use serde::{Deserialize, Serialize};

/// Distance metric used by an index.
///
/// The discriminants are the native metric codes. `Hamming` has no float
/// native code; it is reported by binary indexes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum MetricType {
    /// Inner product (higher is more similar)
    InnerProduct = 0,
    /// Squared euclidean distance (lower is more similar)
    #[default]
    L2 = 1,
    /// Manhattan distance
    L1 = 2,
    /// Chebyshev distance
    Linf = 3,
    /// Hamming distance (binary vectors)
    Hamming = 100,
}

impl MetricType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "l2" | "euclidean" => Some(MetricType::L2),
            "ip" | "inner_product" | "dot" => Some(MetricType::InnerProduct),
            "l1" | "manhattan" => Some(MetricType::L1),
            "linf" | "chebyshev" => Some(MetricType::Linf),
            "hamming" => Some(MetricType::Hamming),
            _ => None,
        }
    }

    /// Native metric code.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(MetricType::InnerProduct),
            1 => Some(MetricType::L2),
            2 => Some(MetricType::L1),
            3 => Some(MetricType::Linf),
            100 => Some(MetricType::Hamming),
            _ => None,
        }
    }

    /// Similarity metrics rank results descending, distances ascending.
    pub fn higher_is_better(self) -> bool {
        matches!(self, MetricType::InnerProduct)
    }

    /// Whether float indexes accept this metric.
    pub fn is_float_metric(self) -> bool {
        !matches!(self, MetricType::Hamming)
    }

    /// Distance reported for an empty result slot.
    pub fn worst_distance(self) -> f32 {
        if self.higher_is_better() {
            f32::NEG_INFINITY
        } else {
            f32::INFINITY
        }
    }

    /// True when `a` ranks strictly before `b`.
    #[inline]
    pub fn is_better(self, a: f32, b: f32) -> bool {
        if self.higher_is_better() {
            a > b
        } else {
            a < b
        }
    }

    /// Distance between two float vectors under this metric.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            MetricType::L2 => l2_sqr(a, b),
            MetricType::InnerProduct => inner_product(a, b),
            MetricType::L1 => l1(a, b),
            MetricType::Linf => linf(a, b),
            // Float vectors never carry this metric; fall back to L2
            MetricType::Hamming => l2_sqr(a, b),
        }
    }

    /// Whether a distance falls inside a range-search radius.
    #[inline]
    pub fn within_radius(self, dist: f32, radius: f32) -> bool {
        if self.higher_is_better() {
            dist > radius
        } else {
            dist < radius
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricType::InnerProduct => "InnerProduct",
            MetricType::L2 => "L2",
            MetricType::L1 => "L1",
            MetricType::Linf => "Linf",
            MetricType::Hamming => "Hamming",
        };
        f.write_str(s)
    }
}

#[inline]
pub fn l2_sqr(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn l1(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

#[inline]
pub fn linf(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

/// Hamming distance between two packed bit vectors.
#[inline]
pub fn hamming(a: &[u8], b: &[u8]) -> i32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones() as i32)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for m in [
            MetricType::InnerProduct,
            MetricType::L2,
            MetricType::L1,
            MetricType::Linf,
            MetricType::Hamming,
        ] {
            assert_eq!(MetricType::from_code(m.code()), Some(m));
        }
        assert_eq!(MetricType::from_code(42), None);
    }

    #[test]
    fn test_ordering_direction() {
        assert!(MetricType::L2.is_better(0.1, 0.2));
        assert!(MetricType::InnerProduct.is_better(0.9, 0.2));
        assert!(!MetricType::Hamming.is_float_metric());
    }

    #[test]
    fn test_kernels() {
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 0.0, 7.0];
        assert_eq!(l2_sqr(&a, &b), 20.0);
        assert_eq!(inner_product(&a, &b), 22.0);
        assert_eq!(l1(&a, &b), 6.0);
        assert_eq!(linf(&a, &b), 4.0);
        assert_eq!(hamming(&[0b1010_1010], &[0b0101_0101]), 8);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(MetricType::from_str("L2"), Some(MetricType::L2));
        assert_eq!(MetricType::from_str("ip"), Some(MetricType::InnerProduct));
        assert_eq!(MetricType::from_str("cosine"), None);
    }
}
