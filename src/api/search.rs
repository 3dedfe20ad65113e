//! Search results

use serde::{Deserialize, Serialize};

use crate::ffi::RangeSearchOutput;

/// k-NN search result
///
/// Row-major: query `i` owns `distances[i * k..(i + 1) * k]` and the labels at
/// the same positions. Slots without a hit carry label `-1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Distances, `nq * k`
    pub distances: Vec<f32>,
    /// Labels, `nq * k`
    pub labels: Vec<i64>,
    /// Number of queries
    pub nq: usize,
    /// Neighbors per query
    pub k: usize,
    /// Elapsed time in milliseconds
    pub elapsed_ms: f64,
}

impl SearchResult {
    pub fn new(distances: Vec<f32>, labels: Vec<i64>, nq: usize, k: usize, elapsed_ms: f64) -> Self {
        Self { distances, labels, nq, k, elapsed_ms }
    }

    pub fn empty(k: usize) -> Self {
        Self::new(Vec::new(), Vec::new(), 0, k, 0.0)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `(distance, label)` of the `j`-th neighbor of query `i`.
    pub fn get(&self, i: usize, j: usize) -> Option<(f32, i64)> {
        if i >= self.nq || j >= self.k {
            return None;
        }
        let idx = i * self.k + j;
        Some((self.distances[idx], self.labels[idx]))
    }

    /// Hits of query `i`, empty slots skipped.
    pub fn neighbors(&self, i: usize) -> Vec<(f32, i64)> {
        if i >= self.nq {
            return Vec::new();
        }
        let row = i * self.k..(i + 1) * self.k;
        self.distances[row.clone()]
            .iter()
            .copied()
            .zip(self.labels[row].iter().copied())
            .filter(|(_, l)| *l >= 0)
            .collect()
    }
}

/// Binary index search result (Hamming distances)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySearchResult {
    pub distances: Vec<i32>,
    pub labels: Vec<i64>,
    pub nq: usize,
    pub k: usize,
}

impl BinarySearchResult {
    pub fn neighbors(&self, i: usize) -> Vec<(i32, i64)> {
        if i >= self.nq {
            return Vec::new();
        }
        let row = i * self.k..(i + 1) * self.k;
        self.distances[row.clone()]
            .iter()
            .copied()
            .zip(self.labels[row].iter().copied())
            .filter(|(_, l)| *l >= 0)
            .collect()
    }
}

/// Range search result
///
/// Hits of query `i` are `labels[lims[i]..lims[i + 1]]`; `lims` has `nq + 1`
/// entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSearchResult {
    pub lims: Vec<usize>,
    pub labels: Vec<i64>,
    pub distances: Vec<f32>,
    pub elapsed_ms: f64,
}

impl RangeSearchResult {
    pub(crate) fn from_output(out: RangeSearchOutput, elapsed_ms: f64) -> Self {
        Self {
            lims: out.lims,
            labels: out.labels,
            distances: out.distances,
            elapsed_ms,
        }
    }

    pub fn nq(&self) -> usize {
        self.lims.len().saturating_sub(1)
    }

    pub fn hits(&self, i: usize) -> Vec<(f32, i64)> {
        if i >= self.nq() {
            return Vec::new();
        }
        let (a, b) = (self.lims[i], self.lims[i + 1]);
        self.distances[a..b]
            .iter()
            .copied()
            .zip(self.labels[a..b].iter().copied())
            .collect()
    }

    pub fn total_hits(&self) -> usize {
        self.labels.len()
    }
}
