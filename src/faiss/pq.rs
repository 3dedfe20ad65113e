//! PQ Index
//!
//! 乘积量化，needs at least `2^nbits` training vectors.

use crate::error::Result;
use crate::faiss::core::{check_dim, check_divisible, check_float_metric, check_nbits, IndexCore, Training};
use crate::ffi::Constructor;
use crate::index::Index;
use crate::library::Library;
use crate::metrics::MetricType;

#[derive(Debug)]
pub struct PqIndex {
    core: IndexCore,
    m: usize,
    nbits: usize,
}

impl PqIndex {
    pub fn new(lib: &Library, d: usize, m: usize, nbits: usize, metric: MetricType) -> Result<Self> {
        check_dim(d)?;
        check_divisible(d, m)?;
        check_nbits(nbits)?;
        check_float_metric(metric)?;
        let core = IndexCore::create(
            lib,
            "IndexPQ",
            &Constructor::Pq { d, m, nbits, metric },
            Training::Required { min: 1 << nbits },
            Vec::new(),
        )?;
        Ok(Self { core, m, nbits })
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }
}

impl Index for PqIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaissError;
    use crate::faiss::test_util::random_vectors;

    #[test]
    fn test_pq_training() {
        let lib = Library::simulated();
        let mut index = PqIndex::new(&lib, 8, 2, 4, MetricType::L2).unwrap();
        let data = random_vectors(32, 8, 3);
        assert!(matches!(index.add(&data), Err(FaissError::NotTrained { variant: "IndexPQ", .. })));
        assert!(matches!(index.train(&data[..8 * 15]), Err(FaissError::Validation(_))));
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        assert_eq!(index.search(&data[8..16], 1).unwrap().labels[0], 1);
    }

    #[test]
    fn test_pq_divisibility() {
        let lib = Library::simulated();
        assert!(matches!(PqIndex::new(&lib, 10, 3, 8, MetricType::L2), Err(FaissError::Validation(_))));
        assert_eq!(lib.sim_stats().unwrap().creates, 0);
    }
}
