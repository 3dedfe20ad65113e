//! Flat Index
//!
//! 暴力搜索，never trained.

use crate::api::RangeSearchResult;
use crate::error::Result;
use crate::faiss::core::{check_dim, check_float_metric, IndexCore, Training};
use crate::ffi::Constructor;
use crate::index::{Index, RangeSearch, Reconstruct};
use crate::library::Library;
use crate::metrics::MetricType;

#[derive(Debug)]
pub struct FlatIndex {
    core: IndexCore,
}

impl FlatIndex {
    pub fn new(lib: &Library, d: usize, metric: MetricType) -> Result<Self> {
        check_dim(d)?;
        check_float_metric(metric)?;
        let core = IndexCore::create(
            lib,
            "IndexFlat",
            &Constructor::Flat { d, metric },
            Training::Never,
            Vec::new(),
        )?;
        Ok(Self { core })
    }

    pub fn new_l2(lib: &Library, d: usize) -> Result<Self> {
        Self::new(lib, d, MetricType::L2)
    }

    pub fn new_ip(lib: &Library, d: usize) -> Result<Self> {
        Self::new(lib, d, MetricType::InnerProduct)
    }
}

impl Index for FlatIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }

    fn as_reconstruct(&self) -> Option<&dyn Reconstruct> {
        Some(self)
    }

    fn as_range_search(&self) -> Option<&dyn RangeSearch> {
        Some(self)
    }
}

impl Reconstruct for FlatIndex {
    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        self.core.reconstruct(key)
    }

    fn reconstruct_n(&self, i0: i64, n: usize) -> Result<Vec<f32>> {
        self.core.reconstruct_n(i0, n)
    }
}

impl RangeSearch for FlatIndex {
    fn range_search(&self, queries: &[f32], radius: f32) -> Result<RangeSearchResult> {
        self.core.range_search(queries, radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaissError;
    use crate::faiss::test_util::random_vectors;
    use crate::index::IndexExt;

    #[test]
    fn test_flat_search_ascending() {
        let lib = Library::simulated();
        let mut index = FlatIndex::new_l2(&lib, 16).unwrap();
        let data = random_vectors(200, 16, 1);
        index.add(&data).unwrap();
        assert_eq!(index.cached_count(), 200);
        assert_eq!(index.count().unwrap(), 200);

        let result = index.search(&data[..16 * 3], 4).unwrap();
        assert_eq!(result.nq, 3);
        for q in 0..3 {
            // each query is in the index, so it is its own nearest neighbor
            assert_eq!(result.labels[q * 4], q as i64);
            let row = &result.distances[q * 4..(q + 1) * 4];
            assert!(row.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_inner_product_descending() {
        let lib = Library::simulated();
        let mut index = FlatIndex::new_ip(&lib, 8).unwrap();
        index.add(&random_vectors(100, 8, 2)).unwrap();
        let result = index.search(&random_vectors(2, 8, 3), 5).unwrap();
        for q in 0..2 {
            let row = &result.distances[q * 5..(q + 1) * 5];
            assert!(row.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn test_train_is_noop() {
        let lib = Library::simulated();
        let mut index = FlatIndex::new_l2(&lib, 4).unwrap();
        assert!(!index.requires_training());
        index.train(&[]).unwrap();
        index.train(&random_vectors(3, 4, 0)).unwrap();
        assert!(matches!(index.train(&[1.0; 5]), Err(FaissError::Validation(_))));
        assert_eq!(lib.telemetry().snapshot().train_calls, 0);
    }

    #[test]
    fn test_validation_makes_no_native_calls() {
        let lib = Library::simulated();
        assert!(matches!(FlatIndex::new_l2(&lib, 0), Err(FaissError::Validation(_))));
        assert!(matches!(
            FlatIndex::new(&lib, 8, MetricType::Hamming),
            Err(FaissError::Validation(_))
        ));
        assert_eq!(lib.sim_stats().unwrap().creates, 0);

        let index = FlatIndex::new_l2(&lib, 4).unwrap();
        assert!(matches!(index.search(&[0.0; 4], 0), Err(FaissError::Validation(_))));
        assert!(matches!(index.search(&[0.0; 3], 1), Err(FaissError::Validation(_))));
    }

    #[test]
    fn test_oversized_k_is_rejected() {
        let lib = Library::simulated();
        let mut index = FlatIndex::new_l2(&lib, 4).unwrap();
        index.add(&random_vectors(1, 4, 0)).unwrap();

        assert!(matches!(index.search(&[0.0; 4], usize::MAX / 2), Err(FaissError::Validation(_))));
        assert!(matches!(index.search(&[0.0; 8], usize::MAX / 2 + 1), Err(FaissError::Validation(_))));
        assert_eq!(lib.telemetry().snapshot().search_calls, 0);

        // k above ntotal is fine, missing slots are padded
        let result = index.search(&[0.0; 4], 3).unwrap();
        assert_eq!(result.labels[1..], [-1, -1]);
    }

    #[test]
    fn test_reconstruct_and_range() {
        let lib = Library::simulated();
        let mut index = FlatIndex::new_l2(&lib, 4).unwrap();
        let data = random_vectors(10, 4, 5);
        index.add(&data).unwrap();

        assert_eq!(index.reconstruct(3).unwrap(), data[12..16].to_vec());
        assert_eq!(index.reconstruct_n(2, 3).unwrap(), data[8..20].to_vec());
        assert_eq!(index.reconstruct_batch(&[0, 9]).unwrap().len(), 8);
        assert!(matches!(index.reconstruct(10), Err(FaissError::Validation(_))));
        assert!(matches!(index.reconstruct(-1), Err(FaissError::Validation(_))));

        let r = index.range_search(&data[..4], 1e-6).unwrap();
        assert_eq!(r.nq(), 1);
        assert_eq!(r.hits(0).iter().map(|h| h.1).collect::<Vec<_>>(), vec![0]);
        assert!(matches!(
            index.range_search(&data[..4], f32::NAN),
            Err(FaissError::Validation(_))
        ));
    }

    #[test]
    fn test_reset_keeps_configuration() {
        let lib = Library::simulated();
        let mut index = FlatIndex::new_l2(&lib, 4).unwrap();
        index.add(&random_vectors(10, 4, 0)).unwrap();
        index.reset().unwrap();
        assert_eq!(index.cached_count(), 0);
        assert_eq!(index.dim().unwrap(), 4);
        index.add(&random_vectors(2, 4, 0)).unwrap();
        assert_eq!(index.count().unwrap(), 2);
    }

    #[test]
    fn test_capabilities() {
        let lib = Library::simulated();
        let mut index = FlatIndex::new_l2(&lib, 4).unwrap();
        assert!(matches!(
            index.probe_control_mut().map(|p| p.nlist()),
            Err(FaissError::CapabilityUnsupported { variant: "IndexFlat", .. })
        ));
        assert!(index.capabilities().contains(&crate::index::Capability::Reconstruct));
    }
}
