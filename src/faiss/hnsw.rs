//! HNSW Index
//!
//! 图索引 (HNSW + flat storage). No training; search effort is tunable.

use crate::api::RangeSearchResult;
use crate::error::Result;
use crate::faiss::core::{check_dim, check_float_metric, check_positive, IndexCore, Training};
use crate::ffi::Constructor;
use crate::index::{Index, RangeSearch, SearchEffort};
use crate::library::Library;
use crate::metrics::MetricType;

#[derive(Debug)]
pub struct HnswIndex {
    core: IndexCore,
    m: usize,
}

impl HnswIndex {
    /// `m` is the number of graph neighbors per node.
    pub fn new(lib: &Library, d: usize, m: usize, metric: MetricType) -> Result<Self> {
        check_dim(d)?;
        check_positive("M", m)?;
        check_float_metric(metric)?;
        let core = IndexCore::create(
            lib,
            "IndexHNSWFlat",
            &Constructor::HnswFlat { d, m, metric },
            Training::Never,
            Vec::new(),
        )?;
        let mut index = Self { core, m };
        index.core.apply_default_ef_search(lib)?;
        Ok(index)
    }

    pub fn m(&self) -> usize {
        self.m
    }
}

impl Index for HnswIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }

    fn as_search_effort(&self) -> Option<&dyn SearchEffort> {
        Some(self)
    }

    fn as_search_effort_mut(&mut self) -> Option<&mut dyn SearchEffort> {
        Some(self)
    }

    fn as_range_search(&self) -> Option<&dyn RangeSearch> {
        Some(self)
    }
}

impl SearchEffort for HnswIndex {
    fn ef_search(&self) -> Result<usize> {
        self.core.ef_search()
    }

    fn set_ef_search(&mut self, ef: usize) -> Result<()> {
        self.core.set_ef_search(ef)
    }

    fn ef_construction(&self) -> Result<usize> {
        self.core.ef_construction()
    }

    fn set_ef_construction(&mut self, ef: usize) -> Result<()> {
        self.core.set_ef_construction(ef)
    }
}

impl RangeSearch for HnswIndex {
    fn range_search(&self, queries: &[f32], radius: f32) -> Result<RangeSearchResult> {
        self.core.range_search(queries, radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use crate::error::FaissError;
    use crate::faiss::test_util::random_vectors;
    use crate::index::{Capability, IndexExt};

    #[test]
    fn test_hnsw_search_effort() {
        let lib = Library::simulated();
        let mut index = HnswIndex::new(&lib, 8, 16, MetricType::L2).unwrap();
        assert_eq!(index.m(), 16);
        assert_eq!(index.ef_search().unwrap(), 16);
        index.set_ef_search(64).unwrap();
        assert_eq!(index.ef_search().unwrap(), 64);
        assert!(matches!(index.set_ef_search(0), Err(FaissError::Validation(_))));

        let effort = index.search_effort_mut().unwrap();
        effort.set_ef_construction(80).unwrap();
        assert_eq!(effort.ef_construction().unwrap(), 80);

        assert!(matches!(
            index.probe_control_mut().map(|_| ()),
            Err(FaissError::CapabilityUnsupported { capability: Capability::ProbeCount, .. })
        ));
    }

    #[test]
    fn test_hnsw_add_search() {
        let lib = Library::simulated();
        let mut index = HnswIndex::new(&lib, 8, 8, MetricType::L2).unwrap();
        let data = random_vectors(100, 8, 8);
        index.add(&data).unwrap();
        let r = index.search(&data[8..16], 2).unwrap();
        assert_eq!(r.labels[0], 1);
    }

    #[test]
    fn test_default_ef_search_from_config() {
        let config = LibraryConfig { default_ef_search: Some(128), ..LibraryConfig::default() };
        let lib = Library::from_config(config).unwrap();
        let index = HnswIndex::new(&lib, 4, 8, MetricType::L2).unwrap();
        assert_eq!(index.ef_search().unwrap(), 128);
    }
}
