//! IDMap Index
//!
//! 外部 ID 映射：wraps a base index and translates between caller ids and
//! the base's sequential positions. The base must be empty when the map is
//! built and is kept alive for the lifetime of the map.

use tracing::debug;

use crate::error::{FaissError, Result};
use crate::faiss::core::IndexCore;
use crate::ffi::Constructor;
use crate::index::{Dependency, IdMapping, Index, SharedIndex};
use crate::library::Library;

#[derive(Debug)]
pub struct IdMapIndex {
    core: IndexCore,
}

impl IdMapIndex {
    pub fn new(lib: &Library, base: SharedIndex) -> Result<Self> {
        let count = base.count()?;
        if count != 0 {
            return Err(FaissError::validation(format!(
                "IDMap base {} must be empty, holds {} vectors",
                base.variant(),
                count
            )));
        }
        let raw = base.core().raw("faiss_IndexIDMap_new")?;
        let training = base.core().training();
        let core = IndexCore::create(
            lib,
            "IndexIDMap",
            &Constructor::IdMap { base: raw },
            training,
            vec![Dependency::Index(base)],
        )?;
        Ok(Self { core })
    }

    pub fn base(&self) -> Option<&SharedIndex> {
        match self.core.dependencies().first() {
            Some(Dependency::Index(base)) => Some(base),
            _ => None,
        }
    }
}

impl Index for IdMapIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }

    /// Assigns sequential ids starting at the current count.
    fn add(&mut self, x: &[f32]) -> Result<()> {
        self.core.raw("faiss_Index_add")?;
        let n = self.core.rows(x, "vectors")?;
        let start = self.core.count()? as i64;
        let ids: Vec<i64> = (start..start + n as i64).collect();
        debug!("IDMap assigning ids {}..{}", start, start + n as i64);
        self.core.add_with_ids(x, &ids)
    }

    fn as_id_mapping(&self) -> Option<&dyn IdMapping> {
        Some(self)
    }

    fn as_id_mapping_mut(&mut self) -> Option<&mut dyn IdMapping> {
        Some(self)
    }
}

impl IdMapping for IdMapIndex {
    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        self.core.add_with_ids(x, ids)
    }

    fn remove_ids(&mut self, ids: &[i64]) -> Result<usize> {
        self.core.remove_ids(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::faiss::test_util::random_vectors;
    use crate::faiss::{FlatIndex, IvfFlatIndex};
    use crate::index::IndexExt;
    use crate::metrics::MetricType;

    #[test]
    fn test_search_returns_caller_ids() {
        let lib = Library::simulated();
        let base = Arc::new(FlatIndex::new_l2(&lib, 4).unwrap());
        let mut index = IdMapIndex::new(&lib, base).unwrap();
        let data = random_vectors(3, 4, 1);
        index.add_with_ids(&data, &[100, 200, 300]).unwrap();
        assert_eq!(index.cached_count(), 3);

        let result = index.search(&data[4..8], 1).unwrap();
        assert_eq!(result.labels, vec![200]);

        assert_eq!(index.remove_ids(&[100, 999]).unwrap(), 1);
        assert_eq!(index.count().unwrap(), 2);
    }

    #[test]
    fn test_plain_add_is_sequential() {
        let lib = Library::simulated();
        let base = Arc::new(FlatIndex::new_l2(&lib, 2).unwrap());
        let mut index = IdMapIndex::new(&lib, base).unwrap();
        index.add(&[0.0, 0.0, 1.0, 1.0]).unwrap();
        index.add(&[5.0, 5.0]).unwrap();
        let result = index.search(&[5.0, 5.0], 1).unwrap();
        assert_eq!(result.labels, vec![2]);
    }

    #[test]
    fn test_ids_length_mismatch() {
        let lib = Library::simulated();
        let base = Arc::new(FlatIndex::new_l2(&lib, 2).unwrap());
        let mut index = IdMapIndex::new(&lib, base).unwrap();
        assert!(matches!(
            index.id_mapping_mut().and_then(|m| m.add_with_ids(&[0.0; 4], &[1])),
            Err(FaissError::Validation(_))
        ));
    }

    #[test]
    fn test_non_empty_base_rejected() {
        let lib = Library::simulated();
        let mut flat = FlatIndex::new_l2(&lib, 2).unwrap();
        flat.add(&[1.0, 2.0]).unwrap();
        let creates = lib.sim_stats().unwrap().creates;
        assert!(matches!(IdMapIndex::new(&lib, Arc::new(flat)), Err(FaissError::Validation(_))));
        assert_eq!(lib.sim_stats().unwrap().creates, creates);
    }

    #[test]
    fn test_inherits_training_gate() {
        let lib = Library::simulated();
        let base = Arc::new(IvfFlatIndex::new(&lib, 4, 2, MetricType::L2).unwrap());
        let mut index = IdMapIndex::new(&lib, base).unwrap();
        let data = random_vectors(10, 4, 2);
        assert!(index.requires_training());
        assert!(matches!(index.add(&data), Err(FaissError::NotTrained { .. })));
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        assert_eq!(index.cached_count(), 10);
    }

    #[test]
    fn test_close_releases_map_then_base() {
        let lib = Library::simulated();
        let base = Arc::new(FlatIndex::new_l2(&lib, 2).unwrap());
        let base_node = base.node();
        let mut index = IdMapIndex::new(&lib, base).unwrap();
        assert_eq!(lib.graph().dependencies(index.node()), vec![base_node]);
        index.close().unwrap();
        assert!(index.dependencies().is_empty());
        // the last strong reference went with the keep-alive list
        assert_eq!(lib.sim_stats().unwrap().live, 0);
    }
}
