//! PreTransform Index
//!
//! 预变换：vectors pass through a [`VectorTransform`] before reaching the
//! base index. The transform's output dimension must equal the base
//! dimension; the composite's own dimension is the transform's input.

use std::sync::Arc;

use crate::error::{FaissError, Result};
use crate::faiss::core::{IndexCore, Training};
use crate::ffi::Constructor;
use crate::index::{Dependency, Index, SharedIndex};
use crate::library::Library;
use crate::transform::VectorTransform;

#[derive(Debug)]
pub struct PreTransformIndex {
    core: IndexCore,
}

impl PreTransformIndex {
    pub fn new(lib: &Library, transform: Arc<VectorTransform>, base: SharedIndex) -> Result<Self> {
        let d_out = transform.d_out()?;
        let d = base.dim()?;
        if d_out != d {
            return Err(FaissError::validation(format!(
                "pretransform: {} outputs {} dimensions, base {} expects {}",
                transform.variant(),
                d_out,
                base.variant(),
                d
            )));
        }
        let ctor = Constructor::PreTransform {
            transform: transform.raw("faiss_IndexPreTransform_new")?,
            base: base.core().raw("faiss_IndexPreTransform_new")?,
        };
        let core = IndexCore::create(
            lib,
            "IndexPreTransform",
            &ctor,
            Training::Native,
            vec![Dependency::Transform(transform), Dependency::Index(base)],
        )?;
        Ok(Self { core })
    }

    pub fn transform(&self) -> Option<&Arc<VectorTransform>> {
        self.core.dependencies().iter().find_map(|d| match d {
            Dependency::Transform(t) => Some(t),
            _ => None,
        })
    }

    pub fn base(&self) -> Option<&SharedIndex> {
        self.core.dependencies().iter().find_map(|d| match d {
            Dependency::Index(i) => Some(i),
            _ => None,
        })
    }
}

impl Index for PreTransformIndex {
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
    use crate::faiss::test_util::random_vectors;
    use crate::faiss::FlatIndex;

    #[test]
    fn test_pca_then_flat() {
        let lib = Library::simulated();
        let pca = Arc::new(VectorTransform::pca(&lib, 16, 4).unwrap());
        let base: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 4).unwrap());
        let mut index = PreTransformIndex::new(&lib, pca, base).unwrap();
        assert_eq!(index.dim().unwrap(), 16);
        assert!(!index.is_trained().unwrap());

        let data = random_vectors(200, 16, 9);
        assert!(matches!(index.add(&data), Err(FaissError::NotTrained { .. })));
        index.train(&data).unwrap();
        assert!(index.transform().unwrap().is_trained().unwrap());
        index.add(&data).unwrap();
        assert_eq!(index.cached_count(), 200);
        assert_eq!(index.base().unwrap().count().unwrap(), 200);

        let result = index.search(&data[16 * 3..16 * 4], 1).unwrap();
        assert_eq!(result.labels, vec![3]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let lib = Library::simulated();
        let rr = Arc::new(VectorTransform::random_rotation(&lib, 16, 8).unwrap());
        let base: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 4).unwrap());
        let creates = lib.sim_stats().unwrap().creates;
        assert!(matches!(PreTransformIndex::new(&lib, rr, base), Err(FaissError::Validation(_))));
        assert_eq!(lib.sim_stats().unwrap().creates, creates);
    }

    #[test]
    fn test_dependencies_recorded() {
        let lib = Library::simulated();
        let rr = Arc::new(VectorTransform::random_rotation(&lib, 8, 8).unwrap());
        let base: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 8).unwrap());
        let expected = vec![rr.node(), base.node()];
        let mut index = PreTransformIndex::new(&lib, rr, base).unwrap();
        assert_eq!(lib.graph().dependencies(index.node()), expected);
        index.close().unwrap();
        assert_eq!(lib.sim_stats().unwrap().live, 0);
    }
}
