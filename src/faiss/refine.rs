//! Refine Index
//!
//! 两阶段检索：the base stage proposes `ceil(k * k_factor)` candidates and
//! the refine stage re-ranks them with exact distances. Both stages are kept
//! alive by the composite and must agree on dimension and metric.

use std::sync::Arc;

use crate::error::{FaissError, Result};
use crate::faiss::core::{check_same_shape, IndexCore, Training};
use crate::faiss::FlatIndex;
use crate::ffi::Constructor;
use crate::index::{Dependency, Index, RefineFactor, SharedIndex};
use crate::library::Library;

#[derive(Debug)]
pub struct RefineIndex {
    core: IndexCore,
    k_factor: f32,
}

impl RefineIndex {
    pub fn new(lib: &Library, base: SharedIndex, refine: SharedIndex) -> Result<Self> {
        check_same_shape(
            "refine",
            (base.dim()?, base.metric()?),
            (refine.dim()?, refine.metric()?),
        )?;
        let ctor = Constructor::Refine {
            base: base.core().raw("faiss_IndexRefine_new")?,
            refine: refine.core().raw("faiss_IndexRefine_new")?,
        };
        let core = IndexCore::create(
            lib,
            "IndexRefine",
            &ctor,
            Training::Native,
            vec![Dependency::Index(base), Dependency::Index(refine)],
        )?;
        Ok(Self { core, k_factor: 1.0 })
    }

    /// Refines `base` with a fresh flat index of the same shape.
    pub fn flat(lib: &Library, base: SharedIndex) -> Result<Self> {
        let refine = FlatIndex::new(lib, base.dim()?, base.metric()?)?;
        Self::new(lib, base, Arc::new(refine))
    }

    pub fn base(&self) -> Option<&SharedIndex> {
        self.stage(0)
    }

    pub fn refine(&self) -> Option<&SharedIndex> {
        self.stage(1)
    }

    fn stage(&self, i: usize) -> Option<&SharedIndex> {
        match self.core.dependencies().get(i) {
            Some(Dependency::Index(index)) => Some(index),
            _ => None,
        }
    }
}

impl Index for RefineIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }

    fn as_refine_factor(&self) -> Option<&dyn RefineFactor> {
        Some(self)
    }

    fn as_refine_factor_mut(&mut self) -> Option<&mut dyn RefineFactor> {
        Some(self)
    }
}

impl RefineFactor for RefineIndex {
    fn k_factor(&self) -> f32 {
        self.k_factor
    }

    fn set_k_factor(&mut self, k_factor: f32) -> Result<()> {
        const OP: &str = "faiss_IndexRefine_set_k_factor";
        self.core.raw(OP)?;
        if !k_factor.is_finite() || k_factor < 1.0 {
            return Err(FaissError::validation(format!(
                "k_factor must be a finite value >= 1, got {}",
                k_factor
            )));
        }
        self.core
            .handle()
            .call(OP, |b, p| unsafe { b.refine_set_k_factor(p, k_factor) })?;
        self.k_factor = k_factor;
        Ok(())
    }
}
