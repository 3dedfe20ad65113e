//! IVF-Flat Index
//!
//! IVF (Inverted File) + Flat (no quantization)
//! 倒排列表中存储原始向量
//!
//! The coarse quantizer is either owned by the native object or supplied by
//! the caller as a [`FlatIndex`]. An external quantizer is kept alive by this
//! wrapper for as long as the native index references it.

use std::sync::Arc;

use crate::api::RangeSearchResult;
use crate::error::Result;
use crate::faiss::core::{check_dim, check_float_metric, check_positive, IndexCore, Training};
use crate::faiss::FlatIndex;
use crate::ffi::Constructor;
use crate::index::{Dependency, Index, ProbeControl, RangeSearch, Reconstruct, SharedIndex};
use crate::library::Library;
use crate::metrics::MetricType;

#[derive(Debug)]
pub struct IvfFlatIndex {
    core: IndexCore,
    nlist: usize,
}

impl IvfFlatIndex {
    /// IVF-Flat with a native-owned coarse quantizer.
    pub fn new(lib: &Library, d: usize, nlist: usize, metric: MetricType) -> Result<Self> {
        check_dim(d)?;
        check_positive("nlist", nlist)?;
        check_float_metric(metric)?;
        let ctor = Constructor::IvfFlat { quantizer: None, d, nlist, metric };
        Self::build(lib, &ctor, nlist, Vec::new())
    }

    /// IVF-Flat over a caller-supplied flat quantizer. Dimension and metric
    /// come from the quantizer; a quantizer already holding `nlist` centroids
    /// makes the index trained from the start.
    pub fn with_quantizer(lib: &Library, quantizer: Arc<FlatIndex>, nlist: usize) -> Result<Self> {
        check_positive("nlist", nlist)?;
        let d = quantizer.dim()?;
        let metric = quantizer.metric()?;
        let raw = quantizer.core().raw("faiss_IndexIVFFlat_new")?;
        let ctor = Constructor::IvfFlat { quantizer: Some(raw), d, nlist, metric };
        Self::build(lib, &ctor, nlist, vec![Dependency::Index(quantizer)])
    }

    fn build(lib: &Library, ctor: &Constructor<'_>, nlist: usize, deps: Vec<Dependency>) -> Result<Self> {
        let core = IndexCore::create(lib, "IndexIVFFlat", ctor, Training::Required { min: nlist }, deps)?;
        let mut index = Self { core, nlist };
        index.core.apply_default_nprobe(lib, nlist)?;
        Ok(index)
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// External coarse quantizer, if one was supplied.
    pub fn quantizer(&self) -> Option<&SharedIndex> {
        self.core.dependencies().iter().find_map(|d| match d {
            Dependency::Index(q) => Some(q),
            _ => None,
        })
    }
}

impl Index for IvfFlatIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }

    fn as_probe_control(&self) -> Option<&dyn ProbeControl> {
        Some(self)
    }

    fn as_probe_control_mut(&mut self) -> Option<&mut dyn ProbeControl> {
        Some(self)
    }

    fn as_reconstruct(&self) -> Option<&dyn Reconstruct> {
        Some(self)
    }

    fn as_range_search(&self) -> Option<&dyn RangeSearch> {
        Some(self)
    }
}

impl ProbeControl for IvfFlatIndex {
    fn nlist(&self) -> usize {
        self.nlist
    }

    fn nprobe(&self) -> Result<usize> {
        self.core.nprobe()
    }

    fn set_nprobe(&mut self, nprobe: usize) -> Result<()> {
        self.core.set_nprobe(nprobe, self.nlist)
    }
}

impl Reconstruct for IvfFlatIndex {
    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        self.core.reconstruct(key)
    }

    fn reconstruct_n(&self, i0: i64, n: usize) -> Result<Vec<f32>> {
        self.core.reconstruct_n(i0, n)
    }
}

impl RangeSearch for IvfFlatIndex {
    fn range_search(&self, queries: &[f32], radius: f32) -> Result<RangeSearchResult> {
        self.core.range_search(queries, radius)
    }
}
