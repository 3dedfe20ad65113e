//! IVF-SQ Index
//!
//! 倒排 + 标量量化

use std::sync::Arc;

use crate::error::Result;
use crate::faiss::core::{check_dim, check_float_metric, check_positive, IndexCore, Training};
use crate::faiss::FlatIndex;
use crate::ffi::{Constructor, QuantizerType};
use crate::index::{Dependency, Index, ProbeControl};
use crate::library::Library;
use crate::metrics::MetricType;

#[derive(Debug)]
pub struct IvfScalarQuantizerIndex {
    core: IndexCore,
    nlist: usize,
    qtype: QuantizerType,
}

impl IvfScalarQuantizerIndex {
    pub fn new(
        lib: &Library,
        d: usize,
        nlist: usize,
        qtype: QuantizerType,
        metric: MetricType,
    ) -> Result<Self> {
        check_dim(d)?;
        check_positive("nlist", nlist)?;
        check_float_metric(metric)?;
        let ctor = Constructor::IvfScalarQuantizer { quantizer: None, d, nlist, qtype, metric };
        Self::build(lib, &ctor, nlist, qtype, Vec::new())
    }

    pub fn with_quantizer(
        lib: &Library,
        quantizer: Arc<FlatIndex>,
        nlist: usize,
        qtype: QuantizerType,
    ) -> Result<Self> {
        check_positive("nlist", nlist)?;
        let d = quantizer.dim()?;
        let metric = quantizer.metric()?;
        let raw = quantizer.core().raw("faiss_IndexIVFScalarQuantizer_new")?;
        let ctor = Constructor::IvfScalarQuantizer { quantizer: Some(raw), d, nlist, qtype, metric };
        Self::build(lib, &ctor, nlist, qtype, vec![Dependency::Index(quantizer)])
    }

    fn build(
        lib: &Library,
        ctor: &Constructor<'_>,
        nlist: usize,
        qtype: QuantizerType,
        deps: Vec<Dependency>,
    ) -> Result<Self> {
        // the coarse quantizer always needs training, the codec may not
        let training = Training::Required { min: nlist };
        let core = IndexCore::create(lib, "IndexIVFScalarQuantizer", ctor, training, deps)?;
        let mut index = Self { core, nlist, qtype };
        index.core.apply_default_nprobe(lib, nlist)?;
        Ok(index)
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn qtype(&self) -> QuantizerType {
        self.qtype
    }
}

impl Index for IvfScalarQuantizerIndex {
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
}

impl ProbeControl for IvfScalarQuantizerIndex {
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
