//! IVF-PQ Index
//!
//! 倒排 + 乘积量化. Training needs at least `max(nlist, 2^nbits)` vectors.

use std::sync::Arc;

use crate::error::Result;
use crate::faiss::core::{
    check_dim, check_divisible, check_float_metric, check_nbits, check_positive, IndexCore, Training,
};
use crate::faiss::FlatIndex;
use crate::ffi::Constructor;
use crate::index::{Dependency, Index, ProbeControl};
use crate::library::Library;
use crate::metrics::MetricType;

#[derive(Debug)]
pub struct IvfPqIndex {
    core: IndexCore,
    nlist: usize,
    m: usize,
    nbits: usize,
}

impl IvfPqIndex {
    pub fn new(
        lib: &Library,
        d: usize,
        nlist: usize,
        m: usize,
        nbits: usize,
        metric: MetricType,
    ) -> Result<Self> {
        check_dim(d)?;
        check_float_metric(metric)?;
        let ctor = Constructor::IvfPq { quantizer: None, d, nlist, m, nbits, metric };
        Self::build(lib, &ctor, d, nlist, m, nbits, Vec::new())
    }

    pub fn with_quantizer(
        lib: &Library,
        quantizer: Arc<FlatIndex>,
        nlist: usize,
        m: usize,
        nbits: usize,
    ) -> Result<Self> {
        let d = quantizer.dim()?;
        let metric = quantizer.metric()?;
        let raw = quantizer.core().raw("faiss_IndexIVFPQ_new")?;
        let ctor = Constructor::IvfPq { quantizer: Some(raw), d, nlist, m, nbits, metric };
        Self::build(lib, &ctor, d, nlist, m, nbits, vec![Dependency::Index(quantizer)])
    }

    fn build(
        lib: &Library,
        ctor: &Constructor<'_>,
        d: usize,
        nlist: usize,
        m: usize,
        nbits: usize,
        deps: Vec<Dependency>,
    ) -> Result<Self> {
        check_positive("nlist", nlist)?;
        check_divisible(d, m)?;
        check_nbits(nbits)?;
        let min = nlist.max(1 << nbits);
        let core = IndexCore::create(lib, "IndexIVFPQ", ctor, Training::Required { min }, deps)?;
        let mut index = Self { core, nlist, m, nbits };
        index.core.apply_default_nprobe(lib, nlist)?;
        Ok(index)
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// Number of sub-quantizers.
    pub fn m(&self) -> usize {
        self.m
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Bytes per encoded vector.
    pub fn code_size(&self) -> usize {
        (self.m * self.nbits + 7) / 8
    }
}

impl Index for IvfPqIndex {
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

impl ProbeControl for IvfPqIndex {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaissError;
    use crate::faiss::test_util::random_vectors;
    use crate::index::IndexExt;

    #[test]
    fn test_host_validation() {
        let lib = Library::simulated();
        assert!(matches!(
            IvfPqIndex::new(&lib, 30, 4, 7, 8, MetricType::L2),
            Err(FaissError::Validation(_))
        ));
        assert!(matches!(
            IvfPqIndex::new(&lib, 32, 4, 8, 0, MetricType::L2),
            Err(FaissError::Validation(_))
        ));
        assert!(matches!(
            IvfPqIndex::new(&lib, 32, 0, 8, 8, MetricType::L2),
            Err(FaissError::Validation(_))
        ));
        assert_eq!(lib.sim_stats().unwrap().creates, 0);
    }

    #[test]
    fn test_training_minimum_covers_codebook() {
        let lib = Library::simulated();
        let mut index = IvfPqIndex::new(&lib, 16, 4, 4, 6, MetricType::L2).unwrap();
        assert_eq!(index.code_size(), 3);
        let data = random_vectors(100, 16, 11);

        // 2^6 = 64 > nlist
        assert!(matches!(index.train(&data[..16 * 63]), Err(FaissError::Validation(_))));
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        assert_eq!(index.cached_count(), 100);

        index.set_nprobe(4).unwrap();
        let result = index.search(&data[..16], 3).unwrap();
        assert_eq!(result.labels[0], 0);
        assert!(matches!(
            index.reconstructor().map(|_| ()),
            Err(FaissError::CapabilityUnsupported { variant: "IndexIVFPQ", .. })
        ));
    }
}
