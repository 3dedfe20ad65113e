//! PQ FastScan Index
//!
//! SIMD 分块扫描的乘积量化. Codes are 4 to 6 bits per sub-quantizer and are
//! laid out in blocks of `bbs` vectors; 4 bits is the fast path. The block
//! size has no native getter, so the last value set is mirrored here.

use std::sync::Arc;

use crate::error::{FaissError, Result};
use crate::faiss::core::{check_dim, check_divisible, check_float_metric, check_positive, IndexCore, Training};
use crate::faiss::FlatIndex;
use crate::ffi::Constructor;
use crate::index::{Dependency, Index, ProbeControl, SharedIndex};
use crate::library::Library;
use crate::metrics::MetricType;

pub const DEFAULT_BLOCK_SIZE: usize = 32;

const SET_BBS: &str = "faiss_IndexPQFastScan_set_bbs";

fn check_fastscan_nbits(nbits: usize) -> Result<()> {
    if !(4..=6).contains(&nbits) {
        return Err(FaissError::validation(format!(
            "fast-scan nbits must be 4, 5 or 6, got {}",
            nbits
        )));
    }
    Ok(())
}

/// Validates and applies a block size: a positive multiple of 32.
fn set_block_size(core: &mut IndexCore, bbs: usize) -> Result<()> {
    core.handle().get(SET_BBS)?;
    if bbs == 0 || bbs % 32 != 0 {
        return Err(FaissError::validation(format!(
            "block size must be a positive multiple of 32, got {}",
            bbs
        )));
    }
    core.handle()
        .call(SET_BBS, |b, p| unsafe { b.pq_fastscan_set_bbs(p, bbs) })
}

#[derive(Debug)]
pub struct PqFastScanIndex {
    core: IndexCore,
    m: usize,
    nbits: usize,
    bbs: usize,
}

impl PqFastScanIndex {
    pub fn new(lib: &Library, d: usize, m: usize, nbits: usize, metric: MetricType) -> Result<Self> {
        check_dim(d)?;
        check_divisible(d, m)?;
        check_fastscan_nbits(nbits)?;
        check_float_metric(metric)?;
        let core = IndexCore::create(
            lib,
            "IndexPQFastScan",
            &Constructor::PqFastScan { d, m, nbits, metric },
            Training::Required { min: 1 << nbits },
            Vec::new(),
        )?;
        Ok(Self { core, m, nbits, bbs: DEFAULT_BLOCK_SIZE })
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }

    pub fn block_size(&self) -> usize {
        self.bbs
    }

    pub fn set_block_size(&mut self, bbs: usize) -> Result<()> {
        set_block_size(&mut self.core, bbs)?;
        self.bbs = bbs;
        Ok(())
    }

    /// Raw float size over code size.
    pub fn compression_ratio(&self) -> f64 {
        let raw = self.core.dim().unwrap_or(0) * 32;
        raw as f64 / (self.m * self.nbits) as f64
    }
}

impl Index for PqFastScanIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }
}

/// 倒排 + FastScan PQ.
#[derive(Debug)]
pub struct IvfPqFastScanIndex {
    core: IndexCore,
    nlist: usize,
    m: usize,
    nbits: usize,
    bbs: usize,
}

impl IvfPqFastScanIndex {
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
        let ctor = Constructor::IvfPqFastScan { quantizer: None, d, nlist, m, nbits, metric };
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
        let raw = quantizer.core().raw("faiss_IndexIVFPQFastScan_new")?;
        let ctor = Constructor::IvfPqFastScan { quantizer: Some(raw), d, nlist, m, nbits, metric };
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
        check_fastscan_nbits(nbits)?;
        let min = nlist.max(1 << nbits);
        let core = IndexCore::create(lib, "IndexIVFPQFastScan", ctor, Training::Required { min }, deps)?;
        let mut index = Self { core, nlist, m, nbits, bbs: DEFAULT_BLOCK_SIZE };
        index.core.apply_default_nprobe(lib, nlist)?;
        Ok(index)
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }

    pub fn block_size(&self) -> usize {
        self.bbs
    }

    pub fn set_block_size(&mut self, bbs: usize) -> Result<()> {
        set_block_size(&mut self.core, bbs)?;
        self.bbs = bbs;
        Ok(())
    }

    /// External coarse quantizer, if one was supplied.
    pub fn quantizer(&self) -> Option<&SharedIndex> {
        self.core.dependencies().iter().find_map(|d| match d {
            Dependency::Index(q) => Some(q),
            _ => None,
        })
    }
}

impl Index for IvfPqFastScanIndex {
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

impl ProbeControl for IvfPqFastScanIndex {
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
    use crate::faiss::test_util::random_vectors;
    use crate::index::IndexExt;

    #[test]
    fn test_fastscan_parameter_checks() {
        let lib = Library::simulated();
        for nbits in [3, 7, 8] {
            assert!(matches!(
                PqFastScanIndex::new(&lib, 16, 4, nbits, MetricType::L2),
                Err(FaissError::Validation(_))
            ));
        }
        assert!(matches!(
            PqFastScanIndex::new(&lib, 10, 4, 4, MetricType::L2),
            Err(FaissError::Validation(_))
        ));
        assert!(matches!(
            IvfPqFastScanIndex::new(&lib, 16, 0, 4, 4, MetricType::L2),
            Err(FaissError::Validation(_))
        ));
        assert_eq!(lib.sim_stats().unwrap().creates, 0);
    }

    #[test]
    fn test_fastscan_train_add_search() {
        let lib = Library::simulated();
        let mut index = PqFastScanIndex::new(&lib, 16, 4, 4, MetricType::L2).unwrap();
        assert_eq!(index.block_size(), DEFAULT_BLOCK_SIZE);
        assert_eq!(index.compression_ratio(), 32.0);
        let data = random_vectors(64, 16, 4);

        assert!(matches!(index.add(&data), Err(FaissError::NotTrained { variant: "IndexPQFastScan", .. })));
        // 2^4 = 16 vectors minimum
        assert!(matches!(index.train(&data[..16 * 15]), Err(FaissError::Validation(_))));
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        assert_eq!(index.search(&data[16 * 3..16 * 4], 1).unwrap().labels, vec![3]);
        assert!(index.capabilities().is_empty());
    }

    #[test]
    fn test_block_size() {
        let lib = Library::simulated();
        let mut index = PqFastScanIndex::new(&lib, 8, 2, 4, MetricType::L2).unwrap();
        for bad in [0, 16, 48] {
            assert!(matches!(index.set_block_size(bad), Err(FaissError::Validation(_))));
        }
        assert_eq!(index.block_size(), 32);
        index.set_block_size(64).unwrap();
        assert_eq!(index.block_size(), 64);

        index.close().unwrap();
        assert!(matches!(index.set_block_size(96), Err(FaissError::NullHandle { .. })));
        assert_eq!(index.block_size(), 64);
    }

    #[test]
    fn test_ivf_fastscan_probe_control() {
        let lib = Library::simulated();
        let mut index = IvfPqFastScanIndex::new(&lib, 8, 4, 2, 4, MetricType::L2).unwrap();
        let data = random_vectors(100, 8, 6);
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        index.set_block_size(64).unwrap();

        let probe = index.probe_control_mut().unwrap();
        assert!(matches!(probe.set_nprobe(5), Err(FaissError::Validation(_))));
        probe.set_nprobe(4).unwrap();
        assert_eq!(index.search(&data[8 * 7..8 * 8], 1).unwrap().labels, vec![7]);
    }

    #[test]
    fn test_ivf_fastscan_external_quantizer() {
        let lib = Library::simulated();
        let quantizer = Arc::new(FlatIndex::new_l2(&lib, 8).unwrap());
        let qnode = quantizer.node();
        let mut index = IvfPqFastScanIndex::with_quantizer(&lib, quantizer, 4, 2, 4).unwrap();
        assert_eq!(lib.graph().dependencies(index.node()), vec![qnode]);
        assert_eq!(index.quantizer().map(|q| q.node()), Some(qnode));

        index.close().unwrap();
        let stats = lib.sim_stats().unwrap();
        assert_eq!(stats.creates, 2);
        assert_eq!(stats.frees, 2);
        assert_eq!(lib.telemetry().snapshot().fallback_releases, 0);
    }
}
