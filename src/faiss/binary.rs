//! Binary Index
//!
//! 二值向量索引 (Hamming distance). Vectors are packed bytes, the dimension
//! is counted in bits and must be a multiple of 8. Distances are integers.
//!
//! Binary wrappers follow the same handle and keep-alive discipline as the
//! float ones: [`BinaryCore`] owns the handle and forwards every call.

use std::sync::Arc;

use tracing::{debug, info};

use crate::api::BinarySearchResult;
use crate::error::{FaissError, Result};
use crate::faiss::core::{check_positive, check_same_library, close_dependencies, result_buffer, rows};
use crate::ffi::{Constructor, RawPtr};
use crate::handle::Handle;
use crate::index::{Capability, Dependency, ProbeControl};
use crate::library::Library;
use crate::metrics::MetricType;
use crate::ownership::NodeId;
use crate::telemetry::{Telemetry, Timer};

pub struct BinaryCore {
    handle: Handle,
    deps: Vec<Dependency>,
    variant: &'static str,
    dim: usize,
    min_train: Option<usize>,
    trained: bool,
    cached_count: u64,
    telemetry: Arc<Telemetry>,
}

impl BinaryCore {
    fn create(
        lib: &Library,
        variant: &'static str,
        ctor: &Constructor<'_>,
        min_train: Option<usize>,
        deps: Vec<Dependency>,
    ) -> Result<Self> {
        check_same_library(lib, &deps)?;
        let handle = Handle::create(lib, variant, ctor)?;
        let meta = handle
            .call("faiss_IndexBinary_d", |b, p| unsafe { b.binary_d(p) })
            .and_then(|d| {
                let trained = handle.call("faiss_IndexBinary_is_trained", |b, p| unsafe {
                    b.binary_is_trained(p)
                })?;
                Ok((d, trained))
            });
        let (dim, trained) = match meta {
            Ok(meta) => meta,
            Err(e) => {
                handle.release()?;
                return Err(e);
            }
        };
        for dep in &deps {
            lib.graph().link(handle.node(), dep.node());
        }
        debug!("{} {} ready: d={} bits", variant, handle.node(), dim);
        Ok(Self {
            handle,
            deps,
            variant,
            dim,
            min_train,
            trained,
            cached_count: 0,
            telemetry: Arc::clone(lib.telemetry()),
        })
    }

    pub(crate) fn raw(&self, op: &'static str) -> Result<RawPtr> {
        self.handle.get(op)
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    fn code_size(&self) -> usize {
        self.dim / 8
    }

    fn rows(&self, x: &[u8], what: &str) -> Result<usize> {
        rows(x.len(), self.code_size(), what)
    }

    pub fn dim(&self) -> Result<usize> {
        self.handle.get("faiss_IndexBinary_d")?;
        Ok(self.dim)
    }

    pub fn count(&self) -> Result<u64> {
        self.handle
            .call("faiss_IndexBinary_ntotal", |b, p| unsafe { b.binary_ntotal(p) })
    }

    pub fn is_trained(&self) -> Result<bool> {
        self.handle
            .call("faiss_IndexBinary_is_trained", |b, p| unsafe { b.binary_is_trained(p) })
    }

    fn refresh(&mut self) -> Result<()> {
        self.cached_count = self.count()?;
        self.trained = self.is_trained()?;
        Ok(())
    }

    pub fn train(&mut self, x: &[u8]) -> Result<()> {
        const OP: &str = "faiss_IndexBinary_train";
        self.handle.get(OP)?;
        let n = self.rows(x, "training vectors")?;
        let Some(min) = self.min_train else {
            return Ok(());
        };
        if n < min.max(1) {
            return Err(FaissError::validation(format!(
                "{} needs at least {} training vectors, got {}",
                self.variant,
                min.max(1),
                n
            )));
        }
        let timer = Timer::start();
        self.handle.call(OP, |b, p| unsafe { b.binary_train(p, n, x) })?;
        self.telemetry.record_train(n, timer.elapsed());
        self.refresh()?;
        info!("{} trained with {} vectors", self.variant, n);
        Ok(())
    }

    pub fn add(&mut self, x: &[u8]) -> Result<()> {
        const OP: &str = "faiss_IndexBinary_add";
        self.handle.get(OP)?;
        let n = self.rows(x, "vectors")?;
        if n == 0 {
            return Ok(());
        }
        if !(self.trained || self.is_trained()?) {
            return Err(FaissError::NotTrained { variant: self.variant, op: OP });
        }
        let timer = Timer::start();
        self.handle.call(OP, |b, p| unsafe { b.binary_add(p, n, x) })?;
        self.telemetry.record_add(n, timer.elapsed());
        self.refresh()
    }

    pub fn search(&self, queries: &[u8], k: usize) -> Result<BinarySearchResult> {
        const OP: &str = "faiss_IndexBinary_search";
        self.handle.get(OP)?;
        if k == 0 {
            return Err(FaissError::validation("k must be > 0"));
        }
        let nq = self.rows(queries, "queries")?;
        if !(self.trained || self.is_trained()?) {
            return Err(FaissError::NotTrained { variant: self.variant, op: OP });
        }
        let mut distances = result_buffer(nq, k, 0i32)?;
        let mut labels = result_buffer(nq, k, -1i64)?;
        if nq > 0 {
            let timer = Timer::start();
            self.handle.call(OP, |b, p| unsafe {
                b.binary_search(p, nq, queries, k, &mut distances, &mut labels)
            })?;
            self.telemetry.record_search(nq, timer.elapsed());
        }
        Ok(BinarySearchResult { distances, labels, nq, k })
    }

    pub fn reset(&mut self) -> Result<()> {
        self.handle
            .call("faiss_IndexBinary_reset", |b, p| unsafe { b.binary_reset(p) })?;
        self.telemetry.record_reset();
        self.refresh()
    }

    pub fn close(&mut self) -> Result<()> {
        let result = self.handle.release();
        self.cached_count = 0;
        let deps = close_dependencies(std::mem::take(&mut self.deps));
        result.and(deps)
    }
}

impl std::fmt::Debug for BinaryCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryCore")
            .field("variant", &self.variant)
            .field("handle", &self.handle)
            .field("dim", &self.dim)
            .field("cached_count", &self.cached_count)
            .field("deps", &self.deps)
            .finish()
    }
}

/// 二值索引 trait
pub trait BinaryIndex: Send + Sync {
    #[doc(hidden)]
    fn core(&self) -> &BinaryCore;

    #[doc(hidden)]
    fn core_mut(&mut self) -> &mut BinaryCore;

    fn variant(&self) -> &'static str {
        self.core().variant
    }

    fn node(&self) -> NodeId {
        self.core().handle.node()
    }

    /// Dimension in bits.
    fn dim(&self) -> Result<usize> {
        self.core().dim()
    }

    /// Always Hamming.
    fn metric(&self) -> Result<MetricType> {
        self.core().handle.get("faiss_IndexBinary_metric_type")?;
        Ok(MetricType::Hamming)
    }

    fn count(&self) -> Result<u64> {
        self.core().count()
    }

    fn cached_count(&self) -> u64 {
        self.core().cached_count
    }

    fn is_trained(&self) -> Result<bool> {
        self.core().is_trained()
    }

    fn train(&mut self, x: &[u8]) -> Result<()> {
        self.core_mut().train(x)
    }

    fn add(&mut self, x: &[u8]) -> Result<()> {
        self.core_mut().add(x)
    }

    fn search(&self, queries: &[u8], k: usize) -> Result<BinarySearchResult> {
        self.core().search(queries, k)
    }

    fn reset(&mut self) -> Result<()> {
        self.core_mut().reset()
    }

    fn close(&mut self) -> Result<()> {
        self.core_mut().close()
    }

    fn is_closed(&self) -> bool {
        !self.core().handle.is_valid()
    }

    fn dependencies(&self) -> &[Dependency] {
        &self.core().deps
    }

    // ---- capability queries ----

    fn as_probe_control(&self) -> Option<&dyn ProbeControl> {
        None
    }

    fn as_probe_control_mut(&mut self) -> Option<&mut dyn ProbeControl> {
        None
    }
}

/// Capability dispatch for binary indexes. Probe count is the only optional
/// surface a binary variant can carry.
pub trait BinaryIndexExt: BinaryIndex {
    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::ProbeCount => self.as_probe_control().is_some(),
            _ => false,
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.supports(*c))
            .collect()
    }

    fn probe_control(&self) -> Result<&dyn ProbeControl> {
        let variant = self.variant();
        self.as_probe_control().ok_or(FaissError::CapabilityUnsupported {
            capability: Capability::ProbeCount,
            variant,
        })
    }

    fn probe_control_mut(&mut self) -> Result<&mut dyn ProbeControl> {
        let variant = self.variant();
        self.as_probe_control_mut().ok_or(FaissError::CapabilityUnsupported {
            capability: Capability::ProbeCount,
            variant,
        })
    }
}

impl<T: BinaryIndex + ?Sized> BinaryIndexExt for T {}

fn check_binary_dim(d: usize) -> Result<()> {
    if d == 0 || d % 8 != 0 {
        return Err(FaissError::validation(format!(
            "binary dimension must be a positive multiple of 8, got {}",
            d
        )));
    }
    Ok(())
}

/// 二值暴力搜索
#[derive(Debug)]
pub struct BinaryFlatIndex {
    core: BinaryCore,
}

impl BinaryFlatIndex {
    pub fn new(lib: &Library, d: usize) -> Result<Self> {
        check_binary_dim(d)?;
        let core = BinaryCore::create(lib, "IndexBinaryFlat", &Constructor::BinaryFlat { d }, None, Vec::new())?;
        Ok(Self { core })
    }
}

impl BinaryIndex for BinaryFlatIndex {
    fn core(&self) -> &BinaryCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BinaryCore {
        &mut self.core
    }
}

/// Multi-bit hash table over the leading `nbits` of each code. Needs no
/// training.
#[derive(Debug)]
pub struct BinaryHashIndex {
    core: BinaryCore,
    nbits: usize,
}

impl BinaryHashIndex {
    pub fn new(lib: &Library, d: usize, nbits: usize) -> Result<Self> {
        check_binary_dim(d)?;
        if nbits == 0 || nbits > d {
            return Err(FaissError::validation(format!(
                "hash bits must be in [1, {}], got {}",
                d, nbits
            )));
        }
        let core = BinaryCore::create(
            lib,
            "IndexBinaryHash",
            &Constructor::BinaryHash { d, nbits },
            None,
            Vec::new(),
        )?;
        Ok(Self { core, nbits })
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }
}

impl BinaryIndex for BinaryHashIndex {
    fn core(&self) -> &BinaryCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BinaryCore {
        &mut self.core
    }
}

/// 二值倒排索引 over a caller-supplied flat quantizer.
#[derive(Debug)]
pub struct BinaryIvfIndex {
    core: BinaryCore,
    nlist: usize,
    // no native getter; mirrors the last value set
    nprobe: usize,
}

impl BinaryIvfIndex {
    pub fn new(lib: &Library, quantizer: Arc<BinaryFlatIndex>, nlist: usize) -> Result<Self> {
        check_positive("nlist", nlist)?;
        let d = quantizer.dim()?;
        let raw = quantizer.core.raw("faiss_IndexBinaryIVF_new")?;
        let core = BinaryCore::create(
            lib,
            "IndexBinaryIVF",
            &Constructor::BinaryIvf { quantizer: raw, d, nlist },
            Some(nlist),
            vec![Dependency::Binary(quantizer)],
        )?;
        let mut index = Self { core, nlist, nprobe: 1 };
        if let Some(nprobe) = lib.config().default_nprobe {
            index.set_nprobe(nprobe.min(nlist))?;
        }
        Ok(index)
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }
}

impl BinaryIndex for BinaryIvfIndex {
    fn core(&self) -> &BinaryCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BinaryCore {
        &mut self.core
    }

    fn as_probe_control(&self) -> Option<&dyn ProbeControl> {
        Some(self)
    }

    fn as_probe_control_mut(&mut self) -> Option<&mut dyn ProbeControl> {
        Some(self)
    }
}

impl ProbeControl for BinaryIvfIndex {
    fn nlist(&self) -> usize {
        self.nlist
    }

    fn nprobe(&self) -> Result<usize> {
        self.core.raw("faiss_IndexBinaryIVF_nprobe")?;
        Ok(self.nprobe)
    }

    fn set_nprobe(&mut self, nprobe: usize) -> Result<()> {
        const OP: &str = "faiss_IndexBinaryIVF_set_nprobe";
        self.core.raw(OP)?;
        if nprobe == 0 || nprobe > self.nlist {
            return Err(FaissError::validation(format!(
                "nprobe must be in [1, {}], got {}",
                self.nlist, nprobe
            )));
        }
        self.core
            .handle
            .call(OP, |b, p| unsafe { b.binary_ivf_set_nprobe(p, nprobe) })?;
        self.nprobe = nprobe;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_codes(n: usize, bytes: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * bytes).map(|_| rng.gen::<u8>()).collect()
    }

    #[test]
    fn test_flat_hamming_search() {
        let lib = Library::simulated();
        let mut index = BinaryFlatIndex::new(&lib, 64).unwrap();
        let data = random_codes(50, 8, 1);
        index.add(&data).unwrap();
        assert_eq!(index.cached_count(), 50);

        let result = index.search(&data[8 * 4..8 * 5], 3).unwrap();
        assert_eq!(result.labels[0], 4);
        assert_eq!(result.distances[0], 0);
        assert!(result.distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_dimension_checks() {
        let lib = Library::simulated();
        assert!(matches!(BinaryFlatIndex::new(&lib, 12), Err(FaissError::Validation(_))));
        assert!(matches!(BinaryFlatIndex::new(&lib, 0), Err(FaissError::Validation(_))));
        assert_eq!(lib.sim_stats().unwrap().creates, 0);

        let mut index = BinaryFlatIndex::new(&lib, 16).unwrap();
        assert!(matches!(index.add(&[0u8; 3]), Err(FaissError::Validation(_))));
        assert!(matches!(index.search(&[0u8; 2], 0), Err(FaissError::Validation(_))));
    }

    #[test]
    fn test_ivf_lifecycle() {
        let lib = Library::simulated();
        let quantizer = Arc::new(BinaryFlatIndex::new(&lib, 32).unwrap());
        let mut index = BinaryIvfIndex::new(&lib, quantizer, 4).unwrap();
        let data = random_codes(40, 4, 2);

        assert!(matches!(index.add(&data), Err(FaissError::NotTrained { .. })));
        assert!(matches!(index.train(&data[..4 * 3]), Err(FaissError::Validation(_))));
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        assert_eq!(index.count().unwrap(), 40);

        assert!(matches!(index.set_nprobe(5), Err(FaissError::Validation(_))));
        index.set_nprobe(4).unwrap();
        assert_eq!(index.nprobe().unwrap(), 4);
        let result = index.search(&data[4 * 9..4 * 10], 1).unwrap();
        assert_eq!(result.labels, vec![9]);

        index.close().unwrap();
        assert!(matches!(index.search(&data[..4], 1), Err(FaissError::NullHandle { .. })));
        assert!(matches!(index.nprobe(), Err(FaissError::NullHandle { .. })));
        let stats = lib.sim_stats().unwrap();
        assert_eq!(stats.creates, stats.frees);
    }

    #[test]
    fn test_hash_matches_flat() {
        let lib = Library::simulated();
        let data = random_codes(60, 8, 3);
        let mut flat = BinaryFlatIndex::new(&lib, 64).unwrap();
        let mut hash = BinaryHashIndex::new(&lib, 64, 16).unwrap();
        assert_eq!(hash.nbits(), 16);
        assert!(hash.is_trained().unwrap());
        flat.add(&data).unwrap();
        hash.add(&data).unwrap();

        let queries = &data[8 * 10..8 * 12];
        let expected = flat.search(queries, 5).unwrap();
        let got = hash.search(queries, 5).unwrap();
        assert_eq!(got.distances, expected.distances);
        assert_eq!(got.labels[0], 10);
        assert_eq!(got.labels[5], 11);
    }

    #[test]
    fn test_hash_bits_checked_before_create() {
        let lib = Library::simulated();
        assert!(matches!(BinaryHashIndex::new(&lib, 16, 0), Err(FaissError::Validation(_))));
        assert!(matches!(BinaryHashIndex::new(&lib, 16, 17), Err(FaissError::Validation(_))));
        assert!(matches!(BinaryHashIndex::new(&lib, 20, 8), Err(FaissError::Validation(_))));
        assert_eq!(lib.sim_stats().unwrap().creates, 0);
    }

    #[test]
    fn test_capability_queries() {
        let lib = Library::simulated();
        let mut flat = BinaryFlatIndex::new(&lib, 16).unwrap();
        assert!(flat.capabilities().is_empty());
        assert!(!flat.supports(Capability::ProbeCount));
        assert!(matches!(
            flat.probe_control().map(|_| ()),
            Err(FaissError::CapabilityUnsupported {
                capability: Capability::ProbeCount,
                variant: "IndexBinaryFlat"
            })
        ));
        assert!(flat.probe_control_mut().is_err());
        assert_eq!(flat.metric().unwrap(), MetricType::Hamming);

        let quantizer = Arc::new(BinaryFlatIndex::new(&lib, 16).unwrap());
        let mut ivf = BinaryIvfIndex::new(&lib, quantizer, 2).unwrap();
        assert_eq!(ivf.capabilities(), vec![Capability::ProbeCount]);
        ivf.probe_control_mut().unwrap().set_nprobe(2).unwrap();
        assert_eq!(ivf.probe_control().unwrap().nprobe().unwrap(), 2);

        // dynamic dispatch goes through the same queries
        let boxed: Box<dyn BinaryIndex> = Box::new(ivf);
        assert!(boxed.supports(Capability::ProbeCount));

        flat.close().unwrap();
        assert!(matches!(flat.metric(), Err(FaissError::NullHandle { .. })));
    }

    #[test]
    fn test_oversized_k_is_rejected() {
        let lib = Library::simulated();
        let mut index = BinaryFlatIndex::new(&lib, 8).unwrap();
        index.add(&[0b1010_1010]).unwrap();
        assert!(matches!(index.search(&[0u8; 2], usize::MAX / 2 + 1), Err(FaissError::Validation(_))));
        assert_eq!(lib.telemetry().snapshot().search_calls, 0);
        assert_eq!(index.search(&[0u8], 2).unwrap().labels, vec![0, -1]);
    }

    #[test]
    fn test_quantizer_from_another_library() {
        let lib = Library::simulated();
        let other = Library::simulated();
        let quantizer = Arc::new(BinaryFlatIndex::new(&other, 16).unwrap());
        assert!(matches!(
            BinaryIvfIndex::new(&lib, quantizer, 2),
            Err(FaissError::Validation(_))
        ));
        assert_eq!(lib.sim_stats().unwrap().creates, 0);
        assert!(lib.graph().is_empty());
    }
}
