//! Shared wrapper state
//!
//! [`IndexCore`] is embedded by every float wrapper. It owns the handle,
//! the cached metadata and the keep-alive list, and implements the uniform
//! operations by forwarding through the handle. Field order matters: the
//! handle is declared before the dependencies so a dropped composite frees
//! its native object before letting go of what it references.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{RangeSearchResult, SearchResult};
use crate::error::{FaissError, Result};
use crate::ffi::{Constructor, RawPtr};
use crate::handle::Handle;
use crate::index::Dependency;
use crate::library::Library;
use crate::metrics::MetricType;
use crate::ownership::NodeId;
use crate::telemetry::{Telemetry, Timer};

/// Training requirement declared by a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Training {
    /// Flat and graph variants. `train` only checks the buffer shape.
    Never,
    /// At least `min` vectors, enforced before the native call.
    Required { min: usize },
    /// Composite or loaded objects: forwarded as is, state read back from
    /// the native object.
    Native,
}

pub struct IndexCore {
    handle: Handle,
    deps: Vec<Dependency>,
    variant: &'static str,
    dim: usize,
    metric: MetricType,
    training: Training,
    trained: bool,
    cached_count: u64,
    telemetry: Arc<Telemetry>,
}

impl IndexCore {
    /// Runs the native constructor and wraps the result. `deps` are linked in
    /// the ownership graph only once the native object exists.
    pub(crate) fn create(
        lib: &Library,
        variant: &'static str,
        ctor: &Constructor<'_>,
        training: Training,
        deps: Vec<Dependency>,
    ) -> Result<Self> {
        check_same_library(lib, &deps)?;
        let handle = Handle::create(lib, variant, ctor)?;
        Self::from_handle(lib, handle, training, deps)
    }

    pub(crate) fn from_handle(
        lib: &Library,
        handle: Handle,
        training: Training,
        deps: Vec<Dependency>,
    ) -> Result<Self> {
        let meta = match check_same_library(lib, &deps).and_then(|_| query_meta(&handle)) {
            Ok(meta) => meta,
            Err(e) => {
                // never hand out a half-described wrapper
                handle.release()?;
                return Err(e);
            }
        };
        for dep in &deps {
            lib.graph().link(handle.node(), dep.node());
        }
        let (dim, metric, trained, count) = meta;
        debug!(
            "{} {} ready: d={}, metric={}, trained={}, ntotal={}",
            handle.label(),
            handle.node(),
            dim,
            metric,
            trained,
            count
        );
        Ok(Self {
            variant: handle.label(),
            handle,
            deps,
            dim,
            metric,
            training,
            trained,
            cached_count: count,
            telemetry: Arc::clone(lib.telemetry()),
        })
    }

    pub fn variant(&self) -> &'static str {
        self.variant
    }

    pub fn node(&self) -> NodeId {
        self.handle.node()
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.deps
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Raw pointer for handing this object to a native composite.
    pub(crate) fn raw(&self, op: &'static str) -> Result<RawPtr> {
        self.handle.get(op)
    }

    pub fn dim(&self) -> Result<usize> {
        self.handle.get("faiss_Index_d")?;
        Ok(self.dim)
    }

    pub fn metric(&self) -> Result<MetricType> {
        self.handle.get("faiss_Index_metric_type")?;
        Ok(self.metric)
    }

    pub fn count(&self) -> Result<u64> {
        self.handle
            .call("faiss_Index_ntotal", |b, p| unsafe { b.index_ntotal(p) })
    }

    pub fn is_trained(&self) -> Result<bool> {
        self.handle
            .call("faiss_Index_is_trained", |b, p| unsafe { b.index_is_trained(p) })
    }

    pub fn cached_count(&self) -> u64 {
        self.cached_count
    }

    pub(crate) fn training(&self) -> Training {
        self.training
    }

    /// Adds a keep-alive edge after construction. The dependency must be
    /// older than this object.
    pub(crate) fn keep_alive(&mut self, dep: Dependency) -> Result<()> {
        if dep.node() >= self.node() {
            return Err(FaissError::validation(format!(
                "{} {} must be constructed before {} {}",
                dep.variant(),
                dep.node(),
                self.variant,
                self.node()
            )));
        }
        if !dep.handle().same_library_as(&self.handle) {
            return Err(foreign_dependency(&dep));
        }
        self.handle.graph().link(self.node(), dep.node());
        self.deps.push(dep);
        Ok(())
    }

    pub(crate) fn refresh_meta(&mut self) -> Result<()> {
        self.refresh()
    }

    pub fn requires_training(&self) -> bool {
        self.training != Training::Never
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_valid()
    }

    /// Number of vectors in `x`, which must be a whole number of rows.
    pub(crate) fn rows(&self, x: &[f32], what: &str) -> Result<usize> {
        rows(x.len(), self.dim, what)
    }

    /// Fails with `NotTrained` unless the native object reports trained.
    fn ensure_trained(&self, op: &'static str) -> Result<()> {
        if self.trained || self.is_trained()? {
            return Ok(());
        }
        Err(FaissError::NotTrained { variant: self.variant, op })
    }

    fn refresh(&mut self) -> Result<()> {
        self.cached_count = self.count()?;
        self.trained = self.is_trained()?;
        Ok(())
    }

    pub fn train(&mut self, x: &[f32]) -> Result<()> {
        const OP: &str = "faiss_Index_train";
        self.handle.get(OP)?;
        let n = self.rows(x, "training vectors")?;
        match self.training {
            Training::Never => return Ok(()),
            Training::Required { min } if n < min.max(1) => {
                return Err(FaissError::validation(format!(
                    "{} needs at least {} training vectors, got {}",
                    self.variant,
                    min.max(1),
                    n
                )));
            }
            Training::Native if n == 0 => {
                return Err(FaissError::validation("empty training data"));
            }
            _ => {}
        }

        let timer = Timer::start();
        self.handle.call(OP, |b, p| unsafe { b.index_train(p, n, x) })?;
        self.telemetry.record_train(n, timer.elapsed());
        self.refresh()?;
        info!("{} trained with {} vectors", self.variant, n);
        Ok(())
    }

    pub fn add(&mut self, x: &[f32]) -> Result<()> {
        const OP: &str = "faiss_Index_add";
        self.handle.get(OP)?;
        let n = self.rows(x, "vectors")?;
        if n == 0 {
            return Ok(());
        }
        self.ensure_trained(OP)?;

        let timer = Timer::start();
        self.handle.call(OP, |b, p| unsafe { b.index_add(p, n, x) })?;
        self.telemetry.record_add(n, timer.elapsed());
        self.refresh()?;
        debug!("Added {} vectors to {}", n, self.variant);
        Ok(())
    }

    pub(crate) fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        const OP: &str = "faiss_Index_add_with_ids";
        self.handle.get(OP)?;
        let n = self.rows(x, "vectors")?;
        if ids.len() != n {
            return Err(FaissError::validation(format!(
                "{} ids for {} vectors",
                ids.len(),
                n
            )));
        }
        if n == 0 {
            return Ok(());
        }
        self.ensure_trained(OP)?;

        let timer = Timer::start();
        self.handle
            .call(OP, |b, p| unsafe { b.index_add_with_ids(p, n, x, ids) })?;
        self.telemetry.record_add(n, timer.elapsed());
        self.refresh()?;
        debug!("Added {} vectors with ids to {}", n, self.variant);
        Ok(())
    }

    pub fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult> {
        const OP: &str = "faiss_Index_search";
        self.handle.get(OP)?;
        if k == 0 {
            return Err(FaissError::validation("k must be > 0"));
        }
        let nq = self.rows(queries, "queries")?;
        self.ensure_trained(OP)?;
        if nq == 0 {
            return Ok(SearchResult::empty(k));
        }

        let mut distances = result_buffer(nq, k, 0.0f32)?;
        let mut labels = result_buffer(nq, k, -1i64)?;
        let timer = Timer::start();
        self.handle.call(OP, |b, p| unsafe {
            b.index_search(p, nq, queries, k, &mut distances, &mut labels)
        })?;
        self.telemetry.record_search(nq, timer.elapsed());
        debug!("Search completed: n={}, k={}", nq, k);
        Ok(SearchResult::new(distances, labels, nq, k, timer.elapsed_ms()))
    }

    pub(crate) fn range_search(&self, queries: &[f32], radius: f32) -> Result<RangeSearchResult> {
        const OP: &str = "faiss_Index_range_search";
        self.handle.get(OP)?;
        if !radius.is_finite() {
            return Err(FaissError::validation(format!("radius must be finite, got {}", radius)));
        }
        let nq = self.rows(queries, "queries")?;
        self.ensure_trained(OP)?;

        let timer = Timer::start();
        let out = self
            .handle
            .call(OP, |b, p| unsafe { b.index_range_search(p, nq, queries, radius) })?;
        self.telemetry.record_search(nq, timer.elapsed());
        Ok(RangeSearchResult::from_output(out, timer.elapsed_ms()))
    }

    fn check_key_range(&self, i0: i64, n: usize) -> Result<()> {
        let count = self.count()?;
        let end = i0.checked_add(n as i64);
        match end {
            Some(end) if i0 >= 0 && end as u64 <= count => Ok(()),
            _ => Err(FaissError::validation(format!(
                "keys {}..{} outside [0, {})",
                i0,
                i0.saturating_add(n as i64),
                count
            ))),
        }
    }

    pub(crate) fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        const OP: &str = "faiss_Index_reconstruct";
        self.handle.get(OP)?;
        self.check_key_range(key, 1)?;
        let mut out = vec![0.0f32; self.dim];
        self.handle
            .call(OP, |b, p| unsafe { b.index_reconstruct(p, key, &mut out) })?;
        Ok(out)
    }

    pub(crate) fn reconstruct_n(&self, i0: i64, n: usize) -> Result<Vec<f32>> {
        const OP: &str = "faiss_Index_reconstruct_n";
        self.handle.get(OP)?;
        self.check_key_range(i0, n)?;
        let mut out = vec![0.0f32; n * self.dim];
        if n > 0 {
            self.handle
                .call(OP, |b, p| unsafe { b.index_reconstruct_n(p, i0, n, &mut out) })?;
        }
        Ok(out)
    }

    pub(crate) fn remove_ids(&mut self, ids: &[i64]) -> Result<usize> {
        const OP: &str = "faiss_Index_remove_ids";
        self.handle.get(OP)?;
        let removed = self
            .handle
            .call(OP, |b, p| unsafe { b.index_remove_ids(p, ids) })?;
        self.refresh()?;
        debug!("Removed {} vectors from {}", removed, self.variant);
        Ok(removed)
    }

    pub fn reset(&mut self) -> Result<()> {
        const OP: &str = "faiss_Index_reset";
        self.handle.call(OP, |b, p| unsafe { b.index_reset(p) })?;
        self.telemetry.record_reset();
        self.refresh()
    }

    /// Idempotent. Once the native object is gone the keep-alive list is
    /// released too: dependencies nobody else holds are closed explicitly.
    pub fn close(&mut self) -> Result<()> {
        let result = self.handle.release();
        self.cached_count = 0;
        let deps = close_dependencies(std::mem::take(&mut self.deps));
        result.and(deps)
    }

    // ---- variant parameters ----

    pub(crate) fn nprobe(&self) -> Result<usize> {
        self.handle
            .call("faiss_IndexIVF_nprobe", |b, p| unsafe { b.ivf_nprobe(p) })
    }

    pub(crate) fn set_nprobe(&mut self, nprobe: usize, nlist: usize) -> Result<()> {
        const OP: &str = "faiss_IndexIVF_set_nprobe";
        self.handle.get(OP)?;
        if nprobe == 0 || nprobe > nlist {
            return Err(FaissError::validation(format!(
                "nprobe must be in [1, {}], got {}",
                nlist, nprobe
            )));
        }
        self.handle
            .call(OP, |b, p| unsafe { b.ivf_set_nprobe(p, nprobe) })
    }

    pub(crate) fn ef_search(&self) -> Result<usize> {
        self.handle
            .call("faiss_IndexHNSW_efSearch", |b, p| unsafe { b.hnsw_ef_search(p) })
    }

    pub(crate) fn set_ef_search(&mut self, ef: usize) -> Result<()> {
        const OP: &str = "faiss_IndexHNSW_set_efSearch";
        self.handle.get(OP)?;
        if ef == 0 {
            return Err(FaissError::validation("efSearch must be > 0"));
        }
        self.handle
            .call(OP, |b, p| unsafe { b.hnsw_set_ef_search(p, ef) })
    }

    pub(crate) fn ef_construction(&self) -> Result<usize> {
        self.handle.call("faiss_IndexHNSW_efConstruction", |b, p| unsafe {
            b.hnsw_ef_construction(p)
        })
    }

    pub(crate) fn set_ef_construction(&mut self, ef: usize) -> Result<()> {
        const OP: &str = "faiss_IndexHNSW_set_efConstruction";
        self.handle.get(OP)?;
        if ef == 0 {
            return Err(FaissError::validation("efConstruction must be > 0"));
        }
        self.handle
            .call(OP, |b, p| unsafe { b.hnsw_set_ef_construction(p, ef) })
    }

    /// Applies the library-wide default probe count, capped at `nlist`.
    pub(crate) fn apply_default_nprobe(&mut self, lib: &Library, nlist: usize) -> Result<()> {
        if let Some(nprobe) = lib.config().default_nprobe {
            self.set_nprobe(nprobe.min(nlist), nlist)?;
        }
        Ok(())
    }

    pub(crate) fn apply_default_ef_search(&mut self, lib: &Library) -> Result<()> {
        if let Some(ef) = lib.config().default_ef_search {
            self.set_ef_search(ef)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for IndexCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCore")
            .field("variant", &self.variant)
            .field("handle", &self.handle)
            .field("dim", &self.dim)
            .field("metric", &self.metric)
            .field("trained", &self.trained)
            .field("cached_count", &self.cached_count)
            .field("deps", &self.deps)
            .finish()
    }
}

fn query_meta(handle: &Handle) -> Result<(usize, MetricType, bool, u64)> {
    let dim = handle.call("faiss_Index_d", |b, p| unsafe { b.index_d(p) })?;
    let code = handle.call("faiss_Index_metric_type", |b, p| unsafe { b.index_metric(p) })?;
    let metric = MetricType::from_code(code).ok_or_else(|| {
        FaissError::validation(format!("unknown native metric code {}", code))
    })?;
    let trained = handle.call("faiss_Index_is_trained", |b, p| unsafe { b.index_is_trained(p) })?;
    let count = handle.call("faiss_Index_ntotal", |b, p| unsafe { b.index_ntotal(p) })?;
    Ok((dim, metric, trained, count))
}

/// Closes every dependency this wrapper held the last reference to. Shared
/// ones stay with their other owners. Returns the first failure.
pub(crate) fn close_dependencies(deps: Vec<Dependency>) -> Result<()> {
    let mut first_err = None;
    for dep in deps {
        if let Err(e) = dep.close_if_unique() {
            warn!("closing dependency failed: {}", e);
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

fn foreign_dependency(dep: &Dependency) -> FaissError {
    FaissError::validation(format!(
        "{} {} belongs to a different library",
        dep.variant(),
        dep.node()
    ))
}

/// Composites can only reference objects created through the same library:
/// node ids and native pointers mean nothing in another one.
pub(crate) fn check_same_library(lib: &Library, deps: &[Dependency]) -> Result<()> {
    match deps.iter().find(|d| !d.handle().same_library(lib)) {
        Some(dep) => Err(foreign_dependency(dep)),
        None => Ok(()),
    }
}

/// Output buffer of `nq * k` entries. An oversized `k` is rejected instead
/// of aborting on allocation.
pub(crate) fn result_buffer<T: Clone>(nq: usize, k: usize, fill: T) -> Result<Vec<T>> {
    let len = nq.checked_mul(k).ok_or_else(|| {
        FaissError::validation(format!("{} queries x k = {} overflows", nq, k))
    })?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| {
        FaissError::validation(format!("k = {} is too large for {} queries", k, nq))
    })?;
    buf.resize(len, fill);
    Ok(buf)
}

/// Row count of a flat buffer of `dim`-wide vectors.
pub(crate) fn rows(len: usize, dim: usize, what: &str) -> Result<usize> {
    if dim == 0 || len % dim != 0 {
        return Err(FaissError::validation(format!(
            "{} length {} is not a multiple of dimension {}",
            what, len, dim
        )));
    }
    Ok(len / dim)
}

// ---- host-side constructor checks ----

pub(crate) fn check_dim(d: usize) -> Result<()> {
    if d == 0 {
        return Err(FaissError::validation("dimension must be > 0"));
    }
    Ok(())
}

pub(crate) fn check_positive(name: &str, v: usize) -> Result<()> {
    if v == 0 {
        return Err(FaissError::validation(format!("{} must be > 0", name)));
    }
    Ok(())
}

pub(crate) fn check_float_metric(metric: MetricType) -> Result<()> {
    if !metric.is_float_metric() {
        return Err(FaissError::validation(format!(
            "metric {} is not valid for float vectors",
            metric
        )));
    }
    Ok(())
}

pub(crate) fn check_divisible(d: usize, m: usize) -> Result<()> {
    check_positive("m", m)?;
    if d % m != 0 {
        return Err(FaissError::validation(format!(
            "dimension {} must be divisible by m = {}",
            d, m
        )));
    }
    Ok(())
}

pub(crate) fn check_nbits(nbits: usize) -> Result<()> {
    if !(1..=16).contains(&nbits) {
        return Err(FaissError::validation(format!(
            "nbits must be in [1, 16], got {}",
            nbits
        )));
    }
    Ok(())
}

/// Dimension and metric every composite input must agree on.
pub(crate) fn check_same_shape(
    what: &str,
    a: (usize, MetricType),
    b: (usize, MetricType),
) -> Result<()> {
    if a.0 != b.0 {
        return Err(FaissError::validation(format!(
            "{}: dimension mismatch ({} vs {})",
            what, a.0, b.0
        )));
    }
    if a.1 != b.1 {
        return Err(FaissError::validation(format!(
            "{}: metric mismatch ({} vs {})",
            what, a.1, b.1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows() {
        assert_eq!(rows(12, 4, "vectors").unwrap(), 3);
        assert_eq!(rows(0, 4, "vectors").unwrap(), 0);
        assert!(matches!(rows(10, 4, "vectors"), Err(FaissError::Validation(_))));
    }

    #[test]
    fn test_constructor_checks() {
        assert!(check_dim(0).is_err());
        assert!(check_divisible(64, 8).is_ok());
        assert!(check_divisible(64, 7).is_err());
        assert!(check_divisible(64, 0).is_err());
        assert!(check_nbits(8).is_ok());
        assert!(check_nbits(0).is_err());
        assert!(check_nbits(17).is_err());
        assert!(check_float_metric(MetricType::Hamming).is_err());
    }

    #[test]
    fn test_result_buffer_bounds() {
        assert_eq!(result_buffer(2, 3, -1i64).unwrap(), vec![-1; 6]);
        assert!(matches!(result_buffer(2, usize::MAX, 0.0f32), Err(FaissError::Validation(_))));
        assert!(matches!(result_buffer(1, usize::MAX / 2, 0.0f32), Err(FaissError::Validation(_))));
    }

    #[test]
    fn test_same_shape() {
        assert!(check_same_shape("refine", (8, MetricType::L2), (8, MetricType::L2)).is_ok());
        assert!(check_same_shape("refine", (8, MetricType::L2), (4, MetricType::L2)).is_err());
        assert!(check_same_shape("refine", (8, MetricType::L2), (8, MetricType::InnerProduct)).is_err());
    }
}
