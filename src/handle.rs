//! Handle and lifecycle
//!
//! A [`Handle`] owns exactly one native object. Validity is the pointer
//! itself: a non-null pointer is live, null means released. Release swaps the
//! pointer to null in one atomic step, so whichever of `close()` and the drop
//! fallback gets there first frees the object and the other sees null.
//!
//! Dropping a live handle is the leak backstop: it frees the object, logs a
//! warning and counts a fallback release. It is not a substitute for
//! `close()`; tests must not rely on when it runs.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{FaissError, Result};
use crate::ffi::{Constructor, NativeBackend, NativeResult, ObjectKind, RawPtr, StatusExt};
use crate::library::Library;
use crate::ownership::{NodeId, OwnershipGraph};
use crate::telemetry::{ReleasePath, Telemetry};

pub struct Handle {
    ptr: AtomicPtr<c_void>,
    kind: ObjectKind,
    label: &'static str,
    node: NodeId,
    backend: Arc<dyn NativeBackend>,
    telemetry: Arc<Telemetry>,
    graph: Arc<OwnershipGraph>,
}

// SAFETY: the raw pointer is only dereferenced by the backend, which is
// `Send + Sync`; ownership transfer is serialised by the atomic swap.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    /// Runs a native constructor. On failure nothing is registered and the
    /// native status is returned.
    pub(crate) fn create(lib: &Library, label: &'static str, ctor: &Constructor<'_>) -> Result<Self> {
        let raw = lib.backend().create(ctor).op(ctor.op_name())?;
        Self::adopt(lib, ctor.kind(), label, raw)
    }

    /// Takes ownership of an object produced by another native call
    /// (deserialisation, file load).
    pub(crate) fn adopt(lib: &Library, kind: ObjectKind, label: &'static str, raw: RawPtr) -> Result<Self> {
        if raw.is_null() {
            return Err(FaissError::NullHandle { op: "adopt" });
        }
        let node = lib.graph().register(label);
        lib.telemetry().record_handle_created();
        debug!("created native {} {} ({}) at {:p}", kind, label, node, raw);
        Ok(Self {
            ptr: AtomicPtr::new(raw),
            kind,
            label,
            node,
            backend: Arc::clone(lib.backend()),
            telemetry: Arc::clone(lib.telemetry()),
            graph: Arc::clone(lib.graph()),
        })
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn graph(&self) -> &OwnershipGraph {
        &self.graph
    }

    /// Whether this object was created through `lib`. Each library has its
    /// own graph, so graph identity stands for library identity.
    pub(crate) fn same_library(&self, lib: &Library) -> bool {
        Arc::ptr_eq(&self.graph, lib.graph())
    }

    pub(crate) fn same_library_as(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph)
    }

    pub fn is_valid(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }

    /// Raw pointer for a native call, or `NullHandle` once released.
    pub(crate) fn get(&self, op: &'static str) -> Result<RawPtr> {
        let raw = self.ptr.load(Ordering::Acquire);
        if raw.is_null() {
            Err(FaissError::NullHandle { op })
        } else {
            Ok(raw)
        }
    }

    /// Forwards one native call. The closure only runs on a live pointer and
    /// its status is tagged with `op`.
    pub(crate) fn call<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&dyn NativeBackend, RawPtr) -> NativeResult<T>,
    ) -> Result<T> {
        let raw = self.get(op)?;
        f(self.backend.as_ref(), raw).op(op)
    }

    /// Explicit release. Idempotent: only the first call frees.
    pub(crate) fn release(&self) -> Result<()> {
        self.release_via(ReleasePath::Explicit).map(|_| ())
    }

    /// Returns whether this call performed the free.
    fn release_via(&self, path: ReleasePath) -> Result<bool> {
        let raw = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        if raw.is_null() {
            return Ok(false);
        }

        self.graph.mark_released(self.node);
        self.telemetry.record_release(path);
        debug!("releasing native {} {} ({}) via {:?}", self.kind, self.label, self.node, path);

        // SAFETY: `raw` was non-null and has just been taken out of the
        // handle, so no other caller can reach it.
        let result = unsafe { self.backend.free(self.kind, raw) };
        if result.is_err() {
            self.telemetry.record_release_failure();
        }
        result.op(free_op(self.kind))?;
        Ok(true)
    }
}

fn free_op(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Index => "faiss_Index_free",
        ObjectKind::BinaryIndex => "faiss_IndexBinary_free",
        ObjectKind::Transform => "faiss_VectorTransform_free",
        ObjectKind::Kmeans => "faiss_Kmeans_free",
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.is_valid() {
            return;
        }
        warn!(
            "{} {} dropped without close(); releasing through fallback path",
            self.label, self.node
        );
        if let Err(e) = self.release_via(ReleasePath::Fallback) {
            warn!("fallback release of {} {} failed: {}", self.label, self.node, e);
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("node", &self.node)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricType;

    fn flat(lib: &Library) -> Handle {
        Handle::create(lib, "IndexFlat", &Constructor::Flat { d: 4, metric: MetricType::L2 }).unwrap()
    }

    #[test]
    fn test_release_is_idempotent() {
        let lib = Library::simulated();
        let h = flat(&lib);
        assert!(h.is_valid());
        h.release().unwrap();
        h.release().unwrap();
        assert!(!h.is_valid());

        let stats = lib.sim_stats().unwrap();
        assert_eq!(stats.creates, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.double_frees, 0);
    }

    #[test]
    fn test_get_after_release() {
        let lib = Library::simulated();
        let h = flat(&lib);
        h.release().unwrap();
        assert!(matches!(h.get("faiss_Index_add"), Err(FaissError::NullHandle { op: "faiss_Index_add" })));
        let err = h.call("faiss_Index_ntotal", |b, p| unsafe { b.index_ntotal(p) });
        assert!(matches!(err, Err(FaissError::NullHandle { .. })));
        assert_eq!(lib.sim_stats().unwrap().dangling_calls, 0);
    }

    #[test]
    fn test_drop_is_fallback_release() {
        let lib = Library::simulated();
        drop(flat(&lib));
        let snap = lib.telemetry().snapshot();
        assert_eq!(snap.fallback_releases, 1);
        assert_eq!(snap.explicit_releases, 0);
        assert_eq!(lib.sim_stats().unwrap().live, 0);
    }

    #[test]
    fn test_drop_after_release_does_nothing() {
        let lib = Library::simulated();
        let h = flat(&lib);
        h.release().unwrap();
        drop(h);
        let snap = lib.telemetry().snapshot();
        assert_eq!(snap.explicit_releases, 1);
        assert_eq!(snap.fallback_releases, 0);
        assert_eq!(lib.sim_stats().unwrap().frees, 1);
    }

    #[test]
    fn test_failed_create_registers_nothing() {
        let lib = Library::simulated();
        let err = Handle::create(&lib, "IndexFlat", &Constructor::Flat { d: 0, metric: MetricType::L2 });
        assert!(matches!(err, Err(FaissError::Native { op: "faiss_IndexFlat_new", .. })));
        assert!(lib.graph().is_empty());
        assert_eq!(lib.telemetry().snapshot().handles_created, 0);
    }

    #[test]
    fn test_library_identity() {
        let lib = Library::simulated();
        let other = Library::simulated();
        let a = flat(&lib);
        let b = flat(&lib);
        let c = flat(&other);
        assert!(a.same_library(&lib));
        assert!(a.same_library(&lib.clone()));
        assert!(!a.same_library(&other));
        assert!(a.same_library_as(&b));
        assert!(!a.same_library_as(&c));
    }

    #[test]
    fn test_concurrent_release_frees_once() {
        let lib = Library::simulated();
        for _ in 0..20 {
            let h = Arc::new(flat(&lib));
            let threads: Vec<_> = (0..4)
                .map(|_| {
                    let h = Arc::clone(&h);
                    std::thread::spawn(move || h.release())
                })
                .collect();
            for t in threads {
                t.join().unwrap().unwrap();
            }
        }
        let stats = lib.sim_stats().unwrap();
        assert_eq!(stats.creates, 20);
        assert_eq!(stats.frees, 20);
        assert_eq!(stats.double_frees, 0);
    }
}
