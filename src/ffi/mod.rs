//! FFI bridge
//!
//! The native collaborator is reached through [`NativeBackend`]. Every method
//! mirrors one native entry point: raw object pointers in, a status code (as
//! the `Err` side of [`NativeResult`]) plus out-values back. The bridge never
//! interprets a status beyond zero / non-zero.
//!
//! Two collaborators implement the trait:
//! - [`FaissBackend`] links the faiss C API (feature `faiss`).
//! - [`SimBackend`] is an in-process reference collaborator with the same
//!   contract, used by tests and by hosts without the native library.
//!
//! Numeric buffers are handed over as borrowed slices; implementations pass
//! `(ptr, len)` pairs straight through without copying.

use std::ffi::{c_void, CStr};

use serde::{Deserialize, Serialize};

use crate::metrics::MetricType;

pub mod sim;
mod status;

#[cfg(feature = "faiss")]
mod faiss_c;

#[cfg(feature = "faiss")]
pub use faiss_c::FaissBackend;
pub use sim::{SimBackend, SimStats};
pub use status::{check, StatusExt};

/// Opaque pointer-sized reference to a native object.
pub type RawPtr = *mut c_void;

/// Native status code. `0` is success.
pub type Status = i32;

/// Result of a native call: out-value on success, raw status otherwise.
pub type NativeResult<T> = std::result::Result<T, Status>;

/// Native object family. Each family has its own free function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Index,
    BinaryIndex,
    Transform,
    Kmeans,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectKind::Index => "index",
            ObjectKind::BinaryIndex => "binary index",
            ObjectKind::Transform => "vector transform",
            ObjectKind::Kmeans => "kmeans",
        };
        f.write_str(s)
    }
}

/// Scalar quantizer encodings, discriminants are the native codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum QuantizerType {
    #[default]
    QT8bit = 0,
    QT4bit = 1,
    QT8bitUniform = 2,
    QT4bitUniform = 3,
    QTfp16 = 4,
    QT8bitDirect = 5,
    QT6bit = 6,
}

impl QuantizerType {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Encodings that carry no trained statistics.
    pub fn needs_training(self) -> bool {
        !matches!(self, QuantizerType::QTfp16 | QuantizerType::QT8bitDirect)
    }

    /// Bits stored per component.
    pub fn bits(self) -> usize {
        match self {
            QuantizerType::QT8bit | QuantizerType::QT8bitUniform | QuantizerType::QT8bitDirect => 8,
            QuantizerType::QT4bit | QuantizerType::QT4bitUniform => 4,
            QuantizerType::QT6bit => 6,
            QuantizerType::QTfp16 => 16,
        }
    }
}

/// Parameters for one native constructor call.
#[derive(Debug, Clone)]
pub enum Constructor<'a> {
    Flat {
        d: usize,
        metric: MetricType,
    },
    /// `quantizer: None` lets the native side own its coarse quantizer.
    IvfFlat {
        quantizer: Option<RawPtr>,
        d: usize,
        nlist: usize,
        metric: MetricType,
    },
    IvfPq {
        quantizer: Option<RawPtr>,
        d: usize,
        nlist: usize,
        m: usize,
        nbits: usize,
        metric: MetricType,
    },
    IvfScalarQuantizer {
        quantizer: Option<RawPtr>,
        d: usize,
        nlist: usize,
        qtype: QuantizerType,
        metric: MetricType,
    },
    HnswFlat {
        d: usize,
        m: usize,
        metric: MetricType,
    },
    Pq {
        d: usize,
        m: usize,
        nbits: usize,
        metric: MetricType,
    },
    ScalarQuantizer {
        d: usize,
        qtype: QuantizerType,
        metric: MetricType,
    },
    /// SIMD-friendly PQ, 4 to 6 bits per code.
    PqFastScan {
        d: usize,
        m: usize,
        nbits: usize,
        metric: MetricType,
    },
    IvfPqFastScan {
        quantizer: Option<RawPtr>,
        d: usize,
        nlist: usize,
        m: usize,
        nbits: usize,
        metric: MetricType,
    },
    Lsh {
        d: usize,
        nbits: usize,
        rotate_data: bool,
        train_thresholds: bool,
    },
    IdMap {
        base: RawPtr,
    },
    Refine {
        base: RawPtr,
        refine: RawPtr,
    },
    PreTransform {
        transform: RawPtr,
        base: RawPtr,
    },
    Shards {
        d: usize,
        metric: MetricType,
    },
    Factory {
        d: usize,
        description: &'a str,
        metric: MetricType,
    },
    PcaMatrix {
        d_in: usize,
        d_out: usize,
        eigen_power: f32,
        random_rotation: bool,
    },
    OpqMatrix {
        d: usize,
        m: usize,
    },
    RandomRotation {
        d_in: usize,
        d_out: usize,
    },
    Kmeans {
        d: usize,
        k: usize,
    },
    BinaryFlat {
        d: usize,
    },
    BinaryIvf {
        quantizer: RawPtr,
        d: usize,
        nlist: usize,
    },
    BinaryHash {
        d: usize,
        nbits: usize,
    },
}

impl Constructor<'_> {
    /// Family of the object this constructor produces.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Constructor::PcaMatrix { .. }
            | Constructor::OpqMatrix { .. }
            | Constructor::RandomRotation { .. } => ObjectKind::Transform,
            Constructor::Kmeans { .. } => ObjectKind::Kmeans,
            Constructor::BinaryFlat { .. }
            | Constructor::BinaryIvf { .. }
            | Constructor::BinaryHash { .. } => ObjectKind::BinaryIndex,
            _ => ObjectKind::Index,
        }
    }

    /// Native entry point name, used in error reports.
    pub fn op_name(&self) -> &'static str {
        match self {
            Constructor::Flat { .. } => "faiss_IndexFlat_new",
            Constructor::IvfFlat { .. } => "faiss_IndexIVFFlat_new",
            Constructor::IvfPq { .. } => "faiss_IndexIVFPQ_new",
            Constructor::IvfScalarQuantizer { .. } => "faiss_IndexIVFScalarQuantizer_new",
            Constructor::HnswFlat { .. } => "faiss_IndexHNSWFlat_new",
            Constructor::Pq { .. } => "faiss_IndexPQ_new",
            Constructor::ScalarQuantizer { .. } => "faiss_IndexScalarQuantizer_new",
            Constructor::PqFastScan { .. } => "faiss_IndexPQFastScan_new",
            Constructor::IvfPqFastScan { .. } => "faiss_IndexIVFPQFastScan_new",
            Constructor::Lsh { .. } => "faiss_IndexLSH_new",
            Constructor::IdMap { .. } => "faiss_IndexIDMap_new",
            Constructor::Refine { .. } => "faiss_IndexRefine_new",
            Constructor::PreTransform { .. } => "faiss_IndexPreTransform_new",
            Constructor::Shards { .. } => "faiss_IndexShards_new",
            Constructor::Factory { .. } => "faiss_index_factory",
            Constructor::PcaMatrix { .. } => "faiss_PCAMatrix_new",
            Constructor::OpqMatrix { .. } => "faiss_OPQMatrix_new",
            Constructor::RandomRotation { .. } => "faiss_RandomRotationMatrix_new",
            Constructor::Kmeans { .. } => "faiss_Kmeans_new",
            Constructor::BinaryFlat { .. } => "faiss_IndexBinaryFlat_new",
            Constructor::BinaryIvf { .. } => "faiss_IndexBinaryIVF_new",
            Constructor::BinaryHash { .. } => "faiss_IndexBinaryHash_new",
        }
    }
}

/// Flattened range search output: results of query `i` live in
/// `labels[lims[i]..lims[i + 1]]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeSearchOutput {
    pub lims: Vec<usize>,
    pub labels: Vec<i64>,
    pub distances: Vec<f32>,
}

/// Native collaborator contract.
///
/// # Safety
///
/// Every `unsafe` method requires `ptr` (and any pointer argument) to be a
/// live object of the matching [`ObjectKind`] created by this same backend and
/// not yet freed. [`crate::handle::Handle`] is the only caller and upholds this.
/// Slice arguments are sized by the caller: `x.len() == n * d`, output buffers
/// `n * k` (search) or `n * d` (reconstruct, apply).
pub trait NativeBackend: Send + Sync {
    /// Short collaborator name for logs.
    fn name(&self) -> &'static str;

    /// Creates a native object and returns its pointer.
    fn create(&self, ctor: &Constructor<'_>) -> NativeResult<RawPtr>;

    /// Releases a native object.
    unsafe fn free(&self, kind: ObjectKind, ptr: RawPtr) -> NativeResult<()>;

    // ---- float index properties ----

    unsafe fn index_d(&self, ptr: RawPtr) -> NativeResult<usize>;
    unsafe fn index_ntotal(&self, ptr: RawPtr) -> NativeResult<u64>;
    unsafe fn index_is_trained(&self, ptr: RawPtr) -> NativeResult<bool>;
    unsafe fn index_metric(&self, ptr: RawPtr) -> NativeResult<i32>;

    // ---- float index operations ----

    unsafe fn index_train(&self, ptr: RawPtr, n: usize, x: &[f32]) -> NativeResult<()>;
    unsafe fn index_add(&self, ptr: RawPtr, n: usize, x: &[f32]) -> NativeResult<()>;
    unsafe fn index_add_with_ids(
        &self,
        ptr: RawPtr,
        n: usize,
        x: &[f32],
        ids: &[i64],
    ) -> NativeResult<()>;
    unsafe fn index_search(
        &self,
        ptr: RawPtr,
        n: usize,
        x: &[f32],
        k: usize,
        distances: &mut [f32],
        labels: &mut [i64],
    ) -> NativeResult<()>;
    unsafe fn index_range_search(
        &self,
        ptr: RawPtr,
        n: usize,
        x: &[f32],
        radius: f32,
    ) -> NativeResult<RangeSearchOutput>;
    unsafe fn index_reconstruct(&self, ptr: RawPtr, key: i64, out: &mut [f32]) -> NativeResult<()>;
    unsafe fn index_reconstruct_n(
        &self,
        ptr: RawPtr,
        i0: i64,
        ni: usize,
        out: &mut [f32],
    ) -> NativeResult<()>;
    unsafe fn index_remove_ids(&self, ptr: RawPtr, ids: &[i64]) -> NativeResult<usize>;
    unsafe fn index_reset(&self, ptr: RawPtr) -> NativeResult<()>;

    // ---- variant parameters ----
    //
    // Getters double as interface queries: a non-zero status means the
    // object does not belong to the queried family.

    unsafe fn ivf_nlist(&self, ptr: RawPtr) -> NativeResult<usize>;
    unsafe fn ivf_nprobe(&self, ptr: RawPtr) -> NativeResult<usize>;
    unsafe fn ivf_set_nprobe(&self, ptr: RawPtr, nprobe: usize) -> NativeResult<()>;
    unsafe fn hnsw_ef_search(&self, ptr: RawPtr) -> NativeResult<usize>;
    unsafe fn hnsw_set_ef_search(&self, ptr: RawPtr, ef: usize) -> NativeResult<()>;
    unsafe fn hnsw_ef_construction(&self, ptr: RawPtr) -> NativeResult<usize>;
    unsafe fn hnsw_set_ef_construction(&self, ptr: RawPtr, ef: usize) -> NativeResult<()>;
    unsafe fn refine_set_k_factor(&self, ptr: RawPtr, k_factor: f32) -> NativeResult<()>;
    /// Block size of fast-scan variants, flat or inverted-file.
    unsafe fn pq_fastscan_set_bbs(&self, ptr: RawPtr, bbs: usize) -> NativeResult<()>;
    unsafe fn shards_add_shard(&self, ptr: RawPtr, shard: RawPtr) -> NativeResult<()>;

    // ---- persistence ----

    unsafe fn write_index(&self, ptr: RawPtr, path: &CStr) -> NativeResult<()>;
    fn read_index(&self, path: &CStr) -> NativeResult<RawPtr>;
    unsafe fn serialize_index(&self, ptr: RawPtr) -> NativeResult<Vec<u8>>;
    fn deserialize_index(&self, data: &[u8]) -> NativeResult<RawPtr>;

    // ---- binary indexes ----

    unsafe fn binary_d(&self, ptr: RawPtr) -> NativeResult<usize>;
    unsafe fn binary_ntotal(&self, ptr: RawPtr) -> NativeResult<u64>;
    unsafe fn binary_is_trained(&self, ptr: RawPtr) -> NativeResult<bool>;
    unsafe fn binary_train(&self, ptr: RawPtr, n: usize, x: &[u8]) -> NativeResult<()>;
    unsafe fn binary_add(&self, ptr: RawPtr, n: usize, x: &[u8]) -> NativeResult<()>;
    unsafe fn binary_search(
        &self,
        ptr: RawPtr,
        n: usize,
        x: &[u8],
        k: usize,
        distances: &mut [i32],
        labels: &mut [i64],
    ) -> NativeResult<()>;
    unsafe fn binary_reset(&self, ptr: RawPtr) -> NativeResult<()>;
    unsafe fn binary_ivf_set_nprobe(&self, ptr: RawPtr, nprobe: usize) -> NativeResult<()>;

    // ---- vector transforms ----

    unsafe fn transform_d_in(&self, ptr: RawPtr) -> NativeResult<usize>;
    unsafe fn transform_d_out(&self, ptr: RawPtr) -> NativeResult<usize>;
    unsafe fn transform_is_trained(&self, ptr: RawPtr) -> NativeResult<bool>;
    unsafe fn transform_train(&self, ptr: RawPtr, n: usize, x: &[f32]) -> NativeResult<()>;
    unsafe fn transform_apply(
        &self,
        ptr: RawPtr,
        n: usize,
        x: &[f32],
        out: &mut [f32],
    ) -> NativeResult<()>;
    unsafe fn transform_reverse(
        &self,
        ptr: RawPtr,
        n: usize,
        xt: &[f32],
        out: &mut [f32],
    ) -> NativeResult<()>;

    // ---- clustering ----

    unsafe fn kmeans_train(&self, ptr: RawPtr, n: usize, x: &[f32]) -> NativeResult<()>;
    unsafe fn kmeans_assign(
        &self,
        ptr: RawPtr,
        n: usize,
        x: &[f32],
        labels: &mut [i64],
    ) -> NativeResult<()>;
    unsafe fn kmeans_centroids(&self, ptr: RawPtr, out: &mut [f32]) -> NativeResult<()>;
    unsafe fn kmeans_set_niter(&self, ptr: RawPtr, niter: usize) -> NativeResult<()>;
    unsafe fn kmeans_set_seed(&self, ptr: RawPtr, seed: u64) -> NativeResult<()>;
}
