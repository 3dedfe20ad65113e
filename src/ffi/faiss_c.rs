//! faiss C API bindings
//!
//! Linked against `libfaiss_c` (see `build.rs`). Every call returns the raw
//! status of the C API; pointers are passed through untouched.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr;

use super::{Constructor, NativeBackend, NativeResult, ObjectKind, QuantizerType, RangeSearchOutput, RawPtr};
use crate::metrics::MetricType;

type FaissIndex = *mut c_void;
type FaissIndexBinary = *mut c_void;
type FaissVectorTransform = *mut c_void;
type FaissKmeans = *mut c_void;

/// Status reported for arguments that cannot be expressed to the C API.
const STATUS_BAD_ARGUMENT: i32 = -1;
const INDEX_TYPE_BUF: usize = 256;

extern "C" {
    // constructors
    fn faiss_IndexFlat_new_with(p_index: *mut FaissIndex, d: i64, metric_type: c_int) -> c_int;
    fn faiss_IndexIVFFlat_new(p_index: *mut FaissIndex, quantizer: FaissIndex, d: i64, nlist: i64, metric_type: c_int) -> c_int;
    fn faiss_IndexIVFPQ_new(p_index: *mut FaissIndex, quantizer: FaissIndex, d: i64, nlist: i64, m: i64, nbits: i64) -> c_int;
    fn faiss_IndexIVFScalarQuantizer_new(
        p_index: *mut FaissIndex,
        quantizer: FaissIndex,
        d: i64,
        nlist: i64,
        qtype: c_int,
        metric_type: c_int,
    ) -> c_int;
    fn faiss_IndexHNSWFlat_new(p_index: *mut FaissIndex, d: i64, m: c_int, metric_type: c_int) -> c_int;
    fn faiss_IndexPQ_new(p_index: *mut FaissIndex, d: i64, m: i64, nbits: i64, metric_type: c_int) -> c_int;
    fn faiss_IndexScalarQuantizer_new(p_index: *mut FaissIndex, d: i64, qtype: c_int, metric_type: c_int) -> c_int;
    fn faiss_IndexPQFastScan_new(p_index: *mut FaissIndex, d: i64, m: i64, nbits: i64, metric_type: c_int) -> c_int;
    fn faiss_IndexIVFPQFastScan_new(
        p_index: *mut FaissIndex,
        quantizer: FaissIndex,
        d: i64,
        nlist: i64,
        m: i64,
        nbits: i64,
        metric_type: c_int,
    ) -> c_int;
    fn faiss_IndexLSH_new(p_index: *mut FaissIndex, d: i64, nbits: i64, rotate_data: c_int, train_thresholds: c_int) -> c_int;
    fn faiss_IndexIDMap_new(p_index: *mut FaissIndex, base_index: FaissIndex) -> c_int;
    fn faiss_IndexRefine_new(p_index: *mut FaissIndex, base_index: FaissIndex, refine_index: FaissIndex) -> c_int;
    fn faiss_IndexPreTransform_new(p_index: *mut FaissIndex, transform: FaissVectorTransform, base_index: FaissIndex) -> c_int;
    fn faiss_IndexShards_new(p_index: *mut FaissIndex, d: i64, metric_type: c_int) -> c_int;
    fn faiss_index_factory(p_index: *mut FaissIndex, d: c_int, description: *const c_char, metric: c_int) -> c_int;
    fn faiss_PCAMatrix_new(p: *mut FaissVectorTransform, d_in: i64, d_out: i64, eigen_power: f32, random_rotation: c_int) -> c_int;
    fn faiss_OPQMatrix_new(p: *mut FaissVectorTransform, d: i64, m: i64) -> c_int;
    fn faiss_RandomRotationMatrix_new(p: *mut FaissVectorTransform, d_in: i64, d_out: i64) -> c_int;
    fn faiss_Kmeans_new(p: *mut FaissKmeans, d: i64, k: i64) -> c_int;
    fn faiss_IndexBinaryFlat_new(p: *mut FaissIndexBinary, d: i64) -> c_int;
    fn faiss_IndexBinaryIVF_new(p: *mut FaissIndexBinary, quantizer: FaissIndexBinary, d: i64, nlist: i64) -> c_int;
    fn faiss_IndexBinaryHash_new(p: *mut FaissIndexBinary, d: i64, nbits: i64) -> c_int;

    // destructors
    fn faiss_Index_free(index: FaissIndex);
    fn faiss_IndexBinary_free(index: FaissIndexBinary);
    fn faiss_VectorTransform_free(transform: FaissVectorTransform);
    fn faiss_Kmeans_free(kmeans: FaissKmeans);

    // float index
    fn faiss_Index_d(index: FaissIndex) -> c_int;
    fn faiss_Index_ntotal(index: FaissIndex) -> i64;
    fn faiss_Index_is_trained(index: FaissIndex) -> c_int;
    fn faiss_Index_metric_type(index: FaissIndex) -> c_int;
    fn faiss_Index_train(index: FaissIndex, n: i64, x: *const f32) -> c_int;
    fn faiss_Index_add(index: FaissIndex, n: i64, x: *const f32) -> c_int;
    fn faiss_Index_add_with_ids(index: FaissIndex, n: i64, x: *const f32, ids: *const i64) -> c_int;
    fn faiss_Index_search(
        index: FaissIndex,
        n: i64,
        x: *const f32,
        k: i64,
        distances: *mut f32,
        labels: *mut i64,
    ) -> c_int;
    fn faiss_Index_range_search(index: FaissIndex, n: i64, x: *const f32, radius: f32, p_result: *mut *mut c_void) -> c_int;
    fn faiss_RangeSearchResult_get(result: *mut c_void, lims: *mut *mut i64, labels: *mut *mut i64, distances: *mut *mut f32) -> c_int;
    fn faiss_RangeSearchResult_free(result: *mut c_void);
    fn faiss_Index_reconstruct(index: FaissIndex, key: i64, recons: *mut f32) -> c_int;
    fn faiss_Index_reconstruct_n(index: FaissIndex, i0: i64, ni: i64, recons: *mut f32) -> c_int;
    fn faiss_IndexIDMap_remove_ids(index: FaissIndex, ids: *const i64, n_ids: i64, n_removed: *mut i64) -> c_int;
    fn faiss_Index_reset(index: FaissIndex) -> c_int;

    // variant parameters
    fn faiss_IndexIVF_cast(index: FaissIndex) -> FaissIndex;
    fn faiss_IndexIVF_nlist(index: FaissIndex, nlist: *mut i64) -> c_int;
    fn faiss_IndexIVF_set_nprobe(index: FaissIndex, nprobe: i64) -> c_int;
    fn faiss_IndexIVF_get_nprobe(index: FaissIndex, nprobe: *mut i64) -> c_int;
    fn faiss_IndexHNSW_set_efConstruction(index: FaissIndex, ef: c_int) -> c_int;
    fn faiss_IndexHNSW_set_efSearch(index: FaissIndex, ef: c_int) -> c_int;
    fn faiss_IndexHNSW_get_efConstruction(index: FaissIndex, ef: *mut c_int) -> c_int;
    fn faiss_IndexHNSW_get_efSearch(index: FaissIndex, ef: *mut c_int) -> c_int;
    fn faiss_IndexRefine_set_k_factor(index: FaissIndex, k_factor: f32) -> c_int;
    fn faiss_IndexPQFastScan_set_bbs(index: FaissIndex, bbs: i64) -> c_int;
    fn faiss_IndexShards_add_shard(index: FaissIndex, shard: FaissIndex) -> c_int;

    // persistence
    fn faiss_write_index(index: FaissIndex, filename: *const c_char) -> c_int;
    fn faiss_read_index(
        filename: *const c_char,
        p_index: *mut FaissIndex,
        index_type: *mut c_char,
        d: *mut c_int,
        metric: *mut c_int,
        ntotal: *mut i64,
    ) -> c_int;
    fn faiss_serialize_index(index: FaissIndex, data: *mut *mut u8, size: *mut usize) -> c_int;
    fn faiss_deserialize_index(
        data: *const u8,
        size: usize,
        p_index: *mut FaissIndex,
        index_type: *mut c_char,
        d: *mut c_int,
        metric: *mut c_int,
        ntotal: *mut i64,
    ) -> c_int;

    // binary index
    fn faiss_IndexBinary_d(index: FaissIndexBinary) -> c_int;
    fn faiss_IndexBinary_ntotal(index: FaissIndexBinary, ntotal: *mut i64) -> c_int;
    fn faiss_IndexBinary_is_trained(index: FaissIndexBinary, is_trained: *mut c_int) -> c_int;
    fn faiss_IndexBinary_train(index: FaissIndexBinary, n: i64, x: *const u8) -> c_int;
    fn faiss_IndexBinary_add(index: FaissIndexBinary, n: i64, x: *const u8) -> c_int;
    fn faiss_IndexBinary_search(
        index: FaissIndexBinary,
        n: i64,
        x: *const u8,
        k: i64,
        distances: *mut i32,
        labels: *mut i64,
    ) -> c_int;
    fn faiss_IndexBinary_reset(index: FaissIndexBinary) -> c_int;
    fn faiss_IndexBinaryIVF_set_nprobe(index: FaissIndexBinary, nprobe: i64) -> c_int;

    // vector transform
    fn faiss_VectorTransform_d_in(transform: FaissVectorTransform) -> c_int;
    fn faiss_VectorTransform_d_out(transform: FaissVectorTransform) -> c_int;
    fn faiss_VectorTransform_is_trained(transform: FaissVectorTransform) -> c_int;
    fn faiss_VectorTransform_train(transform: FaissVectorTransform, n: i64, x: *const f32) -> c_int;
    fn faiss_VectorTransform_apply(transform: FaissVectorTransform, n: i64, x: *const f32, xt: *mut f32) -> c_int;
    fn faiss_VectorTransform_reverse_transform(transform: FaissVectorTransform, n: i64, xt: *const f32, x: *mut f32) -> c_int;

    // clustering
    fn faiss_Kmeans_train(kmeans: FaissKmeans, n: i64, x: *const f32) -> c_int;
    fn faiss_Kmeans_assign(kmeans: FaissKmeans, n: i64, x: *const f32, labels: *mut i64) -> c_int;
    fn faiss_Kmeans_get_centroids(kmeans: FaissKmeans, centroids: *mut f32) -> c_int;
    fn faiss_Kmeans_set_niter(kmeans: FaissKmeans, niter: c_int) -> c_int;
    fn faiss_Kmeans_set_seed(kmeans: FaissKmeans, seed: i64) -> c_int;

    // buffers returned by faiss_serialize_index are malloc'ed
    fn free(p: *mut c_void);
}

#[inline]
fn status(code: c_int) -> NativeResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(code)
    }
}

/// Runs a constructor that writes its result through an out pointer.
#[inline]
fn construct(f: impl FnOnce(*mut *mut c_void) -> c_int) -> NativeResult<RawPtr> {
    let mut out: *mut c_void = ptr::null_mut();
    status(f(&mut out))?;
    if out.is_null() {
        return Err(STATUS_BAD_ARGUMENT);
    }
    Ok(out)
}

fn sq_suffix(qtype: QuantizerType) -> &'static str {
    match qtype {
        QuantizerType::QT8bit => "SQ8",
        QuantizerType::QT4bit => "SQ4",
        QuantizerType::QT8bitUniform => "SQ8",
        QuantizerType::QT4bitUniform => "SQ4",
        QuantizerType::QTfp16 => "SQfp16",
        QuantizerType::QT8bitDirect => "SQ8_direct",
        QuantizerType::QT6bit => "SQ6",
    }
}

/// Backend linked against the faiss C API.
#[derive(Debug, Default)]
pub struct FaissBackend;

impl FaissBackend {
    pub fn new() -> Self {
        Self
    }

    fn factory(d: usize, description: &str, metric: MetricType) -> NativeResult<RawPtr> {
        let desc = CString::new(description).map_err(|_| STATUS_BAD_ARGUMENT)?;
        construct(|p| unsafe { faiss_index_factory(p, d as c_int, desc.as_ptr(), metric.code()) })
    }

    fn path(path: &CStr) -> *const c_char {
        path.as_ptr()
    }
}

impl NativeBackend for FaissBackend {
    fn name(&self) -> &'static str {
        "faiss"
    }

    fn create(&self, ctor: &Constructor<'_>) -> NativeResult<RawPtr> {
        unsafe {
            match *ctor {
                Constructor::Flat { d, metric } => construct(|p| faiss_IndexFlat_new_with(p, d as i64, metric.code())),
                Constructor::IvfFlat { quantizer: Some(q), d, nlist, metric } => {
                    construct(|p| faiss_IndexIVFFlat_new(p, q, d as i64, nlist as i64, metric.code()))
                }
                Constructor::IvfFlat { quantizer: None, d, nlist, metric } => {
                    Self::factory(d, &format!("IVF{},Flat", nlist), metric)
                }
                Constructor::IvfPq { quantizer: Some(q), d, nlist, m, nbits, .. } => {
                    construct(|p| faiss_IndexIVFPQ_new(p, q, d as i64, nlist as i64, m as i64, nbits as i64))
                }
                Constructor::IvfPq { quantizer: None, d, nlist, m, nbits, metric } => {
                    Self::factory(d, &format!("IVF{},PQ{}x{}", nlist, m, nbits), metric)
                }
                Constructor::IvfScalarQuantizer { quantizer: Some(q), d, nlist, qtype, metric } => construct(|p| {
                    faiss_IndexIVFScalarQuantizer_new(p, q, d as i64, nlist as i64, qtype.code(), metric.code())
                }),
                Constructor::IvfScalarQuantizer { quantizer: None, d, nlist, qtype, metric } => {
                    Self::factory(d, &format!("IVF{},{}", nlist, sq_suffix(qtype)), metric)
                }
                Constructor::HnswFlat { d, m, metric } => {
                    construct(|p| faiss_IndexHNSWFlat_new(p, d as i64, m as c_int, metric.code()))
                }
                Constructor::Pq { d, m, nbits, metric } => {
                    construct(|p| faiss_IndexPQ_new(p, d as i64, m as i64, nbits as i64, metric.code()))
                }
                Constructor::ScalarQuantizer { d, qtype, metric } => {
                    construct(|p| faiss_IndexScalarQuantizer_new(p, d as i64, qtype.code(), metric.code()))
                }
                Constructor::PqFastScan { d, m, nbits, metric } => {
                    construct(|p| faiss_IndexPQFastScan_new(p, d as i64, m as i64, nbits as i64, metric.code()))
                }
                Constructor::IvfPqFastScan { quantizer: Some(q), d, nlist, m, nbits, metric } => construct(|p| {
                    faiss_IndexIVFPQFastScan_new(p, q, d as i64, nlist as i64, m as i64, nbits as i64, metric.code())
                }),
                Constructor::IvfPqFastScan { quantizer: None, d, nlist, m, nbits, metric } => {
                    Self::factory(d, &format!("IVF{},PQ{}x{}fs", nlist, m, nbits), metric)
                }
                Constructor::Lsh { d, nbits, rotate_data, train_thresholds } => construct(|p| {
                    faiss_IndexLSH_new(p, d as i64, nbits as i64, rotate_data as c_int, train_thresholds as c_int)
                }),
                Constructor::IdMap { base } => construct(|p| faiss_IndexIDMap_new(p, base)),
                Constructor::Refine { base, refine } => construct(|p| faiss_IndexRefine_new(p, base, refine)),
                Constructor::PreTransform { transform, base } => {
                    construct(|p| faiss_IndexPreTransform_new(p, transform, base))
                }
                Constructor::Shards { d, metric } => construct(|p| faiss_IndexShards_new(p, d as i64, metric.code())),
                Constructor::Factory { d, description, metric } => Self::factory(d, description, metric),
                Constructor::PcaMatrix { d_in, d_out, eigen_power, random_rotation } => construct(|p| {
                    faiss_PCAMatrix_new(p, d_in as i64, d_out as i64, eigen_power, random_rotation as c_int)
                }),
                Constructor::OpqMatrix { d, m } => construct(|p| faiss_OPQMatrix_new(p, d as i64, m as i64)),
                Constructor::RandomRotation { d_in, d_out } => {
                    construct(|p| faiss_RandomRotationMatrix_new(p, d_in as i64, d_out as i64))
                }
                Constructor::Kmeans { d, k } => construct(|p| faiss_Kmeans_new(p, d as i64, k as i64)),
                Constructor::BinaryFlat { d } => construct(|p| faiss_IndexBinaryFlat_new(p, d as i64)),
                Constructor::BinaryIvf { quantizer, d, nlist } => {
                    construct(|p| faiss_IndexBinaryIVF_new(p, quantizer, d as i64, nlist as i64))
                }
                Constructor::BinaryHash { d, nbits } => {
                    construct(|p| faiss_IndexBinaryHash_new(p, d as i64, nbits as i64))
                }
            }
        }
    }

    unsafe fn free(&self, kind: ObjectKind, p: RawPtr) -> NativeResult<()> {
        match kind {
            ObjectKind::Index => faiss_Index_free(p),
            ObjectKind::BinaryIndex => faiss_IndexBinary_free(p),
            ObjectKind::Transform => faiss_VectorTransform_free(p),
            ObjectKind::Kmeans => faiss_Kmeans_free(p),
        }
        Ok(())
    }

    unsafe fn index_d(&self, p: RawPtr) -> NativeResult<usize> {
        Ok(faiss_Index_d(p) as usize)
    }

    unsafe fn index_ntotal(&self, p: RawPtr) -> NativeResult<u64> {
        Ok(faiss_Index_ntotal(p) as u64)
    }

    unsafe fn index_is_trained(&self, p: RawPtr) -> NativeResult<bool> {
        Ok(faiss_Index_is_trained(p) != 0)
    }

    unsafe fn index_metric(&self, p: RawPtr) -> NativeResult<i32> {
        Ok(faiss_Index_metric_type(p))
    }

    unsafe fn index_train(&self, p: RawPtr, n: usize, x: &[f32]) -> NativeResult<()> {
        status(faiss_Index_train(p, n as i64, x.as_ptr()))
    }

    unsafe fn index_add(&self, p: RawPtr, n: usize, x: &[f32]) -> NativeResult<()> {
        status(faiss_Index_add(p, n as i64, x.as_ptr()))
    }

    unsafe fn index_add_with_ids(&self, p: RawPtr, n: usize, x: &[f32], ids: &[i64]) -> NativeResult<()> {
        status(faiss_Index_add_with_ids(p, n as i64, x.as_ptr(), ids.as_ptr()))
    }

    unsafe fn index_search(
        &self,
        p: RawPtr,
        n: usize,
        x: &[f32],
        k: usize,
        distances: &mut [f32],
        labels: &mut [i64],
    ) -> NativeResult<()> {
        status(faiss_Index_search(
            p,
            n as i64,
            x.as_ptr(),
            k as i64,
            distances.as_mut_ptr(),
            labels.as_mut_ptr(),
        ))
    }

    unsafe fn index_range_search(&self, p: RawPtr, n: usize, x: &[f32], radius: f32) -> NativeResult<RangeSearchOutput> {
        let mut result: *mut c_void = ptr::null_mut();
        status(faiss_Index_range_search(p, n as i64, x.as_ptr(), radius, &mut result))?;
        if result.is_null() {
            return Err(STATUS_BAD_ARGUMENT);
        }

        let mut lims: *mut i64 = ptr::null_mut();
        let mut labels: *mut i64 = ptr::null_mut();
        let mut distances: *mut f32 = ptr::null_mut();
        let code = faiss_RangeSearchResult_get(result, &mut lims, &mut labels, &mut distances);
        if code != 0 || lims.is_null() {
            faiss_RangeSearchResult_free(result);
            return Err(if code != 0 { code } else { STATUS_BAD_ARGUMENT });
        }

        let lims = std::slice::from_raw_parts(lims, n + 1);
        let total = lims[n] as usize;
        let out = RangeSearchOutput {
            lims: lims.iter().map(|&l| l as usize).collect(),
            labels: if total == 0 { Vec::new() } else { std::slice::from_raw_parts(labels, total).to_vec() },
            distances: if total == 0 { Vec::new() } else { std::slice::from_raw_parts(distances, total).to_vec() },
        };
        faiss_RangeSearchResult_free(result);
        Ok(out)
    }

    unsafe fn index_reconstruct(&self, p: RawPtr, key: i64, out: &mut [f32]) -> NativeResult<()> {
        status(faiss_Index_reconstruct(p, key, out.as_mut_ptr()))
    }

    unsafe fn index_reconstruct_n(&self, p: RawPtr, i0: i64, ni: usize, out: &mut [f32]) -> NativeResult<()> {
        status(faiss_Index_reconstruct_n(p, i0, ni as i64, out.as_mut_ptr()))
    }

    unsafe fn index_remove_ids(&self, p: RawPtr, ids: &[i64]) -> NativeResult<usize> {
        let mut removed: i64 = 0;
        status(faiss_IndexIDMap_remove_ids(p, ids.as_ptr(), ids.len() as i64, &mut removed))?;
        Ok(removed as usize)
    }

    unsafe fn index_reset(&self, p: RawPtr) -> NativeResult<()> {
        status(faiss_Index_reset(p))
    }

    unsafe fn ivf_nlist(&self, p: RawPtr) -> NativeResult<usize> {
        // nlist doubles as the IVF interface query
        if faiss_IndexIVF_cast(p).is_null() {
            return Err(STATUS_BAD_ARGUMENT);
        }
        let mut nlist: i64 = 0;
        status(faiss_IndexIVF_nlist(p, &mut nlist))?;
        Ok(nlist as usize)
    }

    unsafe fn ivf_nprobe(&self, p: RawPtr) -> NativeResult<usize> {
        let mut nprobe: i64 = 0;
        status(faiss_IndexIVF_get_nprobe(p, &mut nprobe))?;
        Ok(nprobe as usize)
    }

    unsafe fn ivf_set_nprobe(&self, p: RawPtr, nprobe: usize) -> NativeResult<()> {
        status(faiss_IndexIVF_set_nprobe(p, nprobe as i64))
    }

    unsafe fn hnsw_ef_search(&self, p: RawPtr) -> NativeResult<usize> {
        let mut ef: c_int = 0;
        status(faiss_IndexHNSW_get_efSearch(p, &mut ef))?;
        Ok(ef as usize)
    }

    unsafe fn hnsw_set_ef_search(&self, p: RawPtr, ef: usize) -> NativeResult<()> {
        status(faiss_IndexHNSW_set_efSearch(p, ef as c_int))
    }

    unsafe fn hnsw_ef_construction(&self, p: RawPtr) -> NativeResult<usize> {
        let mut ef: c_int = 0;
        status(faiss_IndexHNSW_get_efConstruction(p, &mut ef))?;
        Ok(ef as usize)
    }

    unsafe fn hnsw_set_ef_construction(&self, p: RawPtr, ef: usize) -> NativeResult<()> {
        status(faiss_IndexHNSW_set_efConstruction(p, ef as c_int))
    }

    unsafe fn refine_set_k_factor(&self, p: RawPtr, k_factor: f32) -> NativeResult<()> {
        status(faiss_IndexRefine_set_k_factor(p, k_factor))
    }

    unsafe fn pq_fastscan_set_bbs(&self, p: RawPtr, bbs: usize) -> NativeResult<()> {
        status(faiss_IndexPQFastScan_set_bbs(p, bbs as i64))
    }

    unsafe fn shards_add_shard(&self, p: RawPtr, shard: RawPtr) -> NativeResult<()> {
        status(faiss_IndexShards_add_shard(p, shard))
    }

    unsafe fn write_index(&self, p: RawPtr, path: &CStr) -> NativeResult<()> {
        status(faiss_write_index(p, Self::path(path)))
    }

    fn read_index(&self, path: &CStr) -> NativeResult<RawPtr> {
        let mut index_type = [0 as c_char; INDEX_TYPE_BUF];
        let (mut d, mut metric, mut ntotal) = (0 as c_int, 0 as c_int, 0i64);
        construct(|p| unsafe {
            faiss_read_index(Self::path(path), p, index_type.as_mut_ptr(), &mut d, &mut metric, &mut ntotal)
        })
    }

    unsafe fn serialize_index(&self, p: RawPtr) -> NativeResult<Vec<u8>> {
        let mut data: *mut u8 = ptr::null_mut();
        let mut size: usize = 0;
        status(faiss_serialize_index(p, &mut data, &mut size))?;
        if data.is_null() {
            return Err(STATUS_BAD_ARGUMENT);
        }
        let bytes = std::slice::from_raw_parts(data, size).to_vec();
        free(data as *mut c_void);
        Ok(bytes)
    }

    fn deserialize_index(&self, data: &[u8]) -> NativeResult<RawPtr> {
        let mut index_type = [0 as c_char; INDEX_TYPE_BUF];
        let (mut d, mut metric, mut ntotal) = (0 as c_int, 0 as c_int, 0i64);
        construct(|p| unsafe {
            faiss_deserialize_index(
                data.as_ptr(),
                data.len(),
                p,
                index_type.as_mut_ptr(),
                &mut d,
                &mut metric,
                &mut ntotal,
            )
        })
    }

    unsafe fn binary_d(&self, p: RawPtr) -> NativeResult<usize> {
        Ok(faiss_IndexBinary_d(p) as usize)
    }

    unsafe fn binary_ntotal(&self, p: RawPtr) -> NativeResult<u64> {
        let mut ntotal: i64 = 0;
        status(faiss_IndexBinary_ntotal(p, &mut ntotal))?;
        Ok(ntotal as u64)
    }

    unsafe fn binary_is_trained(&self, p: RawPtr) -> NativeResult<bool> {
        let mut trained: c_int = 0;
        status(faiss_IndexBinary_is_trained(p, &mut trained))?;
        Ok(trained != 0)
    }

    unsafe fn binary_train(&self, p: RawPtr, n: usize, x: &[u8]) -> NativeResult<()> {
        status(faiss_IndexBinary_train(p, n as i64, x.as_ptr()))
    }

    unsafe fn binary_add(&self, p: RawPtr, n: usize, x: &[u8]) -> NativeResult<()> {
        status(faiss_IndexBinary_add(p, n as i64, x.as_ptr()))
    }

    unsafe fn binary_search(
        &self,
        p: RawPtr,
        n: usize,
        x: &[u8],
        k: usize,
        distances: &mut [i32],
        labels: &mut [i64],
    ) -> NativeResult<()> {
        status(faiss_IndexBinary_search(
            p,
            n as i64,
            x.as_ptr(),
            k as i64,
            distances.as_mut_ptr(),
            labels.as_mut_ptr(),
        ))
    }

    unsafe fn binary_reset(&self, p: RawPtr) -> NativeResult<()> {
        status(faiss_IndexBinary_reset(p))
    }

    unsafe fn binary_ivf_set_nprobe(&self, p: RawPtr, nprobe: usize) -> NativeResult<()> {
        status(faiss_IndexBinaryIVF_set_nprobe(p, nprobe as i64))
    }

    unsafe fn transform_d_in(&self, p: RawPtr) -> NativeResult<usize> {
        Ok(faiss_VectorTransform_d_in(p) as usize)
    }

    unsafe fn transform_d_out(&self, p: RawPtr) -> NativeResult<usize> {
        Ok(faiss_VectorTransform_d_out(p) as usize)
    }

    unsafe fn transform_is_trained(&self, p: RawPtr) -> NativeResult<bool> {
        Ok(faiss_VectorTransform_is_trained(p) != 0)
    }

    unsafe fn transform_train(&self, p: RawPtr, n: usize, x: &[f32]) -> NativeResult<()> {
        status(faiss_VectorTransform_train(p, n as i64, x.as_ptr()))
    }

    unsafe fn transform_apply(&self, p: RawPtr, n: usize, x: &[f32], out: &mut [f32]) -> NativeResult<()> {
        status(faiss_VectorTransform_apply(p, n as i64, x.as_ptr(), out.as_mut_ptr()))
    }

    unsafe fn transform_reverse(&self, p: RawPtr, n: usize, xt: &[f32], out: &mut [f32]) -> NativeResult<()> {
        status(faiss_VectorTransform_reverse_transform(p, n as i64, xt.as_ptr(), out.as_mut_ptr()))
    }

    unsafe fn kmeans_train(&self, p: RawPtr, n: usize, x: &[f32]) -> NativeResult<()> {
        status(faiss_Kmeans_train(p, n as i64, x.as_ptr()))
    }

    unsafe fn kmeans_assign(&self, p: RawPtr, n: usize, x: &[f32], labels: &mut [i64]) -> NativeResult<()> {
        status(faiss_Kmeans_assign(p, n as i64, x.as_ptr(), labels.as_mut_ptr()))
    }

    unsafe fn kmeans_centroids(&self, p: RawPtr, out: &mut [f32]) -> NativeResult<()> {
        status(faiss_Kmeans_get_centroids(p, out.as_mut_ptr()))
    }

    unsafe fn kmeans_set_niter(&self, p: RawPtr, niter: usize) -> NativeResult<()> {
        status(faiss_Kmeans_set_niter(p, niter as c_int))
    }

    unsafe fn kmeans_set_seed(&self, p: RawPtr, seed: u64) -> NativeResult<()> {
        status(faiss_Kmeans_set_seed(p, seed as i64))
    }
}
