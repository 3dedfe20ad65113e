//! 模拟原生后端
//!
//! `SimBackend` follows the native contract without linking faiss: objects
//! live in a table keyed by opaque pointer-sized values, every create and free
//! is counted, and calls on unknown or already-freed pointers come back as a
//! non-zero status instead of touching memory.
//!
//! Composite objects (IDMap, refine, pre-transform, shards) keep the keys of
//! their children, exactly like the native library keeps bare pointers. A
//! child freed under a live composite makes the composite's calls fail with
//! [`STATUS_UNKNOWN_OBJECT`].
//!
//! Locking: the table lock is never held while an object lock is taken, and
//! an object lock is never held while recursing into a child.

use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::ffi::{Constructor, NativeBackend, NativeResult, ObjectKind, RangeSearchOutput, RawPtr, Status};
use crate::metrics::MetricType;

mod factory;
pub(crate) mod kmeans;
mod snapshot;
mod store;
mod transform;

use store::{
    select_top_k, BinaryIvf, Codec, CodecBody, HnswBody, IdMapBody, IndexBody, IvfBody, IvfCodec,
    PreTransformBody, RefineBody, ShardsBody, SimBinary, SimIndex, SimKmeans, SimObject,
    DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH,
};
use transform::SimTransform;

pub const STATUS_INVALID_ARGUMENT: Status = -1;
pub const STATUS_UNKNOWN_OBJECT: Status = -2;
pub const STATUS_WRONG_INTERFACE: Status = -3;
pub const STATUS_NOT_TRAINED: Status = -4;
pub const STATUS_IO: Status = -5;
pub const STATUS_UNSUPPORTED: Status = -6;
pub const STATUS_CORRUPT: Status = -7;

const FIRST_KEY: usize = 0x1000;
const KEY_STRIDE: usize = 0x10;
const TRANSFORM_SEED: u64 = 0x7a11;
const FASTSCAN_BBS: usize = 32;

/// Create / free accounting of a [`SimBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub creates: u64,
    pub frees: u64,
    /// Frees of pointers that were never created or already freed.
    pub double_frees: u64,
    /// Calls made with a pointer that is not in the table.
    pub dangling_calls: u64,
    pub live: usize,
}

struct Entry {
    kind: ObjectKind,
    obj: Arc<Mutex<SimObject>>,
}

/// Route of a float index call: leaves are served in place, composites are
/// forwarded to their children.
enum Route {
    Leaf,
    IdMap { base: usize },
    Refine { base: usize, refine: usize, k_factor: f32 },
    PreTransform { transform: usize, base: usize },
    Shards { shards: Vec<usize> },
}

pub struct SimBackend {
    objects: Mutex<HashMap<usize, Entry>>,
    next_key: AtomicUsize,
    creates: AtomicU64,
    frees: AtomicU64,
    double_frees: AtomicU64,
    dangling_calls: AtomicU64,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            next_key: AtomicUsize::new(FIRST_KEY),
            creates: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            double_frees: AtomicU64::new(0),
            dangling_calls: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            creates: self.creates.load(Ordering::SeqCst),
            frees: self.frees.load(Ordering::SeqCst),
            double_frees: self.double_frees.load(Ordering::SeqCst),
            dangling_calls: self.dangling_calls.load(Ordering::SeqCst),
            live: self.objects.lock().len(),
        }
    }

    /// Whether `ptr` names a live object.
    pub fn is_live(&self, ptr: RawPtr) -> bool {
        self.objects.lock().contains_key(&(ptr as usize))
    }

    // ---- table ----

    fn insert(&self, kind: ObjectKind, obj: SimObject) -> usize {
        let key = self.next_key.fetch_add(KEY_STRIDE, Ordering::Relaxed);
        self.objects.lock().insert(key, Entry { kind, obj: Arc::new(Mutex::new(obj)) });
        self.creates.fetch_add(1, Ordering::SeqCst);
        key
    }

    fn lookup(&self, key: usize, kind: ObjectKind) -> NativeResult<Arc<Mutex<SimObject>>> {
        let objects = self.objects.lock();
        match objects.get(&key) {
            Some(entry) if entry.kind == kind => Ok(Arc::clone(&entry.obj)),
            Some(_) => Err(STATUS_WRONG_INTERFACE),
            None => {
                self.dangling_calls.fetch_add(1, Ordering::Relaxed);
                Err(STATUS_UNKNOWN_OBJECT)
            }
        }
    }

    fn release(&self, key: usize, kind: ObjectKind) -> NativeResult<()> {
        let entry = {
            let mut objects = self.objects.lock();
            match objects.get(&key).map(|e| e.kind) {
                Some(found) if found != kind => return Err(STATUS_WRONG_INTERFACE),
                Some(_) => objects.remove(&key),
                None => None,
            }
        };
        let Some(entry) = entry else {
            self.double_frees.fetch_add(1, Ordering::SeqCst);
            return Err(STATUS_UNKNOWN_OBJECT);
        };
        self.frees.fetch_add(1, Ordering::SeqCst);

        let children = entry.obj.lock().owned_children();
        for (child, child_kind) in children {
            self.release(child, child_kind)?;
        }
        Ok(())
    }

    fn with_index<R>(&self, key: usize, f: impl FnOnce(&mut SimIndex) -> NativeResult<R>) -> NativeResult<R> {
        let obj = self.lookup(key, ObjectKind::Index)?;
        let mut guard = obj.lock();
        match &mut *guard {
            SimObject::Index(index) => f(index),
            _ => Err(STATUS_WRONG_INTERFACE),
        }
    }

    fn with_binary<R>(&self, key: usize, f: impl FnOnce(&mut SimBinary) -> NativeResult<R>) -> NativeResult<R> {
        let obj = self.lookup(key, ObjectKind::BinaryIndex)?;
        let mut guard = obj.lock();
        match &mut *guard {
            SimObject::Binary(index) => f(index),
            _ => Err(STATUS_WRONG_INTERFACE),
        }
    }

    fn with_transform<R>(
        &self,
        key: usize,
        f: impl FnOnce(&mut SimTransform) -> NativeResult<R>,
    ) -> NativeResult<R> {
        let obj = self.lookup(key, ObjectKind::Transform)?;
        let mut guard = obj.lock();
        match &mut *guard {
            SimObject::Transform(t) => f(t),
            _ => Err(STATUS_WRONG_INTERFACE),
        }
    }

    fn with_kmeans<R>(&self, key: usize, f: impl FnOnce(&mut SimKmeans) -> NativeResult<R>) -> NativeResult<R> {
        let obj = self.lookup(key, ObjectKind::Kmeans)?;
        let mut guard = obj.lock();
        match &mut *guard {
            SimObject::Kmeans(km) => f(km),
            _ => Err(STATUS_WRONG_INTERFACE),
        }
    }

    fn route(&self, key: usize) -> NativeResult<(Route, usize, MetricType)> {
        self.with_index(key, |ix| {
            let route = match &ix.body {
                IndexBody::IdMap(b) => Route::IdMap { base: b.base },
                IndexBody::Refine(b) => Route::Refine { base: b.base, refine: b.refine, k_factor: b.k_factor },
                IndexBody::PreTransform(b) => Route::PreTransform { transform: b.transform, base: b.base },
                IndexBody::Shards(b) => Route::Shards { shards: b.shards.clone() },
                _ => Route::Leaf,
            };
            Ok((route, ix.d, ix.metric))
        })
    }

    // ---- construction ----

    fn create_key(&self, ctor: &Constructor<'_>) -> NativeResult<usize> {
        match *ctor {
            Constructor::Flat { d, metric } => {
                check_float(d, metric)?;
                Ok(self.insert(ObjectKind::Index, SimObject::Index(SimIndex::flat(d, metric))))
            }
            Constructor::IvfFlat { quantizer, d, nlist, metric } => {
                self.create_ivf(quantizer, d, nlist, metric, IvfCodec::Flat)
            }
            Constructor::IvfPq { quantizer, d, nlist, m, nbits, metric } => {
                if m == 0 || d % m != 0 || !(1..=16).contains(&nbits) {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                self.create_ivf(quantizer, d, nlist, metric, IvfCodec::Pq { m, nbits })
            }
            Constructor::IvfScalarQuantizer { quantizer, d, nlist, qtype, metric } => {
                self.create_ivf(quantizer, d, nlist, metric, IvfCodec::Sq { qtype })
            }
            Constructor::HnswFlat { d, m, metric } => {
                check_float(d, metric)?;
                if m == 0 {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let body = IndexBody::Hnsw(HnswBody {
                    m,
                    ef_search: DEFAULT_EF_SEARCH,
                    ef_construction: DEFAULT_EF_CONSTRUCTION,
                    store: store::FlatStore::new(d),
                });
                Ok(self.insert(ObjectKind::Index, SimObject::Index(SimIndex { d, metric, body })))
            }
            Constructor::Pq { d, m, nbits, metric } => {
                if m == 0 || d % m != 0 || !(1..=16).contains(&nbits) {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                self.create_codec(d, metric, Codec::Pq { m, nbits })
            }
            Constructor::PqFastScan { d, m, nbits, metric } => {
                check_fastscan(d, m, nbits)?;
                self.create_codec(d, metric, Codec::PqFastScan { m, nbits, bbs: FASTSCAN_BBS })
            }
            Constructor::IvfPqFastScan { quantizer, d, nlist, m, nbits, metric } => {
                check_fastscan(d, m, nbits)?;
                let codec = IvfCodec::PqFastScan { m, nbits, bbs: FASTSCAN_BBS };
                self.create_ivf(quantizer, d, nlist, metric, codec)
            }
            Constructor::ScalarQuantizer { d, qtype, metric } => self.create_codec(d, metric, Codec::Sq { qtype }),
            Constructor::Lsh { d, nbits, rotate_data, train_thresholds } => {
                if nbits == 0 {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                self.create_codec(d, MetricType::L2, Codec::Lsh { nbits, rotate_data, train_thresholds })
            }
            Constructor::IdMap { base } => {
                let base = base as usize;
                let (_, d, metric) = self.route(base)?;
                if self.ntotal_key(base)? != 0 {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let body = IndexBody::IdMap(IdMapBody { base, ids: Vec::new(), owns: false });
                Ok(self.insert(ObjectKind::Index, SimObject::Index(SimIndex { d, metric, body })))
            }
            Constructor::Refine { base, refine } => {
                let (base, refine) = (base as usize, refine as usize);
                let (_, d, metric) = self.route(base)?;
                let (_, rd, _) = self.route(refine)?;
                if d != rd {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let body = IndexBody::Refine(RefineBody { base, refine, k_factor: 1.0, owns: false });
                Ok(self.insert(ObjectKind::Index, SimObject::Index(SimIndex { d, metric, body })))
            }
            Constructor::PreTransform { transform, base } => {
                let (transform, base) = (transform as usize, base as usize);
                let (d_in, d_out) = self.with_transform(transform, |t| Ok((t.d_in, t.d_out)))?;
                let (_, d, metric) = self.route(base)?;
                if d_out != d {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let body = IndexBody::PreTransform(PreTransformBody { transform, base, owns: false });
                Ok(self.insert(ObjectKind::Index, SimObject::Index(SimIndex { d: d_in, metric, body })))
            }
            Constructor::Shards { d, metric } => {
                check_float(d, metric)?;
                let body = IndexBody::Shards(ShardsBody { shards: Vec::new(), owns: false });
                Ok(self.insert(ObjectKind::Index, SimObject::Index(SimIndex { d, metric, body })))
            }
            Constructor::Factory { d, description, metric } => {
                check_float(d, metric)?;
                factory::build(self, d, description, metric)
            }
            Constructor::PcaMatrix { d_in, d_out, eigen_power, random_rotation } => {
                if d_in == 0 || d_out == 0 || d_out > d_in {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let t = SimTransform::pca(d_in, d_out, eigen_power, random_rotation, TRANSFORM_SEED);
                Ok(self.insert(ObjectKind::Transform, SimObject::Transform(t)))
            }
            Constructor::OpqMatrix { d, m } => {
                if d == 0 || m == 0 || d % m != 0 {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let t = SimTransform::opq(d, m, TRANSFORM_SEED);
                Ok(self.insert(ObjectKind::Transform, SimObject::Transform(t)))
            }
            Constructor::RandomRotation { d_in, d_out } => {
                if d_in == 0 || d_out == 0 {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let t = SimTransform::random_rotation(d_in, d_out, TRANSFORM_SEED);
                Ok(self.insert(ObjectKind::Transform, SimObject::Transform(t)))
            }
            Constructor::Kmeans { d, k } => {
                if d == 0 || k == 0 {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let km = SimKmeans {
                    d,
                    k,
                    niter: kmeans::DEFAULT_NITER,
                    seed: kmeans::DEFAULT_SEED,
                    centroids: Vec::new(),
                };
                Ok(self.insert(ObjectKind::Kmeans, SimObject::Kmeans(km)))
            }
            Constructor::BinaryFlat { d } => {
                if d == 0 || d % 8 != 0 {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                Ok(self.insert(ObjectKind::BinaryIndex, SimObject::Binary(SimBinary::flat(d))))
            }
            Constructor::BinaryIvf { quantizer, d, nlist } => {
                if d == 0 || d % 8 != 0 || nlist == 0 {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let quantizer = quantizer as usize;
                let qd = self.with_binary(quantizer, |q| Ok(q.d))?;
                if qd != d {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let ivf = BinaryIvf { quantizer, nlist, nprobe: 1, centroids: Vec::new(), assign: Vec::new() };
                let b = SimBinary { ivf: Some(ivf), ..SimBinary::flat(d) };
                Ok(self.insert(ObjectKind::BinaryIndex, SimObject::Binary(b)))
            }
            Constructor::BinaryHash { d, nbits } => {
                if d == 0 || d % 8 != 0 || nbits == 0 || nbits > d {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let b = SimBinary { hash_bits: Some(nbits), ..SimBinary::flat(d) };
                Ok(self.insert(ObjectKind::BinaryIndex, SimObject::Binary(b)))
            }
        }
    }

    fn create_ivf(
        &self,
        quantizer: Option<RawPtr>,
        d: usize,
        nlist: usize,
        metric: MetricType,
        codec: IvfCodec,
    ) -> NativeResult<usize> {
        check_float(d, metric)?;
        if nlist == 0 {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        let quantizer = quantizer.map(|q| q as usize);
        let mut body = IvfBody::new(d, nlist, codec, quantizer);
        if let Some(q) = quantizer {
            // a quantizer already holding nlist centroids needs no training
            if let Some(centroids) = self.quantizer_centroids(q, d, nlist)? {
                body.centroids = centroids;
                body.trained = true;
            }
        }
        let body = IndexBody::Ivf(body);
        Ok(self.insert(ObjectKind::Index, SimObject::Index(SimIndex { d, metric, body })))
    }

    fn create_codec(&self, d: usize, metric: MetricType, codec: Codec) -> NativeResult<usize> {
        check_float(d, metric)?;
        let body = IndexBody::Codec(CodecBody {
            codec,
            trained: !codec.needs_training(),
            store: store::FlatStore::new(d),
        });
        Ok(self.insert(ObjectKind::Index, SimObject::Index(SimIndex { d, metric, body })))
    }

    /// Centroids held by an external flat quantizer, if it is populated.
    fn quantizer_centroids(&self, q: usize, d: usize, nlist: usize) -> NativeResult<Option<Vec<f32>>> {
        self.with_index(q, |qx| {
            let IndexBody::Flat(s) = &qx.body else {
                return Err(STATUS_INVALID_ARGUMENT);
            };
            if qx.d != d {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            Ok((s.len() == nlist).then(|| s.data.clone()))
        })
    }

    // ---- float index operations ----

    fn ntotal_key(&self, key: usize) -> NativeResult<usize> {
        match self.route(key)?.0 {
            Route::Leaf => self.with_index(key, |ix| ix.leaf_ntotal().ok_or(STATUS_UNSUPPORTED)),
            Route::IdMap { base } | Route::Refine { base, .. } | Route::PreTransform { base, .. } => {
                self.ntotal_key(base)
            }
            Route::Shards { shards } => shards.iter().try_fold(0, |acc, &s| Ok(acc + self.ntotal_key(s)?)),
        }
    }

    fn is_trained_key(&self, key: usize) -> NativeResult<bool> {
        match self.route(key)?.0 {
            Route::Leaf => self.with_index(key, |ix| ix.leaf_is_trained().ok_or(STATUS_UNSUPPORTED)),
            Route::IdMap { base } => self.is_trained_key(base),
            Route::Refine { base, refine, .. } => Ok(self.is_trained_key(base)? && self.is_trained_key(refine)?),
            Route::PreTransform { transform, base } => {
                let t = self.with_transform(transform, |t| Ok(t.trained))?;
                Ok(t && self.is_trained_key(base)?)
            }
            Route::Shards { shards } => {
                for s in shards {
                    if !self.is_trained_key(s)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn train_key(&self, key: usize, x: &[f32]) -> NativeResult<()> {
        let (route, d, _) = self.route(key)?;
        match route {
            Route::Leaf => self.train_leaf(key, d, x),
            Route::IdMap { base } => self.train_key(base, x),
            Route::Refine { base, refine, .. } => {
                self.train_key(base, x)?;
                self.train_key(refine, x)
            }
            Route::PreTransform { transform, base } => {
                let trained = self.with_transform(transform, |t| Ok(t.trained))?;
                if !trained {
                    self.with_transform(transform, |t| {
                        if t.train(x) {
                            Ok(())
                        } else {
                            Err(STATUS_INVALID_ARGUMENT)
                        }
                    })?;
                }
                let xt = self.apply_transform(transform, x)?;
                self.train_key(base, &xt)
            }
            Route::Shards { shards } => {
                for s in shards {
                    self.train_key(s, x)?;
                }
                Ok(())
            }
        }
    }

    fn train_leaf(&self, key: usize, d: usize, x: &[f32]) -> NativeResult<()> {
        let n = x.len() / d;
        let external = self.with_index(key, |ix| match &ix.body {
            IndexBody::Ivf(b) => Ok(b.quantizer.map(|q| (q, b.nlist))),
            _ => Ok(None),
        })?;

        // reuse centroids of a populated external quantizer
        if let Some((q, nlist)) = external {
            if let Some(centroids) = self.quantizer_centroids(q, d, nlist)? {
                return self.with_index(key, |ix| {
                    if let IndexBody::Ivf(b) = &mut ix.body {
                        b.centroids = centroids;
                        b.trained = true;
                    }
                    Ok(())
                });
            }
        }

        let pushed = self.with_index(key, |ix| match &mut ix.body {
            IndexBody::Ivf(b) => {
                if !b.train(x) {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                Ok(b.quantizer.map(|q| (q, b.centroids.clone())))
            }
            IndexBody::Codec(b) => {
                if n < b.codec.min_train() {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                b.trained = true;
                Ok(None)
            }
            _ => Ok(None),
        })?;

        if let Some((q, centroids)) = pushed {
            self.with_index(q, |qx| {
                qx.leaf_reset();
                qx.leaf_add(&centroids);
                Ok(())
            })?;
        }
        Ok(())
    }

    fn add_key(&self, key: usize, x: &[f32], ids: Option<&[i64]>) -> NativeResult<()> {
        let (route, d, _) = self.route(key)?;
        match route {
            Route::Leaf => {
                if ids.is_some() {
                    return Err(STATUS_UNSUPPORTED);
                }
                self.with_index(key, |ix| {
                    self.check_quantizer(ix)?;
                    if ix.leaf_add(x) {
                        Ok(())
                    } else {
                        Err(STATUS_NOT_TRAINED)
                    }
                })
            }
            Route::IdMap { base } => {
                let ids = ids.ok_or(STATUS_UNSUPPORTED)?;
                self.add_key(base, x, None)?;
                self.with_index(key, |ix| {
                    if let IndexBody::IdMap(b) = &mut ix.body {
                        b.ids.extend_from_slice(ids);
                    }
                    Ok(())
                })
            }
            Route::Refine { base, refine, .. } => {
                if ids.is_some() {
                    return Err(STATUS_UNSUPPORTED);
                }
                self.add_key(base, x, None)?;
                self.add_key(refine, x, None)
            }
            Route::PreTransform { transform, base } => {
                let xt = self.apply_transform(transform, x)?;
                self.add_key(base, &xt, ids)
            }
            Route::Shards { shards } => {
                if shards.is_empty() {
                    return Err(STATUS_INVALID_ARGUMENT);
                }
                let n = x.len() / d;
                let nshard = shards.len();
                for (i, &s) in shards.iter().enumerate() {
                    let (i0, i1) = (n * i / nshard, n * (i + 1) / nshard);
                    if i0 == i1 {
                        continue;
                    }
                    let part_ids = ids.map(|ids| &ids[i0..i1]);
                    self.add_key(s, &x[i0 * d..i1 * d], part_ids)?;
                }
                Ok(())
            }
        }
    }

    /// Fails when the external quantizer of an IVF index has been freed.
    fn check_quantizer(&self, ix: &SimIndex) -> NativeResult<()> {
        if let IndexBody::Ivf(IvfBody { quantizer: Some(q), .. }) = &ix.body {
            self.lookup(*q, ObjectKind::Index)?;
        }
        Ok(())
    }

    fn search_key(
        &self,
        key: usize,
        x: &[f32],
        k: usize,
        distances: &mut [f32],
        labels: &mut [i64],
    ) -> NativeResult<()> {
        let (route, d, metric) = self.route(key)?;
        let n = x.len() / d;
        match route {
            Route::Leaf => self.with_index(key, |ix| {
                self.check_quantizer(ix)?;
                ix.leaf_search(x, k, distances, labels);
                Ok(())
            }),
            Route::IdMap { base } => {
                self.search_key(base, x, k, distances, labels)?;
                self.with_index(key, |ix| {
                    if let IndexBody::IdMap(b) = &ix.body {
                        for l in labels.iter_mut().filter(|l| **l >= 0) {
                            *l = b.ids.get(*l as usize).copied().unwrap_or(-1);
                        }
                    }
                    Ok(())
                })
            }
            Route::Refine { base, refine, k_factor } => {
                let kb = ((k as f32 * k_factor).ceil() as usize).max(k);
                let mut bd = vec![0.0f32; n * kb];
                let mut bl = vec![-1i64; n * kb];
                self.search_key(base, x, kb, &mut bd, &mut bl)?;

                let mut buf = vec![0.0f32; d];
                for qi in 0..n {
                    let q = &x[qi * d..(qi + 1) * d];
                    let mut candidates = Vec::with_capacity(kb);
                    for &l in bl[qi * kb..(qi + 1) * kb].iter().filter(|l| **l >= 0) {
                        self.reconstruct_key(refine, l, &mut buf)?;
                        candidates.push((metric.distance(q, &buf), l));
                    }
                    select_top_k(
                        metric,
                        candidates.into_iter(),
                        &mut distances[qi * k..(qi + 1) * k],
                        &mut labels[qi * k..(qi + 1) * k],
                    );
                }
                Ok(())
            }
            Route::PreTransform { transform, base } => {
                let xt = self.apply_transform(transform, x)?;
                self.search_key(base, &xt, k, distances, labels)
            }
            Route::Shards { shards } => {
                let mut merged: Vec<Vec<(f32, i64)>> = vec![Vec::new(); n];
                let mut offset = 0i64;
                let mut sd = vec![0.0f32; n * k];
                let mut sl = vec![-1i64; n * k];
                for s in shards {
                    self.search_key(s, x, k, &mut sd, &mut sl)?;
                    for (qi, hits) in merged.iter_mut().enumerate() {
                        for j in qi * k..(qi + 1) * k {
                            if sl[j] >= 0 {
                                hits.push((sd[j], sl[j] + offset));
                            }
                        }
                    }
                    offset += self.ntotal_key(s)? as i64;
                }
                for (qi, hits) in merged.into_iter().enumerate() {
                    select_top_k(
                        metric,
                        hits.into_iter(),
                        &mut distances[qi * k..(qi + 1) * k],
                        &mut labels[qi * k..(qi + 1) * k],
                    );
                }
                Ok(())
            }
        }
    }

    fn range_search_key(&self, key: usize, x: &[f32], radius: f32) -> NativeResult<RangeSearchOutput> {
        match self.route(key)?.0 {
            Route::Leaf => self.with_index(key, |ix| {
                self.check_quantizer(ix)?;
                match ix.body {
                    IndexBody::Codec(_) => Err(STATUS_UNSUPPORTED),
                    _ => Ok(ix.leaf_range_search(x, radius)),
                }
            }),
            Route::IdMap { base } => {
                let mut out = self.range_search_key(base, x, radius)?;
                self.with_index(key, |ix| {
                    if let IndexBody::IdMap(b) = &ix.body {
                        for l in out.labels.iter_mut() {
                            *l = b.ids.get(*l as usize).copied().unwrap_or(-1);
                        }
                    }
                    Ok(())
                })?;
                Ok(out)
            }
            Route::PreTransform { transform, base } => {
                let xt = self.apply_transform(transform, x)?;
                self.range_search_key(base, &xt, radius)
            }
            Route::Refine { .. } | Route::Shards { .. } => Err(STATUS_UNSUPPORTED),
        }
    }

    fn reconstruct_key(&self, key: usize, id: i64, out: &mut [f32]) -> NativeResult<()> {
        match self.route(key)?.0 {
            Route::Leaf => self.with_index(key, |ix| {
                let store = ix.leaf_store().ok_or(STATUS_UNSUPPORTED)?;
                let v = usize::try_from(id)
                    .ok()
                    .and_then(|i| store.get(i))
                    .ok_or(STATUS_INVALID_ARGUMENT)?;
                out.copy_from_slice(v);
                Ok(())
            }),
            Route::IdMap { base } => {
                let pos = self.with_index(key, |ix| match &ix.body {
                    IndexBody::IdMap(b) => b.ids.iter().position(|&x| x == id).ok_or(STATUS_INVALID_ARGUMENT),
                    _ => Err(STATUS_WRONG_INTERFACE),
                })?;
                self.reconstruct_key(base, pos as i64, out)
            }
            Route::Refine { refine, .. } => self.reconstruct_key(refine, id, out),
            Route::PreTransform { transform, base } => {
                let d_out = self.with_transform(transform, |t| Ok(t.d_out))?;
                let mut xt = vec![0.0f32; d_out];
                self.reconstruct_key(base, id, &mut xt)?;
                self.with_transform(transform, |t| {
                    t.reverse(&xt, out);
                    Ok(())
                })
            }
            Route::Shards { shards } => {
                let mut local = id;
                for s in shards {
                    let nt = self.ntotal_key(s)? as i64;
                    if (0..nt).contains(&local) {
                        return self.reconstruct_key(s, local, out);
                    }
                    local -= nt;
                }
                Err(STATUS_INVALID_ARGUMENT)
            }
        }
    }

    fn remove_ids_key(&self, key: usize, ids: &[i64]) -> NativeResult<usize> {
        match self.route(key)?.0 {
            Route::Leaf => self.with_index(key, |ix| {
                let n = ix.leaf_ntotal().ok_or(STATUS_UNSUPPORTED)?;
                let mut remove = vec![false; n];
                for &id in ids {
                    if let Some(slot) = usize::try_from(id).ok().and_then(|i| remove.get_mut(i)) {
                        *slot = true;
                    }
                }
                Ok(ix.leaf_remove_positions(&remove))
            }),
            Route::IdMap { base } => {
                let remove = self.with_index(key, |ix| match &ix.body {
                    IndexBody::IdMap(b) => Ok(b.ids.iter().map(|id| ids.contains(id)).collect::<Vec<_>>()),
                    _ => Err(STATUS_WRONG_INTERFACE),
                })?;
                let removed = self.with_index(base, |bx| {
                    if bx.is_composite() {
                        return Err(STATUS_UNSUPPORTED);
                    }
                    Ok(bx.leaf_remove_positions(&remove))
                })?;
                self.with_index(key, |ix| {
                    if let IndexBody::IdMap(b) = &mut ix.body {
                        let mut i = 0;
                        b.ids.retain(|_| {
                            let keep = !remove[i];
                            i += 1;
                            keep
                        });
                    }
                    Ok(removed)
                })
            }
            _ => Err(STATUS_UNSUPPORTED),
        }
    }

    fn reset_key(&self, key: usize) -> NativeResult<()> {
        match self.route(key)?.0 {
            Route::Leaf => self.with_index(key, |ix| {
                ix.leaf_reset();
                Ok(())
            }),
            Route::IdMap { base } => {
                self.reset_key(base)?;
                self.with_index(key, |ix| {
                    if let IndexBody::IdMap(b) = &mut ix.body {
                        b.ids.clear();
                    }
                    Ok(())
                })
            }
            Route::Refine { base, refine, .. } => {
                self.reset_key(base)?;
                self.reset_key(refine)
            }
            Route::PreTransform { base, .. } => self.reset_key(base),
            Route::Shards { shards } => {
                for s in shards {
                    self.reset_key(s)?;
                }
                Ok(())
            }
        }
    }

    fn apply_transform(&self, transform: usize, x: &[f32]) -> NativeResult<Vec<f32>> {
        self.with_transform(transform, |t| {
            if !t.trained {
                return Err(STATUS_NOT_TRAINED);
            }
            let n = x.len() / t.d_in;
            let mut out = vec![0.0f32; n * t.d_out];
            t.apply(x, &mut out);
            Ok(out)
        })
    }

    fn with_ivf<R>(&self, key: usize, f: impl FnOnce(&mut IvfBody) -> NativeResult<R>) -> NativeResult<R> {
        self.with_index(key, |ix| match &mut ix.body {
            IndexBody::Ivf(b) => f(b),
            _ => Err(STATUS_WRONG_INTERFACE),
        })
    }

    fn with_hnsw<R>(&self, key: usize, f: impl FnOnce(&mut HnswBody) -> NativeResult<R>) -> NativeResult<R> {
        self.with_index(key, |ix| match &mut ix.body {
            IndexBody::Hnsw(b) => f(b),
            _ => Err(STATUS_WRONG_INTERFACE),
        })
    }
}

fn check_float(d: usize, metric: MetricType) -> NativeResult<()> {
    if d == 0 || !metric.is_float_metric() {
        Err(STATUS_INVALID_ARGUMENT)
    } else {
        Ok(())
    }
}

/// Fast-scan codes are 4 to 6 bits per sub-quantizer.
fn check_fastscan(d: usize, m: usize, nbits: usize) -> NativeResult<()> {
    if m == 0 || d % m != 0 || !(4..=6).contains(&nbits) {
        Err(STATUS_INVALID_ARGUMENT)
    } else {
        Ok(())
    }
}

#[inline]
fn key(ptr: RawPtr) -> usize {
    ptr as usize
}

#[inline]
fn ptr(key: usize) -> RawPtr {
    key as RawPtr
}

impl NativeBackend for SimBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn create(&self, ctor: &Constructor<'_>) -> NativeResult<RawPtr> {
        self.create_key(ctor).map(ptr)
    }

    unsafe fn free(&self, kind: ObjectKind, p: RawPtr) -> NativeResult<()> {
        self.release(key(p), kind)
    }

    unsafe fn index_d(&self, p: RawPtr) -> NativeResult<usize> {
        self.route(key(p)).map(|(_, d, _)| d)
    }

    unsafe fn index_ntotal(&self, p: RawPtr) -> NativeResult<u64> {
        self.ntotal_key(key(p)).map(|n| n as u64)
    }

    unsafe fn index_is_trained(&self, p: RawPtr) -> NativeResult<bool> {
        self.is_trained_key(key(p))
    }

    unsafe fn index_metric(&self, p: RawPtr) -> NativeResult<i32> {
        self.route(key(p)).map(|(_, _, m)| m.code())
    }

    unsafe fn index_train(&self, p: RawPtr, n: usize, x: &[f32]) -> NativeResult<()> {
        let (_, d, _) = self.route(key(p))?;
        if x.len() != n * d {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        self.train_key(key(p), x)
    }

    unsafe fn index_add(&self, p: RawPtr, n: usize, x: &[f32]) -> NativeResult<()> {
        let (_, d, _) = self.route(key(p))?;
        if x.len() != n * d {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        self.add_key(key(p), x, None)
    }

    unsafe fn index_add_with_ids(&self, p: RawPtr, n: usize, x: &[f32], ids: &[i64]) -> NativeResult<()> {
        let (_, d, _) = self.route(key(p))?;
        if x.len() != n * d || ids.len() != n {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        self.add_key(key(p), x, Some(ids))
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
        let (_, d, _) = self.route(key(p))?;
        if k == 0 || x.len() != n * d || distances.len() != n * k || labels.len() != n * k {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        self.search_key(key(p), x, k, distances, labels)
    }

    unsafe fn index_range_search(&self, p: RawPtr, n: usize, x: &[f32], radius: f32) -> NativeResult<RangeSearchOutput> {
        let (_, d, _) = self.route(key(p))?;
        if x.len() != n * d {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        self.range_search_key(key(p), x, radius)
    }

    unsafe fn index_reconstruct(&self, p: RawPtr, id: i64, out: &mut [f32]) -> NativeResult<()> {
        let (_, d, _) = self.route(key(p))?;
        if out.len() != d {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        self.reconstruct_key(key(p), id, out)
    }

    unsafe fn index_reconstruct_n(&self, p: RawPtr, i0: i64, ni: usize, out: &mut [f32]) -> NativeResult<()> {
        let (_, d, _) = self.route(key(p))?;
        if out.len() != ni * d {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        for (j, row) in out.chunks_exact_mut(d).enumerate() {
            self.reconstruct_key(key(p), i0 + j as i64, row)?;
        }
        Ok(())
    }

    unsafe fn index_remove_ids(&self, p: RawPtr, ids: &[i64]) -> NativeResult<usize> {
        self.remove_ids_key(key(p), ids)
    }

    unsafe fn index_reset(&self, p: RawPtr) -> NativeResult<()> {
        self.reset_key(key(p))
    }

    unsafe fn ivf_nlist(&self, p: RawPtr) -> NativeResult<usize> {
        self.with_ivf(key(p), |b| Ok(b.nlist))
    }

    unsafe fn ivf_nprobe(&self, p: RawPtr) -> NativeResult<usize> {
        self.with_ivf(key(p), |b| Ok(b.nprobe))
    }

    unsafe fn ivf_set_nprobe(&self, p: RawPtr, nprobe: usize) -> NativeResult<()> {
        self.with_ivf(key(p), |b| {
            b.nprobe = nprobe;
            Ok(())
        })
    }

    unsafe fn hnsw_ef_search(&self, p: RawPtr) -> NativeResult<usize> {
        self.with_hnsw(key(p), |b| Ok(b.ef_search))
    }

    unsafe fn hnsw_set_ef_search(&self, p: RawPtr, ef: usize) -> NativeResult<()> {
        self.with_hnsw(key(p), |b| {
            b.ef_search = ef;
            Ok(())
        })
    }

    unsafe fn hnsw_ef_construction(&self, p: RawPtr) -> NativeResult<usize> {
        self.with_hnsw(key(p), |b| Ok(b.ef_construction))
    }

    unsafe fn hnsw_set_ef_construction(&self, p: RawPtr, ef: usize) -> NativeResult<()> {
        self.with_hnsw(key(p), |b| {
            b.ef_construction = ef;
            Ok(())
        })
    }

    unsafe fn refine_set_k_factor(&self, p: RawPtr, k_factor: f32) -> NativeResult<()> {
        self.with_index(key(p), |ix| match &mut ix.body {
            IndexBody::Refine(b) => {
                b.k_factor = k_factor;
                Ok(())
            }
            _ => Err(STATUS_WRONG_INTERFACE),
        })
    }

    unsafe fn pq_fastscan_set_bbs(&self, p: RawPtr, bbs: usize) -> NativeResult<()> {
        if bbs == 0 || bbs % 32 != 0 {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        self.with_index(key(p), |ix| {
            let slot = match &mut ix.body {
                IndexBody::Codec(b) => match &mut b.codec {
                    Codec::PqFastScan { bbs: slot, .. } => slot,
                    _ => return Err(STATUS_WRONG_INTERFACE),
                },
                IndexBody::Ivf(b) => match &mut b.codec {
                    IvfCodec::PqFastScan { bbs: slot, .. } => slot,
                    _ => return Err(STATUS_WRONG_INTERFACE),
                },
                _ => return Err(STATUS_WRONG_INTERFACE),
            };
            *slot = bbs;
            Ok(())
        })
    }

    unsafe fn shards_add_shard(&self, p: RawPtr, shard: RawPtr) -> NativeResult<()> {
        let (_, sd, sm) = self.route(key(shard))?;
        self.with_index(key(p), |ix| {
            if sd != ix.d || sm != ix.metric {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            match &mut ix.body {
                IndexBody::Shards(b) => {
                    b.shards.push(key(shard));
                    Ok(())
                }
                _ => Err(STATUS_WRONG_INTERFACE),
            }
        })
    }

    unsafe fn write_index(&self, p: RawPtr, path: &CStr) -> NativeResult<()> {
        let bytes = snapshot::encode(self, key(p))?;
        let path = path.to_str().map_err(|_| STATUS_INVALID_ARGUMENT)?;
        std::fs::write(path, bytes).map_err(|_| STATUS_IO)
    }

    fn read_index(&self, path: &CStr) -> NativeResult<RawPtr> {
        let path = path.to_str().map_err(|_| STATUS_INVALID_ARGUMENT)?;
        let bytes = std::fs::read(path).map_err(|_| STATUS_IO)?;
        snapshot::decode(self, &bytes).map(ptr)
    }

    unsafe fn serialize_index(&self, p: RawPtr) -> NativeResult<Vec<u8>> {
        snapshot::encode(self, key(p))
    }

    fn deserialize_index(&self, data: &[u8]) -> NativeResult<RawPtr> {
        snapshot::decode(self, data).map(ptr)
    }

    unsafe fn binary_d(&self, p: RawPtr) -> NativeResult<usize> {
        self.with_binary(key(p), |b| Ok(b.d))
    }

    unsafe fn binary_ntotal(&self, p: RawPtr) -> NativeResult<u64> {
        self.with_binary(key(p), |b| Ok(b.ntotal() as u64))
    }

    unsafe fn binary_is_trained(&self, p: RawPtr) -> NativeResult<bool> {
        self.with_binary(key(p), |b| Ok(b.is_trained()))
    }

    unsafe fn binary_train(&self, p: RawPtr, n: usize, x: &[u8]) -> NativeResult<()> {
        let pushed = self.with_binary(key(p), |b| {
            if x.len() != n * b.code_size() {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            if b.ivf.is_none() {
                return Ok(None);
            }
            let centroids = b.train(x).ok_or(STATUS_INVALID_ARGUMENT)?;
            Ok(b.ivf.as_ref().map(|ivf| (ivf.quantizer, centroids)))
        })?;
        if let Some((q, centroids)) = pushed {
            self.with_binary(q, |qb| {
                qb.reset();
                qb.add(&centroids);
                Ok(())
            })?;
        }
        Ok(())
    }

    unsafe fn binary_add(&self, p: RawPtr, n: usize, x: &[u8]) -> NativeResult<()> {
        self.with_binary(key(p), |b| {
            if x.len() != n * b.code_size() {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            if let Some(ivf) = &b.ivf {
                self.lookup(ivf.quantizer, ObjectKind::BinaryIndex)?;
            }
            if b.add(x) {
                Ok(())
            } else {
                Err(STATUS_NOT_TRAINED)
            }
        })
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
        self.with_binary(key(p), |b| {
            if k == 0 || x.len() != n * b.code_size() || distances.len() != n * k || labels.len() != n * k {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            if let Some(ivf) = &b.ivf {
                self.lookup(ivf.quantizer, ObjectKind::BinaryIndex)?;
            }
            b.search(x, k, distances, labels);
            Ok(())
        })
    }

    unsafe fn binary_reset(&self, p: RawPtr) -> NativeResult<()> {
        self.with_binary(key(p), |b| {
            b.reset();
            Ok(())
        })
    }

    unsafe fn binary_ivf_set_nprobe(&self, p: RawPtr, nprobe: usize) -> NativeResult<()> {
        self.with_binary(key(p), |b| match b.ivf.as_mut() {
            Some(ivf) => {
                ivf.nprobe = nprobe;
                Ok(())
            }
            None => Err(STATUS_WRONG_INTERFACE),
        })
    }

    unsafe fn transform_d_in(&self, p: RawPtr) -> NativeResult<usize> {
        self.with_transform(key(p), |t| Ok(t.d_in))
    }

    unsafe fn transform_d_out(&self, p: RawPtr) -> NativeResult<usize> {
        self.with_transform(key(p), |t| Ok(t.d_out))
    }

    unsafe fn transform_is_trained(&self, p: RawPtr) -> NativeResult<bool> {
        self.with_transform(key(p), |t| Ok(t.trained))
    }

    unsafe fn transform_train(&self, p: RawPtr, n: usize, x: &[f32]) -> NativeResult<()> {
        self.with_transform(key(p), |t| {
            if x.len() != n * t.d_in || !t.train(x) {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            Ok(())
        })
    }

    unsafe fn transform_apply(&self, p: RawPtr, n: usize, x: &[f32], out: &mut [f32]) -> NativeResult<()> {
        self.with_transform(key(p), |t| {
            if !t.trained {
                return Err(STATUS_NOT_TRAINED);
            }
            if x.len() != n * t.d_in || out.len() != n * t.d_out {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            t.apply(x, out);
            Ok(())
        })
    }

    unsafe fn transform_reverse(&self, p: RawPtr, n: usize, xt: &[f32], out: &mut [f32]) -> NativeResult<()> {
        self.with_transform(key(p), |t| {
            if !t.trained {
                return Err(STATUS_NOT_TRAINED);
            }
            if xt.len() != n * t.d_out || out.len() != n * t.d_in {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            t.reverse(xt, out);
            Ok(())
        })
    }

    unsafe fn kmeans_train(&self, p: RawPtr, n: usize, x: &[f32]) -> NativeResult<()> {
        self.with_kmeans(key(p), |km| {
            if x.len() != n * km.d || n < km.k || !km.train(x) {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            Ok(())
        })
    }

    unsafe fn kmeans_assign(&self, p: RawPtr, n: usize, x: &[f32], labels: &mut [i64]) -> NativeResult<()> {
        self.with_kmeans(key(p), |km| {
            if x.len() != n * km.d || labels.len() != n {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            if km.assign(x, labels) {
                Ok(())
            } else {
                Err(STATUS_NOT_TRAINED)
            }
        })
    }

    unsafe fn kmeans_centroids(&self, p: RawPtr, out: &mut [f32]) -> NativeResult<()> {
        self.with_kmeans(key(p), |km| {
            if km.centroids.is_empty() {
                return Err(STATUS_NOT_TRAINED);
            }
            if out.len() != km.centroids.len() {
                return Err(STATUS_INVALID_ARGUMENT);
            }
            out.copy_from_slice(&km.centroids);
            Ok(())
        })
    }

    unsafe fn kmeans_set_niter(&self, p: RawPtr, niter: usize) -> NativeResult<()> {
        self.with_kmeans(key(p), |km| {
            km.niter = niter;
            Ok(())
        })
    }

    unsafe fn kmeans_set_seed(&self, p: RawPtr, seed: u64) -> NativeResult<()> {
        self.with_kmeans(key(p), |km| {
            km.seed = seed;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: usize, d: usize) -> Vec<f32> {
        (0..n * d).map(|i| ((i * 7919) % 1000) as f32 / 100.0).collect()
    }

    #[test]
    fn test_create_free_accounting() {
        let sim = SimBackend::new();
        let p = sim.create(&Constructor::Flat { d: 4, metric: MetricType::L2 }).unwrap();
        assert!(sim.is_live(p));
        unsafe {
            sim.free(ObjectKind::Index, p).unwrap();
            assert_eq!(sim.free(ObjectKind::Index, p), Err(STATUS_UNKNOWN_OBJECT));
            assert_eq!(sim.index_ntotal(p), Err(STATUS_UNKNOWN_OBJECT));
        }
        let s = sim.stats();
        assert_eq!((s.creates, s.frees, s.double_frees, s.live), (1, 1, 1, 0));
        assert_eq!(s.dangling_calls, 1);
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let sim = SimBackend::new();
        let p = sim.create(&Constructor::Flat { d: 4, metric: MetricType::L2 }).unwrap();
        unsafe {
            assert_eq!(sim.transform_d_in(p), Err(STATUS_WRONG_INTERFACE));
            assert_eq!(sim.ivf_nlist(p), Err(STATUS_WRONG_INTERFACE));
            assert_eq!(sim.free(ObjectKind::Transform, p), Err(STATUS_WRONG_INTERFACE));
            sim.free(ObjectKind::Index, p).unwrap();
        }
    }

    #[test]
    fn test_fastscan_block_size() {
        let sim = SimBackend::new();
        let bad = Constructor::PqFastScan { d: 8, m: 2, nbits: 8, metric: MetricType::L2 };
        assert_eq!(sim.create(&bad).err(), Some(STATUS_INVALID_ARGUMENT));

        let p = sim.create(&Constructor::PqFastScan { d: 8, m: 2, nbits: 4, metric: MetricType::L2 }).unwrap();
        let flat = sim.create(&Constructor::Flat { d: 8, metric: MetricType::L2 }).unwrap();
        unsafe {
            assert!(!sim.index_is_trained(p).unwrap());
            sim.pq_fastscan_set_bbs(p, 64).unwrap();
            assert_eq!(sim.pq_fastscan_set_bbs(p, 48), Err(STATUS_INVALID_ARGUMENT));
            assert_eq!(sim.pq_fastscan_set_bbs(flat, 32), Err(STATUS_WRONG_INTERFACE));
        }
        let bbs = sim.with_index(key(p), |ix| match &ix.body {
            IndexBody::Codec(CodecBody { codec: Codec::PqFastScan { bbs, .. }, .. }) => Ok(*bbs),
            _ => Err(STATUS_WRONG_INTERFACE),
        });
        assert_eq!(bbs, Ok(64));
    }

    #[test]
    fn test_binary_hash_bits() {
        let sim = SimBackend::new();
        assert!(sim.create(&Constructor::BinaryHash { d: 16, nbits: 17 }).is_err());
        assert!(sim.create(&Constructor::BinaryHash { d: 16, nbits: 0 }).is_err());
        let p = sim.create(&Constructor::BinaryHash { d: 16, nbits: 8 }).unwrap();
        unsafe {
            assert!(sim.binary_is_trained(p).unwrap());
            assert_eq!(sim.binary_ivf_set_nprobe(p, 2), Err(STATUS_WRONG_INTERFACE));
        }
    }

    #[test]
    fn test_ivf_with_external_quantizer() {
        let sim = SimBackend::new();
        let q = sim.create(&Constructor::Flat { d: 4, metric: MetricType::L2 }).unwrap();
        let ivf = sim
            .create(&Constructor::IvfFlat { quantizer: Some(q), d: 4, nlist: 8, metric: MetricType::L2 })
            .unwrap();
        let x = data(100, 4);
        unsafe {
            assert!(!sim.index_is_trained(ivf).unwrap());
            assert_eq!(sim.index_add(ivf, 100, &x), Err(STATUS_NOT_TRAINED));
            sim.index_train(ivf, 100, &x).unwrap();
            // centroids were pushed into the quantizer
            assert_eq!(sim.index_ntotal(q).unwrap(), 8);
            sim.index_add(ivf, 100, &x).unwrap();
            assert_eq!(sim.index_ntotal(ivf).unwrap(), 100);

            // freeing the quantizer under the IVF index is reported, not UB
            sim.free(ObjectKind::Index, q).unwrap();
            let mut dist = vec![0.0; 1];
            let mut lab = vec![0; 1];
            assert_eq!(
                sim.index_search(ivf, 1, &x[..4], 1, &mut dist, &mut lab),
                Err(STATUS_UNKNOWN_OBJECT)
            );
            sim.free(ObjectKind::Index, ivf).unwrap();
        }
    }

    #[test]
    fn test_idmap_requires_ids() {
        let sim = SimBackend::new();
        let base = sim.create(&Constructor::Flat { d: 2, metric: MetricType::L2 }).unwrap();
        let idmap = sim.create(&Constructor::IdMap { base }).unwrap();
        unsafe {
            assert_eq!(sim.index_add(idmap, 1, &[0.0, 0.0]), Err(STATUS_UNSUPPORTED));
            sim.index_add_with_ids(idmap, 2, &[0.0, 0.0, 5.0, 5.0], &[100, 200]).unwrap();
            let mut dist = vec![0.0; 2];
            let mut lab = vec![0; 2];
            sim.index_search(idmap, 1, &[4.0, 4.0], 2, &mut dist, &mut lab).unwrap();
            assert_eq!(lab, vec![200, 100]);
            assert_eq!(sim.index_remove_ids(idmap, &[100]).unwrap(), 1);
            assert_eq!(sim.index_ntotal(idmap).unwrap(), 1);
            sim.free(ObjectKind::Index, idmap).unwrap();
            // not owned: base survives
            assert!(sim.is_live(base));
            sim.free(ObjectKind::Index, base).unwrap();
        }
    }

    #[test]
    fn test_shards_offset_labels() {
        let sim = SimBackend::new();
        let shards = sim.create(&Constructor::Shards { d: 1, metric: MetricType::L2 }).unwrap();
        let a = sim.create(&Constructor::Flat { d: 1, metric: MetricType::L2 }).unwrap();
        let b = sim.create(&Constructor::Flat { d: 1, metric: MetricType::L2 }).unwrap();
        unsafe {
            sim.shards_add_shard(shards, a).unwrap();
            sim.shards_add_shard(shards, b).unwrap();
            sim.index_add(shards, 4, &[0.0, 1.0, 2.0, 3.0]).unwrap();
            assert_eq!(sim.index_ntotal(a).unwrap(), 2);
            let mut dist = vec![0.0; 2];
            let mut lab = vec![0; 2];
            sim.index_search(shards, 1, &[2.9], 2, &mut dist, &mut lab).unwrap();
            assert_eq!(lab, vec![3, 2]);
            for p in [shards, a, b] {
                sim.free(ObjectKind::Index, p).unwrap();
            }
        }
        assert_eq!(sim.stats().live, 0);
    }
}
