//! 模拟后端的对象存储
//!
//! 叶子索引保存原始向量（无损），搜索为精确暴力搜索；
//! 复合索引只保存子对象的 key，由 `SimBackend` 负责转发。

use serde::{Deserialize, Serialize};

use crate::ffi::{QuantizerType, RangeSearchOutput};
use crate::metrics::{hamming, MetricType};

use super::kmeans::{nearest_centroid, KMeans};
use super::transform::SimTransform;

pub(crate) const DEFAULT_NPROBE: usize = 1;
pub(crate) const DEFAULT_EF_SEARCH: usize = 16;
pub(crate) const DEFAULT_EF_CONSTRUCTION: usize = 40;

/// 表中的一个原生对象
pub(crate) enum SimObject {
    Index(SimIndex),
    Binary(SimBinary),
    Transform(SimTransform),
    Kmeans(SimKmeans),
}

impl SimObject {
    /// Children freed together with this object.
    pub fn owned_children(&self) -> Vec<(usize, crate::ffi::ObjectKind)> {
        use crate::ffi::ObjectKind;
        let SimObject::Index(index) = self else {
            return Vec::new();
        };
        match &index.body {
            IndexBody::IdMap(b) if b.owns => vec![(b.base, ObjectKind::Index)],
            IndexBody::Refine(b) if b.owns => {
                vec![(b.base, ObjectKind::Index), (b.refine, ObjectKind::Index)]
            }
            IndexBody::PreTransform(b) if b.owns => {
                vec![(b.transform, ObjectKind::Transform), (b.base, ObjectKind::Index)]
            }
            IndexBody::Shards(b) if b.owns => {
                b.shards.iter().map(|&s| (s, ObjectKind::Index)).collect()
            }
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// float indexes
// ---------------------------------------------------------------------------

pub(crate) struct SimIndex {
    pub d: usize,
    pub metric: MetricType,
    pub body: IndexBody,
}

pub(crate) enum IndexBody {
    Flat(FlatStore),
    Ivf(IvfBody),
    Hnsw(HnswBody),
    Codec(CodecBody),
    IdMap(IdMapBody),
    Refine(RefineBody),
    PreTransform(PreTransformBody),
    Shards(ShardsBody),
}

impl SimIndex {
    pub fn flat(d: usize, metric: MetricType) -> Self {
        Self { d, metric, body: IndexBody::Flat(FlatStore::new(d)) }
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self.body,
            IndexBody::IdMap(_) | IndexBody::Refine(_) | IndexBody::PreTransform(_) | IndexBody::Shards(_)
        )
    }

    /// Element count of a leaf index.
    pub fn leaf_ntotal(&self) -> Option<usize> {
        match &self.body {
            IndexBody::Flat(s) => Some(s.len()),
            IndexBody::Ivf(b) => Some(b.store.len()),
            IndexBody::Hnsw(b) => Some(b.store.len()),
            IndexBody::Codec(b) => Some(b.store.len()),
            _ => None,
        }
    }

    pub fn leaf_is_trained(&self) -> Option<bool> {
        match &self.body {
            IndexBody::Flat(_) | IndexBody::Hnsw(_) => Some(true),
            IndexBody::Ivf(b) => Some(b.trained),
            IndexBody::Codec(b) => Some(b.trained),
            _ => None,
        }
    }

    pub fn leaf_store(&self) -> Option<&FlatStore> {
        match &self.body {
            IndexBody::Flat(s) => Some(s),
            IndexBody::Ivf(b) => Some(&b.store),
            IndexBody::Hnsw(b) => Some(&b.store),
            IndexBody::Codec(b) => Some(&b.store),
            _ => None,
        }
    }

    fn leaf_store_mut(&mut self) -> Option<&mut FlatStore> {
        match &mut self.body {
            IndexBody::Flat(s) => Some(s),
            IndexBody::Ivf(b) => Some(&mut b.store),
            IndexBody::Hnsw(b) => Some(&mut b.store),
            IndexBody::Codec(b) => Some(&mut b.store),
            _ => None,
        }
    }

    /// Leaf add. `false` when the index is not trained.
    pub fn leaf_add(&mut self, x: &[f32]) -> bool {
        match &mut self.body {
            IndexBody::Flat(s) => s.add(x),
            IndexBody::Hnsw(b) => b.store.add(x),
            IndexBody::Codec(b) => {
                if !b.trained {
                    return false;
                }
                b.store.add(x)
            }
            IndexBody::Ivf(b) => {
                if !b.trained {
                    return false;
                }
                b.add(x)
            }
            _ => return false,
        }
        true
    }

    pub fn leaf_reset(&mut self) {
        if let IndexBody::Ivf(b) = &mut self.body {
            b.assign.clear();
        }
        if let Some(s) = self.leaf_store_mut() {
            s.reset();
        }
    }

    pub fn leaf_search(&self, x: &[f32], k: usize, distances: &mut [f32], labels: &mut [i64]) {
        let metric = self.metric;
        match &self.body {
            IndexBody::Ivf(b) => b.search(metric, x, k, distances, labels),
            _ => {
                if let Some(s) = self.leaf_store() {
                    s.search(metric, x, k, distances, labels)
                }
            }
        }
    }

    pub fn leaf_range_search(&self, x: &[f32], radius: f32) -> RangeSearchOutput {
        let metric = self.metric;
        match &self.body {
            IndexBody::Ivf(b) => b.range_search(metric, x, radius),
            _ => self
                .leaf_store()
                .map(|s| s.range_search(metric, x, radius, |_| true))
                .unwrap_or_default(),
        }
    }

    /// Removes the given internal positions, compacting the rest.
    pub fn leaf_remove_positions(&mut self, remove: &[bool]) -> usize {
        if let IndexBody::Ivf(b) = &mut self.body {
            let mut i = 0;
            b.assign.retain(|_| {
                let keep = !remove[i];
                i += 1;
                keep
            });
        }
        match self.leaf_store_mut() {
            Some(s) => s.remove_positions(remove),
            None => 0,
        }
    }
}

/// 原始向量存储，标签即插入顺序
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct FlatStore {
    pub d: usize,
    pub data: Vec<f32>,
}

impl FlatStore {
    pub fn new(d: usize) -> Self {
        Self { d, data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.d
    }

    pub fn add(&mut self, x: &[f32]) {
        self.data.extend_from_slice(x);
    }

    pub fn get(&self, i: usize) -> Option<&[f32]> {
        self.data.get(i * self.d..(i + 1) * self.d)
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn remove_positions(&mut self, remove: &[bool]) -> usize {
        let d = self.d;
        let mut kept = Vec::with_capacity(self.data.len());
        let mut removed = 0;
        for (i, row) in self.data.chunks_exact(d).enumerate() {
            if remove.get(i).copied().unwrap_or(false) {
                removed += 1;
            } else {
                kept.extend_from_slice(row);
            }
        }
        self.data = kept;
        removed
    }

    pub fn search(&self, metric: MetricType, x: &[f32], k: usize, distances: &mut [f32], labels: &mut [i64]) {
        let d = self.d;
        for_each_query(x, d, k, distances, labels, |q, dist, lab| {
            let candidates = self
                .data
                .chunks_exact(d)
                .enumerate()
                .map(|(i, v)| (metric.distance(q, v), i as i64));
            select_top_k(metric, candidates, dist, lab);
        });
    }

    pub fn range_search(
        &self,
        metric: MetricType,
        x: &[f32],
        radius: f32,
        filter: impl Fn(usize) -> bool,
    ) -> RangeSearchOutput {
        let d = self.d;
        let mut out = RangeSearchOutput { lims: vec![0], ..Default::default() };
        for q in x.chunks_exact(d) {
            let mut hits: Vec<(f32, i64)> = self
                .data
                .chunks_exact(d)
                .enumerate()
                .filter(|(i, _)| filter(*i))
                .map(|(i, v)| (metric.distance(q, v), i as i64))
                .filter(|(dist, _)| metric.within_radius(*dist, radius))
                .collect();
            sort_hits(metric, &mut hits);
            for (dist, label) in hits {
                out.distances.push(dist);
                out.labels.push(label);
            }
            out.lims.push(out.labels.len());
        }
        out
    }
}

/// Inverted file: every vector is kept in insertion order together with the
/// list it was assigned to; search scans the `nprobe` closest lists.
pub(crate) struct IvfBody {
    pub nlist: usize,
    pub nprobe: usize,
    pub centroids: Vec<f32>,
    /// External coarse quantizer, not owned.
    pub quantizer: Option<usize>,
    pub trained: bool,
    pub codec: IvfCodec,
    pub store: FlatStore,
    pub assign: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) enum IvfCodec {
    Flat,
    Pq { m: usize, nbits: usize },
    Sq { qtype: QuantizerType },
    PqFastScan { m: usize, nbits: usize, bbs: usize },
}

impl IvfCodec {
    /// Minimum training set size accepted natively.
    pub fn min_train(&self, nlist: usize) -> usize {
        match self {
            IvfCodec::Pq { nbits, .. } | IvfCodec::PqFastScan { nbits, .. } => {
                nlist.max(1usize << nbits)
            }
            _ => nlist,
        }
    }
}

impl IvfBody {
    pub fn new(d: usize, nlist: usize, codec: IvfCodec, quantizer: Option<usize>) -> Self {
        Self {
            nlist,
            nprobe: DEFAULT_NPROBE,
            centroids: Vec::new(),
            quantizer,
            trained: false,
            codec,
            store: FlatStore::new(d),
            assign: Vec::new(),
        }
    }

    pub fn train(&mut self, x: &[f32]) -> bool {
        let d = self.store.d;
        if x.len() / d < self.codec.min_train(self.nlist) {
            return false;
        }
        let mut km = KMeans::new(self.nlist, d);
        if km.train(x) == 0 {
            return false;
        }
        self.centroids = km.into_centroids();
        self.trained = true;
        true
    }

    fn add(&mut self, x: &[f32]) {
        let d = self.store.d;
        for v in x.chunks_exact(d) {
            self.assign.push(nearest_centroid(&self.centroids, d, v) as u32);
        }
        self.store.add(x);
    }

    fn probe_lists(&self, metric: MetricType, q: &[f32]) -> Vec<bool> {
        let d = self.store.d;
        let mut order: Vec<(f32, usize)> = self
            .centroids
            .chunks_exact(d)
            .enumerate()
            .map(|(c, v)| (metric.distance(q, v), c))
            .collect();
        order.sort_by(|a, b| rank(metric, a.0, b.0).then(a.1.cmp(&b.1)));
        let mut probed = vec![false; self.nlist];
        for &(_, c) in order.iter().take(self.nprobe.max(1)) {
            probed[c] = true;
        }
        probed
    }

    fn search(&self, metric: MetricType, x: &[f32], k: usize, distances: &mut [f32], labels: &mut [i64]) {
        let d = self.store.d;
        for_each_query(x, d, k, distances, labels, |q, dist, lab| {
            let probed = self.probe_lists(metric, q);
            let candidates = self
                .store
                .data
                .chunks_exact(d)
                .enumerate()
                .filter(|(i, _)| probed[self.assign[*i] as usize])
                .map(|(i, v)| (metric.distance(q, v), i as i64));
            select_top_k(metric, candidates, dist, lab);
        });
    }

    fn range_search(&self, metric: MetricType, x: &[f32], radius: f32) -> RangeSearchOutput {
        let d = self.store.d;
        let mut out = RangeSearchOutput { lims: vec![0], ..Default::default() };
        for q in x.chunks_exact(d) {
            let probed = self.probe_lists(metric, q);
            let part = self
                .store
                .range_search(metric, q, radius, |i| probed[self.assign[i] as usize]);
            out.labels.extend(part.labels);
            out.distances.extend(part.distances);
            out.lims.push(out.labels.len());
        }
        out
    }
}

pub(crate) struct HnswBody {
    pub m: usize,
    pub ef_search: usize,
    pub ef_construction: usize,
    pub store: FlatStore,
}

/// PQ / SQ / LSH. Codes are not modelled; vectors are kept verbatim.
pub(crate) struct CodecBody {
    pub codec: Codec,
    pub trained: bool,
    pub store: FlatStore,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) enum Codec {
    Pq { m: usize, nbits: usize },
    Sq { qtype: QuantizerType },
    Lsh { nbits: usize, rotate_data: bool, train_thresholds: bool },
    PqFastScan { m: usize, nbits: usize, bbs: usize },
}

impl Codec {
    pub fn needs_training(&self) -> bool {
        match self {
            Codec::Pq { .. } | Codec::PqFastScan { .. } => true,
            Codec::Sq { qtype } => qtype.needs_training(),
            Codec::Lsh { train_thresholds, .. } => *train_thresholds,
        }
    }

    pub fn min_train(&self) -> usize {
        match self {
            Codec::Pq { nbits, .. } | Codec::PqFastScan { nbits, .. } => 1usize << nbits,
            _ => 1,
        }
    }
}

pub(crate) struct IdMapBody {
    pub base: usize,
    pub ids: Vec<i64>,
    pub owns: bool,
}

pub(crate) struct RefineBody {
    pub base: usize,
    pub refine: usize,
    pub k_factor: f32,
    pub owns: bool,
}

pub(crate) struct PreTransformBody {
    pub transform: usize,
    pub base: usize,
    pub owns: bool,
}

pub(crate) struct ShardsBody {
    pub shards: Vec<usize>,
    pub owns: bool,
}

// ---------------------------------------------------------------------------
// binary indexes
// ---------------------------------------------------------------------------

pub(crate) struct SimBinary {
    /// Dimension in bits.
    pub d: usize,
    pub data: Vec<u8>,
    pub ivf: Option<BinaryIvf>,
    /// Hash-table variant: bits of the code used as bucket key. Search
    /// stays exhaustive, so results match the flat variant.
    pub hash_bits: Option<usize>,
}

pub(crate) struct BinaryIvf {
    pub quantizer: usize,
    pub nlist: usize,
    pub nprobe: usize,
    pub centroids: Vec<u8>,
    pub assign: Vec<u32>,
}

impl SimBinary {
    pub fn flat(d: usize) -> Self {
        Self { d, data: Vec::new(), ivf: None, hash_bits: None }
    }

    pub fn code_size(&self) -> usize {
        self.d / 8
    }

    pub fn ntotal(&self) -> usize {
        self.data.len() / self.code_size()
    }

    pub fn is_trained(&self) -> bool {
        self.ivf.as_ref().map_or(true, |ivf| !ivf.centroids.is_empty())
    }

    /// First `nlist` codes become the list centroids.
    pub fn train(&mut self, x: &[u8]) -> Option<Vec<u8>> {
        let cs = self.code_size();
        let ivf = self.ivf.as_mut()?;
        if x.len() / cs < ivf.nlist {
            return None;
        }
        ivf.centroids = x[..ivf.nlist * cs].to_vec();
        Some(ivf.centroids.clone())
    }

    pub fn add(&mut self, x: &[u8]) -> bool {
        let cs = self.code_size();
        if let Some(ivf) = self.ivf.as_mut() {
            if ivf.centroids.is_empty() {
                return false;
            }
            for code in x.chunks_exact(cs) {
                ivf.assign.push(nearest_code(&ivf.centroids, cs, code) as u32);
            }
        }
        self.data.extend_from_slice(x);
        true
    }

    pub fn reset(&mut self) {
        self.data.clear();
        if let Some(ivf) = self.ivf.as_mut() {
            ivf.assign.clear();
        }
    }

    pub fn search(&self, x: &[u8], k: usize, distances: &mut [i32], labels: &mut [i64]) {
        let cs = self.code_size();
        for ((q, dist), lab) in x
            .chunks_exact(cs)
            .zip(distances.chunks_exact_mut(k))
            .zip(labels.chunks_exact_mut(k))
        {
            let probed = self.ivf.as_ref().map(|ivf| {
                let mut order: Vec<(i32, usize)> = ivf
                    .centroids
                    .chunks_exact(cs)
                    .enumerate()
                    .map(|(c, v)| (hamming(q, v), c))
                    .collect();
                order.sort();
                let mut probed = vec![false; ivf.nlist];
                for &(_, c) in order.iter().take(ivf.nprobe.max(1)) {
                    probed[c] = true;
                }
                probed
            });
            let mut hits: Vec<(i32, i64)> = self
                .data
                .chunks_exact(cs)
                .enumerate()
                .filter(|(i, _)| match (&probed, &self.ivf) {
                    (Some(p), Some(ivf)) => p[ivf.assign[*i] as usize],
                    _ => true,
                })
                .map(|(i, v)| (hamming(q, v), i as i64))
                .collect();
            hits.sort();
            for j in 0..k {
                match hits.get(j) {
                    Some(&(d, l)) => {
                        dist[j] = d;
                        lab[j] = l;
                    }
                    None => {
                        dist[j] = i32::MAX;
                        lab[j] = -1;
                    }
                }
            }
        }
    }
}

fn nearest_code(centroids: &[u8], cs: usize, code: &[u8]) -> usize {
    centroids
        .chunks_exact(cs)
        .enumerate()
        .min_by_key(|(_, c)| hamming(code, c))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// clustering
// ---------------------------------------------------------------------------

pub(crate) struct SimKmeans {
    pub d: usize,
    pub k: usize,
    pub niter: usize,
    pub seed: u64,
    pub centroids: Vec<f32>,
}

impl SimKmeans {
    pub fn train(&mut self, x: &[f32]) -> bool {
        let mut km = KMeans::with_seed(self.k, self.d, self.seed).max_iter(self.niter);
        if km.train(x) == 0 {
            return false;
        }
        self.centroids = km.into_centroids();
        true
    }

    pub fn assign(&self, x: &[f32], labels: &mut [i64]) -> bool {
        if self.centroids.is_empty() {
            return false;
        }
        for (v, l) in x.chunks_exact(self.d).zip(labels.iter_mut()) {
            *l = nearest_centroid(&self.centroids, self.d, v) as i64;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// result helpers
// ---------------------------------------------------------------------------

/// Total order, best first. NaN ranks after every number under both
/// directions.
#[inline]
pub(crate) fn rank(metric: MetricType, a: f32, b: f32) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if metric.higher_is_better() => b.total_cmp(&a),
        (false, false) => a.total_cmp(&b),
    }
}

pub(crate) fn sort_hits(metric: MetricType, hits: &mut [(f32, i64)]) {
    hits.sort_by(|a, b| rank(metric, a.0, b.0).then(a.1.cmp(&b.1)));
}

/// Keeps the best `dist.len()` candidates; empty slots get label -1.
pub(crate) fn select_top_k(
    metric: MetricType,
    candidates: impl Iterator<Item = (f32, i64)>,
    dist: &mut [f32],
    lab: &mut [i64],
) {
    let mut hits: Vec<(f32, i64)> = candidates.collect();
    sort_hits(metric, &mut hits);
    for j in 0..dist.len() {
        match hits.get(j) {
            Some(&(d, l)) => {
                dist[j] = d;
                lab[j] = l;
            }
            None => {
                dist[j] = metric.worst_distance();
                lab[j] = -1;
            }
        }
    }
}

/// Runs `f` for every query row with its `k`-wide output slots.
#[cfg(not(feature = "parallel"))]
pub(crate) fn for_each_query<F>(x: &[f32], d: usize, k: usize, distances: &mut [f32], labels: &mut [i64], f: F)
where
    F: Fn(&[f32], &mut [f32], &mut [i64]) + Sync,
{
    for ((q, dist), lab) in x
        .chunks_exact(d)
        .zip(distances.chunks_exact_mut(k))
        .zip(labels.chunks_exact_mut(k))
    {
        f(q, dist, lab);
    }
}

#[cfg(feature = "parallel")]
pub(crate) fn for_each_query<F>(x: &[f32], d: usize, k: usize, distances: &mut [f32], labels: &mut [i64], f: F)
where
    F: Fn(&[f32], &mut [f32], &mut [i64]) + Sync,
{
    use rayon::prelude::*;

    x.par_chunks_exact(d)
        .zip(distances.par_chunks_exact_mut(k))
        .zip(labels.par_chunks_exact_mut(k))
        .for_each(|((q, dist), lab)| f(q, dist, lab));
}
