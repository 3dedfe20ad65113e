//! 模拟后端的序列化格式
//!
//! bincode 编码的对象树。加载出的复合索引拥有其子对象，释放父对象时一并释放。

use serde::{Deserialize, Serialize};

use crate::ffi::{NativeResult, ObjectKind};
use crate::metrics::MetricType;

use super::store::{
    Codec, CodecBody, FlatStore, HnswBody, IdMapBody, IndexBody, IvfBody, IvfCodec, PreTransformBody,
    RefineBody, ShardsBody, SimIndex, SimObject,
};
use super::transform::SimTransform;
use super::{SimBackend, STATUS_CORRUPT, STATUS_UNSUPPORTED};

const MAGIC: [u8; 4] = *b"SIMF";
const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    magic: [u8; 4],
    version: u32,
    root: Node,
}

#[derive(Serialize, Deserialize)]
enum Node {
    Flat {
        d: usize,
        metric: MetricType,
        data: Vec<f32>,
    },
    Ivf {
        d: usize,
        metric: MetricType,
        nlist: usize,
        nprobe: usize,
        trained: bool,
        codec: IvfCodec,
        centroids: Vec<f32>,
        data: Vec<f32>,
        assign: Vec<u32>,
    },
    Hnsw {
        d: usize,
        metric: MetricType,
        m: usize,
        ef_search: usize,
        ef_construction: usize,
        data: Vec<f32>,
    },
    Codec {
        d: usize,
        metric: MetricType,
        codec: Codec,
        trained: bool,
        data: Vec<f32>,
    },
    IdMap {
        d: usize,
        metric: MetricType,
        base: Box<Node>,
        ids: Vec<i64>,
    },
    Refine {
        d: usize,
        metric: MetricType,
        base: Box<Node>,
        refine: Box<Node>,
        k_factor: f32,
    },
    PreTransform {
        d: usize,
        metric: MetricType,
        transform: SimTransform,
        base: Box<Node>,
    },
    Shards {
        d: usize,
        metric: MetricType,
        shards: Vec<Node>,
    },
}

/// Captured state of one object: leaves are complete, composites still
/// point at their children.
enum Captured {
    Done(Node),
    IdMap { d: usize, metric: MetricType, base: usize, ids: Vec<i64> },
    Refine { d: usize, metric: MetricType, base: usize, refine: usize, k_factor: f32 },
    PreTransform { d: usize, metric: MetricType, transform: usize, base: usize },
    Shards { d: usize, metric: MetricType, shards: Vec<usize> },
}

pub(super) fn encode(backend: &SimBackend, key: usize) -> NativeResult<Vec<u8>> {
    let root = capture(backend, key)?;
    let envelope = Envelope { magic: MAGIC, version: VERSION, root };
    bincode::serialize(&envelope).map_err(|_| STATUS_CORRUPT)
}

pub(super) fn decode(backend: &SimBackend, bytes: &[u8]) -> NativeResult<usize> {
    let envelope: Envelope = bincode::deserialize(bytes).map_err(|_| STATUS_CORRUPT)?;
    if envelope.magic != MAGIC || envelope.version != VERSION {
        return Err(STATUS_CORRUPT);
    }
    Ok(restore(backend, envelope.root))
}

fn capture(backend: &SimBackend, key: usize) -> NativeResult<Node> {
    let captured = backend.with_index(key, |ix| {
        let (d, metric) = (ix.d, ix.metric);
        Ok(match &ix.body {
            IndexBody::Flat(s) => Captured::Done(Node::Flat { d, metric, data: s.data.clone() }),
            IndexBody::Ivf(b) => Captured::Done(Node::Ivf {
                d,
                metric,
                nlist: b.nlist,
                nprobe: b.nprobe,
                trained: b.trained,
                codec: b.codec,
                centroids: b.centroids.clone(),
                data: b.store.data.clone(),
                assign: b.assign.clone(),
            }),
            IndexBody::Hnsw(b) => Captured::Done(Node::Hnsw {
                d,
                metric,
                m: b.m,
                ef_search: b.ef_search,
                ef_construction: b.ef_construction,
                data: b.store.data.clone(),
            }),
            IndexBody::Codec(b) => Captured::Done(Node::Codec {
                d,
                metric,
                codec: b.codec,
                trained: b.trained,
                data: b.store.data.clone(),
            }),
            IndexBody::IdMap(b) => Captured::IdMap { d, metric, base: b.base, ids: b.ids.clone() },
            IndexBody::Refine(b) => Captured::Refine {
                d,
                metric,
                base: b.base,
                refine: b.refine,
                k_factor: b.k_factor,
            },
            IndexBody::PreTransform(b) => Captured::PreTransform {
                d,
                metric,
                transform: b.transform,
                base: b.base,
            },
            IndexBody::Shards(b) => Captured::Shards { d, metric, shards: b.shards.clone() },
        })
    })?;

    Ok(match captured {
        Captured::Done(node) => node,
        Captured::IdMap { d, metric, base, ids } => Node::IdMap {
            d,
            metric,
            base: Box::new(capture(backend, base)?),
            ids,
        },
        Captured::Refine { d, metric, base, refine, k_factor } => Node::Refine {
            d,
            metric,
            base: Box::new(capture(backend, base)?),
            refine: Box::new(capture(backend, refine)?),
            k_factor,
        },
        Captured::PreTransform { d, metric, transform, base } => Node::PreTransform {
            d,
            metric,
            transform: backend.with_transform(transform, |t| Ok(t.clone()))?,
            base: Box::new(capture(backend, base)?),
        },
        Captured::Shards { d, metric, shards } => {
            if shards.is_empty() {
                return Err(STATUS_UNSUPPORTED);
            }
            let shards = shards
                .into_iter()
                .map(|s| capture(backend, s))
                .collect::<NativeResult<Vec<_>>>()?;
            Node::Shards { d, metric, shards }
        }
    })
}

fn restore(backend: &SimBackend, node: Node) -> usize {
    let index = match node {
        Node::Flat { d, metric, data } => SimIndex { d, metric, body: IndexBody::Flat(FlatStore { d, data }) },
        Node::Ivf { d, metric, nlist, nprobe, trained, codec, centroids, data, assign } => {
            let mut body = IvfBody::new(d, nlist, codec, None);
            body.nprobe = nprobe;
            body.trained = trained;
            body.centroids = centroids;
            body.store = FlatStore { d, data };
            body.assign = assign;
            SimIndex { d, metric, body: IndexBody::Ivf(body) }
        }
        Node::Hnsw { d, metric, m, ef_search, ef_construction, data } => SimIndex {
            d,
            metric,
            body: IndexBody::Hnsw(HnswBody { m, ef_search, ef_construction, store: FlatStore { d, data } }),
        },
        Node::Codec { d, metric, codec, trained, data } => SimIndex {
            d,
            metric,
            body: IndexBody::Codec(CodecBody { codec, trained, store: FlatStore { d, data } }),
        },
        Node::IdMap { d, metric, base, ids } => {
            let base = restore(backend, *base);
            SimIndex { d, metric, body: IndexBody::IdMap(IdMapBody { base, ids, owns: true }) }
        }
        Node::Refine { d, metric, base, refine, k_factor } => {
            let base = restore(backend, *base);
            let refine = restore(backend, *refine);
            SimIndex {
                d,
                metric,
                body: IndexBody::Refine(RefineBody { base, refine, k_factor, owns: true }),
            }
        }
        Node::PreTransform { d, metric, transform, base } => {
            let transform = backend.insert(ObjectKind::Transform, SimObject::Transform(transform));
            let base = restore(backend, *base);
            SimIndex {
                d,
                metric,
                body: IndexBody::PreTransform(PreTransformBody { transform, base, owns: true }),
            }
        }
        Node::Shards { d, metric, shards } => {
            let shards = shards.into_iter().map(|s| restore(backend, s)).collect();
            SimIndex { d, metric, body: IndexBody::Shards(ShardsBody { shards, owns: true }) }
        }
    };
    backend.insert(ObjectKind::Index, SimObject::Index(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::{Constructor, NativeBackend};

    #[test]
    fn test_snapshot_restores_owned_children() {
        let sim = SimBackend::new();
        let base = sim.create(&Constructor::Flat { d: 2, metric: MetricType::L2 }).unwrap();
        let idmap = sim.create(&Constructor::IdMap { base }).unwrap();
        unsafe {
            sim.index_add_with_ids(idmap, 2, &[1.0, 1.0, 2.0, 2.0], &[7, 9]).unwrap();
            let bytes = sim.serialize_index(idmap).unwrap();
            let loaded = sim.deserialize_index(&bytes).unwrap();
            assert_eq!(sim.index_ntotal(loaded).unwrap(), 2);
            assert_eq!(sim.stats().live, 4);

            // the loaded IDMap owns its base
            sim.free(ObjectKind::Index, loaded).unwrap();
            assert_eq!(sim.stats().live, 2);
            sim.free(ObjectKind::Index, idmap).unwrap();
            sim.free(ObjectKind::Index, base).unwrap();
        }
        let s = sim.stats();
        assert_eq!(s.creates, s.frees);
    }

    #[test]
    fn test_corrupt_bytes() {
        let sim = SimBackend::new();
        assert_eq!(sim.deserialize_index(b"not an index"), Err(STATUS_CORRUPT));
        assert_eq!(sim.stats().creates, 0);
    }
}
