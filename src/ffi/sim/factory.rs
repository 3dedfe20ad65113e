//! Index factory descriptions for the simulated collaborator.
//!
//! Supported grammar (comma separated):
//! `[IDMap,] {PCA<n> | PCAR<n> | PCAW<n> | OPQ<m> | RR<n>,}* <base> [,RFlat | ,Refine(Flat)]`
//! where `<base>` is `Flat`, `IVF<n>[,Flat | ,PQ<m>[x<b>][fs] | ,SQ<t>]`,
//! `HNSW<m>[,Flat]`, `PQ<m>[x<b>][fs]`, `SQ<t>` or `LSH`. The `fs` suffix
//! selects fast-scan codes (4 to 6 bits, default 4).
//!
//! The description is parsed completely before any object is created, so a
//! rejected description creates nothing.

use crate::ffi::{NativeResult, ObjectKind, QuantizerType};
use crate::metrics::MetricType;

use super::store::{Codec, CodecBody, FlatStore, HnswBody, IdMapBody, IndexBody, IvfBody, IvfCodec};
use super::store::{PreTransformBody, RefineBody, SimIndex, SimObject};
use super::store::{DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH};
use super::transform::SimTransform;
use super::{SimBackend, FASTSCAN_BBS, STATUS_INVALID_ARGUMENT, TRANSFORM_SEED};

enum TransformPlan {
    Pca { d_in: usize, d_out: usize, eigen_power: f32, random_rotation: bool },
    Opq { d: usize, m: usize },
    Rotation { d_in: usize, d_out: usize },
}

enum BasePlan {
    Flat,
    Ivf { nlist: usize, codec: IvfCodec },
    Hnsw { m: usize },
    Codec(Codec),
}

struct Plan {
    idmap: bool,
    transforms: Vec<TransformPlan>,
    base: BasePlan,
    base_d: usize,
    refine: bool,
}

pub(super) fn build(backend: &SimBackend, d: usize, description: &str, metric: MetricType) -> NativeResult<usize> {
    let plan = parse(d, description)?;

    let base_d = plan.base_d;
    let body = match plan.base {
        BasePlan::Flat => IndexBody::Flat(FlatStore::new(base_d)),
        BasePlan::Ivf { nlist, codec } => IndexBody::Ivf(IvfBody::new(base_d, nlist, codec, None)),
        BasePlan::Hnsw { m } => IndexBody::Hnsw(HnswBody {
            m,
            ef_search: DEFAULT_EF_SEARCH,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            store: FlatStore::new(base_d),
        }),
        BasePlan::Codec(codec) => IndexBody::Codec(CodecBody {
            codec,
            trained: !codec.needs_training(),
            store: FlatStore::new(base_d),
        }),
    };
    let mut root = backend.insert(ObjectKind::Index, SimObject::Index(SimIndex { d: base_d, metric, body }));

    // innermost transform wraps first
    for t in plan.transforms.iter().rev() {
        let transform = match *t {
            TransformPlan::Pca { d_in, d_out, eigen_power, random_rotation } => {
                SimTransform::pca(d_in, d_out, eigen_power, random_rotation, TRANSFORM_SEED)
            }
            TransformPlan::Opq { d, m } => SimTransform::opq(d, m, TRANSFORM_SEED),
            TransformPlan::Rotation { d_in, d_out } => SimTransform::random_rotation(d_in, d_out, TRANSFORM_SEED),
        };
        let d_in = transform.d_in;
        let tkey = backend.insert(ObjectKind::Transform, SimObject::Transform(transform));
        let body = IndexBody::PreTransform(PreTransformBody { transform: tkey, base: root, owns: true });
        root = backend.insert(ObjectKind::Index, SimObject::Index(SimIndex { d: d_in, metric, body }));
    }

    if plan.refine {
        let refine = backend.insert(ObjectKind::Index, SimObject::Index(SimIndex::flat(d, metric)));
        let body = IndexBody::Refine(RefineBody { base: root, refine, k_factor: 1.0, owns: true });
        root = backend.insert(ObjectKind::Index, SimObject::Index(SimIndex { d, metric, body }));
    }

    if plan.idmap {
        let body = IndexBody::IdMap(IdMapBody { base: root, ids: Vec::new(), owns: true });
        root = backend.insert(ObjectKind::Index, SimObject::Index(SimIndex { d, metric, body }));
    }

    Ok(root)
}

fn parse(d: usize, description: &str) -> NativeResult<Plan> {
    let tokens: Vec<&str> = description.split(',').map(str::trim).collect();
    let mut rest = tokens.as_slice();

    let idmap = matches!(rest.first(), Some(&"IDMap") | Some(&"IDMap2"));
    if idmap {
        rest = &rest[1..];
    }

    let refine = matches!(rest.last(), Some(&"RFlat") | Some(&"Refine(Flat)"));
    if refine {
        rest = &rest[..rest.len() - 1];
    }

    let mut transforms = Vec::new();
    let mut cur_d = d;
    while let Some(&tok) = rest.first() {
        let Some(t) = parse_transform(tok, cur_d)? else {
            break;
        };
        cur_d = match t {
            TransformPlan::Pca { d_out, .. } | TransformPlan::Rotation { d_out, .. } => d_out,
            TransformPlan::Opq { d, .. } => d,
        };
        transforms.push(t);
        rest = &rest[1..];
    }

    let base = match rest {
        ["Flat"] => BasePlan::Flat,
        ["LSH"] => BasePlan::Codec(Codec::Lsh { nbits: cur_d, rotate_data: false, train_thresholds: false }),
        [ivf, codec] if ivf.starts_with("IVF") => {
            let nlist = number(&ivf[3..])?;
            let codec = match *codec {
                "Flat" => IvfCodec::Flat,
                c if c.starts_with("PQ") && c.ends_with("fs") => {
                    let (m, nbits) = fastscan_params(&c[2..c.len() - 2], cur_d)?;
                    IvfCodec::PqFastScan { m, nbits, bbs: FASTSCAN_BBS }
                }
                c if c.starts_with("PQ") => {
                    let (m, nbits) = pq_params(&c[2..], cur_d)?;
                    IvfCodec::Pq { m, nbits }
                }
                c if c.starts_with("SQ") => IvfCodec::Sq { qtype: sq_type(&c[2..])? },
                _ => return Err(STATUS_INVALID_ARGUMENT),
            };
            BasePlan::Ivf { nlist, codec }
        }
        [hnsw] | [hnsw, "Flat"] if hnsw.starts_with("HNSW") => BasePlan::Hnsw { m: number(&hnsw[4..])? },
        [pq] if pq.starts_with("PQ") && pq.ends_with("fs") => {
            let (m, nbits) = fastscan_params(&pq[2..pq.len() - 2], cur_d)?;
            BasePlan::Codec(Codec::PqFastScan { m, nbits, bbs: FASTSCAN_BBS })
        }
        [pq] if pq.starts_with("PQ") => {
            let (m, nbits) = pq_params(&pq[2..], cur_d)?;
            BasePlan::Codec(Codec::Pq { m, nbits })
        }
        [sq] if sq.starts_with("SQ") => BasePlan::Codec(Codec::Sq { qtype: sq_type(&sq[2..])? }),
        _ => return Err(STATUS_INVALID_ARGUMENT),
    };

    Ok(Plan { idmap, transforms, base, base_d: cur_d, refine })
}

fn parse_transform(tok: &str, d: usize) -> NativeResult<Option<TransformPlan>> {
    let plan = if let Some(n) = tok.strip_prefix("PCAR") {
        TransformPlan::Pca { d_in: d, d_out: number(n)?, eigen_power: 0.0, random_rotation: true }
    } else if let Some(n) = tok.strip_prefix("PCAW") {
        TransformPlan::Pca { d_in: d, d_out: number(n)?, eigen_power: -0.5, random_rotation: false }
    } else if let Some(n) = tok.strip_prefix("PCA") {
        TransformPlan::Pca { d_in: d, d_out: number(n)?, eigen_power: 0.0, random_rotation: false }
    } else if let Some(n) = tok.strip_prefix("OPQ") {
        // OPQ<m>_<d_out> is accepted only when it keeps the dimension
        let (m, d_out) = match n.split_once('_') {
            Some((m, d_out)) => (number(m)?, number(d_out)?),
            None => (number(n)?, d),
        };
        if d_out != d || d % m != 0 {
            return Err(STATUS_INVALID_ARGUMENT);
        }
        TransformPlan::Opq { d, m }
    } else if let Some(n) = tok.strip_prefix("RR") {
        TransformPlan::Rotation { d_in: d, d_out: number(n)? }
    } else {
        return Ok(None);
    };
    if let TransformPlan::Pca { d_out, .. } = plan {
        if d_out > d {
            return Err(STATUS_INVALID_ARGUMENT);
        }
    }
    Ok(Some(plan))
}

fn number(s: &str) -> NativeResult<usize> {
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(STATUS_INVALID_ARGUMENT),
    }
}

/// `<m>` or `<m>x<nbits>`, default 8 bits.
fn pq_params(s: &str, d: usize) -> NativeResult<(usize, usize)> {
    let (m, nbits) = match s.split_once('x') {
        Some((m, nbits)) => (number(m)?, number(nbits)?),
        None => (number(s)?, 8),
    };
    if d % m != 0 || nbits > 16 {
        return Err(STATUS_INVALID_ARGUMENT);
    }
    Ok((m, nbits))
}

/// `<m>` or `<m>x<nbits>` with the `fs` suffix removed, default 4 bits.
fn fastscan_params(s: &str, d: usize) -> NativeResult<(usize, usize)> {
    let (m, nbits) = match s.split_once('x') {
        Some((m, nbits)) => (number(m)?, number(nbits)?),
        None => (number(s)?, 4),
    };
    if d % m != 0 || !(4..=6).contains(&nbits) {
        return Err(STATUS_INVALID_ARGUMENT);
    }
    Ok((m, nbits))
}

fn sq_type(s: &str) -> NativeResult<QuantizerType> {
    match s {
        "8" => Ok(QuantizerType::QT8bit),
        "4" => Ok(QuantizerType::QT4bit),
        "6" => Ok(QuantizerType::QT6bit),
        "fp16" => Ok(QuantizerType::QTfp16),
        "8_direct" => Ok(QuantizerType::QT8bitDirect),
        _ => Err(STATUS_INVALID_ARGUMENT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::NativeBackend;

    #[test]
    fn test_parse_plans() {
        assert!(matches!(parse(8, "Flat").unwrap().base, BasePlan::Flat));
        let plan = parse(16, "IDMap,PCA8,IVF4,PQ4x4,RFlat").unwrap();
        assert!(plan.idmap && plan.refine);
        assert_eq!(plan.base_d, 8);
        assert!(matches!(plan.base, BasePlan::Ivf { nlist: 4, codec: IvfCodec::Pq { m: 4, nbits: 4 } }));
        assert!(matches!(parse(8, "HNSW32").unwrap().base, BasePlan::Hnsw { m: 32 }));
    }

    #[test]
    fn test_parse_fastscan() {
        assert!(matches!(
            parse(16, "PQ8fs").unwrap().base,
            BasePlan::Codec(Codec::PqFastScan { m: 8, nbits: 4, bbs: 32 })
        ));
        assert!(matches!(
            parse(16, "IVF4,PQ4x6fs").unwrap().base,
            BasePlan::Ivf { nlist: 4, codec: IvfCodec::PqFastScan { m: 4, nbits: 6, bbs: 32 } }
        ));
        for bad in ["PQ8x8fs", "PQ3fs", "PQfs", "IVF4,PQ4x3fs"] {
            assert_eq!(parse(16, bad).err(), Some(STATUS_INVALID_ARGUMENT), "{}", bad);
        }
    }

    #[test]
    fn test_parse_rejects() {
        for bad in ["", "Bogus", "IVF0,Flat", "PQ3", "PCA16,Flat", "IVF4,SQ9"] {
            assert_eq!(parse(8, bad).err(), Some(STATUS_INVALID_ARGUMENT), "{}", bad);
        }
    }

    #[test]
    fn test_build_owns_children() {
        let sim = SimBackend::new();
        let root = build(&sim, 8, "IDMap,RR8,Flat", MetricType::L2).unwrap();
        // rotation + flat + pretransform + idmap
        assert_eq!(sim.stats().live, 4);
        unsafe {
            sim.free(ObjectKind::Index, root as crate::ffi::RawPtr).unwrap();
        }
        assert_eq!(sim.stats().live, 0);
    }
}
