//! 能力查询测试

use std::sync::Arc;

use faiss_guard::{
    Capability, FaissError, FlatIndex, HnswIndex, Index, IndexExt, IvfPqIndex, Library, MetricType,
    PqIndex, RefineIndex, SharedIndex,
};

fn grid(n: usize, d: usize) -> Vec<f32> {
    (0..n * d).map(|i| ((i * 31) % 101) as f32 / 101.0).collect()
}

#[test]
fn test_capability_matrix() {
    let lib = Library::simulated();
    let flat = FlatIndex::new_l2(&lib, 8).unwrap();
    let hnsw = HnswIndex::new(&lib, 8, 16, MetricType::L2).unwrap();
    let ivfpq = IvfPqIndex::new(&lib, 8, 4, 2, 4, MetricType::L2).unwrap();

    assert_eq!(flat.capabilities(), vec![Capability::Reconstruct, Capability::RangeSearch]);
    assert!(hnsw.supports(Capability::SearchEffort));
    assert!(!hnsw.supports(Capability::ProbeCount));
    assert!(ivfpq.supports(Capability::ProbeCount));
    assert!(!ivfpq.supports(Capability::RefineFactor));
}

#[test]
fn test_unsupported_surface_names_variant() {
    let lib = Library::simulated();
    let mut flat = FlatIndex::new_l2(&lib, 4).unwrap();
    match flat.probe_control_mut() {
        Err(FaissError::CapabilityUnsupported { capability, variant }) => {
            assert_eq!(capability, Capability::ProbeCount);
            assert_eq!(variant, "IndexFlat");
        }
        other => panic!("expected CapabilityUnsupported, got {:?}", other.map(|_| ())),
    }
    assert!(flat.search_effort().is_err());
    assert!(flat.refine_factor().is_err());
    assert!(flat.id_mapping_mut().is_err());
}

#[test]
fn test_search_effort_on_hnsw() {
    let lib = Library::simulated();
    let mut index = HnswIndex::new(&lib, 8, 16, MetricType::L2).unwrap();
    index.add(&grid(100, 8)).unwrap();

    let effort = index.search_effort_mut().unwrap();
    assert!(matches!(effort.set_ef_search(0), Err(FaissError::Validation(_))));
    effort.set_ef_search(128).unwrap();
    assert_eq!(effort.ef_search().unwrap(), 128);

    let result = index.search(&grid(2, 8), 3).unwrap();
    assert_eq!(result.labels.len(), 6);
}

#[test]
fn test_refine_factor_range() {
    let lib = Library::simulated();
    let mut pq = PqIndex::new(&lib, 8, 2, 4, MetricType::L2).unwrap();
    pq.train(&grid(64, 8)).unwrap();
    let base: SharedIndex = Arc::new(pq);
    let mut index = RefineIndex::flat(&lib, base).unwrap();

    let factor = index.refine_factor_mut().unwrap();
    assert_eq!(factor.k_factor(), 1.0);
    assert!(matches!(factor.set_k_factor(0.5), Err(FaissError::Validation(_))));
    assert!(matches!(factor.set_k_factor(f32::NAN), Err(FaissError::Validation(_))));
    factor.set_k_factor(4.0).unwrap();
    assert_eq!(index.refine_factor().unwrap().k_factor(), 4.0);
}

#[test]
fn test_reconstruct_and_range_search_on_flat() {
    let lib = Library::simulated();
    let mut index = FlatIndex::new_l2(&lib, 2).unwrap();
    index.add(&[0.0, 0.0, 1.0, 0.0, 5.0, 5.0]).unwrap();

    let v = index.reconstructor().unwrap().reconstruct(1).unwrap();
    assert_eq!(v, vec![1.0, 0.0]);

    let hits = index.range_searcher().unwrap().range_search(&[0.0, 0.0], 2.0).unwrap();
    assert_eq!(hits.nq(), 1);
    let mut labels: Vec<i64> = hits.hits(0).into_iter().map(|(_, l)| l).collect();
    labels.sort_unstable();
    assert_eq!(labels, vec![0, 1]);
}

#[test]
fn test_capability_calls_after_close() {
    let lib = Library::simulated();
    let mut index = IvfPqIndex::new(&lib, 8, 4, 2, 4, MetricType::L2).unwrap();
    index.close().unwrap();
    // the surface is still reachable, the call reports the closed handle
    let probe = index.probe_control_mut().unwrap();
    assert!(matches!(probe.set_nprobe(2), Err(FaissError::NullHandle { .. })));
    assert!(matches!(probe.nprobe(), Err(FaissError::NullHandle { .. })));
}
