//! 生命周期测试：close / drop / use-after-close

use faiss_guard::{
    BinaryFlatIndex, BinaryIndex, FaissError, FlatIndex, HnswIndex, Index, IvfPqIndex, Kmeans, Library,
    MetricType, VectorTransform,
};

fn data(n: usize, d: usize) -> Vec<f32> {
    (0..n * d).map(|i| (i % 97) as f32 * 0.01).collect()
}

#[test]
fn test_use_after_close_is_reported() {
    let lib = Library::simulated();
    let mut index = FlatIndex::new_l2(&lib, 4).unwrap();
    index.add(&data(3, 4)).unwrap();
    index.close().unwrap();

    assert!(matches!(index.add(&data(1, 4)), Err(FaissError::NullHandle { .. })));
    assert!(matches!(index.search(&data(1, 4), 1), Err(FaissError::NullHandle { .. })));
    assert!(matches!(index.train(&data(1, 4)), Err(FaissError::NullHandle { .. })));
    assert!(matches!(index.reset(), Err(FaissError::NullHandle { .. })));
    assert!(matches!(index.dim(), Err(FaissError::NullHandle { .. })));
    assert!(matches!(index.count(), Err(FaissError::NullHandle { .. })));
    assert!(matches!(index.metric(), Err(FaissError::NullHandle { .. })));
    assert!(matches!(index.is_trained(), Err(FaissError::NullHandle { .. })));

    // nothing reached the collaborator with a dead pointer
    assert_eq!(lib.sim_stats().unwrap().dangling_calls, 0);
}

#[test]
fn test_validation_precedes_null_check_only_on_live_handles() {
    let lib = Library::simulated();
    let mut index = FlatIndex::new_l2(&lib, 4).unwrap();
    index.close().unwrap();
    // a closed wrapper reports the closed handle even for malformed input
    assert!(matches!(index.search(&[0.0; 3], 0), Err(FaissError::NullHandle { .. })));
}

#[test]
fn test_drop_without_close_uses_fallback() {
    let lib = Library::simulated();
    {
        let mut index = HnswIndex::new(&lib, 8, 16, MetricType::L2).unwrap();
        index.add(&data(10, 8)).unwrap();
    }
    let snap = lib.telemetry().snapshot();
    assert_eq!(snap.fallback_releases, 1);
    assert_eq!(snap.explicit_releases, 0);
    assert_eq!(lib.sim_stats().unwrap().live, 0);
}

#[test]
fn test_close_then_drop_frees_once() {
    let lib = Library::simulated();
    let mut index = IvfPqIndex::new(&lib, 8, 2, 2, 4, MetricType::L2).unwrap();
    index.close().unwrap();
    drop(index);

    let snap = lib.telemetry().snapshot();
    assert_eq!(snap.explicit_releases, 1);
    assert_eq!(snap.fallback_releases, 0);
    let stats = lib.sim_stats().unwrap();
    assert_eq!(stats.frees, 1);
    assert_eq!(stats.double_frees, 0);
}

#[test]
fn test_reset_keeps_training() {
    let lib = Library::simulated();
    let mut index = IvfPqIndex::new(&lib, 8, 2, 2, 4, MetricType::L2).unwrap();
    let x = data(64, 8);
    index.train(&x).unwrap();
    index.add(&x).unwrap();
    index.reset().unwrap();
    assert_eq!(index.cached_count(), 0);
    assert!(index.is_trained().unwrap());
    index.add(&x).unwrap();
    assert_eq!(index.cached_count(), 64);
}

#[test]
fn test_every_object_family_closes() {
    let lib = Library::simulated();
    let mut transform = VectorTransform::random_rotation(&lib, 4, 4).unwrap();
    let mut kmeans = Kmeans::new(&lib, 4, 2).unwrap();
    let mut binary = BinaryFlatIndex::new(&lib, 8).unwrap();

    transform.close().unwrap();
    kmeans.close().unwrap();
    binary.close().unwrap();
    transform.close().unwrap();
    kmeans.close().unwrap();
    binary.close().unwrap();

    assert!(binary.is_closed());
    assert!(matches!(binary.add(&[1u8]), Err(FaissError::NullHandle { .. })));
    let stats = lib.sim_stats().unwrap();
    assert_eq!(stats.creates, 3);
    assert_eq!(stats.frees, 3);
    assert_eq!(lib.telemetry().snapshot().outstanding_handles(), 0);
}

#[test]
fn test_graph_tracks_liveness() {
    let lib = Library::simulated();
    let mut a = FlatIndex::new_l2(&lib, 2).unwrap();
    let b = FlatIndex::new_l2(&lib, 2).unwrap();
    assert_eq!(lib.graph().live_count(), 2);
    a.close().unwrap();
    assert!(!lib.graph().is_live(a.node()));
    assert!(lib.graph().is_live(b.node()));
    // released and unreferenced, so no longer tracked
    assert_eq!(lib.graph().len(), 1);
}

#[test]
fn test_graph_does_not_grow_with_churn() {
    let lib = Library::simulated();
    for i in 0..1000 {
        let mut index = FlatIndex::new_l2(&lib, 2).unwrap();
        if i % 2 == 0 {
            index.close().unwrap();
        }
    }
    assert!(lib.graph().is_empty());
    assert_eq!(lib.sim_stats().unwrap().live, 0);
}
