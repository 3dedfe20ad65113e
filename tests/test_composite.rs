//! 组合索引与依赖保活测试

use std::sync::Arc;

use faiss_guard::{
    FaissError, FlatIndex, IdMapIndex, IdMapping, Index, IndexExt, IvfFlatIndex, Library, MetricType,
    PreTransformIndex, RefineIndex, SharedIndex, ShardedIndex, VectorTransform,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

#[test]
fn test_composite_outlives_caller_reference() {
    let lib = Library::simulated();
    let quantizer = Arc::new(FlatIndex::new_l2(&lib, 8).unwrap());
    let mut index = IvfFlatIndex::with_quantizer(&lib, Arc::clone(&quantizer), 4).unwrap();
    drop(quantizer);

    // the quantizer is only reachable through the composite now
    let data = random_vectors(100, 8, 11);
    index.train(&data).unwrap();
    index.add(&data).unwrap();
    let result = index.search(&data[..8], 1).unwrap();
    assert_eq!(result.labels, vec![0]);
    assert_eq!(lib.sim_stats().unwrap().dangling_calls, 0);

    index.close().unwrap();
    let stats = lib.sim_stats().unwrap();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.double_frees, 0);
}

#[test]
fn test_shared_dependency_survives_composite_close() {
    let lib = Library::simulated();
    let base: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 4).unwrap());
    let mut refine = RefineIndex::flat(&lib, Arc::clone(&base)).unwrap();
    refine.close().unwrap();
    assert!(refine.dependencies().is_empty());

    // the caller still holds base
    assert!(!base.is_closed());
    assert_eq!(base.count().unwrap(), 0);
    assert_eq!(lib.sim_stats().unwrap().live, 1);
}

#[test]
fn test_dependency_edges_point_backwards() {
    let lib = Library::simulated();
    let transform = Arc::new(VectorTransform::random_rotation(&lib, 8, 8).unwrap());
    let base: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 8).unwrap());
    let pre = PreTransformIndex::new(&lib, Arc::clone(&transform), Arc::clone(&base)).unwrap();

    let deps = lib.graph().dependencies(pre.node());
    assert!(deps.iter().all(|d| *d < pre.node()));
    assert_eq!(lib.graph().dependents(base.node()), vec![pre.node()]);
    assert_eq!(pre.dependencies().len(), 2);
}

#[test]
fn test_nested_composites() {
    let lib = Library::simulated();
    let shards: Vec<SharedIndex> = (0..2)
        .map(|_| Arc::new(FlatIndex::new_l2(&lib, 4).unwrap()) as SharedIndex)
        .collect();
    let sharded: SharedIndex = Arc::new(ShardedIndex::new(&lib, shards).unwrap());
    let mut ids = IdMapIndex::new(&lib, sharded).unwrap();

    let data = random_vectors(6, 4, 12);
    ids.add_with_ids(&data, &[100, 101, 102, 103, 104, 105]).unwrap();
    assert_eq!(ids.cached_count(), 6);
    let result = ids.search(&data[4 * 2..4 * 3], 1).unwrap();
    assert_eq!(result.labels, vec![102]);

    ids.close().unwrap();
    let stats = lib.sim_stats().unwrap();
    assert_eq!(stats.creates, 4);
    assert_eq!(stats.frees, 4);
}

#[test]
fn test_invalid_composites_create_nothing() {
    let lib = Library::simulated();
    let l2: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 4).unwrap());
    let ip: SharedIndex = Arc::new(FlatIndex::new_ip(&lib, 4).unwrap());
    let creates = lib.sim_stats().unwrap().creates;

    assert!(matches!(
        RefineIndex::new(&lib, Arc::clone(&l2), Arc::clone(&ip)),
        Err(FaissError::Validation(_))
    ));
    assert!(matches!(
        ShardedIndex::new(&lib, vec![Arc::clone(&l2), ip]),
        Err(FaissError::Validation(_))
    ));
    let pca = Arc::new(VectorTransform::pca(&lib, 8, 2).unwrap());
    let created = lib.sim_stats().unwrap().creates;
    assert_eq!(created, creates + 1);
    assert!(matches!(PreTransformIndex::new(&lib, pca, l2), Err(FaissError::Validation(_))));
    assert_eq!(lib.sim_stats().unwrap().creates, created);
}

#[test]
fn test_id_map_rejects_populated_base() {
    let lib = Library::simulated();
    let mut flat = FlatIndex::new(&lib, 2, MetricType::L2).unwrap();
    flat.add(&[0.0, 1.0]).unwrap();
    assert!(matches!(IdMapIndex::new(&lib, Arc::new(flat)), Err(FaissError::Validation(_))));
}

#[test]
fn test_remove_ids_through_capability() {
    let lib = Library::simulated();
    let base: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 2).unwrap());
    let mut index: Box<dyn Index> = Box::new(IdMapIndex::new(&lib, base).unwrap());
    let mapping = index.id_mapping_mut().unwrap();
    mapping.add_with_ids(&[0.0, 0.0, 1.0, 1.0, 2.0, 2.0], &[7, 8, 9]).unwrap();
    assert_eq!(mapping.remove_ids(&[8, 42]).unwrap(), 1);
    assert_eq!(index.count().unwrap(), 2);
}

#[test]
fn test_dependencies_from_another_library_are_rejected() {
    let lib = Library::simulated();
    let other = Library::simulated();
    let foreign: SharedIndex = Arc::new(FlatIndex::new_l2(&other, 4).unwrap());
    let foreign_flat = Arc::new(FlatIndex::new_l2(&other, 4).unwrap());
    let foreign_rr = Arc::new(VectorTransform::random_rotation(&other, 4, 4).unwrap());
    let local: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 4).unwrap());
    let creates = lib.sim_stats().unwrap().creates;

    assert!(matches!(IdMapIndex::new(&lib, Arc::clone(&foreign)), Err(FaissError::Validation(_))));
    assert!(matches!(
        RefineIndex::new(&lib, Arc::clone(&local), Arc::clone(&foreign)),
        Err(FaissError::Validation(_))
    ));
    assert!(matches!(
        PreTransformIndex::new(&lib, foreign_rr, Arc::clone(&local)),
        Err(FaissError::Validation(_))
    ));
    assert!(matches!(
        IvfFlatIndex::with_quantizer(&lib, foreign_flat, 2),
        Err(FaissError::Validation(_))
    ));

    assert_eq!(lib.sim_stats().unwrap().creates, creates);
    assert_eq!(lib.graph().len(), 1);
    assert!(lib.graph().dependents(local.node()).is_empty());
    // the foreign objects are untouched in their own library
    assert_eq!(foreign.count().unwrap(), 0);
    assert_eq!(other.sim_stats().unwrap().dangling_calls, 0);
}

#[test]
fn test_composite_close_releases_dependencies_explicitly() {
    let lib = Library::simulated();
    let shards: Vec<SharedIndex> = (0..3)
        .map(|_| Arc::new(FlatIndex::new_l2(&lib, 4).unwrap()) as SharedIndex)
        .collect();
    let sharded: SharedIndex = Arc::new(ShardedIndex::new(&lib, shards).unwrap());
    let mut ids = IdMapIndex::new(&lib, sharded).unwrap();
    ids.add(&random_vectors(9, 4, 3)).unwrap();

    ids.close().unwrap();
    let snap = lib.telemetry().snapshot();
    assert_eq!(snap.explicit_releases, 5);
    assert_eq!(snap.fallback_releases, 0);
    assert_eq!(lib.sim_stats().unwrap().live, 0);
    assert!(lib.graph().is_empty());
}

#[test]
fn test_composite_close_leaves_shared_dependency_open() {
    let lib = Library::simulated();
    let base: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 4).unwrap());
    let mut ids = IdMapIndex::new(&lib, Arc::clone(&base)).unwrap();
    ids.close().unwrap();

    assert!(!base.is_closed());
    assert_eq!(lib.telemetry().snapshot().explicit_releases, 1);
    assert!(lib.graph().is_live(base.node()));
    drop(base);
    assert_eq!(lib.telemetry().snapshot().fallback_releases, 1);
}
