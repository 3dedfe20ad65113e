//! 并发测试：多线程创建、检索、释放

use std::sync::Arc;
use std::thread;

use faiss_guard::{FlatIndex, HnswIndex, Index, Library, MetricType};

const THREADS: usize = 50;
const PER_THREAD: usize = 10;

fn data(n: usize, d: usize, seed: usize) -> Vec<f32> {
    (0..n * d).map(|i| ((i + seed * 13) % 89) as f32 / 89.0).collect()
}

#[test]
fn test_parallel_create_and_release() {
    let lib = Library::simulated();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let lib = lib.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let mut index = FlatIndex::new_l2(&lib, 8).unwrap();
                    index.add(&data(16, 8, t * PER_THREAD + i)).unwrap();
                    let result = index.search(&data(1, 8, t), 4).unwrap();
                    assert_eq!(result.labels.len(), 4);
                    // half explicit, half left to drop
                    if i % 2 == 0 {
                        index.close().unwrap();
                        index.close().unwrap();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("worker panicked");
    }

    let stats = lib.sim_stats().unwrap();
    let total = (THREADS * PER_THREAD) as u64;
    assert_eq!(stats.creates, total);
    assert_eq!(stats.frees, total);
    assert_eq!(stats.double_frees, 0);
    assert_eq!(stats.live, 0);

    let snap = lib.telemetry().snapshot();
    assert_eq!(snap.explicit_releases, total / 2);
    assert_eq!(snap.fallback_releases, total / 2);
    assert_eq!(snap.outstanding_handles(), 0);
    assert_eq!(lib.graph().live_count(), 0);
    assert!(lib.graph().is_empty());
}

#[test]
fn test_shared_index_concurrent_search() {
    let lib = Library::simulated();
    let mut index = HnswIndex::new(&lib, 8, 16, MetricType::L2).unwrap();
    index.add(&data(200, 8, 0)).unwrap();
    let index = Arc::new(index);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..20 {
                    let result = index.search(&data(2, 8, t), 5).unwrap();
                    assert_eq!(result.labels.len(), 10);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("search worker panicked");
    }

    assert_eq!(lib.telemetry().snapshot().search_calls, 160);
    drop(index);
    assert_eq!(lib.sim_stats().unwrap().live, 0);
}
