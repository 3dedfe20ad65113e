//! Faiss binding layer
//!
//! One wrapper per native variant. Each owns exactly one handle through an
//! [`IndexCore`] and forwards every operation through the FFI bridge.

pub mod binary;
mod core;
pub mod flat;
pub mod generic;
pub mod hnsw;
pub mod id_map;
pub mod ivf_flat;
pub mod ivf_sq;
pub mod ivfpq;
pub mod lsh;
pub mod pq;
pub mod pq_fastscan;
pub mod pretransform;
pub mod refine;
pub mod shards;
pub mod sq;

pub use self::core::IndexCore;
pub use binary::{BinaryFlatIndex, BinaryHashIndex, BinaryIndex, BinaryIndexExt, BinaryIvfIndex};
pub use flat::FlatIndex;
pub use generic::GenericIndex;
pub use hnsw::HnswIndex;
pub use id_map::IdMapIndex;
pub use ivf_flat::IvfFlatIndex;
pub use ivf_sq::IvfScalarQuantizerIndex;
pub use ivfpq::IvfPqIndex;
pub use lsh::LshIndex;
pub use pq::PqIndex;
pub use pq_fastscan::{IvfPqFastScanIndex, PqFastScanIndex};
pub use pretransform::PreTransformIndex;
pub use refine::RefineIndex;
pub use shards::ShardedIndex;
pub use sq::ScalarQuantizerIndex;

pub(crate) use self::core::{check_dim, check_divisible, check_float_metric, check_positive, rows};

#[cfg(test)]
pub(crate) mod test_util {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    pub fn random_vectors(n: usize, d: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * d).map(|_| rng.gen::<f32>()).collect()
    }
}
