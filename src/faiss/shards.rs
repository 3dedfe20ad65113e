//! Sharded Index
//!
//! 分片索引：adds are split contiguously across the shards and search
//! results are merged, with labels offset by the sizes of the preceding
//! shards. Every shard must be constructed before the composite and share
//! its dimension and metric.

use tracing::debug;

use crate::error::{FaissError, Result};
use crate::faiss::core::{check_same_library, check_same_shape, IndexCore, Training};
use crate::ffi::Constructor;
use crate::handle::Handle;
use crate::index::{Dependency, Index, SharedIndex};
use crate::library::Library;

const ADD_SHARD: &str = "faiss_IndexShards_add_shard";

#[derive(Debug)]
pub struct ShardedIndex {
    core: IndexCore,
}

impl ShardedIndex {
    /// Builds the composite over `shards`, which must be non-empty and agree
    /// on dimension and metric.
    pub fn new(lib: &Library, shards: Vec<SharedIndex>) -> Result<Self> {
        let first = shards
            .first()
            .ok_or_else(|| FaissError::validation("shards: at least one shard is required"))?;
        let shape = (first.dim()?, first.metric()?);
        let mut raws = Vec::with_capacity(shards.len());
        for shard in &shards {
            check_same_shape("shards", shape, (shard.dim()?, shard.metric()?))?;
            raws.push(shard.core().raw(ADD_SHARD)?);
        }

        let deps: Vec<Dependency> = shards.into_iter().map(Dependency::Index).collect();
        check_same_library(lib, &deps)?;

        let (d, metric) = shape;
        let handle = Handle::create(lib, "IndexShards", &Constructor::Shards { d, metric })?;
        for raw in raws {
            if let Err(e) = handle.call(ADD_SHARD, |b, p| unsafe { b.shards_add_shard(p, raw) }) {
                handle.release()?;
                return Err(e);
            }
        }
        let core = IndexCore::from_handle(lib, handle, Training::Native, deps)?;
        Ok(Self { core })
    }

    /// Appends a shard. The shard must be older than this composite.
    pub fn add_shard(&mut self, shard: SharedIndex) -> Result<()> {
        self.core.raw(ADD_SHARD)?;
        if !shard.core().handle().same_library_as(self.core.handle()) {
            return Err(FaissError::validation(format!(
                "shard {} {} belongs to a different library",
                shard.variant(),
                shard.node()
            )));
        }
        if shard.node() >= self.core.node() {
            return Err(FaissError::validation(format!(
                "shard {} {} was constructed after {}",
                shard.variant(),
                shard.node(),
                self.core.node()
            )));
        }
        check_same_shape(
            "shards",
            (self.core.dim()?, self.core.metric()?),
            (shard.dim()?, shard.metric()?),
        )?;
        let shard_raw = shard.core().raw(ADD_SHARD)?;
        self.core
            .handle()
            .call(ADD_SHARD, |b, p| unsafe { b.shards_add_shard(p, shard_raw) })?;
        debug!("{} gained shard {}", self.core.node(), shard.node());
        self.core.keep_alive(Dependency::Index(shard))?;
        self.core.refresh_meta()
    }

    pub fn shards(&self) -> impl Iterator<Item = &SharedIndex> {
        self.core.dependencies().iter().filter_map(|d| match d {
            Dependency::Index(shard) => Some(shard),
            _ => None,
        })
    }

    pub fn num_shards(&self) -> usize {
        self.shards().count()
    }
}

impl Index for ShardedIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::faiss::test_util::random_vectors;
    use crate::faiss::FlatIndex;

    fn flat_shards(lib: &Library, n: usize, d: usize) -> Vec<SharedIndex> {
        (0..n)
            .map(|_| Arc::new(FlatIndex::new_l2(lib, d).unwrap()) as SharedIndex)
            .collect()
    }

    #[test]
    fn test_labels_span_shards() {
        let lib = Library::simulated();
        let mut index = ShardedIndex::new(&lib, flat_shards(&lib, 3, 4)).unwrap();
        let data = random_vectors(30, 4, 8);
        index.add(&data).unwrap();
        assert_eq!(index.cached_count(), 30);
        for shard in index.shards() {
            assert_eq!(shard.count().unwrap(), 10);
        }

        let result = index.search(&data[4 * 25..4 * 26], 1).unwrap();
        assert_eq!(result.labels, vec![25]);
    }

    #[test]
    fn test_empty_and_mismatched() {
        let lib = Library::simulated();
        assert!(matches!(ShardedIndex::new(&lib, Vec::new()), Err(FaissError::Validation(_))));

        let mut shards = flat_shards(&lib, 1, 4);
        shards.push(Arc::new(FlatIndex::new_l2(&lib, 8).unwrap()));
        let creates = lib.sim_stats().unwrap().creates;
        assert!(matches!(ShardedIndex::new(&lib, shards), Err(FaissError::Validation(_))));
        assert_eq!(lib.sim_stats().unwrap().creates, creates);
    }

    #[test]
    fn test_add_shard_must_be_older() {
        let lib = Library::simulated();
        let older: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 4).unwrap());
        let mut index = ShardedIndex::new(&lib, flat_shards(&lib, 1, 4)).unwrap();
        index.add_shard(older).unwrap();
        assert_eq!(index.num_shards(), 2);
        assert_eq!(lib.graph().dependencies(index.node()).len(), 2);

        let newer: SharedIndex = Arc::new(FlatIndex::new_l2(&lib, 4).unwrap());
        assert!(matches!(index.add_shard(newer), Err(FaissError::Validation(_))));
        assert_eq!(index.num_shards(), 2);
    }

    #[test]
    fn test_shards_from_another_library() {
        let lib = Library::simulated();
        let other = Library::simulated();
        let foreign = flat_shards(&other, 2, 4);
        assert!(matches!(ShardedIndex::new(&lib, foreign), Err(FaissError::Validation(_))));
        assert_eq!(lib.sim_stats().unwrap().creates, 0);

        // node #0 in its own library, so only the library check catches it
        let third = Library::simulated();
        let foreign: SharedIndex = Arc::new(FlatIndex::new_l2(&third, 4).unwrap());
        let mut index = ShardedIndex::new(&lib, flat_shards(&lib, 1, 4)).unwrap();
        assert!(matches!(index.add_shard(foreign), Err(FaissError::Validation(_))));
        assert_eq!(index.num_shards(), 1);
        assert_eq!(lib.graph().dependencies(index.node()).len(), 1);
    }

    #[test]
    fn test_close_drops_all_shards() {
        let lib = Library::simulated();
        let mut index = ShardedIndex::new(&lib, flat_shards(&lib, 4, 2)).unwrap();
        index.add(&random_vectors(8, 2, 1)).unwrap();
        index.close().unwrap();
        index.close().unwrap();
        assert_eq!(index.cached_count(), 0);
        let stats = lib.sim_stats().unwrap();
        assert_eq!(stats.creates, stats.frees);
        assert_eq!(stats.double_frees, 0);
    }
}
