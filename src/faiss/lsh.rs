//! LSH Index
//!
//! 局部敏感哈希. Only trained thresholds need a training pass.

use crate::error::Result;
use crate::faiss::core::{check_dim, check_positive, IndexCore, Training};
use crate::ffi::Constructor;
use crate::index::Index;
use crate::library::Library;

#[derive(Debug)]
pub struct LshIndex {
    core: IndexCore,
    nbits: usize,
}

impl LshIndex {
    pub fn new(lib: &Library, d: usize, nbits: usize) -> Result<Self> {
        Self::with_options(lib, d, nbits, true, false)
    }

    pub fn with_options(
        lib: &Library,
        d: usize,
        nbits: usize,
        rotate_data: bool,
        train_thresholds: bool,
    ) -> Result<Self> {
        check_dim(d)?;
        check_positive("nbits", nbits)?;
        let training = if train_thresholds {
            Training::Required { min: 1 }
        } else {
            Training::Never
        };
        let core = IndexCore::create(
            lib,
            "IndexLSH",
            &Constructor::Lsh { d, nbits, rotate_data, train_thresholds },
            training,
            Vec::new(),
        )?;
        Ok(Self { core, nbits })
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }
}

impl Index for LshIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }
}
