//! Scalar Quantizer Index
//!
//! 标量量化. Encodings without trained ranges (fp16, 8bit direct) are usable
//! straight away.

use crate::error::Result;
use crate::faiss::core::{check_dim, check_float_metric, IndexCore, Training};
use crate::ffi::{Constructor, QuantizerType};
use crate::index::Index;
use crate::library::Library;
use crate::metrics::MetricType;

#[derive(Debug)]
pub struct ScalarQuantizerIndex {
    core: IndexCore,
    qtype: QuantizerType,
}

impl ScalarQuantizerIndex {
    pub fn new(lib: &Library, d: usize, qtype: QuantizerType, metric: MetricType) -> Result<Self> {
        check_dim(d)?;
        check_float_metric(metric)?;
        let training = if qtype.needs_training() {
            Training::Required { min: 1 }
        } else {
            Training::Never
        };
        let core = IndexCore::create(
            lib,
            "IndexScalarQuantizer",
            &Constructor::ScalarQuantizer { d, qtype, metric },
            training,
            Vec::new(),
        )?;
        Ok(Self { core, qtype })
    }

    pub fn qtype(&self) -> QuantizerType {
        self.qtype
    }

    /// Bytes per encoded vector.
    pub fn code_size(&self) -> Result<usize> {
        Ok((self.core.dim()? * self.qtype.bits() + 7) / 8)
    }
}

impl Index for ScalarQuantizerIndex {
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
    use crate::error::FaissError;
    use crate::faiss::test_util::random_vectors;

    #[test]
    fn test_fp16_needs_no_training() {
        let lib = Library::simulated();
        let mut index = ScalarQuantizerIndex::new(&lib, 8, QuantizerType::QTfp16, MetricType::L2).unwrap();
        assert!(!index.requires_training());
        assert_eq!(index.code_size().unwrap(), 16);
        index.add(&random_vectors(10, 8, 1)).unwrap();
        assert_eq!(index.cached_count(), 10);
    }

    #[test]
    fn test_8bit_needs_training() {
        let lib = Library::simulated();
        let mut index = ScalarQuantizerIndex::new(&lib, 8, QuantizerType::QT8bit, MetricType::L2).unwrap();
        let data = random_vectors(10, 8, 1);
        assert!(matches!(index.add(&data), Err(FaissError::NotTrained { .. })));
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        assert_eq!(index.code_size().unwrap(), 8);
    }
}
