//! Vector transforms
//!
//! PCA、OPQ 与随机旋转. Each transform owns one handle and can be handed to
//! a [`crate::faiss::PreTransformIndex`] as a shared dependency. Training
//! state is always read back from the native object, since a composite may
//! train a shared transform on the caller's behalf.

use std::sync::Arc;

use tracing::info;

use crate::error::{FaissError, Result};
use crate::faiss::{check_dim, check_divisible, rows};
use crate::ffi::{Constructor, RawPtr};
use crate::handle::Handle;
use crate::library::Library;
use crate::ownership::NodeId;
use crate::telemetry::{Telemetry, Timer};

pub struct VectorTransform {
    handle: Handle,
    variant: &'static str,
    d_in: usize,
    d_out: usize,
    telemetry: Arc<Telemetry>,
}

impl VectorTransform {
    /// PCA projection to `d_out` dimensions.
    pub fn pca(lib: &Library, d_in: usize, d_out: usize) -> Result<Self> {
        Self::pca_with(lib, d_in, d_out, 0.0, false)
    }

    /// PCA with whitening (`eigen_power = -0.5`) and/or a random rotation
    /// applied after the projection.
    pub fn pca_with(
        lib: &Library,
        d_in: usize,
        d_out: usize,
        eigen_power: f32,
        random_rotation: bool,
    ) -> Result<Self> {
        check_dim(d_in)?;
        if d_out == 0 || d_out > d_in {
            return Err(FaissError::validation(format!(
                "PCA output dimension must be in [1, {}], got {}",
                d_in, d_out
            )));
        }
        if !eigen_power.is_finite() {
            return Err(FaissError::validation("eigen_power must be finite"));
        }
        Self::create(
            lib,
            "PCAMatrix",
            &Constructor::PcaMatrix { d_in, d_out, eigen_power, random_rotation },
        )
    }

    /// Rotation learned for `m` product-quantizer subspaces.
    pub fn opq(lib: &Library, d: usize, m: usize) -> Result<Self> {
        check_dim(d)?;
        check_divisible(d, m)?;
        Self::create(lib, "OPQMatrix", &Constructor::OpqMatrix { d, m })
    }

    /// Random orthonormal rotation; usable without training.
    pub fn random_rotation(lib: &Library, d_in: usize, d_out: usize) -> Result<Self> {
        check_dim(d_in)?;
        check_dim(d_out)?;
        Self::create(lib, "RandomRotationMatrix", &Constructor::RandomRotation { d_in, d_out })
    }

    fn create(lib: &Library, variant: &'static str, ctor: &Constructor<'_>) -> Result<Self> {
        let handle = Handle::create(lib, variant, ctor)?;
        let dims = handle
            .call("faiss_VectorTransform_d_in", |b, p| unsafe { b.transform_d_in(p) })
            .and_then(|d_in| {
                let d_out = handle
                    .call("faiss_VectorTransform_d_out", |b, p| unsafe { b.transform_d_out(p) })?;
                Ok((d_in, d_out))
            });
        let (d_in, d_out) = match dims {
            Ok(dims) => dims,
            Err(e) => {
                handle.release()?;
                return Err(e);
            }
        };
        Ok(Self {
            handle,
            variant,
            d_in,
            d_out,
            telemetry: Arc::clone(lib.telemetry()),
        })
    }

    pub fn variant(&self) -> &'static str {
        self.variant
    }

    pub fn node(&self) -> NodeId {
        self.handle.node()
    }

    pub(crate) fn raw(&self, op: &'static str) -> Result<RawPtr> {
        self.handle.get(op)
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn d_in(&self) -> Result<usize> {
        self.handle.get("faiss_VectorTransform_d_in")?;
        Ok(self.d_in)
    }

    pub fn d_out(&self) -> Result<usize> {
        self.handle.get("faiss_VectorTransform_d_out")?;
        Ok(self.d_out)
    }

    pub fn is_trained(&self) -> Result<bool> {
        self.handle.call("faiss_VectorTransform_is_trained", |b, p| unsafe {
            b.transform_is_trained(p)
        })
    }

    pub fn train(&mut self, x: &[f32]) -> Result<()> {
        const OP: &str = "faiss_VectorTransform_train";
        self.handle.get(OP)?;
        let n = rows(x.len(), self.d_in, "training vectors")?;
        if n == 0 {
            return Err(FaissError::validation("empty training data"));
        }
        let timer = Timer::start();
        self.handle.call(OP, |b, p| unsafe { b.transform_train(p, n, x) })?;
        self.telemetry.record_train(n, timer.elapsed());
        info!("{} trained with {} vectors", self.variant, n);
        Ok(())
    }

    /// Maps `n x d_in` vectors to `n x d_out`.
    pub fn apply(&self, x: &[f32]) -> Result<Vec<f32>> {
        const OP: &str = "faiss_VectorTransform_apply_noalloc";
        self.handle.get(OP)?;
        let n = rows(x.len(), self.d_in, "vectors")?;
        self.ensure_trained(OP)?;
        let mut out = vec![0.0f32; n * self.d_out];
        if n > 0 {
            self.handle
                .call(OP, |b, p| unsafe { b.transform_apply(p, n, x, &mut out) })?;
        }
        Ok(out)
    }

    /// Maps `n x d_out` vectors back to `n x d_in`. Exact only for
    /// orthonormal transforms.
    pub fn reverse_transform(&self, xt: &[f32]) -> Result<Vec<f32>> {
        const OP: &str = "faiss_VectorTransform_reverse_transform";
        self.handle.get(OP)?;
        let n = rows(xt.len(), self.d_out, "transformed vectors")?;
        self.ensure_trained(OP)?;
        let mut out = vec![0.0f32; n * self.d_in];
        if n > 0 {
            self.handle
                .call(OP, |b, p| unsafe { b.transform_reverse(p, n, xt, &mut out) })?;
        }
        Ok(out)
    }

    fn ensure_trained(&self, op: &'static str) -> Result<()> {
        if self.is_trained()? {
            Ok(())
        } else {
            Err(FaissError::NotTrained { variant: self.variant, op })
        }
    }

    /// Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.handle.release()
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_valid()
    }
}

impl std::fmt::Debug for VectorTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorTransform")
            .field("variant", &self.variant)
            .field("handle", &self.handle)
            .field("d_in", &self.d_in)
            .field("d_out", &self.d_out)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn data(n: usize, d: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(42);
        (0..n * d).map(|_| rng.gen::<f32>()).collect()
    }

    #[test]
    fn test_pca_projects() {
        let lib = Library::simulated();
        let mut pca = VectorTransform::pca(&lib, 8, 2).unwrap();
        let x = data(100, 8);
        assert!(!pca.is_trained().unwrap());
        assert!(matches!(pca.apply(&x), Err(FaissError::NotTrained { .. })));
        pca.train(&x).unwrap();
        assert_eq!(pca.apply(&x[..16]).unwrap().len(), 4);
        assert_eq!(lib.telemetry().snapshot().train_calls, 1);
    }

    #[test]
    fn test_rotation_round_trip() {
        let lib = Library::simulated();
        let rr = VectorTransform::random_rotation(&lib, 6, 6).unwrap();
        assert!(rr.is_trained().unwrap());
        let x = data(3, 6);
        let back = rr.reverse_transform(&rr.apply(&x).unwrap()).unwrap();
        for (a, b) in x.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_validation() {
        let lib = Library::simulated();
        assert!(matches!(VectorTransform::pca(&lib, 8, 9), Err(FaissError::Validation(_))));
        assert!(matches!(VectorTransform::pca(&lib, 8, 0), Err(FaissError::Validation(_))));
        assert!(matches!(VectorTransform::opq(&lib, 10, 3), Err(FaissError::Validation(_))));
        assert_eq!(lib.sim_stats().unwrap().creates, 0);

        let mut opq = VectorTransform::opq(&lib, 8, 2).unwrap();
        assert!(matches!(opq.train(&[1.0; 7]), Err(FaissError::Validation(_))));
        assert!(matches!(opq.train(&[]), Err(FaissError::Validation(_))));
    }

    #[test]
    fn test_close_is_idempotent() {
        let lib = Library::simulated();
        let mut t = VectorTransform::opq(&lib, 4, 2).unwrap();
        t.close().unwrap();
        t.close().unwrap();
        assert!(t.is_closed());
        assert!(matches!(t.d_out(), Err(FaissError::NullHandle { .. })));
        assert!(matches!(t.apply(&[0.0; 4]), Err(FaissError::NullHandle { .. })));
        assert_eq!(lib.sim_stats().unwrap().frees, 1);
    }
}
