//! K-Means 聚类
//!
//! Thin wrapper over the native k-means object: train on at least `k`
//! vectors, then read centroids or assign vectors to their nearest one.

use std::sync::Arc;

use tracing::info;

use crate::error::{FaissError, Result};
use crate::faiss::{check_dim, check_positive, rows};
use crate::ffi::Constructor;
use crate::handle::Handle;
use crate::library::Library;
use crate::telemetry::{Telemetry, Timer};

const VARIANT: &str = "Kmeans";

pub struct Kmeans {
    handle: Handle,
    d: usize,
    k: usize,
    trained: bool,
    telemetry: Arc<Telemetry>,
}

impl Kmeans {
    pub fn new(lib: &Library, d: usize, k: usize) -> Result<Self> {
        check_dim(d)?;
        check_positive("k", k)?;
        let handle = Handle::create(lib, VARIANT, &Constructor::Kmeans { d, k })?;
        Ok(Self {
            handle,
            d,
            k,
            trained: false,
            telemetry: Arc::clone(lib.telemetry()),
        })
    }

    pub fn dim(&self) -> usize {
        self.d
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn set_niter(&mut self, niter: usize) -> Result<()> {
        const OP: &str = "faiss_Kmeans_set_niter";
        self.handle.get(OP)?;
        check_positive("niter", niter)?;
        self.handle.call(OP, |b, p| unsafe { b.kmeans_set_niter(p, niter) })
    }

    pub fn set_seed(&mut self, seed: u64) -> Result<()> {
        self.handle
            .call("faiss_Kmeans_set_seed", |b, p| unsafe { b.kmeans_set_seed(p, seed) })
    }

    pub fn train(&mut self, x: &[f32]) -> Result<()> {
        const OP: &str = "faiss_Kmeans_train";
        self.handle.get(OP)?;
        let n = rows(x.len(), self.d, "training vectors")?;
        if n < self.k {
            return Err(FaissError::validation(format!(
                "k-means with k = {} needs at least {} vectors, got {}",
                self.k, self.k, n
            )));
        }
        let timer = Timer::start();
        self.handle.call(OP, |b, p| unsafe { b.kmeans_train(p, n, x) })?;
        self.telemetry.record_train(n, timer.elapsed());
        self.trained = true;
        info!("k-means (k = {}) trained on {} vectors", self.k, n);
        Ok(())
    }

    /// `k x d` centroids, row-major.
    pub fn centroids(&self) -> Result<Vec<f32>> {
        const OP: &str = "faiss_Kmeans_centroids";
        self.handle.get(OP)?;
        self.ensure_trained(OP)?;
        let mut out = vec![0.0f32; self.k * self.d];
        self.handle
            .call(OP, |b, p| unsafe { b.kmeans_centroids(p, &mut out) })?;
        Ok(out)
    }

    /// Nearest centroid of every vector.
    pub fn assign(&self, x: &[f32]) -> Result<Vec<i64>> {
        const OP: &str = "faiss_Kmeans_assign";
        self.handle.get(OP)?;
        let n = rows(x.len(), self.d, "vectors")?;
        self.ensure_trained(OP)?;
        let mut labels = vec![-1i64; n];
        if n > 0 {
            self.handle
                .call(OP, |b, p| unsafe { b.kmeans_assign(p, n, x, &mut labels) })?;
        }
        Ok(labels)
    }

    fn ensure_trained(&self, op: &'static str) -> Result<()> {
        if self.trained {
            Ok(())
        } else {
            Err(FaissError::NotTrained { variant: VARIANT, op })
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.trained = false;
        self.handle.release()
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_valid()
    }
}

impl std::fmt::Debug for Kmeans {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kmeans")
            .field("handle", &self.handle)
            .field("d", &self.d)
            .field("k", &self.k)
            .field("trained", &self.trained)
            .finish()
    }
}
