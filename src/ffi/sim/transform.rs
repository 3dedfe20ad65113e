//! Linear transforms for the simulated collaborator.
//!
//! A transform is `y = A (x - mean)` with `A` a `d_out x d_in` row-major
//! matrix; the reverse map uses a precomputed `d_in x d_out` matrix.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::metrics::inner_product;

const POWER_ITERATIONS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum TransformKind {
    Pca { eigen_power: f32, random_rotation: bool },
    Opq { m: usize },
    RandomRotation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SimTransform {
    pub d_in: usize,
    pub d_out: usize,
    pub trained: bool,
    pub kind: TransformKind,
    mean: Vec<f32>,
    matrix: Vec<f32>,
    reverse: Vec<f32>,
    seed: u64,
}

impl SimTransform {
    pub fn pca(d_in: usize, d_out: usize, eigen_power: f32, random_rotation: bool, seed: u64) -> Self {
        Self::untrained(d_in, d_out, TransformKind::Pca { eigen_power, random_rotation }, seed)
    }

    pub fn opq(d: usize, m: usize, seed: u64) -> Self {
        Self::untrained(d, d, TransformKind::Opq { m }, seed)
    }

    /// Random rotations carry no statistics and are usable immediately.
    pub fn random_rotation(d_in: usize, d_out: usize, seed: u64) -> Self {
        let mut t = Self::untrained(d_in, d_out, TransformKind::RandomRotation, seed);
        t.set_orthonormal(random_orthonormal(d_out, d_in, seed));
        t.trained = true;
        t
    }

    fn untrained(d_in: usize, d_out: usize, kind: TransformKind, seed: u64) -> Self {
        Self {
            d_in,
            d_out,
            trained: false,
            kind,
            mean: vec![0.0; d_in],
            matrix: Vec::new(),
            reverse: Vec::new(),
            seed,
        }
    }

    /// Returns false when there are not enough samples.
    pub fn train(&mut self, x: &[f32]) -> bool {
        let n = x.len() / self.d_in;
        if n == 0 {
            return false;
        }
        match self.kind.clone() {
            TransformKind::Pca { eigen_power, random_rotation } => {
                self.train_pca(x, n, eigen_power, random_rotation)
            }
            TransformKind::Opq { .. } => {
                self.set_orthonormal(random_orthonormal(self.d_out, self.d_in, self.seed));
            }
            TransformKind::RandomRotation => {}
        }
        self.trained = true;
        true
    }

    fn train_pca(&mut self, x: &[f32], n: usize, eigen_power: f32, random_rotation: bool) {
        let d = self.d_in;
        let mut mean = vec![0.0f32; d];
        for row in x.chunks_exact(d) {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n as f32);

        // covariance, d x d
        let mut cov = vec![0.0f32; d * d];
        for row in x.chunks_exact(d) {
            for i in 0..d {
                let ci = row[i] - mean[i];
                for j in i..d {
                    cov[i * d + j] += ci * (row[j] - mean[j]);
                }
            }
        }
        for i in 0..d {
            for j in i..d {
                let v = cov[i * d + j] / n as f32;
                cov[i * d + j] = v;
                cov[j * d + i] = v;
            }
        }

        let (components, eigenvalues) = top_eigenvectors(&mut cov, d, self.d_out, self.seed);

        let scale: Vec<f32> = eigenvalues
            .iter()
            .map(|&ev| {
                if eigen_power == 0.0 || ev <= 1e-12 {
                    1.0
                } else {
                    ev.powf(eigen_power)
                }
            })
            .collect();

        // A = R * S * P, reverse = P^T * S^-1 * R^T
        let mut matrix = components.clone();
        for (r, s) in matrix.chunks_exact_mut(d).zip(&scale) {
            r.iter_mut().for_each(|v| *v *= s);
        }
        let mut reverse = transpose(&components, self.d_out, d);
        for i in 0..d {
            for (j, s) in scale.iter().enumerate() {
                reverse[i * self.d_out + j] /= s;
            }
        }
        if random_rotation {
            let rot = random_orthonormal(self.d_out, self.d_out, self.seed ^ 0x5eed);
            matrix = matmul(&rot, &matrix, self.d_out, self.d_out, d);
            let rot_t = transpose(&rot, self.d_out, self.d_out);
            reverse = matmul(&reverse, &rot_t, d, self.d_out, self.d_out);
        }

        self.mean = mean;
        self.matrix = matrix;
        self.reverse = reverse;
    }

    fn set_orthonormal(&mut self, matrix: Vec<f32>) {
        self.reverse = transpose(&matrix, self.d_out, self.d_in);
        self.matrix = matrix;
        self.mean = vec![0.0; self.d_in];
    }

    pub fn apply(&self, x: &[f32], out: &mut [f32]) {
        let mut centered = vec![0.0f32; self.d_in];
        for (row, dst) in x.chunks_exact(self.d_in).zip(out.chunks_exact_mut(self.d_out)) {
            for ((c, v), m) in centered.iter_mut().zip(row).zip(&self.mean) {
                *c = v - m;
            }
            for (o, a) in dst.iter_mut().zip(self.matrix.chunks_exact(self.d_in)) {
                *o = inner_product(a, &centered);
            }
        }
    }

    pub fn reverse(&self, xt: &[f32], out: &mut [f32]) {
        for (row, dst) in xt.chunks_exact(self.d_out).zip(out.chunks_exact_mut(self.d_in)) {
            for ((o, r), m) in dst
                .iter_mut()
                .zip(self.reverse.chunks_exact(self.d_out))
                .zip(&self.mean)
            {
                *o = inner_product(r, row) + m;
            }
        }
    }
}

/// Top `k` eigenvectors of a symmetric matrix by power iteration with
/// deflation. Returns `(k x d rows, eigenvalues)`.
fn top_eigenvectors(cov: &mut [f32], d: usize, k: usize, seed: u64) -> (Vec<f32>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut vectors = Vec::with_capacity(k * d);
    let mut values = Vec::with_capacity(k);
    let mut w = vec![0.0f32; d];

    for _ in 0..k {
        let mut v: Vec<f32> = (0..d).map(|_| rng.gen::<f32>() - 0.5).collect();
        // keep the start vector orthogonal to components already found
        orthogonalize(&mut v, &vectors, d);
        normalize(&mut v);

        let mut lambda = 0.0f32;
        for _ in 0..POWER_ITERATIONS {
            for (i, wi) in w.iter_mut().enumerate() {
                *wi = inner_product(&cov[i * d..(i + 1) * d], &v);
            }
            orthogonalize(&mut w, &vectors, d);
            let norm = normalize(&mut w);
            if norm <= 1e-12 {
                break;
            }
            lambda = norm;
            std::mem::swap(&mut v, &mut w);
        }
        if lambda <= 1e-12 {
            // rank-deficient: fill with any unit vector orthogonal to the rest
            v = (0..d).map(|_| rng.gen::<f32>() - 0.5).collect();
            orthogonalize(&mut v, &vectors, d);
            normalize(&mut v);
            lambda = 0.0;
        }

        for i in 0..d {
            for j in 0..d {
                cov[i * d + j] -= lambda * v[i] * v[j];
            }
        }
        vectors.extend_from_slice(&v);
        values.push(lambda);
    }
    (vectors, values)
}

/// `rows x cols` matrix with orthonormal rows (rows <= cols) or orthonormal
/// columns (rows > cols).
pub(crate) fn random_orthonormal(rows: usize, cols: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let (count, len) = if rows <= cols { (rows, cols) } else { (cols, rows) };
    let mut basis: Vec<f32> = Vec::with_capacity(count * len);
    while basis.len() < count * len {
        let mut v: Vec<f32> = (0..len).map(|_| gaussian(&mut rng)).collect();
        orthogonalize(&mut v, &basis, len);
        if normalize(&mut v) > 1e-6 {
            basis.extend_from_slice(&v);
        }
    }
    if rows <= cols {
        basis
    } else {
        transpose(&basis, cols, rows)
    }
}

fn gaussian(rng: &mut StdRng) -> f32 {
    // Box-Muller
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

fn orthogonalize(v: &mut [f32], basis: &[f32], d: usize) {
    for b in basis.chunks_exact(d) {
        let p = inner_product(v, b);
        v.iter_mut().zip(b).for_each(|(x, y)| *x -= p * y);
    }
}

fn normalize(v: &mut [f32]) -> f32 {
    let norm = inner_product(v, v).sqrt();
    if norm > 1e-12 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    norm
}

fn transpose(m: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut t = vec![0.0f32; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            t[j * rows + i] = m[i * cols + j];
        }
    }
    t
}

fn matmul(a: &[f32], b: &[f32], n: usize, k: usize, m: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; n * m];
    for i in 0..n {
        for p in 0..k {
            let aip = a[i * k + p];
            for j in 0..m {
                c[i * m + j] += aip * b[p * m + j];
            }
        }
    }
    c
}
