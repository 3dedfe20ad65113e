//! K-Means 聚类（模拟后端）
//!
//! k-means++ 初始化 + Lloyd 迭代，固定种子保证结果可复现

use rand::prelude::*;

use crate::metrics::l2_sqr;

pub(crate) const DEFAULT_NITER: usize = 25;
pub(crate) const DEFAULT_SEED: u64 = 1234;

pub(crate) struct KMeans {
    k: usize,
    dim: usize,
    max_iter: usize,
    tolerance: f32,
    centroids: Vec<f32>,
    rng: StdRng,
}

impl KMeans {
    pub fn new(k: usize, dim: usize) -> Self {
        Self::with_seed(k, dim, DEFAULT_SEED)
    }

    pub fn with_seed(k: usize, dim: usize, seed: u64) -> Self {
        Self {
            k,
            dim,
            max_iter: DEFAULT_NITER,
            tolerance: 1e-4,
            centroids: vec![0.0; k * dim],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn max_iter(mut self, niter: usize) -> Self {
        self.max_iter = niter.max(1);
        self
    }

    /// K-means++ 初始化
    fn kmeans_plusplus_init(&mut self, vectors: &[f32], n: usize) {
        let dim = self.dim;
        let first = self.rng.gen_range(0..n);
        self.centroids[..dim].copy_from_slice(&vectors[first * dim..(first + 1) * dim]);

        // 每个点到已选中心的最近距离
        let mut min_dist: Vec<f32> = (0..n)
            .map(|i| l2_sqr(&vectors[i * dim..(i + 1) * dim], &self.centroids[..dim]))
            .collect();

        for c in 1..self.k {
            let sum: f32 = min_dist.iter().sum();
            let selected = if sum <= 0.0 {
                // 全部点已与中心重合，按顺序取
                c % n
            } else {
                let threshold = self.rng.gen::<f32>() * sum;
                let mut acc = 0.0f32;
                let mut selected = n - 1;
                for (i, d) in min_dist.iter().enumerate() {
                    acc += d;
                    if acc >= threshold {
                        selected = i;
                        break;
                    }
                }
                selected
            };

            let src = &vectors[selected * dim..(selected + 1) * dim];
            self.centroids[c * dim..(c + 1) * dim].copy_from_slice(src);

            for (i, md) in min_dist.iter_mut().enumerate() {
                let d = l2_sqr(&vectors[i * dim..(i + 1) * dim], src);
                if d < *md {
                    *md = d;
                }
            }
        }
    }

    /// 训练，返回参与训练的向量数；样本数不足 k 时返回 0
    pub fn train(&mut self, vectors: &[f32]) -> usize {
        let n = vectors.len() / self.dim;
        if n == 0 || n < self.k {
            return 0;
        }

        self.kmeans_plusplus_init(vectors, n);

        let dim = self.dim;
        let mut assignments = vec![0usize; n];
        let mut new_centroids = vec![0.0f32; self.k * dim];
        let mut counts = vec![0usize; self.k];

        for _iter in 0..self.max_iter {
            // 分配阶段
            self.assign_all(vectors, &mut assignments);

            // 更新阶段
            new_centroids.fill(0.0);
            counts.fill(0);
            for (i, &c) in assignments.iter().enumerate() {
                for j in 0..dim {
                    new_centroids[c * dim + j] += vectors[i * dim + j];
                }
                counts[c] += 1;
            }

            let mut max_shift = 0.0f32;
            for c in 0..self.k {
                if counts[c] == 0 {
                    continue;
                }
                for j in 0..dim {
                    new_centroids[c * dim + j] /= counts[c] as f32;
                }
                let shift = l2_sqr(
                    &self.centroids[c * dim..(c + 1) * dim],
                    &new_centroids[c * dim..(c + 1) * dim],
                );
                max_shift = max_shift.max(shift);
                self.centroids[c * dim..(c + 1) * dim]
                    .copy_from_slice(&new_centroids[c * dim..(c + 1) * dim]);
            }

            if max_shift < self.tolerance {
                break;
            }
        }

        n
    }

    #[cfg(not(feature = "parallel"))]
    fn assign_all(&self, vectors: &[f32], assignments: &mut [usize]) {
        for (i, a) in assignments.iter_mut().enumerate() {
            *a = self.find_nearest(&vectors[i * self.dim..(i + 1) * self.dim]);
        }
    }

    #[cfg(feature = "parallel")]
    fn assign_all(&self, vectors: &[f32], assignments: &mut [usize]) {
        use rayon::prelude::*;

        assignments.par_iter_mut().enumerate().for_each(|(i, a)| {
            *a = self.find_nearest(&vectors[i * self.dim..(i + 1) * self.dim]);
        });
    }

    /// 查找最近 centroid
    pub fn find_nearest(&self, vector: &[f32]) -> usize {
        nearest_centroid(&self.centroids, self.dim, vector)
    }

    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    pub fn into_centroids(self) -> Vec<f32> {
        self.centroids
    }
}

/// 在 `centroids`（行优先）中查找距离 `vector` 最近的一行
pub(crate) fn nearest_centroid(centroids: &[f32], dim: usize, vector: &[f32]) -> usize {
    let mut best = 0;
    let mut min_dist = f32::MAX;
    for (c, centroid) in centroids.chunks_exact(dim).enumerate() {
        let dist = l2_sqr(vector, centroid);
        if dist < min_dist {
            min_dist = dist;
            best = c;
        }
    }
    best
}
