//! Index Trait 定义
//!
//! 统一的索引接口 plus optional capability interfaces.
//!
//! Every float wrapper implements [`Index`]. Variant-specific surfaces
//! (probe count, search effort, refinement factor, ...) are separate traits
//! reached through the `as_*` queries; a variant without the surface answers
//! `None` and [`IndexExt`] turns that into
//! [`FaissError::CapabilityUnsupported`].

use std::sync::Arc;

use crate::api::{RangeSearchResult, SearchResult};
use crate::error::{FaissError, Result};
use crate::faiss::{BinaryIndex, IndexCore};
use crate::handle::Handle;
use crate::metrics::MetricType;
use crate::ownership::NodeId;
use crate::transform::VectorTransform;

/// Shared, read-only reference to an index held by a composite.
pub type SharedIndex = Arc<dyn Index>;

/// Optional index surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Probe-count control (inverted-file variants)
    ProbeCount,
    /// efSearch / efConstruction control (graph variants)
    SearchEffort,
    /// Re-ranking factor (two-stage variants)
    RefineFactor,
    /// Caller-supplied ids and removal
    IdMapping,
    /// Stored vector reconstruction
    Reconstruct,
    /// Radius search
    RangeSearch,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::ProbeCount,
        Capability::SearchEffort,
        Capability::RefineFactor,
        Capability::IdMapping,
        Capability::Reconstruct,
        Capability::RangeSearch,
    ];
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::ProbeCount => "probe-count control",
            Capability::SearchEffort => "search-effort control",
            Capability::RefineFactor => "refine-factor control",
            Capability::IdMapping => "id mapping",
            Capability::Reconstruct => "reconstruct",
            Capability::RangeSearch => "range search",
        };
        f.write_str(s)
    }
}

/// A wrapper kept alive by a composite.
#[derive(Clone)]
pub enum Dependency {
    Index(SharedIndex),
    Transform(Arc<VectorTransform>),
    Binary(Arc<dyn BinaryIndex>),
}

impl Dependency {
    pub fn node(&self) -> NodeId {
        match self {
            Dependency::Index(i) => i.node(),
            Dependency::Transform(t) => t.node(),
            Dependency::Binary(b) => b.node(),
        }
    }

    pub fn variant(&self) -> &'static str {
        match self {
            Dependency::Index(i) => i.variant(),
            Dependency::Transform(t) => t.variant(),
            Dependency::Binary(b) => b.variant(),
        }
    }

    /// Closes the wrapped object when this is the last reference to it.
    pub(crate) fn close_if_unique(self) -> Result<()> {
        match self {
            Dependency::Index(mut i) => Arc::get_mut(&mut i).map_or(Ok(()), |i| i.close()),
            Dependency::Transform(mut t) => Arc::get_mut(&mut t).map_or(Ok(()), |t| t.close()),
            Dependency::Binary(mut b) => Arc::get_mut(&mut b).map_or(Ok(()), |b| b.close()),
        }
    }

    pub(crate) fn handle(&self) -> &Handle {
        match self {
            Dependency::Index(i) => i.core().handle(),
            Dependency::Transform(t) => t.handle(),
            Dependency::Binary(b) => b.core().handle(),
        }
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.variant(), self.node())
    }
}

/// 索引 trait（统一接口）
///
/// Getters re-query the native object and fail with `NullHandle` once the
/// wrapper is closed. Mutating calls take `&mut self`.
pub trait Index: Send + Sync {
    /// Shared wrapper state.
    #[doc(hidden)]
    fn core(&self) -> &IndexCore;

    #[doc(hidden)]
    fn core_mut(&mut self) -> &mut IndexCore;

    /// 索引类型名称
    fn variant(&self) -> &'static str {
        self.core().variant()
    }

    /// 所有权图节点
    fn node(&self) -> NodeId {
        self.core().node()
    }

    /// 维度
    fn dim(&self) -> Result<usize> {
        self.core().dim()
    }

    /// 距离度量
    fn metric(&self) -> Result<MetricType> {
        self.core().metric()
    }

    /// 向量数量（原生查询）
    fn count(&self) -> Result<u64> {
        self.core().count()
    }

    /// 是否已训练（原生查询）
    fn is_trained(&self) -> Result<bool> {
        self.core().is_trained()
    }

    /// Local mirror of the element count. Zero after close.
    fn cached_count(&self) -> u64 {
        self.core().cached_count()
    }

    /// Whether the variant declared a training requirement at construction.
    fn requires_training(&self) -> bool {
        self.core().requires_training()
    }

    /// 训练索引
    fn train(&mut self, x: &[f32]) -> Result<()> {
        self.core_mut().train(x)
    }

    /// 添加向量
    fn add(&mut self, x: &[f32]) -> Result<()> {
        self.core_mut().add(x)
    }

    /// 搜索
    fn search(&self, queries: &[f32], k: usize) -> Result<SearchResult> {
        self.core().search(queries, k)
    }

    /// 清空向量，保留训练状态与参数
    fn reset(&mut self) -> Result<()> {
        self.core_mut().reset()
    }

    /// 释放原生对象（幂等）
    fn close(&mut self) -> Result<()> {
        self.core_mut().close()
    }

    fn is_closed(&self) -> bool {
        self.core().is_closed()
    }

    /// Wrappers this one keeps alive.
    fn dependencies(&self) -> &[Dependency] {
        self.core().dependencies()
    }

    // ---- capability queries ----

    fn as_probe_control(&self) -> Option<&dyn ProbeControl> {
        None
    }

    fn as_probe_control_mut(&mut self) -> Option<&mut dyn ProbeControl> {
        None
    }

    fn as_search_effort(&self) -> Option<&dyn SearchEffort> {
        None
    }

    fn as_search_effort_mut(&mut self) -> Option<&mut dyn SearchEffort> {
        None
    }

    fn as_refine_factor(&self) -> Option<&dyn RefineFactor> {
        None
    }

    fn as_refine_factor_mut(&mut self) -> Option<&mut dyn RefineFactor> {
        None
    }

    fn as_id_mapping(&self) -> Option<&dyn IdMapping> {
        None
    }

    fn as_id_mapping_mut(&mut self) -> Option<&mut dyn IdMapping> {
        None
    }

    fn as_reconstruct(&self) -> Option<&dyn Reconstruct> {
        None
    }

    fn as_range_search(&self) -> Option<&dyn RangeSearch> {
        None
    }
}

/// 探测数控制 (inverted-file variants)
pub trait ProbeControl {
    /// Number of inverted lists.
    fn nlist(&self) -> usize;

    fn nprobe(&self) -> Result<usize>;

    /// Accepts `1..=nlist`.
    fn set_nprobe(&mut self, nprobe: usize) -> Result<()>;
}

/// 搜索宽度控制 (graph variants)
pub trait SearchEffort {
    fn ef_search(&self) -> Result<usize>;

    fn set_ef_search(&mut self, ef: usize) -> Result<()>;

    fn ef_construction(&self) -> Result<usize>;

    /// Only effective before the first add.
    fn set_ef_construction(&mut self, ef: usize) -> Result<()>;
}

/// 精排倍数 (two-stage variants)
pub trait RefineFactor {
    fn k_factor(&self) -> f32;

    /// The base stage is searched for `ceil(k * k_factor)` candidates.
    fn set_k_factor(&mut self, k_factor: f32) -> Result<()>;
}

/// Caller-supplied ids.
pub trait IdMapping {
    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()>;

    /// Returns the number of vectors removed.
    fn remove_ids(&mut self, ids: &[i64]) -> Result<usize>;
}

/// 按 ID 获取向量
pub trait Reconstruct {
    fn reconstruct(&self, key: i64) -> Result<Vec<f32>>;

    /// Vectors `i0..i0 + n`, row-major.
    fn reconstruct_n(&self, i0: i64, n: usize) -> Result<Vec<f32>>;

    fn reconstruct_batch(&self, keys: &[i64]) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        for &key in keys {
            out.extend(self.reconstruct(key)?);
        }
        Ok(out)
    }
}

/// 范围搜索 (Range search)
pub trait RangeSearch {
    fn range_search(&self, queries: &[f32], radius: f32) -> Result<RangeSearchResult>;
}

fn unsupported(capability: Capability, variant: &'static str) -> FaissError {
    FaissError::CapabilityUnsupported { capability, variant }
}

/// Capability dispatch.
///
/// Each accessor queries the wrapper for the surface and reports
/// `CapabilityUnsupported` when it is absent:
///
/// ```ignore
/// index.probe_control_mut()?.set_nprobe(8)?;
/// ```
pub trait IndexExt: Index {
    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::ProbeCount => self.as_probe_control().is_some(),
            Capability::SearchEffort => self.as_search_effort().is_some(),
            Capability::RefineFactor => self.as_refine_factor().is_some(),
            Capability::IdMapping => self.as_id_mapping().is_some(),
            Capability::Reconstruct => self.as_reconstruct().is_some(),
            Capability::RangeSearch => self.as_range_search().is_some(),
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.supports(*c))
            .collect()
    }

    fn probe_control(&self) -> Result<&dyn ProbeControl> {
        let variant = self.variant();
        self.as_probe_control()
            .ok_or_else(|| unsupported(Capability::ProbeCount, variant))
    }

    fn probe_control_mut(&mut self) -> Result<&mut dyn ProbeControl> {
        let variant = self.variant();
        self.as_probe_control_mut()
            .ok_or_else(|| unsupported(Capability::ProbeCount, variant))
    }

    fn search_effort(&self) -> Result<&dyn SearchEffort> {
        let variant = self.variant();
        self.as_search_effort()
            .ok_or_else(|| unsupported(Capability::SearchEffort, variant))
    }

    fn search_effort_mut(&mut self) -> Result<&mut dyn SearchEffort> {
        let variant = self.variant();
        self.as_search_effort_mut()
            .ok_or_else(|| unsupported(Capability::SearchEffort, variant))
    }

    fn refine_factor(&self) -> Result<&dyn RefineFactor> {
        let variant = self.variant();
        self.as_refine_factor()
            .ok_or_else(|| unsupported(Capability::RefineFactor, variant))
    }

    fn refine_factor_mut(&mut self) -> Result<&mut dyn RefineFactor> {
        let variant = self.variant();
        self.as_refine_factor_mut()
            .ok_or_else(|| unsupported(Capability::RefineFactor, variant))
    }

    fn id_mapping_mut(&mut self) -> Result<&mut dyn IdMapping> {
        let variant = self.variant();
        self.as_id_mapping_mut()
            .ok_or_else(|| unsupported(Capability::IdMapping, variant))
    }

    fn reconstructor(&self) -> Result<&dyn Reconstruct> {
        let variant = self.variant();
        self.as_reconstruct()
            .ok_or_else(|| unsupported(Capability::Reconstruct, variant))
    }

    fn range_searcher(&self) -> Result<&dyn RangeSearch> {
        let variant = self.variant();
        self.as_range_search()
            .ok_or_else(|| unsupported(Capability::RangeSearch, variant))
    }
}

impl<T: Index + ?Sized> IndexExt for T {}
