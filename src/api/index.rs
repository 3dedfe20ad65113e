//! Index types and configuration
//!
//! Serde descriptors that name a wrapper and its parameters, and
//! [`build_index`] turning one into a live index.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FaissError, Result};
use crate::factory::index_factory;
use crate::faiss::{
    FlatIndex, HnswIndex, IdMapIndex, IvfFlatIndex, IvfPqFastScanIndex, IvfPqIndex,
    IvfScalarQuantizerIndex, LshIndex, PqFastScanIndex, PqIndex, ScalarQuantizerIndex,
};
use crate::ffi::QuantizerType;
use crate::index::{Index, IndexExt, SharedIndex};
use crate::library::Library;
use crate::metrics::MetricType;

const DEFAULT_PQ_NBITS: usize = 8;
const DEFAULT_FASTSCAN_NBITS: usize = 4;
const DEFAULT_HNSW_M: usize = 32;

/// Index type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// Flat index - brute force
    #[default]
    Flat,
    /// IVF-Flat
    IvfFlat,
    /// IVF-PQ
    IvfPq,
    /// IVF-SQ
    IvfSq,
    /// HNSW
    Hnsw,
    /// Product quantizer
    Pq,
    /// PQ with 4-bit fast-scan codes
    PqFastScan,
    /// IVF with fast-scan PQ
    IvfPqFastScan,
    /// Scalar quantizer
    Sq,
    /// Locality sensitive hashing
    Lsh,
    /// Native factory description (`params.description`)
    Factory,
}

impl IndexType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "flat" => Some(IndexType::Flat),
            "ivf_flat" | "ivf-flat" => Some(IndexType::IvfFlat),
            "ivf_pq" | "ivf-pq" => Some(IndexType::IvfPq),
            "ivf_sq" | "ivf-sq" | "ivf_sq8" => Some(IndexType::IvfSq),
            "hnsw" => Some(IndexType::Hnsw),
            "pq" => Some(IndexType::Pq),
            "pq_fastscan" | "pq-fastscan" => Some(IndexType::PqFastScan),
            "ivf_pq_fastscan" | "ivf-pq-fastscan" => Some(IndexType::IvfPqFastScan),
            "sq" | "sq8" => Some(IndexType::Sq),
            "lsh" => Some(IndexType::Lsh),
            "factory" => Some(IndexType::Factory),
            _ => None,
        }
    }

    /// Whether `train` must run before `add`.
    pub fn needs_training(self) -> bool {
        matches!(
            self,
            IndexType::IvfFlat
                | IndexType::IvfPq
                | IndexType::IvfSq
                | IndexType::Pq
                | IndexType::Sq
                | IndexType::PqFastScan
                | IndexType::IvfPqFastScan
        )
    }
}

/// Index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index type
    pub index_type: IndexType,
    /// Metric type
    #[serde(default)]
    pub metric_type: MetricType,
    /// Vector dimension
    pub dim: usize,
    /// Index-specific parameters
    #[serde(default)]
    pub params: IndexParams,
}

impl IndexConfig {
    pub fn new(index_type: IndexType, metric_type: MetricType, dim: usize) -> Self {
        Self {
            index_type,
            metric_type,
            dim,
            params: IndexParams::default(),
        }
    }

    pub fn with_params(mut self, params: IndexParams) -> Self {
        self.params = params;
        self
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Index-specific parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    /// For IVF: number of inverted lists
    #[serde(default)]
    pub nlist: Option<usize>,
    /// For IVF: number of probes
    #[serde(default)]
    pub nprobe: Option<usize>,
    /// For PQ: number of subquantizers
    #[serde(default)]
    pub m: Option<usize>,
    /// For PQ / LSH: bits per code
    #[serde(default)]
    pub nbits: Option<usize>,
    /// For SQ: encoding
    #[serde(default)]
    pub qtype: Option<QuantizerType>,
    /// For HNSW: number of connections
    #[serde(default)]
    pub hnsw_m: Option<usize>,
    /// For HNSW: construction width
    #[serde(default)]
    pub ef_construction: Option<usize>,
    /// For HNSW: search width
    #[serde(default)]
    pub ef_search: Option<usize>,
    /// For Factory: description string
    #[serde(default)]
    pub description: Option<String>,
    /// Wrap the index in an IDMap
    #[serde(default)]
    pub id_map: bool,
}

impl IndexParams {
    pub fn ivf(nlist: usize, nprobe: usize) -> Self {
        Self {
            nlist: Some(nlist),
            nprobe: Some(nprobe),
            ..Default::default()
        }
    }

    pub fn ivf_pq(nlist: usize, nprobe: usize, m: usize, nbits: usize) -> Self {
        Self {
            m: Some(m),
            nbits: Some(nbits),
            ..Self::ivf(nlist, nprobe)
        }
    }

    pub fn hnsw(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            hnsw_m: Some(m),
            ef_construction: Some(ef_construction),
            ef_search: Some(ef_search),
            ..Default::default()
        }
    }

    pub fn pq(m: usize, nbits: usize) -> Self {
        Self {
            m: Some(m),
            nbits: Some(nbits),
            ..Default::default()
        }
    }

    pub fn factory(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }
}

fn require(value: Option<usize>, name: &str, index_type: IndexType) -> Result<usize> {
    value.ok_or_else(|| FaissError::validation(format!("{:?} requires `{}`", index_type, name)))
}

/// Builds the wrapper a config describes and applies its search parameters.
pub fn build_index(lib: &Library, config: &IndexConfig) -> Result<Box<dyn Index>> {
    let p = &config.params;
    let (d, metric, ty) = (config.dim, config.metric_type, config.index_type);

    let mut index: Box<dyn Index> = match ty {
        IndexType::Flat => Box::new(FlatIndex::new(lib, d, metric)?),
        IndexType::IvfFlat => Box::new(IvfFlatIndex::new(lib, d, require(p.nlist, "nlist", ty)?, metric)?),
        IndexType::IvfPq => Box::new(IvfPqIndex::new(
            lib,
            d,
            require(p.nlist, "nlist", ty)?,
            require(p.m, "m", ty)?,
            p.nbits.unwrap_or(DEFAULT_PQ_NBITS),
            metric,
        )?),
        IndexType::IvfSq => Box::new(IvfScalarQuantizerIndex::new(
            lib,
            d,
            require(p.nlist, "nlist", ty)?,
            p.qtype.unwrap_or_default(),
            metric,
        )?),
        IndexType::Hnsw => Box::new(HnswIndex::new(lib, d, p.hnsw_m.unwrap_or(DEFAULT_HNSW_M), metric)?),
        IndexType::Pq => Box::new(PqIndex::new(
            lib,
            d,
            require(p.m, "m", ty)?,
            p.nbits.unwrap_or(DEFAULT_PQ_NBITS),
            metric,
        )?),
        IndexType::PqFastScan => Box::new(PqFastScanIndex::new(
            lib,
            d,
            require(p.m, "m", ty)?,
            p.nbits.unwrap_or(DEFAULT_FASTSCAN_NBITS),
            metric,
        )?),
        IndexType::IvfPqFastScan => Box::new(IvfPqFastScanIndex::new(
            lib,
            d,
            require(p.nlist, "nlist", ty)?,
            require(p.m, "m", ty)?,
            p.nbits.unwrap_or(DEFAULT_FASTSCAN_NBITS),
            metric,
        )?),
        IndexType::Sq => Box::new(ScalarQuantizerIndex::new(lib, d, p.qtype.unwrap_or_default(), metric)?),
        IndexType::Lsh => Box::new(LshIndex::new(lib, d, p.nbits.unwrap_or(d))?),
        IndexType::Factory => {
            let description = p
                .description
                .as_deref()
                .ok_or_else(|| FaissError::validation("Factory requires `description`"))?;
            Box::new(index_factory(lib, d, description, metric)?)
        }
    };

    if let Some(nprobe) = p.nprobe {
        index.probe_control_mut()?.set_nprobe(nprobe)?;
    }
    if let Some(ef) = p.ef_construction {
        index.search_effort_mut()?.set_ef_construction(ef)?;
    }
    if let Some(ef) = p.ef_search {
        index.search_effort_mut()?.set_ef_search(ef)?;
    }

    if p.id_map {
        let base: SharedIndex = Arc::from(index);
        index = Box::new(IdMapIndex::new(lib, base)?);
    }
    debug!("built {} (d={}) from config", index.variant(), d);
    Ok(index)
}
