//! faiss-guard - resource-safe bindings over faiss
//!
//! Every native object is owned by exactly one wrapper. Wrappers release
//! their object on `close()` (idempotent) and, as a leak backstop, on drop.
//! Composites keep the wrappers they were built from alive, and optional
//! variant surfaces are reached through capability queries on [`Index`].
//!
//! ```ignore
//! use faiss_guard::{IndexExt, IvfFlatIndex, Library, MetricType};
//!
//! let lib = Library::simulated();
//! let mut index = IvfFlatIndex::new(&lib, 64, 16, MetricType::L2)?;
//! index.train(&training)?;
//! index.add(&vectors)?;
//! index.probe_control_mut()?.set_nprobe(4)?;
//! let result = index.search(&queries, 10)?;
//! index.close()?;
//! ```

pub mod api;
pub mod clustering;
pub mod config;
pub mod error;
pub mod factory;
pub mod faiss;
pub mod ffi;
pub mod handle;
pub mod index;
pub mod library;
pub mod metrics;
pub mod ownership;
pub mod persistence;
pub mod telemetry;
pub mod transform;

pub use api::{
    build_index, BinarySearchResult, IndexConfig, IndexParams, IndexType, RangeSearchResult, SearchResult,
};
pub use clustering::Kmeans;
pub use config::{BackendKind, LibraryConfig};
pub use error::{FaissError, Result};
pub use factory::index_factory;
pub use faiss::{
    BinaryFlatIndex, BinaryHashIndex, BinaryIndex, BinaryIndexExt, BinaryIvfIndex, FlatIndex,
    GenericIndex, HnswIndex, IdMapIndex, IvfFlatIndex, IvfPqFastScanIndex, IvfPqIndex,
    IvfScalarQuantizerIndex, LshIndex, PqFastScanIndex, PqIndex, PreTransformIndex, RefineIndex,
    ScalarQuantizerIndex, ShardedIndex,
};
pub use ffi::QuantizerType;
pub use index::{
    Capability, Dependency, IdMapping, Index, IndexExt, ProbeControl, RangeSearch, Reconstruct,
    RefineFactor, SearchEffort, SharedIndex,
};
pub use library::Library;
pub use metrics::MetricType;
pub use persistence::{deserialize_index, read_index, serialize_index, write_index};
pub use telemetry::{Telemetry, TelemetrySnapshot};
pub use transform::VectorTransform;

use tracing::info;

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    info!("faiss-guard {} initialized", env!("CARGO_PKG_VERSION"));
}
