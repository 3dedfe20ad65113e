//! Index factory
//!
//! Builds an index from a faiss description string such as
//! `"IDMap,PCA32,IVF64,PQ8"`. The description is interpreted by the native
//! library; everything it creates is owned by the returned object, so the
//! result carries no keep-alive dependencies.

use tracing::debug;

use crate::error::{FaissError, Result};
use crate::faiss::{check_dim, check_float_metric, GenericIndex};
use crate::ffi::Constructor;
use crate::handle::Handle;
use crate::library::Library;
use crate::metrics::MetricType;

pub fn index_factory(lib: &Library, d: usize, description: &str, metric: MetricType) -> Result<GenericIndex> {
    check_dim(d)?;
    check_float_metric(metric)?;
    let description = description.trim();
    if description.is_empty() {
        return Err(FaissError::validation("index factory description is empty"));
    }
    let handle = Handle::create(lib, "FactoryIndex", &Constructor::Factory { d, description, metric })?;
    debug!("index_factory({}, {:?}) -> {}", d, description, handle.node());
    GenericIndex::from_handle(lib, handle, Some(description.to_string()))
}
