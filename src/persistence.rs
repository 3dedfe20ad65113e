//! 索引持久化
//!
//! Passthrough to the native writer and reader. The byte layout belongs to
//! the native library. Loaded objects own their sub-indexes natively and
//! come back as [`GenericIndex`] with metadata queried from the object.

use std::ffi::CString;
use std::io;
use std::path::Path;

use tracing::info;

use crate::error::{FaissError, Result};
use crate::faiss::GenericIndex;
use crate::ffi::{ObjectKind, StatusExt};
use crate::handle::Handle;
use crate::index::Index;
use crate::library::Library;

const LOADED: &str = "LoadedIndex";

fn c_path(path: &Path) -> Result<CString> {
    let s = path
        .to_str()
        .ok_or_else(|| FaissError::validation(format!("path {} is not valid UTF-8", path.display())))?;
    CString::new(s).map_err(|_| FaissError::validation("path contains an interior NUL byte"))
}

/// Writes `index` to `path` in the native format.
pub fn write_index(index: &dyn Index, path: impl AsRef<Path>) -> Result<()> {
    const OP: &str = "faiss_write_index_fname";
    let path = path.as_ref();
    index.core().raw(OP)?;
    let c = c_path(path)?;
    index
        .core()
        .handle()
        .call(OP, |b, p| unsafe { b.write_index(p, &c) })?;
    info!("wrote {} to {}", index.variant(), path.display());
    Ok(())
}

/// Reads an index written by [`write_index`]. A missing file is reported
/// before the native reader runs.
pub fn read_index(lib: &Library, path: impl AsRef<Path>) -> Result<GenericIndex> {
    const OP: &str = "faiss_read_index_fname";
    let path = path.as_ref();
    if !path.is_file() {
        return Err(FaissError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("index file {} not found", path.display()),
        )));
    }
    let c = c_path(path)?;
    let raw = lib.backend().read_index(&c).op(OP)?;
    let handle = Handle::adopt(lib, ObjectKind::Index, LOADED, raw)?;
    info!("read index from {}", path.display());
    GenericIndex::from_handle(lib, handle, None)
}

/// Serializes `index` into an in-memory buffer.
pub fn serialize_index(index: &dyn Index) -> Result<Vec<u8>> {
    index
        .core()
        .handle()
        .call("faiss_serialize_index", |b, p| unsafe { b.serialize_index(p) })
}

pub fn deserialize_index(lib: &Library, data: &[u8]) -> Result<GenericIndex> {
    const OP: &str = "faiss_deserialize_index";
    if data.is_empty() {
        return Err(FaissError::validation("cannot deserialize an empty buffer"));
    }
    let raw = lib.backend().deserialize_index(data).op(OP)?;
    let handle = Handle::adopt(lib, ObjectKind::Index, LOADED, raw)?;
    GenericIndex::from_handle(lib, handle, None)
}
