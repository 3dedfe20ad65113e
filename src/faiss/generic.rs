//! Generic Index
//!
//! Wrapper for native objects whose concrete variant is only known to the
//! native side: factory output and loaded indexes. Metadata and training
//! state come from the native object. Probe-count and search-effort control
//! are offered when the object answers the matching interface query.

use crate::error::Result;
use crate::faiss::core::{IndexCore, Training};
use crate::handle::Handle;
use crate::index::{Index, ProbeControl, SearchEffort};
use crate::library::Library;

#[derive(Debug)]
pub struct GenericIndex {
    core: IndexCore,
    /// `Some` when the object is an inverted-file index.
    nlist: Option<usize>,
    graph: bool,
    description: Option<String>,
}

impl GenericIndex {
    pub(crate) fn from_handle(lib: &Library, handle: Handle, description: Option<String>) -> Result<Self> {
        let core = IndexCore::from_handle(lib, handle, Training::Native, Vec::new())?;
        // a non-zero status from the getter means "not this family"
        let nlist = core
            .handle()
            .call("faiss_IndexIVF_nlist", |b, p| unsafe { b.ivf_nlist(p) })
            .ok();
        let graph = core
            .handle()
            .call("faiss_IndexHNSW_efSearch", |b, p| unsafe { b.hnsw_ef_search(p) })
            .is_ok();

        let mut index = Self { core, nlist, graph, description };
        if let Some(nlist) = index.nlist {
            index.core.apply_default_nprobe(lib, nlist)?;
        }
        if index.graph {
            index.core.apply_default_ef_search(lib)?;
        }
        Ok(index)
    }

    /// Factory description this index was built from, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl Index for GenericIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IndexCore {
        &mut self.core
    }

    fn as_probe_control(&self) -> Option<&dyn ProbeControl> {
        self.nlist.map(|_| self as &dyn ProbeControl)
    }

    fn as_probe_control_mut(&mut self) -> Option<&mut dyn ProbeControl> {
        if self.nlist.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_search_effort(&self) -> Option<&dyn SearchEffort> {
        self.graph.then_some(self as &dyn SearchEffort)
    }

    fn as_search_effort_mut(&mut self) -> Option<&mut dyn SearchEffort> {
        if self.graph {
            Some(self)
        } else {
            None
        }
    }
}

impl ProbeControl for GenericIndex {
    fn nlist(&self) -> usize {
        self.nlist.unwrap_or(0)
    }

    fn nprobe(&self) -> Result<usize> {
        self.core.nprobe()
    }

    fn set_nprobe(&mut self, nprobe: usize) -> Result<()> {
        let nlist = self.nlist();
        self.core.set_nprobe(nprobe, nlist)
    }
}

impl SearchEffort for GenericIndex {
    fn ef_search(&self) -> Result<usize> {
        self.core.ef_search()
    }

    fn set_ef_search(&mut self, ef: usize) -> Result<()> {
        self.core.set_ef_search(ef)
    }

    fn ef_construction(&self) -> Result<usize> {
        self.core.ef_construction()
    }

    fn set_ef_construction(&mut self, ef: usize) -> Result<()> {
        self.core.set_ef_construction(ef)
    }
}
