//! Library context
//!
//! A [`Library`] bundles the native collaborator with the telemetry
//! collector, the ownership graph and the configuration. Every wrapper is
//! built from a `&Library` and keeps the pieces it needs; nothing is global.

use std::sync::Arc;

use tracing::info;

use crate::config::{BackendKind, LibraryConfig};
use crate::error::{FaissError, Result};
use crate::ffi::{NativeBackend, SimBackend, SimStats};
use crate::ownership::OwnershipGraph;
use crate::telemetry::Telemetry;

#[derive(Clone)]
pub struct Library {
    backend: Arc<dyn NativeBackend>,
    sim: Option<Arc<SimBackend>>,
    telemetry: Arc<Telemetry>,
    graph: Arc<OwnershipGraph>,
    config: Arc<LibraryConfig>,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Library {
    /// Library over a fresh simulated collaborator with default settings.
    pub fn simulated() -> Self {
        Self::simulated_with(LibraryConfig::simulated())
    }

    fn simulated_with(config: LibraryConfig) -> Self {
        let sim = Arc::new(SimBackend::new());
        let backend: Arc<dyn NativeBackend> = sim.clone();
        let mut lib = Self::assemble(backend, config);
        lib.sim = Some(sim);
        lib
    }

    /// Library over the faiss C API.
    #[cfg(feature = "faiss")]
    pub fn native() -> Self {
        Self::assemble(Arc::new(crate::ffi::FaissBackend::new()), LibraryConfig::faiss())
    }

    pub fn from_config(config: LibraryConfig) -> Result<Self> {
        config.validate()?;
        match config.backend {
            BackendKind::Simulated => Ok(Self::simulated_with(config)),
            #[cfg(feature = "faiss")]
            BackendKind::Faiss => Ok(Self::assemble(Arc::new(crate::ffi::FaissBackend::new()), config)),
            #[cfg(not(feature = "faiss"))]
            BackendKind::Faiss => Err(FaissError::Config(
                "backend `faiss` requires the `faiss` feature".into(),
            )),
        }
    }

    /// Library over a caller-supplied collaborator.
    pub fn with_backend(backend: Arc<dyn NativeBackend>, config: LibraryConfig) -> Self {
        Self::assemble(backend, config)
    }

    fn assemble(backend: Arc<dyn NativeBackend>, config: LibraryConfig) -> Self {
        info!("faiss-guard library initialised with {} backend", backend.name());
        Self {
            telemetry: Arc::new(Telemetry::new(config.telemetry)),
            graph: Arc::new(OwnershipGraph::new()),
            config: Arc::new(config),
            backend,
            sim: None,
        }
    }

    pub fn backend(&self) -> &Arc<dyn NativeBackend> {
        &self.backend
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn graph(&self) -> &Arc<OwnershipGraph> {
        &self.graph
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// Create / free accounting, when running on the simulated collaborator.
    pub fn sim_stats(&self) -> Option<SimStats> {
        self.sim.as_ref().map(|s| s.stats())
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::simulated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_library() {
        let lib = Library::simulated();
        assert_eq!(lib.backend().name(), "simulated");
        assert_eq!(lib.sim_stats().unwrap().creates, 0);
        assert!(lib.telemetry().is_enabled());
    }

    #[test]
    fn test_from_config_applies_telemetry_flag() {
        let config = LibraryConfig { telemetry: false, ..LibraryConfig::default() };
        let lib = Library::from_config(config).unwrap();
        assert!(!lib.telemetry().is_enabled());
    }

    #[test]
    fn test_contexts_are_isolated() {
        let a = Library::simulated();
        let b = Library::simulated();
        a.graph().register("IndexFlat");
        assert_eq!(a.graph().len(), 1);
        assert!(b.graph().is_empty());
    }

    #[cfg(not(feature = "faiss"))]
    #[test]
    fn test_faiss_config_without_feature() {
        assert!(matches!(
            Library::from_config(LibraryConfig::faiss()),
            Err(FaissError::Config(_))
        ));
    }
}
