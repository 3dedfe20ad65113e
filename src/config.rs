//! Library configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FaissError, Result};

/// Native collaborator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process reference collaborator
    #[default]
    Simulated,
    /// faiss C API (requires the `faiss` feature)
    Faiss,
}

/// Library configuration
///
/// ```json
/// { "backend": "simulated", "telemetry": true, "default_nprobe": 8 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Record counters in the library's telemetry collector
    #[serde(default = "default_telemetry")]
    pub telemetry: bool,
    /// Probe count applied to newly built inverted-file wrappers
    #[serde(default)]
    pub default_nprobe: Option<usize>,
    /// efSearch applied to newly built graph wrappers
    #[serde(default)]
    pub default_ef_search: Option<usize>,
}

fn default_telemetry() -> bool {
    true
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            telemetry: default_telemetry(),
            default_nprobe: None,
            default_ef_search: None,
        }
    }
}

impl LibraryConfig {
    pub fn simulated() -> Self {
        Self::default()
    }

    pub fn faiss() -> Self {
        Self { backend: BackendKind::Faiss, ..Self::default() }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_nprobe == Some(0) {
            return Err(FaissError::Config("default_nprobe must be > 0".into()));
        }
        if self.default_ef_search == Some(0) {
            return Err(FaissError::Config("default_ef_search must be > 0".into()));
        }
        if self.backend == BackendKind::Faiss && !cfg!(feature = "faiss") {
            return Err(FaissError::Config(
                "backend `faiss` requires the `faiss` feature".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let c = LibraryConfig::from_json_str("{}").unwrap();
        assert_eq!(c, LibraryConfig::default());
        assert!(c.telemetry);
        assert_eq!(c.backend, BackendKind::Simulated);
    }

    #[test]
    fn test_parse_fields() {
        let c = LibraryConfig::from_json_str(
            r#"{"backend": "simulated", "telemetry": false, "default_nprobe": 4, "default_ef_search": 64}"#,
        )
        .unwrap();
        assert!(!c.telemetry);
        assert_eq!(c.default_nprobe, Some(4));
        assert_eq!(c.default_ef_search, Some(64));
    }

    #[test]
    fn test_rejects_zero_defaults() {
        assert!(matches!(
            LibraryConfig::from_json_str(r#"{"default_nprobe": 0}"#),
            Err(FaissError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            LibraryConfig::from_json_str("{backend"),
            Err(FaissError::Config(_))
        ));
    }

    #[cfg(not(feature = "faiss"))]
    #[test]
    fn test_faiss_backend_needs_feature() {
        assert!(matches!(LibraryConfig::faiss().validate(), Err(FaissError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faiss.json");
        std::fs::write(&path, LibraryConfig::simulated().to_json().unwrap()).unwrap();
        assert_eq!(LibraryConfig::from_file(&path).unwrap(), LibraryConfig::simulated());
    }
}
