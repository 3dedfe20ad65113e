//! Error handling
//!
//! Every fallible operation returns [`FaissError`]. Host-side precondition
//! failures are reported before any native call is made; native failures carry
//! the raw status code and are never interpreted beyond zero / non-zero.

use thiserror::Error;

use crate::index::Capability;

/// Errors raised by the binding layer.
#[derive(Error, Debug)]
pub enum FaissError {
    /// A host-side precondition was violated. No native call was made.
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// A native call returned a non-zero status.
    #[error("Native call `{op}` failed with status {code}")]
    Native { code: i32, op: &'static str },

    /// The wrapper has already been released.
    #[error("Null handle: `{op}` called on a released object")]
    NullHandle { op: &'static str },

    /// The variant requires training and has not been trained.
    #[error("Index not trained: {variant} must be trained before {op}")]
    NotTrained {
        variant: &'static str,
        op: &'static str,
    },

    /// The variant does not expose the requested capability.
    #[error("Capability {capability} is not supported by {variant}")]
    CapabilityUnsupported {
        capability: Capability,
        variant: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl FaissError {
    pub fn validation(msg: impl Into<String>) -> Self {
        FaissError::Validation(msg.into())
    }

    /// True for errors raised without crossing the FFI boundary.
    pub fn is_host_side(&self) -> bool {
        !matches!(self, FaissError::Native { .. })
    }
}

impl From<serde_json::Error> for FaissError {
    fn from(e: serde_json::Error) -> Self {
        FaissError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FaissError>;
