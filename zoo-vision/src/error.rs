//! Errors raised while constructing vision models

use std::path::PathBuf;

use model_zoo::Architecture;

/// Errors that can occur while building an architecture
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("invalid configuration for {architecture}: {reason}")]
    InvalidConfiguration { architecture: Architecture, reason: String },

    #[error("pre-trained weights for {architecture} not available at {}", path.display())]
    WeightsUnavailable { architecture: Architecture, path: PathBuf },

    #[error("invalid shape in layer '{layer}': {reason}")]
    InvalidShape { layer: String, reason: String },

    #[error("{architecture} is not supported by the {backend} backend")]
    UnsupportedArchitecture { architecture: Architecture, backend: &'static str },

    #[cfg(feature = "tch")]
    #[error("tensor operation failed: {source}")]
    Tch {
        #[from]
        source: tch::TchError,
    },
}

impl VisionError {
    pub(crate) fn config(architecture: Architecture, reason: impl Into<String>) -> Self {
        VisionError::InvalidConfiguration { architecture, reason: reason.into() }
    }

    /// Whether the configuration bundle itself was rejected
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, VisionError::InvalidConfiguration { .. })
    }
}
