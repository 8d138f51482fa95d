//! Error types for loading and configuration

use std::path::PathBuf;

/// Errors raised while scoping the active context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("a model load is already in progress on this thread; constructors must not load models")]
    Reentrant,
}

/// Errors returned by the loader and every architecture entry point.
///
/// Backend failures are carried unmodified in [`LoadError::Construction`].
#[derive(Debug, thiserror::Error)]
pub enum LoadError<E>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Construction(E),

    #[error("tensor '{name}' not found in graph")]
    TensorNotFound { name: String },

    #[error("invalid tensor name '{name}': {reason}")]
    InvalidTensorName { name: String, reason: String },

    #[error("model has no {endpoint} tensor at index 0")]
    MissingEndpoint { endpoint: &'static str },

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

impl<E> LoadError<E>
where
    E: std::error::Error + 'static,
{
    /// The backend error, if construction failed
    pub fn construction(&self) -> Option<&E> {
        match self {
            LoadError::Construction(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the failure was a name lookup in the constructed graph
    pub fn is_lookup_failure(&self) -> bool {
        matches!(self, LoadError::TensorNotFound { .. } | LoadError::InvalidTensorName { .. })
    }
}

/// Errors reading configuration bundles or settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read configuration from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown architecture: {0}")]
    UnknownArchitecture(String),
}
