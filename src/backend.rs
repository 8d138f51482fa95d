//! Capabilities the loader needs from a pre-trained model library
//!
//! The loader never touches a numeric library directly. A [`Backend`] owns
//! the process-wide active context and knows how to construct each
//! [`Architecture`]; the models it returns expose their endpoints through
//! [`Model`], and named tensors are resolved through [`ExecutionContext`].

use crate::config::AppConfig;
use crate::registry::Architecture;

/// Failure to resolve a tensor name inside a graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("tensor not found")]
    NotFound,

    #[error("{0}")]
    InvalidName(String),
}

/// An execution context: the environment models are built in and whose
/// graph owns the resulting tensors.
pub trait ExecutionContext: Clone {
    /// Handle to a tensor living in this context's graph
    type Tensor;

    /// Look up a tensor by its exact name in this context's graph
    fn tensor_by_name(&self, name: &str) -> Result<Self::Tensor, LookupError>;

    /// Whether both handles refer to the same underlying context
    fn same_context(&self, other: &Self) -> bool;
}

/// A constructed architecture instance.
pub trait Model {
    type Tensor;

    /// Input tensor at the given node index, `None` if the model has none
    fn input_at(&self, index: usize) -> Option<Self::Tensor>;

    /// Output tensor at the given node index, `None` if the model has none
    fn output_at(&self, index: usize) -> Option<Self::Tensor>;
}

/// A pre-trained model library.
///
/// Implementations own a process-wide "active context" slot. Only the loader
/// should call [`Backend::set_active_context`] while a load is in progress.
pub trait Backend {
    type Context: ExecutionContext;
    type Model: Model<Tensor = TensorOf<Self>>;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Short backend identifier used in log output
    fn name(&self) -> &'static str;

    /// The currently active context, created lazily if none is set
    fn active_context(&self) -> Self::Context;

    /// Replace the active context
    fn set_active_context(&self, context: Self::Context);

    /// Create a fresh context, used when the caller does not supply one
    fn new_context(&self) -> Self::Context;

    /// Build `architecture` in the active context
    fn construct(
        &self,
        architecture: Architecture,
        config: &AppConfig,
    ) -> Result<Self::Model, Self::Error>;
}

/// Tensor type produced by a backend.
pub type TensorOf<B> = <<B as Backend>::Context as ExecutionContext>::Tensor;
