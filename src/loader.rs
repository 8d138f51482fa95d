//! The context-scoped loader shared by every architecture entry point

use crate::backend::{Backend, ExecutionContext, LookupError, Model, TensorOf};
use crate::config::AppConfig;
use crate::context::ActiveContextGuard;
use crate::error::LoadError;

/// Tensors surfaced by a successful load.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    /// Input tensor of the model (node 0)
    pub input: T,
    /// Output tensor of the model (node 0): softmax or pooled features
    pub output: T,
    /// Requested named tensors, in request order
    pub extras: Vec<T>,
}

impl<T> Loaded<T> {
    pub fn into_parts(self) -> (T, T, Vec<T>) {
        (self.input, self.output, self.extras)
    }

    /// Number of tensors returned, counting input and output
    pub fn tensor_count(&self) -> usize {
        2 + self.extras.len()
    }
}

/// Result of loading a model through backend `B`.
pub type LoadResult<B> =
    Result<Loaded<TensorOf<B>>, LoadError<<B as Backend>::Error>>;

/// Construct a model against `context` without disturbing the active one.
///
/// `context` of `None` creates a fresh context through
/// [`Backend::new_context`]. `construct` receives `config` verbatim. After
/// construction each name in `include_tensors` is resolved, in order, in the
/// graph of whichever context is active at that point. The previously active
/// context is restored on every exit path, and either all requested tensors
/// are returned or none are.
pub fn load<B, F, S>(
    backend: &B,
    context: Option<B::Context>,
    construct: F,
    config: &AppConfig,
    include_tensors: &[S],
) -> LoadResult<B>
where
    B: Backend,
    F: FnOnce(&AppConfig) -> Result<B::Model, B::Error>,
    S: AsRef<str>,
{
    let context = context.unwrap_or_else(|| backend.new_context());
    let scope = ActiveContextGuard::enter(backend, context)?;

    let model = construct(config).map_err(LoadError::Construction)?;
    let input = model.input_at(0).ok_or(LoadError::MissingEndpoint { endpoint: "input" })?;
    let output = model.output_at(0).ok_or(LoadError::MissingEndpoint { endpoint: "output" })?;

    // Extra tensors are looked up in the context active after construction,
    // which is not necessarily the one this scope activated.
    let current = backend.active_context();
    if !current.same_context(scope.requested()) {
        tracing::warn!(
            backend = backend.name(),
            "constructor replaced the active context; resolving extra tensors in the replacement"
        );
    }

    let extras = include_tensors
        .iter()
        .map(|name| resolve(&current, name.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    drop(scope);
    Ok(Loaded { input, output, extras })
}

fn resolve<C, E>(context: &C, name: &str) -> Result<C::Tensor, LoadError<E>>
where
    C: ExecutionContext,
    E: std::error::Error + 'static,
{
    context.tensor_by_name(name).map_err(|err| match err {
        LookupError::NotFound => LoadError::TensorNotFound { name: name.to_string() },
        LookupError::InvalidName(reason) => {
            LoadError::InvalidTensorName { name: name.to_string(), reason }
        }
    })
}
