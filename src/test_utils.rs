//! In-memory backend for exercising the loader without a numeric library
//!
//! [`FakeBackend`] keeps its own active-context slot, records every write to
//! it, and can be told to fail, panic or swap the active context while
//! constructing a particular architecture.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{Backend, ExecutionContext, LookupError, Model};
use crate::config::{AppConfig, Weights};
use crate::registry::Architecture;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Named tensor handle produced by the fake backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeTensor {
    name: String,
    context: u64,
}

impl FakeTensor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the context whose graph owns this tensor
    pub fn context_id(&self) -> u64 {
        self.context
    }
}

#[derive(Debug)]
struct FakeContextState {
    id: u64,
    label: String,
    tensors: Mutex<BTreeSet<String>>,
}

/// Execution context holding a flat set of tensor names.
#[derive(Debug, Clone)]
pub struct FakeContext {
    state: Arc<FakeContextState>,
}

impl FakeContext {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            state: Arc::new(FakeContextState {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                tensors: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn label(&self) -> &str {
        &self.state.label
    }

    /// Add a tensor to this context's graph
    pub fn register(&self, name: &str) -> FakeTensor {
        lock(&self.state.tensors).insert(name.to_string());
        FakeTensor { name: name.to_string(), context: self.state.id }
    }

    pub fn tensor_count(&self) -> usize {
        lock(&self.state.tensors).len()
    }
}

impl PartialEq for FakeContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl ExecutionContext for FakeContext {
    type Tensor = FakeTensor;

    fn tensor_by_name(&self, name: &str) -> Result<FakeTensor, LookupError> {
        match name.rsplit_once(':') {
            Some((_, index)) if index.parse::<usize>().is_ok() => {}
            _ => {
                return Err(LookupError::InvalidName(format!(
                    "'{name}' does not have the form '<op_name>:<output_index>'"
                )))
            }
        }
        if lock(&self.state.tensors).contains(name) {
            Ok(FakeTensor { name: name.to_string(), context: self.state.id })
        } else {
            Err(LookupError::NotFound)
        }
    }

    fn same_context(&self, other: &Self) -> bool {
        self == other
    }
}

/// Model with optional endpoints.
#[derive(Debug, Clone)]
pub struct FakeModel {
    input: Option<FakeTensor>,
    output: Option<FakeTensor>,
}

impl FakeModel {
    /// Model with `input_1:0` and `predictions/Softmax:0` endpoints plus the
    /// given extra tensors, all registered in `context`
    pub fn with_extras(context: &FakeContext, extras: &[&str]) -> Self {
        for name in extras {
            context.register(name);
        }
        Self {
            input: Some(context.register("input_1:0")),
            output: Some(context.register("predictions/Softmax:0")),
        }
    }

    /// Model without any endpoints
    pub fn headless() -> Self {
        Self { input: None, output: None }
    }
}

impl Model for FakeModel {
    type Tensor = FakeTensor;

    fn input_at(&self, index: usize) -> Option<FakeTensor> {
        if index == 0 {
            self.input.clone()
        } else {
            None
        }
    }

    fn output_at(&self, index: usize) -> Option<FakeTensor> {
        if index == 0 {
            self.output.clone()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FakeError {
    #[error("configuration rejected: {0}")]
    Rejected(String),

    #[error("weights unavailable for {0}")]
    WeightsUnavailable(String),
}

#[derive(Debug, Clone)]
enum Behaviour {
    Fail(FakeError),
    Panic,
    SwapContext(FakeContext),
}

/// Backend double with its own active-context slot.
#[derive(Debug)]
pub struct FakeBackend {
    active: Mutex<FakeContext>,
    context_writes: AtomicUsize,
    constructions: AtomicUsize,
    behaviour: HashMap<Architecture, Behaviour>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(FakeContext::new("default")),
            context_writes: AtomicUsize::new(0),
            constructions: AtomicUsize::new(0),
            behaviour: HashMap::new(),
        }
    }

    /// Fail construction of `architecture` with `error`
    pub fn fail_on(mut self, architecture: Architecture, error: FakeError) -> Self {
        self.behaviour.insert(architecture, Behaviour::Fail(error));
        self
    }

    /// Panic while constructing `architecture`
    pub fn panic_on(mut self, architecture: Architecture) -> Self {
        self.behaviour.insert(architecture, Behaviour::Panic);
        self
    }

    /// Activate `context` from inside the constructor of `architecture` and
    /// build the model there
    pub fn swap_context_on(mut self, architecture: Architecture, context: FakeContext) -> Self {
        self.behaviour.insert(architecture, Behaviour::SwapContext(context));
        self
    }

    /// Number of writes to the active-context slot so far
    pub fn context_writes(&self) -> usize {
        self.context_writes.load(Ordering::SeqCst)
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    fn build_in(context: &FakeContext, architecture: Architecture, config: &AppConfig) -> FakeModel {
        let features = context.register(&format!("{}/features:0", architecture.name()));
        let output = if config.include_top {
            context.register("predictions/Softmax:0")
        } else {
            features
        };
        FakeModel { input: Some(context.register("input_1:0")), output: Some(output) }
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for FakeBackend {
    type Context = FakeContext;
    type Model = FakeModel;
    type Error = FakeError;

    fn name(&self) -> &'static str {
        "fake"
    }

    fn active_context(&self) -> FakeContext {
        lock(&self.active).clone()
    }

    fn set_active_context(&self, context: FakeContext) {
        self.context_writes.fetch_add(1, Ordering::SeqCst);
        *lock(&self.active) = context;
    }

    fn new_context(&self) -> FakeContext {
        FakeContext::new("fresh")
    }

    fn construct(
        &self,
        architecture: Architecture,
        config: &AppConfig,
    ) -> Result<FakeModel, FakeError> {
        self.constructions.fetch_add(1, Ordering::SeqCst);

        if config.weights == Weights::ImageNet && config.include_top && config.classes != 1000 {
            return Err(FakeError::Rejected(
                "classes must be 1000 when loading imagenet weights with the top".into(),
            ));
        }

        match self.behaviour.get(&architecture) {
            Some(Behaviour::Fail(error)) => Err(error.clone()),
            Some(Behaviour::Panic) => panic!("{} constructor panicked", architecture),
            Some(Behaviour::SwapContext(replacement)) => {
                self.set_active_context(replacement.clone());
                Ok(Self::build_in(replacement, architecture, config))
            }
            None => Ok(Self::build_in(&self.active_context(), architecture, config)),
        }
    }
}
