//! Symbolic computation graphs
//!
//! A [`Graph`] records every tensor produced while building models in a
//! session. Tensors are named the TensorFlow way, `<op_name>:<output_index>`,
//! where the op name is the layer scope followed by the op type
//! (`block1_conv1/Relu:0`). Layer auto-names come from per-graph counters
//! (`activation_1`, `activation_2`, ...) and explicit names that repeat get a
//! numeric suffix (`conv1`, `conv1_1`).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use model_zoo::LookupError;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Dimension of a tensor shape; `None` when unknown (batch, dynamic input).
pub type Dim = Option<usize>;

#[derive(Debug)]
struct TensorInfo {
    name: String,
    scope: String,
    op_type: String,
    shape: Vec<Dim>,
    graph: u64,
}

/// Handle to a tensor recorded in a [`Graph`].
#[derive(Debug, Clone)]
pub struct SymbolicTensor(Arc<TensorInfo>);

impl SymbolicTensor {
    /// Full tensor name, e.g. `fc1000/Softmax:0`
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Name scope of the producing layer, e.g. `fc1000`
    pub fn scope(&self) -> &str {
        &self.0.scope
    }

    /// Type of the producing op, e.g. `Softmax`
    pub fn op_type(&self) -> &str {
        &self.0.op_type
    }

    /// Shape including the leading (unknown) batch dimension
    pub fn shape(&self) -> &[Dim] {
        &self.0.shape
    }

    pub fn rank(&self) -> usize {
        self.0.shape.len()
    }

    /// Size of the last dimension (channels or units)
    pub fn channels(&self) -> Option<usize> {
        self.0.shape.last().copied().flatten()
    }

    /// Id of the owning graph
    pub fn graph_id(&self) -> u64 {
        self.0.graph
    }
}

impl PartialEq for SymbolicTensor {
    fn eq(&self, other: &Self) -> bool {
        self.0.graph == other.0.graph && self.0.name == other.0.name
    }
}

impl Eq for SymbolicTensor {}

impl fmt::Display for SymbolicTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> =
            self.shape().iter().map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string())).collect();
        write!(f, "{} [{}]", self.name(), dims.join(", "))
    }
}

#[derive(Debug, Default)]
struct GraphState {
    tensors: HashMap<String, SymbolicTensor>,
    order: Vec<String>,
    layer_uids: HashMap<String, usize>,
    scopes: HashMap<String, usize>,
}

/// Named collection of tensors shared by every model built in one session.
#[derive(Debug)]
pub struct Graph {
    id: u64,
    state: RwLock<GraphState>,
}

impl Graph {
    pub fn new() -> Self {
        Self { id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed), state: RwLock::default() }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next auto-generated layer name for `prefix`: `prefix_1`, `prefix_2`, ...
    pub fn next_layer_name(&self, prefix: &str) -> String {
        let mut state = self.write();
        let uid = state.layer_uids.entry(prefix.to_string()).or_insert(0);
        *uid += 1;
        format!("{prefix}_{uid}")
    }

    /// Claim a name scope, suffixing `_1`, `_2`, ... if `name` is taken.
    pub fn unique_scope(&self, name: &str) -> String {
        let mut state = self.write();
        let mut count = state.scopes.get(name).copied().unwrap_or(0);
        let mut candidate = if count == 0 { name.to_string() } else { format!("{name}_{count}") };
        while state.scopes.contains_key(&candidate) && candidate != name {
            count += 1;
            candidate = format!("{name}_{count}");
        }
        state.scopes.insert(name.to_string(), count + 1);
        if candidate != name {
            state.scopes.insert(candidate.clone(), 1);
        }
        candidate
    }

    /// Record the output of op `op_type` in `scope`.
    ///
    /// An empty `op_type` names the tensor after the scope alone, which is how
    /// placeholders are named (`input_1:0`).
    pub fn add_tensor(&self, scope: &str, op_type: &str, shape: Vec<Dim>) -> SymbolicTensor {
        let name =
            if op_type.is_empty() { format!("{scope}:0") } else { format!("{scope}/{op_type}:0") };
        let tensor = SymbolicTensor(Arc::new(TensorInfo {
            name: name.clone(),
            scope: scope.to_string(),
            op_type: op_type.to_string(),
            shape,
            graph: self.id,
        }));

        let mut state = self.write();
        if state.tensors.insert(name.clone(), tensor.clone()).is_none() {
            state.order.push(name);
        }
        tensor
    }

    /// Look up a tensor by its exact name.
    pub fn tensor_by_name(&self, name: &str) -> Result<SymbolicTensor, LookupError> {
        let Some((_, index)) = name.rsplit_once(':') else {
            return Err(LookupError::InvalidName(format!(
                "the name '{name}' refers to an operation, not a tensor; tensor names must be of the form \"<op_name>:<output_index>\""
            )));
        };
        if index.parse::<usize>().is_err() {
            return Err(LookupError::InvalidName(format!(
                "the name '{name}' looks like a tensor name but is not a valid one; tensor names must be of the form \"<op_name>:<output_index>\""
            )));
        }
        self.read().tensors.get(name).cloned().ok_or(LookupError::NotFound)
    }

    /// Names of all tensors in creation order
    pub fn tensor_names(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
