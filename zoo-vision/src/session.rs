//! Sessions and the process-wide active session slot
//!
//! Mirrors the Keras backend: models are always built into the graph of the
//! session returned by [`get_session`], which creates a default session on
//! first use. [`set_session`] replaces the active session for the whole
//! process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use model_zoo::{ExecutionContext, LookupError};

use crate::graph::{Graph, SymbolicTensor};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct SessionState {
    id: u64,
    graph: Graph,
}

/// Execution context owning one symbolic graph. Cloning shares the session.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<SessionState>,
}

impl Session {
    /// A new session with an empty graph
    pub fn new() -> Self {
        Self {
            state: Arc::new(SessionState {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                graph: Graph::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn graph(&self) -> &Graph {
        &self.state.graph
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for Session {}

impl ExecutionContext for Session {
    type Tensor = SymbolicTensor;

    fn tensor_by_name(&self, name: &str) -> Result<SymbolicTensor, LookupError> {
        self.graph().tensor_by_name(name)
    }

    fn same_context(&self, other: &Self) -> bool {
        self == other
    }
}

fn active_slot() -> MutexGuard<'static, Option<Session>> {
    static ACTIVE: OnceLock<Mutex<Option<Session>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(None)).lock().unwrap_or_else(PoisonError::into_inner)
}

/// The active session, creating a default one if none is set
pub fn get_session() -> Session {
    let mut slot = active_slot();
    match slot.as_ref() {
        Some(session) => session.clone(),
        None => {
            let session = Session::new();
            tracing::debug!(session = session.id(), "created default session");
            *slot = Some(session.clone());
            session
        }
    }
}

/// Make `session` the active session
pub fn set_session(session: Session) {
    *active_slot() = Some(session);
}

/// Drop the active session; the next [`get_session`] starts a fresh graph
pub fn clear_session() {
    *active_slot() = None;
}
