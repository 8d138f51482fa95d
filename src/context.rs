//! Scoped activation of an execution context
//!
//! [`ActiveContextGuard`] swaps a backend's active context for the lifetime
//! of the guard and puts the previous one back when dropped, including
//! during unwinding. Guards are serialised by a process-wide loader mutex so
//! two threads never interleave their save/swap/restore sequences.

use std::cell::Cell;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::backend::{Backend, ExecutionContext};
use crate::error::ScopeError;

thread_local! {
    static SCOPE_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

fn loader_lock() -> MutexGuard<'static, ()> {
    static LOADER_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
    // The mutex guards no data; a panic inside a scope has already restored
    // the previous context by the time the lock is poisoned.
    LOADER_MUTEX.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the current thread as inside a scope until dropped.
struct ThreadScope;

impl ThreadScope {
    fn enter() -> Result<Self, ScopeError> {
        if SCOPE_ACTIVE.with(Cell::get) {
            return Err(ScopeError::Reentrant);
        }
        SCOPE_ACTIVE.with(|active| active.set(true));
        Ok(ThreadScope)
    }
}

impl Drop for ThreadScope {
    fn drop(&mut self) {
        SCOPE_ACTIVE.with(|active| active.set(false));
    }
}

/// Guard object that restores the previously active context upon drop.
pub struct ActiveContextGuard<'a, B: Backend> {
    backend: &'a B,
    requested: B::Context,
    previous: Option<B::Context>,
    // Dropped after `Drop::drop` has restored `previous`.
    _serial: MutexGuard<'static, ()>,
    _thread: ThreadScope,
}

impl<'a, B: Backend> ActiveContextGuard<'a, B> {
    /// Activate `context` on `backend` until the guard is dropped.
    pub fn enter(backend: &'a B, context: B::Context) -> Result<Self, ScopeError> {
        let thread = ThreadScope::enter()?;
        let serial = loader_lock();

        let previous = backend.active_context();
        backend.set_active_context(context.clone());
        tracing::debug!(backend = backend.name(), "activated caller context");

        Ok(Self {
            backend,
            requested: context,
            previous: Some(previous),
            _serial: serial,
            _thread: thread,
        })
    }

    /// The context this guard activated
    pub fn requested(&self) -> &B::Context {
        &self.requested
    }

    /// The context that was active when the guard was created
    pub fn previous(&self) -> &B::Context {
        self.previous.as_ref().unwrap_or(&self.requested)
    }

    /// Whether the backend's active context is still the one this guard set
    pub fn is_undisturbed(&self) -> bool {
        self.backend.active_context().same_context(&self.requested)
    }
}

impl<B: Backend> Drop for ActiveContextGuard<'_, B> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.backend.set_active_context(previous);
            tracing::debug!(backend = self.backend.name(), "restored previous context");
        }
    }
}

/// Run `work` with `context` active on `backend`, restoring the previous
/// context afterwards whether `work` returns or panics.
pub fn with_active_context<B, R, F>(
    backend: &B,
    context: B::Context,
    work: F,
) -> Result<R, ScopeError>
where
    B: Backend,
    F: FnOnce(&B::Context) -> R,
{
    let guard = ActiveContextGuard::enter(backend, context)?;
    Ok(work(guard.requested()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeBackend, FakeContext};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_guard_swaps_and_restores() {
        let backend = FakeBackend::new();
        let outer = backend.active_context();
        let inner = FakeContext::new("inner");

        {
            let guard = ActiveContextGuard::enter(&backend, inner.clone()).unwrap();
            assert!(backend.active_context().same_context(&inner));
            assert!(guard.is_undisturbed());
            assert!(guard.previous().same_context(&outer));
        }

        assert!(backend.active_context().same_context(&outer));
        assert_eq!(backend.context_writes(), 2);
    }

    #[test]
    fn test_restores_after_panic() {
        let backend = FakeBackend::new();
        let outer = backend.active_context();

        let result = catch_unwind(AssertUnwindSafe(|| {
            with_active_context(&backend, FakeContext::new("doomed"), |_| panic!("boom"))
        }));

        assert!(result.is_err());
        assert!(backend.active_context().same_context(&outer));

        // The loader mutex recovers from the poisoning above
        let value = with_active_context(&backend, FakeContext::new("after"), |ctx| {
            ctx.label().to_string()
        })
        .unwrap();
        assert_eq!(value, "after");
    }

    #[test]
    fn test_nested_scope_is_rejected() {
        let backend = FakeBackend::new();
        let outer = backend.active_context();

        let nested = with_active_context(&backend, FakeContext::new("a"), |_| {
            with_active_context(&backend, FakeContext::new("b"), |_| ()).unwrap_err()
        })
        .unwrap();

        assert_eq!(nested, ScopeError::Reentrant);
        assert!(backend.active_context().same_context(&outer));
    }
}
