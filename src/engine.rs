//! The boundary to the owning permissions engine.
//!
//! Stores never create threads or runtimes. The engine hands over a handle to
//! its tokio runtime during `initialize`, and every backend call is dispatched
//! onto it.

use tokio::runtime::Handle;

/// The engine that owns a data store.
pub trait PermissionsEngine: Send + Sync {
    /// The runtime backend operations are dispatched onto.
    fn async_executor(&self) -> Handle;
}

/// Minimal engine wrapping an existing runtime handle.
#[derive(Debug, Clone)]
pub struct RuntimeEngine {
    handle: Handle,
}

impl RuntimeEngine {
    /// Engine dispatching onto `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Engine for the runtime of the calling task.
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl PermissionsEngine for RuntimeEngine {
    fn async_executor(&self) -> Handle {
        self.handle.clone()
    }
}
