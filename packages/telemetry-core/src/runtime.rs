//! Task spawning abstraction.
//!
//! Long-lived bridge tasks (the broker session, the pipeline and the store
//! writer) are spawned through a [`TaskSpawner`] instead of calling
//! `tokio::spawn` directly, so the composition root decides which runtime
//! hosts them.

use std::future::Future;

/// Abstraction for spawning background tasks.
///
/// Tasks run detached; callers that need to observe completion do so through
/// their own channels (e.g. the broker state watch).
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
