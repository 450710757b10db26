//! Runtime abstraction layer for async operations
//!
//! Tile fetches are the only asynchronous work in the crate. They are handed to
//! an [`AsyncSpawner`] so the host decides which executor runs them.

use crate::prelude::{Arc, Future, Mutex, Pin};
use crate::Result;
use std::collections::VecDeque;

pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A trait for spawning async tasks (object-safe version)
pub trait AsyncSpawner: Send + Sync + 'static {
    /// Spawn a detached future; its completion is observed through channels
    fn spawn_boxed(&self, future: BoxedTask);
}

/// Convenience wrapper for spawning with type safety
pub fn spawn<F>(spawner: &dyn AsyncSpawner, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    spawner.spawn_boxed(Box::pin(future));
}

/// Default spawner implementations
pub mod spawners {
    use super::*;

    #[cfg(feature = "tokio-runtime")]
    pub mod tokio_impl {
        use super::*;
        use crate::MapError;

        /// Tokio-based async spawner bound to a runtime handle
        #[derive(Debug, Clone)]
        pub struct TokioSpawner {
            handle: ::tokio::runtime::Handle,
        }

        impl TokioSpawner {
            pub fn new(handle: ::tokio::runtime::Handle) -> Self {
                Self { handle }
            }

            /// Spawner for the runtime the caller is running in
            pub fn current() -> Result<Self> {
                ::tokio::runtime::Handle::try_current()
                    .map(Self::new)
                    .map_err(|e| MapError::Runtime(e.to_string()))
            }
        }

        impl AsyncSpawner for TokioSpawner {
            fn spawn_boxed(&self, future: BoxedTask) {
                self.handle.spawn(future);
            }
        }
    }

    /// Collects spawned futures until the host drives them with
    /// [`run_pending`](QueuedSpawner::run_pending). Deterministic, used by tests
    /// and by hosts without an async runtime.
    #[derive(Clone, Default)]
    pub struct QueuedSpawner {
        queue: Arc<Mutex<VecDeque<BoxedTask>>>,
    }

    impl QueuedSpawner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn pending(&self) -> usize {
            self.queue.lock().map(|q| q.len()).unwrap_or(0)
        }

        /// Runs queued futures to completion, including ones queued while running.
        /// Returns how many futures ran.
        pub fn run_pending(&self) -> usize {
            let mut ran = 0;
            loop {
                // The lock must not be held while the future runs, it may spawn
                let next = match self.queue.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => None,
                };
                let Some(future) = next else {
                    break;
                };
                futures::executor::block_on(future);
                ran += 1;
            }
            ran
        }
    }

    impl std::fmt::Debug for QueuedSpawner {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("QueuedSpawner")
                .field("pending", &self.pending())
                .finish()
        }
    }

    impl AsyncSpawner for QueuedSpawner {
        fn spawn_boxed(&self, future: BoxedTask) {
            if let Ok(mut queue) = self.queue.lock() {
                queue.push_back(future);
            }
        }
    }
}

pub use spawners::QueuedSpawner;
#[cfg(feature = "tokio-runtime")]
pub use spawners::tokio_impl::TokioSpawner;

/// Spawner for the current environment: the ambient tokio runtime when there is
/// one, otherwise a [`QueuedSpawner`] the host has to drive.
pub fn default_spawner() -> Arc<dyn AsyncSpawner> {
    #[cfg(feature = "tokio-runtime")]
    {
        if let Ok(spawner) = TokioSpawner::current() {
            return Arc::new(spawner);
        }
    }

    log::debug!("no async runtime found, falling back to a queued spawner");
    Arc::new(QueuedSpawner::new())
}
