// src/sync/pool.rs

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

pub const DEFAULT_CONCURRENT_LIMIT: usize = 3;

/// Bounded token pool limiting how many task bodies run at once.
///
/// Clones share the same tokens.
#[derive(Debug, Clone)]
pub struct RunnerPool {
    capacity: usize,
    tokens: Arc<Semaphore>,
}

/// A token taken from a [`RunnerPool`]; returned to the pool on drop.
#[derive(Debug)]
pub struct RunnerToken {
    _permit: OwnedSemaphorePermit,
}

impl Default for RunnerPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENT_LIMIT)
    }
}

impl RunnerPool {
    /// Create a pool with `capacity` tokens; `0` falls back to the default.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CONCURRENT_LIMIT
        } else {
            capacity
        };
        Self {
            capacity,
            tokens: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens not currently held.
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Wait for a free token and take it.
    pub async fn acquire(&self) -> RunnerToken {
        trace!(available = self.available(), "runner pool: acquiring token");
        // The semaphore is never closed, so acquisition can only succeed.
        let permit = match Arc::clone(&self.tokens).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("runner pool semaphore is never closed"),
        };
        RunnerToken { _permit: permit }
    }
}
