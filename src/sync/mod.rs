// src/sync/mod.rs

//! Synchronization primitives used by task execution.
//!
//! - [`promise`]: single-assignment result cell and the `get_all` join.
//! - [`pool`]: the runner pool bounding concurrent task bodies.

pub mod pool;
pub mod promise;

pub use pool::{DEFAULT_CONCURRENT_LIMIT, RunnerPool, RunnerToken};
pub use promise::{Promise, get_all};
