// src/dag/mod.rs

//! Dependency graph of tasks.
//!
//! [`graph`] holds a generic node collection with cycle detection and a
//! dependency-respecting traversal order.

pub mod graph;

pub use graph::{Dag, DagNode};
