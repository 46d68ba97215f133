// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::errors::{Result, TaskdagError};

/// A node that can be managed by [`Dag`].
///
/// The key is the node's identity inside a graph; two distinct nodes must
/// never share a key.
pub trait DagNode {
    fn key(&self) -> &str;

    /// Direct dependencies: nodes that must come before this one.
    fn dependencies(&self) -> Vec<Arc<Self>>;
}

/// Collection of nodes plus the dependency-respecting order derived from
/// them by [`Dag::detect_cycles`].
///
/// The order is only valid after a successful detection pass. Adding nodes
/// throws it away; it is recomputed, never patched.
#[derive(Debug)]
pub struct Dag<N> {
    nodes: Vec<Arc<N>>,
    sorted: Option<Vec<Arc<N>>>,
}

impl<N> Default for Dag<N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            sorted: None,
        }
    }
}

/// One DFS frame: a node and the index of the next dependency to explore.
struct Frame<N> {
    node: Arc<N>,
    deps: Vec<Arc<N>>,
    next: usize,
}

impl<N: DagNode> Frame<N> {
    fn new(node: Arc<N>) -> Self {
        let deps = node.dependencies();
        Self {
            node,
            deps,
            next: 0,
        }
    }
}

impl<N: DagNode> Dag<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append nodes to the managed set.
    pub fn add(&mut self, nodes: impl IntoIterator<Item = Arc<N>>) -> &mut Self {
        self.nodes.extend(nodes);
        self.sorted = None;
        self
    }

    pub fn nodes(&self) -> &[Arc<N>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in dependency order, if a detection pass has succeeded since
    /// the last [`Dag::add`].
    pub fn sorted(&self) -> Option<&[Arc<N>]> {
        self.sorted.as_deref()
    }

    /// Verify the graph is acyclic and compute the traversal order.
    ///
    /// `finished` persists across top-level traversals; `visiting` is fresh
    /// for each one. Reaching a node that is still on the current path means
    /// a cycle, and the whole pass fails immediately.
    pub fn detect_cycles(&mut self) -> Result<()> {
        self.sorted = None;

        let mut order: Vec<Arc<N>> = Vec::with_capacity(self.nodes.len());
        let mut finished: HashSet<String> = HashSet::new();

        for root in &self.nodes {
            if finished.contains(root.key()) {
                continue;
            }

            let mut visiting: HashSet<String> = HashSet::new();
            let mut stack: Vec<Frame<N>> = Vec::new();

            visiting.insert(root.key().to_string());
            stack.push(Frame::new(Arc::clone(root)));

            while let Some(frame) = stack.last_mut() {
                if frame.next < frame.deps.len() {
                    let child = Arc::clone(&frame.deps[frame.next]);
                    frame.next += 1;

                    if finished.contains(child.key()) {
                        continue;
                    }
                    if visiting.contains(child.key()) {
                        return Err(TaskdagError::Cycle {
                            path: cycle_path(&stack, child.key()),
                        });
                    }

                    visiting.insert(child.key().to_string());
                    stack.push(Frame::new(child));
                } else if let Some(done) = stack.pop() {
                    finished.insert(done.node.key().to_string());
                    order.push(done.node);
                }
            }
        }

        debug!(nodes = order.len(), "dag: cycle detection passed");
        self.sorted = Some(order);
        Ok(())
    }

    /// Visit nodes in dependency order.
    ///
    /// The visitor returns `ControlFlow::Break(result)` to stop early; that
    /// result is what `iterate` returns. Fails if no successful detection
    /// pass has populated the order.
    pub fn iterate<E, F>(&self, mut visitor: F) -> std::result::Result<(), E>
    where
        E: From<TaskdagError>,
        F: FnMut(&Arc<N>) -> ControlFlow<std::result::Result<(), E>>,
    {
        let sorted = self.sorted.as_ref().ok_or_else(|| {
            E::from(TaskdagError::config(
                "dag order requested before cycle detection succeeded",
            ))
        })?;

        for node in sorted {
            if let ControlFlow::Break(result) = visitor(node) {
                return result;
            }
        }
        Ok(())
    }

    /// Export as a `petgraph` graph with edges running dependency -> dependent.
    pub fn to_petgraph(&self) -> DiGraph<String, ()> {
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();

        for node in &self.nodes {
            let idx = graph.add_node(node.key().to_string());
            index.insert(node.key().to_string(), idx);
        }

        for node in &self.nodes {
            let to = index[node.key()];
            for dep in node.dependencies() {
                let from = *index
                    .entry(dep.key().to_string())
                    .or_insert_with(|| graph.add_node(dep.key().to_string()));
                graph.add_edge(from, to, ());
            }
        }

        graph
    }
}

/// Render `A -> B -> ... -> A` from the DFS stack, starting at the node the
/// walk just ran back into.
fn cycle_path<N: DagNode>(stack: &[Frame<N>], revisited: &str) -> String {
    let start = stack
        .iter()
        .position(|f| f.node.key() == revisited)
        .unwrap_or(0);

    let mut keys: Vec<&str> = stack[start..].iter().map(|f| f.node.key()).collect();
    keys.push(revisited);
    keys.join(" -> ")
}
