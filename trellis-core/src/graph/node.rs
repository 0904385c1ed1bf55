//! Graph Nodes
//!
//! This module defines the entries of the dependency graph: one per state,
//! computed, or effect, keyed by a process-unique [`NodeId`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

/// Unique identifier for a node in the dependency graph.
///
/// Identifiers are allocated from a process-wide counter and are never
/// reused, so a handle from one runtime can never alias a node of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A mutable leaf value. Only ever a subject.
    State,

    /// A memoized derived value. Both a subject and an observer.
    Computed,

    /// An eager observer. Never read, so it never has subscribers.
    Effect,
}

impl NodeKind {
    /// Whether nodes of this kind are re-run by the flush rather than lazily.
    pub fn is_eager(self) -> bool {
        matches!(self, NodeKind::Effect)
    }
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,

    /// True while the node's value (or an effect's output) may be stale.
    dirty: bool,

    /// Subjects this node was registered against.
    sources: IndexSet<NodeId>,

    /// Frames that were active when this node was read.
    /// Insertion order is kept so fan-out and scheduling are deterministic.
    subscribers: IndexSet<NodeId>,
}

impl Node {
    /// Create a node for an already-allocated identity.
    ///
    /// Fresh nodes start dirty: nothing has been computed or observed yet.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            dirty: true,
            sources: IndexSet::new(),
            subscribers: IndexSet::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Set the dirty flag, returning whether it was previously clear.
    pub fn mark_dirty(&mut self) -> bool {
        !std::mem::replace(&mut self.dirty, true)
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Add a subscriber. Returns false if it was already present.
    pub fn add_subscriber(&mut self, node_id: NodeId) -> bool {
        self.subscribers.insert(node_id)
    }

    pub fn remove_subscriber(&mut self, node_id: NodeId) {
        self.subscribers.shift_remove(&node_id);
    }

    pub fn subscribers(&self) -> &IndexSet<NodeId> {
        &self.subscribers
    }

    pub fn add_source(&mut self, node_id: NodeId) {
        self.sources.insert(node_id);
    }

    pub fn remove_source(&mut self, node_id: NodeId) {
        self.sources.shift_remove(&node_id);
    }

    pub fn sources(&self) -> &IndexSet<NodeId> {
        &self.sources
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_increasing() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id2 > id1);
    }

    #[test]
    fn fresh_node_starts_dirty() {
        let node = Node::new(NodeId::new(), NodeKind::Computed);
        assert_eq!(node.kind(), NodeKind::Computed);
        assert!(node.is_dirty());
    }

    #[test]
    fn mark_dirty_reports_transition() {
        let mut node = Node::new(NodeId::new(), NodeKind::State);
        assert!(!node.mark_dirty());

        node.mark_clean();
        assert!(!node.is_dirty());
        assert!(node.mark_dirty());
        assert!(node.is_dirty());
    }

    #[test]
    fn subscriber_management() {
        let mut node = Node::new(NodeId::new(), NodeKind::State);
        let a = NodeId::new();
        let b = NodeId::new();

        assert!(node.add_subscriber(a));
        assert!(node.add_subscriber(b));
        assert!(!node.add_subscriber(a));
        assert_eq!(node.subscribers().len(), 2);

        node.remove_subscriber(a);
        assert!(!node.subscribers().contains(&a));
        assert_eq!(node.subscribers().iter().copied().collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn only_effects_are_eager() {
        assert!(NodeKind::Effect.is_eager());
        assert!(!NodeKind::Computed.is_eager());
        assert!(!NodeKind::State.is_eager());
    }
}
