//! Notifier
//!
//! The notifier owns the dependency graph tables: the node table (kind,
//! dirty flag, subscriber and source sets) and the pending-effect set.
//! It never runs user code; the runtime drains [`Notifier::take_pending`]
//! and executes the effects itself.
//!
//! # Fan-out
//!
//! Edges are registered flattened: a read records every active frame as a
//! direct subscriber, so most writes are fully propagated by the first hop.
//! The walk still follows subscribers that are themselves subjects, which
//! covers frames that consumed a cached computed without re-reading its
//! sources.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;
use tracing::trace;

use super::node::{Node, NodeId, NodeKind};

/// Dependency graph plus the set of effects awaiting the next flush.
#[derive(Debug, Default)]
pub struct Notifier {
    nodes: HashMap<NodeId, Node>,
    pending: IndexSet<NodeId>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the node table with a fresh (dirty) entry.
    pub fn register_subject(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes.insert(id, Node::new(id, kind));
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(Node::kind)
    }

    /// Record that `observer` depends on `subject`.
    ///
    /// Idempotent. Returns true if a new edge was added.
    pub fn observe(&mut self, subject: NodeId, observer: NodeId) -> bool {
        let added = match self.nodes.get_mut(&subject) {
            Some(node) => node.add_subscriber(observer),
            None => return false,
        };
        if added {
            if let Some(node) = self.nodes.get_mut(&observer) {
                node.add_source(subject);
            }
            trace!(%subject, %observer, "edge registered");
        }
        added
    }

    pub fn has_observer(&self, subject: NodeId, frame: NodeId) -> bool {
        self.nodes
            .get(&subject)
            .is_some_and(|node| node.subscribers().contains(&frame))
    }

    /// Mark `subject` and everything downstream of it dirty, scheduling
    /// every eager node reached.
    ///
    /// Returns the number of effects newly added to the pending set.
    pub fn notify(&mut self, subject: NodeId) -> usize {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut scheduled = 0;

        match self.nodes.get_mut(&subject) {
            Some(node) => {
                node.mark_dirty();
                queue.extend(node.subscribers().iter().copied());
            }
            None => return 0,
        }
        visited.insert(subject);

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };

            node.mark_dirty();
            if node.kind().is_eager() && self.pending.insert(node_id) {
                scheduled += 1;
            }
            queue.extend(node.subscribers().iter().copied());
        }

        trace!(%subject, reached = visited.len() - 1, scheduled, "notified");
        scheduled
    }

    /// Clear a node's dirty flag after its value has been refreshed.
    pub fn checked(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.mark_clean();
        }
    }

    /// Clear a written subject's own dirty flag once its fan-out is done.
    pub fn did_notify(&mut self, id: NodeId) {
        self.checked(id);
    }

    /// Unknown nodes are never trusted, so they report dirty.
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map_or(true, Node::is_dirty)
    }

    pub fn is_pending(&self, id: NodeId) -> bool {
        self.pending.contains(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Remove and return the pending set, in scheduling order.
    pub fn take_pending(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.pending)
    }

    /// Put effects that were taken but never ran back in front of the
    /// pending set. Ids no longer in the graph are dropped.
    pub fn requeue(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        let mut pending: IndexSet<NodeId> = ids
            .into_iter()
            .filter(|id| self.nodes.contains_key(id))
            .collect();
        pending.extend(self.pending.drain(..));
        self.pending = pending;
    }

    pub fn subscriber_count(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map_or(0, |node| node.subscribers().len())
    }

    /// The eager subset of a subject's subscribers.
    pub fn observers(&self, subject: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&subject) else {
            return Vec::new();
        };
        node.subscribers()
            .iter()
            .copied()
            .filter(|id| self.kind(*id).is_some_and(NodeKind::is_eager))
            .collect()
    }

    pub fn sources(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|node| node.sources().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a node and every edge that mentions it.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };

        for source in node.sources() {
            if let Some(source) = self.nodes.get_mut(source) {
                source.remove_subscriber(id);
            }
        }
        for subscriber in node.subscribers() {
            if let Some(subscriber) = self.nodes.get_mut(subscriber) {
                subscriber.remove_source(id);
            }
        }
        self.pending.shift_remove(&id);
        true
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn register(notifier: &mut Notifier, kind: NodeKind) -> NodeId {
        let id = NodeId::new();
        notifier.register_subject(id, kind);
        id
    }

    #[test]
    fn registered_nodes_start_dirty() {
        let mut notifier = Notifier::new();
        let state = register(&mut notifier, NodeKind::State);

        assert!(notifier.contains(state));
        assert!(notifier.is_dirty(state));

        notifier.checked(state);
        assert!(!notifier.is_dirty(state));
    }

    #[test]
    fn unknown_nodes_report_dirty() {
        let notifier = Notifier::new();
        assert!(notifier.is_dirty(NodeId::new()));
    }

    #[test]
    fn observe_is_idempotent() {
        let mut notifier = Notifier::new();
        let state = register(&mut notifier, NodeKind::State);
        let computed = register(&mut notifier, NodeKind::Computed);

        assert!(notifier.observe(state, computed));
        assert!(!notifier.observe(state, computed));
        assert!(notifier.has_observer(state, computed));
        assert_eq!(notifier.subscriber_count(state), 1);
        assert_eq!(notifier.sources(computed), vec![state]);
    }

    #[test]
    fn notify_marks_subscribers_and_schedules_effects() {
        let mut notifier = Notifier::new();
        let state = register(&mut notifier, NodeKind::State);
        let computed = register(&mut notifier, NodeKind::Computed);
        let effect = register(&mut notifier, NodeKind::Effect);

        notifier.observe(state, computed);
        notifier.observe(state, effect);
        notifier.checked(computed);
        notifier.checked(effect);

        assert_eq!(notifier.notify(state), 1);
        assert!(notifier.is_dirty(state));
        assert!(notifier.is_dirty(computed));
        assert!(notifier.is_dirty(effect));

        // Only the eager node is scheduled
        assert!(notifier.is_pending(effect));
        assert!(!notifier.is_pending(computed));
        assert_eq!(notifier.observers(state), vec![effect]);
    }

    #[test]
    fn notify_coalesces_pending_effects() {
        let mut notifier = Notifier::new();
        let a = register(&mut notifier, NodeKind::State);
        let b = register(&mut notifier, NodeKind::State);
        let effect = register(&mut notifier, NodeKind::Effect);

        notifier.observe(a, effect);
        notifier.observe(b, effect);

        assert_eq!(notifier.notify(a), 1);
        assert_eq!(notifier.notify(b), 0);
        assert_eq!(notifier.pending_count(), 1);

        let pending = notifier.take_pending();
        assert_eq!(pending.into_iter().collect::<Vec<_>>(), vec![effect]);
        assert_eq!(notifier.pending_count(), 0);
    }

    #[test]
    fn requeue_puts_unrun_effects_first() {
        let mut notifier = Notifier::new();
        let state = register(&mut notifier, NodeKind::State);
        let first = register(&mut notifier, NodeKind::Effect);
        let second = register(&mut notifier, NodeKind::Effect);
        let late = register(&mut notifier, NodeKind::Effect);
        let gone = NodeId::new();

        notifier.observe(state, late);
        notifier.notify(state);
        notifier.requeue([first, gone, second]);

        let pending = notifier.take_pending();
        assert_eq!(pending.into_iter().collect::<Vec<_>>(), vec![first, second, late]);
    }

    #[test]
    fn notify_reaches_through_cached_computeds() {
        let mut notifier = Notifier::new();
        let state = register(&mut notifier, NodeKind::State);
        let inner = register(&mut notifier, NodeKind::Computed);
        let outer = register(&mut notifier, NodeKind::Computed);

        // outer read inner from cache, so state never saw outer on the stack
        notifier.observe(state, inner);
        notifier.observe(inner, outer);
        notifier.checked(inner);
        notifier.checked(outer);

        notifier.notify(state);
        assert!(notifier.is_dirty(inner));
        assert!(notifier.is_dirty(outer));
    }

    #[test]
    fn remove_node_drops_all_edges() {
        let mut notifier = Notifier::new();
        let state = register(&mut notifier, NodeKind::State);
        let effect = register(&mut notifier, NodeKind::Effect);

        notifier.observe(state, effect);
        notifier.notify(state);
        assert!(notifier.is_pending(effect));

        assert!(notifier.remove_node(effect));
        assert!(!notifier.contains(effect));
        assert!(!notifier.is_pending(effect));
        assert!(!notifier.has_observer(state, effect));
        assert_eq!(notifier.node_count(), 1);

        assert!(!notifier.remove_node(effect));
    }
}
