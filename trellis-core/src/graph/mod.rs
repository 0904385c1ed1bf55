//! Dependency Graph
//!
//! This module implements the graph that records which nodes read which
//! subjects, the dirty flags, and the set of effects waiting to be flushed.
//!
//! # Overview
//!
//! - Nodes are states, computeds and effects, keyed by [`NodeId`]
//! - An edge from subject S to observer O means O read S while O was an
//!   active frame (or O is an effect that declared S as a dependency)
//!
//! When a state is written, the notifier marks every node downstream of it
//! dirty and schedules the effects among them. Computeds stay lazy: a dirty
//! computed only recomputes when it is next read.
//!
//! # Design Decisions
//!
//! 1. One subscriber set per subject. Whether a subscriber is an eager
//!    observer is a property of the subscriber's [`NodeKind`], so no second
//!    observer table is kept.
//!
//! 2. Edges are never pruned on recomputation. A node that stops reading a
//!    subject may be invalidated spuriously, but never missed.
//!
//! 3. We keep both subscriber and source edges so that disposing a node
//!    removes every edge that mentions it without scanning the whole table.

mod node;
mod notifier;

pub use node::{Node, NodeId, NodeKind};
pub use notifier::Notifier;
