//! Evaluation Stack
//!
//! The evaluation stack tracks which computations are currently running and
//! which round (generation) the runtime is in. This enables automatic
//! dependency tracking: when a subject is read, every active frame is
//! registered as one of its subscribers.
//!
//! # Implementation
//!
//! Entering a computed or effect body pushes its identity; the returned
//! [`Frame`] guard pops it when dropped, so the stack stays balanced even if
//! the computation panics.
//!
//! Frames below the tracking floor are hidden from dependency registration;
//! untracked scopes raise the floor to the current depth.
//!
//! A read or write made with an empty stack starts a new round. Everything
//! that happens before the stack is empty again belongs to that round, and a
//! computed recomputes at most once per round.

use std::cell::{Cell, RefCell};

use smallvec::SmallVec;

use crate::graph::NodeId;

/// Active frames. Most graphs nest only a few levels deep.
pub type Frames = SmallVec<[NodeId; 8]>;

/// The frame stack and generation counter of one runtime.
#[derive(Debug, Default)]
pub struct EvalStack {
    frames: RefCell<Frames>,
    floor: Cell<usize>,
    generation: Cell<u64>,
    inert: Cell<bool>,
}

impl EvalStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `id` as the innermost active frame.
    ///
    /// The frame is popped when the returned guard is dropped.
    pub fn enter(&self, id: NodeId) -> Frame<'_> {
        self.frames.borrow_mut().push(id);
        Frame { stack: self, id }
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn is_active(&self) -> bool {
        !self.frames.borrow().is_empty()
    }

    /// The innermost active frame, if any.
    pub fn current(&self) -> Option<NodeId> {
        self.frames.borrow().last().copied()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.frames.borrow().contains(&id)
    }

    /// Snapshot of the active frames, outermost first.
    pub fn frames(&self) -> Frames {
        self.frames.borrow().clone()
    }

    /// Active frames above the tracking floor, outermost first.
    pub fn tracked_frames(&self) -> Frames {
        let frames = self.frames.borrow();
        let floor = self.floor.get().min(frames.len());
        frames[floor..].iter().copied().collect()
    }

    /// Hide the currently active frames from dependency registration until
    /// the guard is dropped. Frames entered inside the scope still track.
    pub fn enter_untracked(&self) -> Untracked<'_> {
        let previous = self.floor.replace(self.depth());
        Untracked {
            stack: self,
            previous,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Start a new round if nothing is running.
    ///
    /// Returns true if the generation advanced.
    pub fn begin_round(&self) -> bool {
        if self.is_active() || self.inert.get() {
            return false;
        }
        self.advance();
        true
    }

    /// Unconditionally advance the generation.
    pub fn advance(&self) -> u64 {
        let next = self.generation.get() + 1;
        self.generation.set(next);
        next
    }

    pub fn is_inert(&self) -> bool {
        self.inert.get()
    }

    /// Suppress round bumps until the guard is dropped. The runtime also
    /// hides each flushed effect's own frame from tracking while inert.
    pub fn enter_inert(&self) -> Inert<'_> {
        let previous = self.inert.replace(true);
        Inert {
            stack: self,
            previous,
        }
    }
}

/// Guard that pops the frame when dropped.
#[derive(Debug)]
pub struct Frame<'a> {
    stack: &'a EvalStack,
    id: NodeId,
}

impl Frame<'_> {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        let popped = self.stack.frames.borrow_mut().pop();

        // Frames are strictly LIFO.
        debug_assert_eq!(
            popped,
            Some(self.id),
            "frame mismatch: expected {:?}, got {:?}",
            self.id,
            popped
        );
    }
}

/// Guard that restores the previous inert flag when dropped.
#[derive(Debug)]
pub struct Inert<'a> {
    stack: &'a EvalStack,
    previous: bool,
}

impl Drop for Inert<'_> {
    fn drop(&mut self) {
        self.stack.inert.set(self.previous);
    }
}

/// Guard that restores the previous tracking floor when dropped.
#[derive(Debug)]
pub struct Untracked<'a> {
    stack: &'a EvalStack,
    previous: usize,
}

impl Drop for Untracked<'_> {
    fn drop(&mut self) {
        self.stack.floor.set(self.previous);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
