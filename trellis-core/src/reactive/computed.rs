//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. Construction does not run the closure. The first read does.
//!
//! 2. While the closure runs, the computed is an active frame, so every
//!    state or computed it reads registers it as a subscriber.
//!
//! 3. When a dependency is written, the computed is marked dirty. Nothing
//!    else happens until it is read again.
//!
//! 4. On read, the cached value is returned if the computed was already
//!    visited this round or is not dirty. Otherwise it recomputes.
//!
//! # Why Rounds Matter
//!
//! In a diamond (`C` reads `A` and `B`, both read `S`), `S` is reached twice
//! while computing `C`. Recording the generation of the last visit means the
//! second path returns the value computed by the first, so every node in the
//! diamond recomputes at most once per round.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::{trace, trace_span};

use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind};

use super::runtime::Runtime;
use super::signal::{Signal, Subject};

struct ComputedInner<T> {
    id: NodeId,
    compute: Box<dyn Fn() -> T>,

    /// The cached value (None if never computed).
    memo: RefCell<Option<T>>,

    /// Generation of the last recomputation.
    visited: Cell<Option<u64>>,

    recomputations: Cell<usize>,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Clones are handles to the same node and share the cache.
///
/// # Example
///
/// ```rust
/// use trellis_core::{Computed, Runtime, State};
///
/// let rt = Runtime::new();
/// let count = State::new(&rt, 2);
/// let squared = {
///     let count = count.clone();
///     Computed::new(&rt, move || count.get() * count.get())
/// };
///
/// assert_eq!(squared.get(), 4);
/// count.put(3).unwrap();
/// assert_eq!(squared.get(), 9);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
    runtime: Runtime,
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a new computed with the given closure.
    ///
    /// The closure is not run until the first read.
    pub fn new<F>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let id = NodeId::new();
        runtime.register(id, NodeKind::Computed);
        Self {
            inner: Rc::new(ComputedInner {
                id,
                compute: Box::new(compute),
                memo: RefCell::new(None),
                visited: Cell::new(None),
                recomputations: Cell::new(0),
            }),
            runtime: runtime.clone(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the computed depends on itself. Use [`Computed::try_get`]
    /// to handle that case.
    pub fn get(&self) -> T {
        self.try_get().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::CyclicDependency`] if this computed is already being
    /// evaluated further up the stack.
    pub fn try_get(&self) -> Result<T> {
        let id = self.inner.id;
        if self.runtime.is_on_stack(id) {
            return Err(ReactiveError::CyclicDependency { id });
        }

        self.runtime.track(id);
        let value = self.refresh();
        self.runtime.settle();
        Ok(value)
    }

    /// Get the current value without registering the caller as a
    /// dependent.
    ///
    /// The value is still brought up to date, and a recomputation still
    /// records its own sources.
    pub fn get_untracked(&self) -> T {
        self.runtime.begin_round();
        let value = self.runtime.untracked(|| self.refresh());
        self.runtime.settle();
        value
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.memo.borrow().is_some()
    }

    /// Whether the next read outside the current round will recompute.
    pub fn is_dirty(&self) -> bool {
        self.runtime.is_dirty(self.inner.id)
    }

    /// How many times the closure has run.
    pub fn recomputations(&self) -> usize {
        self.inner.recomputations.get()
    }

    pub fn subscriber_count(&self) -> usize {
        self.runtime.subscriber_count(self.inner.id)
    }

    fn refresh(&self) -> T {
        let inner = &self.inner;
        let generation = self.runtime.generation();

        if inner.visited.get() == Some(generation) || !self.runtime.is_dirty(inner.id) {
            if let Some(value) = inner.memo.borrow().as_ref() {
                trace!(computed = %inner.id, generation, "cached");
                return value.clone();
            }
        }

        self.recompute(generation)
    }

    fn recompute(&self, generation: u64) -> T {
        let inner = &self.inner;
        let _span = trace_span!("recompute", computed = %inner.id, generation).entered();

        let value = {
            let _frame = self.runtime.enter(inner.id);
            (inner.compute)()
        };

        *inner.memo.borrow_mut() = Some(value.clone());
        inner.visited.set(Some(generation));
        inner.recomputations.set(inner.recomputations.get() + 1);
        self.runtime.checked(inner.id);

        value
    }
}

impl<T: Clone + 'static> Subject for Computed<T> {
    fn node_id(&self) -> NodeId {
        self.inner.id
    }
}

impl<T: Clone + 'static> Signal for Computed<T> {
    type Value = T;

    fn get(&self) -> T {
        Computed::get(self)
    }

    fn get_untracked(&self) -> T {
        Computed::get_untracked(self)
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: Clone + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("dirty", &self.is_dirty())
            .field("has_value", &self.has_value())
            .field("recomputations", &self.recomputations())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::State;

    #[test]
    fn computed_is_lazy() {
        let rt = Runtime::new();
        let calls = Rc::new(Cell::new(0));

        let computed = {
            let calls = calls.clone();
            Computed::new(&rt, move || {
                calls.set(calls.get() + 1);
                42
            })
        };

        // Not computed yet
        assert!(!computed.has_value());
        assert_eq!(calls.get(), 0);

        // First access triggers computation
        assert_eq!(computed.get(), 42);
        assert_eq!(calls.get(), 1);
        assert!(computed.has_value());
    }

    #[test]
    fn computed_caches_value_when_clean() {
        let rt = Runtime::new();
        let computed = Computed::new(&rt, || 42);

        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(computed.recomputations(), 1);
        assert!(!computed.is_dirty());
    }

    #[test]
    fn computed_recomputes_after_write() {
        let rt = Runtime::new();
        let state = State::new(&rt, 10);
        let doubled = {
            let state = state.clone();
            Computed::new(&rt, move || state.get() * 2)
        };

        assert_eq!(doubled.get(), 20);
        state.put(5).unwrap();
        assert!(doubled.is_dirty());

        assert_eq!(doubled.get(), 10);
        assert_eq!(doubled.recomputations(), 2);
    }

    #[test]
    fn computed_clone_shares_cache() {
        let rt = Runtime::new();
        let computed1 = Computed::new(&rt, || 42);
        assert_eq!(computed1.get(), 42);

        let computed2 = computed1.clone();
        assert_eq!(computed1.id(), computed2.id());
        assert!(computed2.has_value());
        assert_eq!(computed2.get(), 42);
        assert_eq!(computed1.recomputations(), 1);
    }

    #[test]
    fn self_reference_is_reported() {
        let rt = Runtime::new();
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let seen = Rc::new(RefCell::new(None));

        let computed = {
            let (slot, seen) = (slot.clone(), seen.clone());
            Computed::new(&rt, move || {
                let this = slot.borrow().clone();
                if let Some(this) = this {
                    *seen.borrow_mut() = this.try_get().err();
                }
                1
            })
        };
        *slot.borrow_mut() = Some(computed.clone());

        assert_eq!(computed.get(), 1);
        assert_eq!(
            *seen.borrow(),
            Some(ReactiveError::CyclicDependency { id: computed.id() })
        );
        assert_eq!(rt.depth(), 0);
    }

    #[test]
    fn untracked_read_registers_nothing() {
        let rt = Runtime::new();
        let inner = Computed::new(&rt, || 7);
        let outer = {
            let inner = inner.clone();
            Computed::new(&rt, move || inner.get_untracked() + 1)
        };

        assert_eq!(outer.get(), 8);
        assert_eq!(inner.subscriber_count(), 0);
    }

    #[test]
    fn nested_reads_register_every_frame() {
        let rt = Runtime::new();
        let state = State::new(&rt, 1);
        let inner = {
            let state = state.clone();
            Computed::new(&rt, move || state.get() + 1)
        };
        let outer = {
            let inner = inner.clone();
            Computed::new(&rt, move || inner.get() * 10)
        };

        assert_eq!(outer.get(), 20);

        // state saw both frames; inner saw outer
        assert_eq!(state.subscriber_count(), 2);
        assert_eq!(inner.subscriber_count(), 1);
    }
}
