//! Signal Implementation
//!
//! A [`State`] is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How States Work
//!
//! 1. When a state is read within an active frame (computed/effect), every
//!    active frame is registered as a subscriber.
//!
//! 2. When a state's value changes, all subscribers are marked dirty and
//!    dependent effects are scheduled.
//!
//! 3. Writing an equal value is a no-op: nothing is invalidated.
//!
//! # Readable Values
//!
//! States and computeds share two traits. [`Subject`] exposes only the
//! graph identity and is what effects declare as dependencies; [`Signal`]
//! adds typed reads.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

use super::runtime::Runtime;

/// A node other nodes can depend on.
pub trait Subject {
    fn node_id(&self) -> NodeId;
}

/// A readable reactive value.
pub trait Signal: Subject {
    type Value;

    /// Read the value, registering every active frame as a dependent.
    fn get(&self) -> Self::Value;

    /// Read the value without registering any dependency.
    fn get_untracked(&self) -> Self::Value;
}

struct StateInner<T> {
    id: NodeId,
    value: RefCell<T>,

    /// Last generation in which the state was read from inside a frame.
    observed: Cell<Option<u64>>,

    /// Last generation in which the state was written.
    written: Cell<Option<u64>>,
}

/// A reactive cell holding a value of type `T`.
///
/// Clones are handles to the same cell.
///
/// # Example
///
/// ```rust
/// use trellis_core::{Runtime, State};
///
/// let rt = Runtime::new();
/// let count = State::new(&rt, 0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.put(5).unwrap();
/// assert_eq!(count.get(), 5);
/// ```
pub struct State<T: 'static> {
    inner: Rc<StateInner<T>>,
    runtime: Runtime,
}

impl<T: Clone + 'static> State<T> {
    /// Create a new state with the given initial value.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        let id = NodeId::new();
        runtime.register(id, NodeKind::State);
        Self {
            inner: Rc::new(StateInner {
                id,
                value: RefCell::new(value),
                observed: Cell::new(None),
                written: Cell::new(None),
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

    /// Get the current value.
    ///
    /// If called within an active frame, this also registers every active
    /// frame as a subscriber. A top-level read starts a new round.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Read the value by reference, tracking it like [`State::get`].
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this same state.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.observe();
        f(&*self.inner.value.borrow())
    }

    /// Last generation in which this state was written, if ever.
    pub fn written_generation(&self) -> Option<u64> {
        self.inner.written.get()
    }

    pub fn subscriber_count(&self) -> usize {
        self.runtime.subscriber_count(self.inner.id)
    }

    fn observe(&self) {
        let id = self.inner.id;
        self.runtime.track(id);
        if self.runtime.depth() > 0 {
            self.inner.observed.set(Some(self.runtime.generation()));
        }
        if self.runtime.is_dirty(id) {
            self.runtime.checked(id);
        }
    }
}

impl<T: Clone + PartialEq + 'static> State<T> {
    /// Set a new value and notify subscribers.
    ///
    /// Equal values are ignored. Dependent effects run at the next flush.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::WriteConflict`](crate::ReactiveError::WriteConflict)
    /// if the runtime's write policy forbids writing from the active frame.
    /// The value is left unchanged.
    pub fn put(&self, value: T) -> Result<()> {
        let id = self.inner.id;
        self.runtime.validate_write(id, self.inner.observed.get())?;

        if *self.inner.value.borrow() == value {
            trace!(state = %id, "write skipped, value unchanged");
            return Ok(());
        }

        self.runtime.begin_round();
        *self.inner.value.borrow_mut() = value;
        let generation = self.runtime.generation();
        self.inner.written.set(Some(generation));

        let scheduled = self.runtime.notify(id);
        debug!(state = %id, generation, scheduled, "state written");

        self.runtime.settle();
        Ok(())
    }

    /// Update the value using a function of the current value.
    ///
    /// The current value is read untracked.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = f(&*self.inner.value.borrow());
        self.put(next)
    }
}

impl<T: Clone + 'static> Subject for State<T> {
    fn node_id(&self) -> NodeId {
        self.inner.id
    }
}

impl<T: Clone + 'static> Signal for State<T> {
    type Value = T;

    fn get(&self) -> T {
        State::get(self)
    }

    fn get_untracked(&self) -> T {
        State::get_untracked(self)
    }
}

impl<T: 'static> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: Clone + Debug + 'static> Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
