//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever one of
//! its dependencies is invalidated.
//!
//! # How Effects Work
//!
//! 1. The caller declares the subjects the effect depends on. Each one gets
//!    the effect as an observer.
//!
//! 2. The effect runs once, immediately, inside its own frame. Anything it
//!    reads is tracked as well, so computeds it touches also lead back to it.
//!
//! 3. When a dependency is written, the effect is added to the pending set.
//!    It re-runs in full at the next flush, once, however many of its
//!    dependencies changed.
//!
//! 4. Re-runs happen in inert mode: the dependency set fixed at
//!    registration does not grow. Computeds read by a re-run still record
//!    their own sources.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (compute on access); effects are eager (run on flush).
//! - Computeds track implicitly; effects declare their subjects up front.
//!
//! # Disposal
//!
//! [`Effect::dispose`] removes the effect from every subscriber set, the
//! dirty table and the pending set. A disposed effect never runs again.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::Result;
use crate::graph::NodeId;

use super::runtime::{Reactive, Runtime};
use super::signal::Subject;

type Dependencies = SmallVec<[NodeId; 4]>;

struct EffectInner {
    id: NodeId,
    run: Box<dyn Fn()>,
    dependencies: Dependencies,
    run_count: Cell<usize>,
    disposed: Cell<bool>,
}

impl Reactive for EffectInner {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn run(&self) {
        if self.disposed.get() {
            return;
        }
        (self.run)();
        self.run_count.set(self.run_count.get() + 1);
    }
}

/// A side-effecting computation that runs when its dependencies change.
///
/// The handle is cheap to clone. Dropping every handle does not stop the
/// effect; call [`Effect::dispose`] for that.
///
/// # Example
///
/// ```rust
/// use trellis_core::{Effect, Runtime, State};
///
/// let rt = Runtime::new();
/// let count = State::new(&rt, 0);
///
/// let effect = Effect::new(&rt, &[&count], {
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// })
/// .unwrap();
///
/// count.put(5).unwrap();
/// rt.flush(); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
    runtime: Runtime,
}

impl Effect {
    /// Register a new effect and run it once.
    ///
    /// # Errors
    ///
    /// - [`ReactiveError::IllegalObservationContext`](crate::ReactiveError::IllegalObservationContext)
    ///   if called while a computed or effect is evaluating.
    /// - [`ReactiveError::UnidentifiedDependency`](crate::ReactiveError::UnidentifiedDependency)
    ///   if a dependency belongs to a different runtime.
    ///
    /// Nothing is registered when an error is returned.
    pub fn new<F>(runtime: &Runtime, dependencies: &[&dyn Subject], run: F) -> Result<Self>
    where
        F: Fn() + 'static,
    {
        let dependencies: Dependencies = dependencies.iter().map(|dep| dep.node_id()).collect();
        runtime.validate_observation(&dependencies)?;

        let inner = Rc::new(EffectInner {
            id: NodeId::new(),
            run: Box::new(run),
            dependencies,
            run_count: Cell::new(0),
            disposed: Cell::new(false),
        });
        runtime.register_effect(inner.clone(), &inner.dependencies);

        Ok(Self {
            inner,
            runtime: runtime.clone(),
        })
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The subjects declared at registration.
    pub fn dependencies(&self) -> &[NodeId] {
        &self.inner.dependencies
    }

    /// Remove the effect from the graph. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.runtime.dispose(self.inner.id);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn is_pending(&self) -> bool {
        self.runtime.is_pending(self.inner.id)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependencies", &self.inner.dependencies)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
