//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects states, computeds,
//! and effects. It owns the evaluation stack, the dependency graph, and the
//! registry of effects waiting to be flushed.
//!
//! # How It Works
//!
//! 1. Every node registers with the runtime when it is constructed.
//!
//! 2. When a state or computed is read, the runtime records an edge from it
//!    to every active frame.
//!
//! 3. When a state changes, the runtime:
//!    a. Marks everything downstream dirty
//!    b. Adds the effects among them to the pending set
//!    c. Leaves computeds alone; they recompute on next read
//!
//! 4. Pending effects run in [`Runtime::flush`], after the triggering call
//!    stack has unwound.
//!
//! # Ownership
//!
//! A `Runtime` is a cheap handle to shared state. Every node keeps a handle,
//! so the graph lives as long as any of its nodes. Several runtimes may
//! coexist; their graphs never interact.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, debug_span, trace, trace_span, warn};

use crate::config::{FlushMode, RuntimeConfig, WritePolicy};
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind, Notifier};

use super::context::{EvalStack, Frame};

/// Something the runtime can re-run from a flush.
pub trait Reactive {
    /// The identity this node was registered under.
    fn node_id(&self) -> NodeId;

    /// Run the node's body. The runtime has already pushed its frame.
    fn run(&self);
}

struct RuntimeInner {
    config: RuntimeConfig,
    stack: EvalStack,
    notifier: RefCell<Notifier>,
    effects: RefCell<HashMap<NodeId, Rc<dyn Reactive>>>,
    batch_depth: Cell<usize>,
    flushing: Cell<bool>,
}

/// Handle to a reactive graph.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use trellis_core::{Computed, Effect, Runtime, State};
///
/// let rt = Runtime::new();
/// let count = State::new(&rt, 1);
///
/// let doubled = {
///     let count = count.clone();
///     Computed::new(&rt, move || count.get() * 2)
/// };
///
/// let seen = Rc::new(Cell::new(0));
/// let _effect = {
///     let (doubled, seen) = (doubled.clone(), seen.clone());
///     Effect::new(&rt, &[&count], move || seen.set(doubled.get())).unwrap()
/// };
/// assert_eq!(seen.get(), 2);
///
/// count.put(5).unwrap();
/// rt.flush();
/// assert_eq!(seen.get(), 10);
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                stack: EvalStack::new(),
                notifier: RefCell::new(Notifier::new()),
                effects: RefCell::new(HashMap::new()),
                batch_depth: Cell::new(0),
                flushing: Cell::new(false),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same graph.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn generation(&self) -> u64 {
        self.inner.stack.generation()
    }

    /// Number of frames currently on the evaluation stack.
    pub fn depth(&self) -> usize {
        self.inner.stack.depth()
    }

    pub fn current_frame(&self) -> Option<NodeId> {
        self.inner.stack.current()
    }

    /// Active frames, outermost first.
    pub fn active_frames(&self) -> Vec<NodeId> {
        self.inner.stack.frames().into_vec()
    }

    pub fn is_inert(&self) -> bool {
        self.inner.stack.is_inert()
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.get()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.notifier.borrow().pending_count()
    }

    pub fn is_pending(&self, id: NodeId) -> bool {
        self.inner.notifier.borrow().is_pending(id)
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.inner.notifier.borrow().is_dirty(id)
    }

    pub fn is_registered(&self, id: NodeId) -> bool {
        self.inner.notifier.borrow().contains(id)
    }

    pub fn subscriber_count(&self, id: NodeId) -> usize {
        self.inner.notifier.borrow().subscriber_count(id)
    }

    /// Effects that will be scheduled when `subject` is invalidated directly.
    pub fn observers(&self, subject: NodeId) -> Vec<NodeId> {
        self.inner.notifier.borrow().observers(subject)
    }

    pub fn node_count(&self) -> usize {
        self.inner.notifier.borrow().node_count()
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Run every pending effect once.
    ///
    /// Effects scheduled by writes made during a pass run in the next pass,
    /// up to the configured pass limit. Returns the number of effect runs.
    ///
    /// Does nothing while frames are active or while another flush is in
    /// progress; the effects stay pending.
    pub fn flush(&self) -> usize {
        let inner = &self.inner;
        if inner.flushing.get() {
            trace!("flush already in progress");
            return 0;
        }
        if let Some(frame) = inner.stack.current() {
            debug!(%frame, "flush deferred while frames are active");
            return 0;
        }

        let _flushing = Flag::raise(&inner.flushing);
        let max_passes = inner.config.max_flush_passes;
        let mut ran = 0;

        for pass in 0..max_passes {
            let pending = inner.notifier.borrow_mut().take_pending();
            if pending.is_empty() {
                break;
            }

            let generation = inner.stack.advance();
            let _span = debug_span!("flush", pass, generation, effects = pending.len()).entered();
            let _inert = inner.stack.enter_inert();

            // If an effect panics, the rest of the pass goes back to pending.
            let mut queue = Requeue {
                notifier: &inner.notifier,
                remaining: pending.into_iter().collect(),
            };
            while let Some(id) = queue.remaining.pop_front() {
                // Disposed effects are gone from the registry.
                let effect = inner.effects.borrow().get(&id).cloned();
                if let Some(effect) = effect {
                    self.execute(effect.as_ref());
                    ran += 1;
                }
            }
        }

        let left = self.pending_count();
        if left > 0 {
            warn!(left, max_passes, "flush pass limit reached, effects left pending");
        }
        debug!(ran, generation = self.generation(), "flush complete");
        ran
    }

    /// Run `f`, then flush once the outermost batch closes.
    ///
    /// Writes made inside the batch are coalesced even in
    /// [`FlushMode::Immediate`].
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let outermost = self.inner.batch_depth.get() == 0;
        let result = {
            let _scope = BatchScope::enter(&self.inner.batch_depth);
            f()
        };
        if outermost {
            self.flush();
        }
        result
    }

    pub fn in_batch(&self) -> bool {
        self.inner.batch_depth.get() > 0
    }

    /// Run `f` without registering the currently active frames as
    /// dependents of anything it reads.
    ///
    /// Computeds refreshed inside `f` still record their own sources.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _untracked = self.inner.stack.enter_untracked();
        f()
    }

    // ------------------------------------------------------------------------
    // Node plumbing
    // ------------------------------------------------------------------------

    pub(crate) fn register(&self, id: NodeId, kind: NodeKind) {
        self.inner.notifier.borrow_mut().register_subject(id, kind);
        trace!(%id, ?kind, "node registered");
    }

    pub(crate) fn enter(&self, id: NodeId) -> Frame<'_> {
        self.inner.stack.enter(id)
    }

    pub(crate) fn is_on_stack(&self, id: NodeId) -> bool {
        self.inner.stack.contains(id)
    }

    /// Record a read of `subject`.
    ///
    /// A top-level read starts a new round. A nested read registers every
    /// tracked frame, not only the innermost, as a direct subscriber. During
    /// a flush the running effect's frame is below the tracking floor, so
    /// only computeds it reads record edges.
    pub(crate) fn track(&self, subject: NodeId) {
        let stack = &self.inner.stack;
        if stack.begin_round() {
            trace!(%subject, generation = stack.generation(), "round started by read");
            return;
        }

        let frames = stack.tracked_frames();
        if frames.is_empty() {
            return;
        }
        let mut notifier = self.inner.notifier.borrow_mut();
        for frame in frames {
            if !notifier.has_observer(subject, frame) {
                notifier.observe(subject, frame);
            }
        }
    }

    pub(crate) fn checked(&self, id: NodeId) {
        self.inner.notifier.borrow_mut().checked(id);
    }

    /// Check a write to `state` against the write policy.
    ///
    /// `observed` is the last generation in which the state was read from
    /// inside a frame.
    pub(crate) fn validate_write(&self, state: NodeId, observed: Option<u64>) -> Result<()> {
        let Some(frame) = self.inner.stack.current() else {
            return Ok(());
        };
        let generation = self.generation();
        let conflict = match self.inner.config.write_policy {
            WritePolicy::RejectNested => true,
            WritePolicy::RejectObserved => observed == Some(generation),
        };
        if conflict {
            return Err(ReactiveError::WriteConflict {
                state,
                frame,
                generation,
            });
        }
        Ok(())
    }

    /// Start a round if nothing is running.
    pub(crate) fn begin_round(&self) {
        self.inner.stack.begin_round();
    }

    /// Propagate a write of `state`. Returns the number of newly scheduled
    /// effects.
    pub(crate) fn notify(&self, state: NodeId) -> usize {
        let mut notifier = self.inner.notifier.borrow_mut();
        let scheduled = notifier.notify(state);
        notifier.did_notify(state);
        scheduled
    }

    /// Flush pending effects once the stack has unwound, when configured
    /// to flush eagerly and no batch is open.
    ///
    /// Called after top-level writes and at the end of every call that may
    /// have written from inside a frame.
    pub(crate) fn settle(&self) {
        if self.inner.config.flush_mode == FlushMode::Immediate
            && !self.in_batch()
            && !self.inner.stack.is_active()
            && self.pending_count() > 0
        {
            self.flush();
        }
    }

    /// Refuse to register an effect from inside a frame or against
    /// dependencies this runtime does not know.
    pub(crate) fn validate_observation(&self, dependencies: &[NodeId]) -> Result<()> {
        if let Some(frame) = self.inner.stack.current() {
            return Err(ReactiveError::IllegalObservationContext { frame });
        }
        let notifier = self.inner.notifier.borrow();
        match dependencies.iter().find(|id| !notifier.contains(**id)) {
            Some(&id) => Err(ReactiveError::UnidentifiedDependency { id }),
            None => Ok(()),
        }
    }

    /// Register an effect, subscribe it to its declared dependencies, and
    /// run it once.
    pub(crate) fn register_effect(&self, effect: Rc<dyn Reactive>, dependencies: &[NodeId]) {
        let id = effect.node_id();
        self.register(id, NodeKind::Effect);
        {
            let mut notifier = self.inner.notifier.borrow_mut();
            for &subject in dependencies {
                notifier.observe(subject, id);
            }
        }
        self.inner.effects.borrow_mut().insert(id, Rc::clone(&effect));

        self.inner.stack.begin_round();
        self.execute(effect.as_ref());
        self.settle();
    }

    /// Remove an effect from the graph and the registry.
    pub(crate) fn dispose(&self, id: NodeId) -> bool {
        let removed = self.inner.effects.borrow_mut().remove(&id).is_some();
        self.inner.notifier.borrow_mut().remove_node(id);
        if removed {
            debug!(%id, "effect disposed");
        }
        removed
    }

    fn execute(&self, effect: &dyn Reactive) {
        let id = effect.node_id();
        let _span = trace_span!("effect", node = %id, generation = self.generation()).entered();
        {
            let stack = &self.inner.stack;
            let _frame = stack.enter(id);
            // A flushed effect keeps the dependencies it registered with.
            let _hidden = stack.is_inert().then(|| stack.enter_untracked());
            effect.run();
        }
        self.checked(id);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("generation", &self.generation())
            .field("depth", &self.depth())
            .field("node_count", &self.node_count())
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

/// Raises a flag for the guard's lifetime.
struct Flag<'a>(&'a Cell<bool>);

impl<'a> Flag<'a> {
    fn raise(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for Flag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Returns effects taken for a flush pass that never ran to the pending set.
struct Requeue<'a> {
    notifier: &'a RefCell<Notifier>,
    remaining: VecDeque<NodeId>,
}

impl Drop for Requeue<'_> {
    fn drop(&mut self) {
        if self.remaining.is_empty() {
            return;
        }
        warn!(left = self.remaining.len(), "flush pass interrupted, effects requeued");
        self.notifier.borrow_mut().requeue(self.remaining.drain(..));
    }
}

/// Counts open batches for the guard's lifetime.
struct BatchScope<'a>(&'a Cell<usize>);

impl<'a> BatchScope<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct MockReactive {
        id: NodeId,
        runs: Cell<usize>,
    }

    impl MockReactive {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                id: NodeId::new(),
                runs: Cell::new(0),
            })
        }
    }

    impl Reactive for MockReactive {
        fn node_id(&self) -> NodeId {
            self.id
        }

        fn run(&self) {
            self.runs.set(self.runs.get() + 1);
        }
    }

    fn subject(rt: &Runtime) -> NodeId {
        let id = NodeId::new();
        rt.register(id, NodeKind::State);
        id
    }

    #[test]
    fn runtime_registers_effects_and_runs_them_once() {
        let rt = Runtime::new();
        let state = subject(&rt);
        let effect = MockReactive::new();

        rt.register_effect(effect.clone(), &[state]);

        assert_eq!(effect.runs.get(), 1);
        assert!(rt.is_registered(effect.id));
        assert!(!rt.is_dirty(effect.id));
        assert_eq!(rt.observers(state), vec![effect.id]);
    }

    #[test]
    fn runtime_notifies_and_flushes() {
        let rt = Runtime::new();
        let state = subject(&rt);
        let effect = MockReactive::new();
        rt.register_effect(effect.clone(), &[state]);

        assert_eq!(rt.notify(state), 1);
        assert!(rt.is_pending(effect.id));
        assert!(!rt.is_dirty(state));

        // Nothing runs until the flush
        assert_eq!(effect.runs.get(), 1);
        assert_eq!(rt.flush(), 1);
        assert_eq!(effect.runs.get(), 2);
        assert_eq!(rt.pending_count(), 0);
    }

    #[test]
    fn flush_is_refused_inside_a_frame() {
        let rt = Runtime::new();
        let state = subject(&rt);
        let effect = MockReactive::new();
        rt.register_effect(effect.clone(), &[state]);
        rt.notify(state);

        {
            let _frame = rt.enter(NodeId::new());
            assert_eq!(rt.flush(), 0);
        }
        assert_eq!(rt.pending_count(), 1);
        assert_eq!(rt.flush(), 1);
    }

    #[test]
    fn track_registers_every_active_frame() {
        let rt = Runtime::new();
        let state = subject(&rt);
        let outer = NodeId::new();
        let inner = NodeId::new();
        rt.register(outer, NodeKind::Computed);
        rt.register(inner, NodeKind::Computed);

        {
            let _outer = rt.enter(outer);
            let _inner = rt.enter(inner);
            assert_eq!(rt.active_frames(), vec![outer, inner]);
            rt.track(state);
            rt.track(state);
        }

        assert_eq!(rt.subscriber_count(state), 2);
    }

    #[test]
    fn top_level_reads_start_rounds() {
        let rt = Runtime::new();
        let state = subject(&rt);
        assert_eq!(rt.generation(), 0);

        rt.track(state);
        rt.track(state);
        assert_eq!(rt.generation(), 2);
        assert_eq!(rt.subscriber_count(state), 0);

        // inert mode suppresses the round
        {
            let _inert = rt.inner.stack.enter_inert();
            rt.track(state);
        }
        assert_eq!(rt.generation(), 2);
    }

    #[test]
    fn untracked_reads_skip_active_frames() {
        let rt = Runtime::new();
        let state = subject(&rt);
        let frame = NodeId::new();
        rt.register(frame, NodeKind::Computed);

        let _frame = rt.enter(frame);
        rt.untracked(|| rt.track(state));
        assert_eq!(rt.subscriber_count(state), 0);

        rt.track(state);
        assert_eq!(rt.subscriber_count(state), 1);
    }

    #[test]
    fn observation_is_validated() {
        let rt = Runtime::new();
        let state = subject(&rt);
        let stranger = NodeId::new();

        assert_eq!(
            rt.validate_observation(&[state, stranger]),
            Err(ReactiveError::UnidentifiedDependency { id: stranger })
        );

        let frame = NodeId::new();
        let _frame = rt.enter(frame);
        assert_eq!(
            rt.validate_observation(&[state]),
            Err(ReactiveError::IllegalObservationContext { frame })
        );
    }

    #[test]
    fn write_policies() {
        let rt = Runtime::new();
        let state = subject(&rt);
        assert!(rt.validate_write(state, None).is_ok());

        let frame = NodeId::new();
        let _frame = rt.enter(frame);
        let generation = rt.generation();
        assert!(rt.validate_write(state, None).is_ok());
        assert!(rt.validate_write(state, Some(generation)).is_err());

        let strict = Runtime::with_config(
            RuntimeConfig::default().with_write_policy(WritePolicy::RejectNested),
        );
        let strict_state = subject(&strict);
        let _strict_frame = strict.enter(frame);
        assert_eq!(
            strict.validate_write(strict_state, None),
            Err(ReactiveError::WriteConflict {
                state: strict_state,
                frame,
                generation: strict.generation(),
            })
        );
    }

    #[test]
    fn dispose_removes_effect() {
        let rt = Runtime::new();
        let state = subject(&rt);
        let effect = MockReactive::new();
        rt.register_effect(effect.clone(), &[state]);
        rt.notify(state);

        assert!(rt.dispose(effect.id));
        assert!(!rt.dispose(effect.id));
        assert_eq!(rt.pending_count(), 0);
        assert!(rt.observers(state).is_empty());
        assert_eq!(rt.flush(), 0);
        assert_eq!(effect.runs.get(), 1);
    }

    #[test]
    fn batch_flushes_when_outermost_closes() {
        let rt = Runtime::new();
        let state = subject(&rt);
        let effect = MockReactive::new();
        rt.register_effect(effect.clone(), &[state]);

        let value = rt.batch(|| {
            rt.notify(state);
            rt.batch(|| rt.notify(state));
            assert!(rt.in_batch());
            assert_eq!(effect.runs.get(), 1);
            42
        });

        assert_eq!(value, 42);
        assert!(!rt.in_batch());
        assert_eq!(effect.runs.get(), 2);
    }
}
