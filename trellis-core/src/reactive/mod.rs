//! Reactive Primitives
//!
//! This module implements the core reactive system: states, computeds, and
//! effects, all owned by an explicit [`Runtime`].
//!
//! # Concepts
//!
//! ## States
//!
//! A State is a container for mutable state. When it is read within an
//! active frame (a computed or effect body), every active frame is
//! registered as a dependent. When its value changes, all dependents are
//! marked dirty.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! only when read while dirty, and at most once per round.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation with declared dependencies.
//! It runs once at registration and again at each flush that follows an
//! invalidation of something it depends on.
//!
//! # Implementation Notes
//!
//! The runtime keeps an evaluation stack of active frames. Reads consult
//! the stack to register edges; there is no global state, so independent
//! runtimes never observe each other.

mod computed;
mod context;
mod effect;
mod runtime;
mod signal;

pub use computed::Computed;
pub use effect::Effect;
pub use runtime::{Reactive, Runtime};
pub use signal::{Signal, State, Subject};
