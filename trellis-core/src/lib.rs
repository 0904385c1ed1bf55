//! Trellis Core
//!
//! A fine-grained reactive runtime. It implements:
//!
//! - Reactive primitives (states, computeds, effects)
//! - Automatic dependency tracking through an evaluation stack
//! - Generation-based invalidation, so every computed recomputes at most
//!   once per round even in diamond-shaped graphs
//! - Batched, deferred effect execution
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and the runtime that owns them
//! - `graph`: Dependency graph, dirty flags and the pending-effect set
//! - `config`: Per-runtime policies
//! - `error`: The error type shared by every fallible operation
//!
//! Everything is single-threaded: handles are `Rc`-based and not `Send`.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use trellis_core::{Computed, Effect, Runtime, State};
//!
//! let rt = Runtime::new();
//!
//! // Create a state
//! let count = State::new(&rt, 0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Computed::new(&rt, move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _effect = Effect::new(&rt, &[&count], {
//!     let (count, doubled, log) = (count.clone(), doubled.clone(), log.clone());
//!     move || log.borrow_mut().push(format!("Count: {}, Doubled: {}", count.get(), doubled.get()))
//! })
//! .unwrap();
//!
//! // Update the state, then let pending effects run
//! count.put(5).unwrap();
//! rt.flush();
//! assert_eq!(log.borrow().last().unwrap(), "Count: 5, Doubled: 10");
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{FlushMode, RuntimeConfig, WritePolicy};
pub use error::{ReactiveError, Result};
pub use graph::NodeId;
pub use reactive::{Computed, Effect, Runtime, Signal, State, Subject};
