//! Errors raised by the reactive runtime.
//!
//! Every error is detected before the triggering operation changes any
//! state, so a failed call leaves the graph exactly as it was.

use thiserror::Error;

use crate::graph::NodeId;

pub type Result<T> = std::result::Result<T, ReactiveError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A state was written from a frame the write policy forbids.
    #[error("write to {state} conflicts with active frame {frame} in generation {generation}")]
    WriteConflict {
        state: NodeId,
        frame: NodeId,
        generation: u64,
    },

    /// An effect declared a dependency this runtime never registered.
    #[error("dependency {id} is not registered with this runtime")]
    UnidentifiedDependency { id: NodeId },

    /// An effect was created while a computation was mid-evaluation.
    #[error("effects cannot be registered inside active frame {frame}")]
    IllegalObservationContext { frame: NodeId },

    /// A computed read itself, directly or through other computeds.
    #[error("computed {id} depends on itself")]
    CyclicDependency { id: NodeId },
}

impl ReactiveError {
    /// The node the error is about.
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Self::WriteConflict { state, .. } => *state,
            Self::UnidentifiedDependency { id } | Self::CyclicDependency { id } => *id,
            Self::IllegalObservationContext { frame } => *frame,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
