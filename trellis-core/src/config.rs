//! Runtime Configuration
//!
//! Policies that callers may choose per runtime. The defaults match the
//! strictest write validation and a manually driven flush.

/// Which writes to a state are rejected while frames are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Reject a write from inside a frame when the state was already read
    /// from inside a frame during the current generation. Writes to states
    /// nobody has consumed this round are allowed.
    #[default]
    RejectObserved,

    /// Reject every write made while any frame is active.
    RejectNested,
}

/// When pending effects are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Effects wait for [`Runtime::flush`](crate::Runtime::flush) or for the
    /// outermost [`Runtime::batch`](crate::Runtime::batch) to close.
    #[default]
    Deferred,

    /// Effects are flushed after every top-level write made outside a batch.
    Immediate,
}

/// Configuration for a [`Runtime`](crate::Runtime).
///
/// # Example
///
/// ```rust
/// use trellis_core::{FlushMode, RuntimeConfig, WritePolicy};
///
/// let config = RuntimeConfig::default()
///     .with_write_policy(WritePolicy::RejectNested)
///     .with_flush_mode(FlushMode::Immediate)
///     .with_max_flush_passes(4);
/// assert_eq!(config.max_flush_passes, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub write_policy: WritePolicy,
    pub flush_mode: FlushMode,

    /// Upper bound on flush passes. Effects that keep scheduling each other
    /// past this bound are left pending for the next flush.
    pub max_flush_passes: usize,
}

impl RuntimeConfig {
    pub const DEFAULT_MAX_FLUSH_PASSES: usize = 16;

    #[must_use]
    pub fn with_write_policy(mut self, write_policy: WritePolicy) -> Self {
        self.write_policy = write_policy;
        self
    }

    #[must_use]
    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    /// Values below one are raised to one so a flush always makes progress.
    #[must_use]
    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes.max(1);
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            write_policy: WritePolicy::default(),
            flush_mode: FlushMode::default(),
            max_flush_passes: Self::DEFAULT_MAX_FLUSH_PASSES,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
