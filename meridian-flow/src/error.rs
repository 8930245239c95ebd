//! Admission and queueing failures.

use std::fmt;

/// Why a message was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Randomly dropped because the flow exceeded its fair share.
    Probabilistic,
    /// The link buffer was full.
    Overflow,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probabilistic => f.write_str("probabilistic"),
            Self::Overflow => f.write_str("overflow"),
        }
    }
}

/// Why a queue or scheduler did not take a message.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Taking the item would exceed the byte budget.
    #[error("queue full: {size} bytes queued, {requested} requested (max {max_size})")]
    QueueFull {
        /// Bytes currently queued.
        size: u32,
        /// Size of the rejected item.
        requested: u32,
        /// Maximum queue size in bytes.
        max_size: u32,
    },

    /// No sub-queue is registered under the key.
    #[error("unknown queue")]
    UnknownQueue,

    /// A sub-queue is already registered under the key.
    #[error("queue already exists")]
    DuplicateQueue,

    /// The flow has no usable weight.
    #[error("flow weight is zero or unavailable")]
    ZeroWeight,

    /// Admission control refused the message.
    #[error("message dropped ({reason})")]
    Dropped {
        /// Why it was dropped.
        reason: DropReason,
    },
}

/// Result of a queue or scheduler operation.
pub type FlowResult<T> = Result<T, FlowError>;
