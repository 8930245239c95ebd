//! Routing error types.

use meridian_core::ObjectId;
use meridian_flow::FlowError;

use crate::codec::CodecError;

/// Errors from the forwarding path.
///
/// Every variant describes the fate of a single message; none of them stop
/// the forwarder.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// An inbound server message could not be parsed.
    #[error("malformed server message: {0}")]
    Parse(#[from] CodecError),

    /// The location service does not know the destination object.
    #[error("location lookup failed for {object}")]
    LookupFailed {
        /// The destination object.
        object: ObjectId,
    },

    /// Too many bytes are already parked behind pending lookups.
    #[error("lookup queue full, dropping message for {object}")]
    LookupQueueFull {
        /// The destination object.
        object: ObjectId,
    },

    /// The destination's flow scheduler refused the message.
    #[error("admission refused: {0}")]
    Admission(#[from] FlowError),

    /// The local dispatcher refused the message.
    #[error("local delivery failed for {object}")]
    LocalDeliveryFailed {
        /// The destination object.
        object: ObjectId,
    },

    /// The inbound buffer was full.
    #[error("receive queue full")]
    ReceiveQueueFull,

    /// A configured limit refused the message.
    #[error(transparent)]
    Limit(#[from] meridian_core::Error),
}

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;
