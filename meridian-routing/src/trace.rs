//! Forwarding trace events.
//!
//! The forwarder reports each step of a message's life to a [`TraceSink`].
//! Sinks are write-only; nothing the forwarder does depends on them.

use std::fmt;

use meridian_core::{MessageId, ObjectId, ServerId};
use meridian_flow::{DropReason, FlowError};
use parking_lot::Mutex;

/// Why the forwarder dropped a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropCause {
    /// CSFQ admission dropped it at random.
    Probabilistic,
    /// The destination buffer was full.
    Overflow,
    /// The flow had no usable weight.
    ZeroWeight,
    /// The location service does not know the destination.
    LookupFailed,
    /// The lookup did not answer in time.
    LookupTimedOut,
    /// Too much traffic was already waiting on lookups.
    LookupQueueFull,
    /// The inbound server message could not be parsed.
    ParseFailure,
    /// The local dispatcher refused it.
    LocalDeliveryFailed,
    /// The inbound buffer was full.
    ReceiveQueueFull,
    /// Larger than the configured object message limit.
    Oversized,
}

impl DropCause {
    /// Every cause, in a fixed order.
    pub const ALL: [Self; 10] = [
        Self::Probabilistic,
        Self::Overflow,
        Self::ZeroWeight,
        Self::LookupFailed,
        Self::LookupTimedOut,
        Self::LookupQueueFull,
        Self::ParseFailure,
        Self::LocalDeliveryFailed,
        Self::ReceiveQueueFull,
        Self::Oversized,
    ];

    /// Maps a flow scheduler refusal to a drop cause.
    #[must_use]
    pub const fn from_flow_error(err: &FlowError) -> Self {
        match err {
            FlowError::Dropped {
                reason: DropReason::Probabilistic,
            } => Self::Probabilistic,
            FlowError::ZeroWeight => Self::ZeroWeight,
            _ => Self::Overflow,
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DropCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Probabilistic => "probabilistic",
            Self::Overflow => "overflow",
            Self::ZeroWeight => "zero_weight",
            Self::LookupFailed => "lookup_failed",
            Self::LookupTimedOut => "lookup_timed_out",
            Self::LookupQueueFull => "lookup_queue_full",
            Self::ParseFailure => "parse_failure",
            Self::LocalDeliveryFailed => "local_delivery_failed",
            Self::ReceiveQueueFull => "receive_queue_full",
            Self::Oversized => "oversized",
        };
        f.write_str(name)
    }
}

/// How a destination server was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    /// The local location cache.
    Cache,
    /// The authoritative location service.
    Lookup,
}

/// One step in a message's life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The forwarder took ownership of a message.
    ForwardingStarted {
        /// The message.
        msg: MessageId,
        /// Where it is going.
        dest_object: ObjectId,
    },
    /// The cache knew the destination.
    CacheHit {
        /// The message.
        msg: MessageId,
        /// Cached owner.
        server: ServerId,
    },
    /// The cache did not know the destination.
    CacheMiss {
        /// The message.
        msg: MessageId,
    },
    /// The destination server is known.
    LookupFinished {
        /// The message.
        msg: MessageId,
        /// Owning server.
        server: ServerId,
        /// How it was found.
        resolved_by: ResolvedBy,
    },
    /// Admitted by a destination's flow scheduler.
    Enqueued {
        /// The message.
        msg: MessageId,
        /// Next-hop server.
        dest: ServerId,
    },
    /// Handed to the link sender.
    Sent {
        /// The message.
        msg: MessageId,
        /// Next-hop server.
        dest: ServerId,
    },
    /// Delivered to a local object or the space itself.
    DeliveredLocally {
        /// The message.
        msg: MessageId,
    },
    /// The message was dropped.
    Dropped {
        /// The message.
        msg: MessageId,
        /// Why.
        cause: DropCause,
    },
}

/// Receives trace events.
pub trait TraceSink: Send + Sync {
    /// Records an event.
    fn record(&self, event: TraceEvent);
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn record(&self, _event: TraceEvent) {}
}

/// A sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTraceSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Counts recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&TraceEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Counts drops with the given cause.
    #[must_use]
    pub fn drops(&self, cause: DropCause) -> usize {
        self.count(|e| matches!(e, TraceEvent::Dropped { cause: c, .. } if *c == cause))
    }

    /// Removes and returns all recorded events.
    pub fn take(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, event: TraceEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_error_mapping() {
        let prob = FlowError::Dropped {
            reason: DropReason::Probabilistic,
        };
        let over = FlowError::Dropped {
            reason: DropReason::Overflow,
        };
        assert_eq!(DropCause::from_flow_error(&prob), DropCause::Probabilistic);
        assert_eq!(DropCause::from_flow_error(&over), DropCause::Overflow);
        assert_eq!(
            DropCause::from_flow_error(&FlowError::ZeroWeight),
            DropCause::ZeroWeight
        );
    }

    #[test]
    fn test_indexes_are_dense() {
        for (i, cause) in DropCause::ALL.iter().enumerate() {
            assert_eq!(cause.index(), i);
        }
    }

    #[test]
    fn test_memory_sink_counts_drops() {
        let sink = MemoryTraceSink::new();
        sink.record(TraceEvent::Dropped {
            msg: MessageId::new(1),
            cause: DropCause::Overflow,
        });
        sink.record(TraceEvent::CacheMiss {
            msg: MessageId::new(2),
        });
        assert_eq!(sink.drops(DropCause::Overflow), 1);
        assert_eq!(sink.drops(DropCause::LookupFailed), 0);
        assert_eq!(sink.take().len(), 2);
        assert!(sink.events().is_empty());
    }
}
