//! Per-destination flow schedulers.
//!
//! A flow scheduler sits between the forwarder and one destination server.
//! It accepts object messages bound for that server, decides whether to
//! admit them, and hands admitted messages to the outer fair queue as
//! server messages. It also tracks how much of the shared link weight its
//! traffic is using, which the forwarder reports to the peer.
//!
//! Two implementations exist and one is chosen per node at startup:
//!
//! | Kind | Queueing | Weight |
//! |------|----------|--------|
//! | [`Region`](FlowSchedulerKind::Region) | one FIFO | static, from the two server regions |
//! | [`Csfq`](FlowSchedulerKind::Csfq) | one FIFO, probabilistic admission | per object pair, from the two object regions |

use std::sync::Arc;

use bytes::Bytes;
use meridian_core::{LocationEntry, ObjectMessage, ServerId, ServerMessage, ServerPort, Transmittable};

use crate::csfq::{CsfqConfig, CsfqFlowScheduler};
use crate::error::FlowResult;
use crate::queue::ServiceQueue;
use crate::region::{RegionFlowScheduler, RegionSchedulerConfig};
use crate::weight::{ObjectLocator, SpatialPartition};

/// Outcome of an accepted push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admitted {
    /// The scheduler went from empty to non-empty; the owning fair queue
    /// must be told its front changed.
    FrontChanged,
    /// Queued behind other messages.
    Queued,
}

/// Which flow scheduler a node uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowSchedulerKind {
    /// Static weight from server regions.
    #[default]
    Region,
    /// Core-stateless fair queueing.
    Csfq,
}

impl std::str::FromStr for FlowSchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "region" => Ok(Self::Region),
            "csfq" => Ok(Self::Csfq),
            other => Err(format!("unknown flow scheduler '{other}'")),
        }
    }
}

/// Configuration for building flow schedulers.
#[derive(Debug, Clone, Default)]
pub struct FlowSchedulerConfig {
    /// Which implementation to build.
    pub kind: FlowSchedulerKind,
    /// Settings for region schedulers.
    pub region: RegionSchedulerConfig,
    /// Settings for CSFQ schedulers.
    pub csfq: CsfqConfig,
}

impl FlowSchedulerConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            kind: FlowSchedulerKind::Region,
            region: RegionSchedulerConfig::for_testing(),
            csfq: CsfqConfig::for_testing(),
        }
    }

    /// Sets the scheduler kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: FlowSchedulerKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Services a scheduler consults, shared by all schedulers of a node.
#[derive(Clone)]
pub struct SchedulerContext {
    /// This server.
    pub server: ServerId,
    /// Region ownership.
    pub partition: Arc<dyn SpatialPartition>,
    /// Exact object bounds, where known.
    pub locator: Arc<dyn ObjectLocator>,
}

impl SchedulerContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        server: ServerId,
        partition: Arc<dyn SpatialPartition>,
        locator: Arc<dyn ObjectLocator>,
    ) -> Self {
        Self {
            server,
            partition,
            locator,
        }
    }
}

impl std::fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

/// A server message waiting in a scheduler, charged by its object size.
#[derive(Debug)]
pub(crate) struct QueuedMessage {
    pub(crate) msg: ServerMessage,
    pub(crate) object_bytes: u32,
}

impl QueuedMessage {
    /// Wraps an object message for the hop from `source` to `dest`.
    pub(crate) fn wrap(msg: &ObjectMessage, source: ServerId, dest: ServerId) -> Self {
        let payload: Bytes = msg.to_bytes();
        Self {
            msg: ServerMessage::new(msg.id, source, dest, ServerPort::ObjectRouting, payload),
            object_bytes: msg.size_bytes(),
        }
    }
}

impl Transmittable for QueuedMessage {
    fn size_bytes(&self) -> u32 {
        self.object_bytes
    }
}

/// The contract between the forwarder and a destination's scheduler.
///
/// `push` takes `&self` and is safe to call from any thread; the pull side
/// (`ServiceQueue`) is driven by the owner only.
pub trait FlowScheduler: ServiceQueue<Item = ServerMessage> {
    /// The destination server this scheduler feeds.
    fn dest_server(&self) -> ServerId;

    /// Offers a message for the destination.
    ///
    /// # Errors
    /// Returns `FlowError::Dropped` when admission control or the buffer
    /// refuses the message, or `FlowError::ZeroWeight` when the flow has no
    /// usable weight. The message is dropped in both cases.
    fn push(
        &self,
        msg: ObjectMessage,
        source: &LocationEntry,
        dest: &LocationEntry,
        now_us: u64,
    ) -> FlowResult<Admitted>;

    /// Sum of weights of all flows currently tracked.
    fn total_active_weight(&self) -> f64;

    /// Weight in use against the sender-side capacity.
    fn total_sender_used_weight(&self) -> f64;

    /// Weight in use against the receiver-side capacity.
    fn total_receiver_used_weight(&self) -> f64;

    /// Records the local link sender's total weight and capacity.
    fn update_sender_stats(&self, total_weight: f64, capacity: f64);

    /// Records the peer's link receiver total weight and capacity.
    fn update_receiver_stats(&self, total_weight: f64, capacity: f64);

    /// Forgets flows idle since before `now_us - timeout`. Returns how many.
    fn evict_idle_flows(&self, _now_us: u64) -> u32 {
        0
    }
}

/// The scheduler chosen for this node.
#[derive(Debug)]
pub enum AnyFlowScheduler {
    /// Static region weight.
    Region(RegionFlowScheduler),
    /// Core-stateless fair queueing.
    Csfq(CsfqFlowScheduler),
}

impl AnyFlowScheduler {
    /// Builds a scheduler of the configured kind for `dest`.
    #[must_use]
    pub fn new(
        config: &FlowSchedulerConfig,
        ctx: SchedulerContext,
        dest: ServerId,
        max_size: u32,
    ) -> Self {
        match config.kind {
            FlowSchedulerKind::Region => {
                Self::Region(RegionFlowScheduler::new(config.region, ctx, dest, max_size))
            }
            FlowSchedulerKind::Csfq => {
                Self::Csfq(CsfqFlowScheduler::new(config.csfq.clone(), ctx, dest, max_size))
            }
        }
    }

    /// Which kind this is.
    #[must_use]
    pub const fn kind(&self) -> FlowSchedulerKind {
        match self {
            Self::Region(_) => FlowSchedulerKind::Region,
            Self::Csfq(_) => FlowSchedulerKind::Csfq,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $s:ident => $body:expr) => {
        match $self {
            AnyFlowScheduler::Region($s) => $body,
            AnyFlowScheduler::Csfq($s) => $body,
        }
    };
}

impl ServiceQueue for AnyFlowScheduler {
    type Item = ServerMessage;

    fn front(&mut self) -> Option<&ServerMessage> {
        dispatch!(self, s => s.front())
    }

    fn pop(&mut self) -> Option<ServerMessage> {
        dispatch!(self, s => s.pop())
    }

    fn is_empty(&self) -> bool {
        dispatch!(self, s => s.is_empty())
    }

    fn size(&self) -> u32 {
        dispatch!(self, s => s.size())
    }

    fn max_size(&self) -> u32 {
        dispatch!(self, s => s.max_size())
    }
}

impl FlowScheduler for AnyFlowScheduler {
    fn dest_server(&self) -> ServerId {
        dispatch!(self, s => s.dest_server())
    }

    fn push(
        &self,
        msg: ObjectMessage,
        source: &LocationEntry,
        dest: &LocationEntry,
        now_us: u64,
    ) -> FlowResult<Admitted> {
        dispatch!(self, s => s.push(msg, source, dest, now_us))
    }

    fn total_active_weight(&self) -> f64 {
        dispatch!(self, s => s.total_active_weight())
    }

    fn total_sender_used_weight(&self) -> f64 {
        dispatch!(self, s => s.total_sender_used_weight())
    }

    fn total_receiver_used_weight(&self) -> f64 {
        dispatch!(self, s => s.total_receiver_used_weight())
    }

    fn update_sender_stats(&self, total_weight: f64, capacity: f64) {
        dispatch!(self, s => s.update_sender_stats(total_weight, capacity));
    }

    fn update_receiver_stats(&self, total_weight: f64, capacity: f64) {
        dispatch!(self, s => s.update_receiver_stats(total_weight, capacity));
    }

    fn evict_idle_flows(&self, now_us: u64) -> u32 {
        dispatch!(self, s => s.evict_idle_flows(now_us))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weight::NoObjectLocator;
    use meridian_core::{BoundingBox3, MessageId, ObjectId, Vector3};

    struct Grid;

    impl SpatialPartition for Grid {
        fn server_region(&self, server: ServerId) -> Vec<BoundingBox3> {
            #[allow(clippy::cast_precision_loss)]
            let x = server.get() as f32 * 10.0;
            vec![BoundingBox3::new(
                Vector3::new(x, 0.0, 0.0),
                Vector3::new(x + 10.0, 10.0, 10.0),
            )]
        }
    }

    fn ctx() -> SchedulerContext {
        SchedulerContext::new(ServerId::new(1), Arc::new(Grid), Arc::new(NoObjectLocator))
    }

    fn message(id: u64) -> ObjectMessage {
        ObjectMessage::new(
            MessageId::new(id),
            ObjectId::new(10),
            0,
            ObjectId::new(20),
            0,
            vec![0u8; 68],
        )
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("region".parse(), Ok(FlowSchedulerKind::Region));
        assert_eq!("csfq".parse(), Ok(FlowSchedulerKind::Csfq));
        assert!("fifo".parse::<FlowSchedulerKind>().is_err());
    }

    #[test]
    fn test_builds_configured_kind() {
        let config = FlowSchedulerConfig::for_testing();
        let sched = AnyFlowScheduler::new(&config, ctx(), ServerId::new(2), 4096);
        assert_eq!(sched.kind(), FlowSchedulerKind::Region);

        let config = config.with_kind(FlowSchedulerKind::Csfq);
        let sched = AnyFlowScheduler::new(&config, ctx(), ServerId::new(2), 4096);
        assert_eq!(sched.kind(), FlowSchedulerKind::Csfq);
        assert_eq!(sched.dest_server(), ServerId::new(2));
    }

    #[test]
    fn test_popped_message_is_wrapped_for_destination() {
        let config = FlowSchedulerConfig::for_testing();
        let mut sched = AnyFlowScheduler::new(&config, ctx(), ServerId::new(2), 4096);
        let src = LocationEntry::new(ServerId::new(1), 1.0);
        let dst = LocationEntry::new(ServerId::new(2), 1.0);

        let admitted = sched.push(message(7), &src, &dst, 0).unwrap();
        assert_eq!(admitted, Admitted::FrontChanged);
        let admitted = sched.push(message(8), &src, &dst, 0).unwrap();
        assert_eq!(admitted, Admitted::Queued);

        let first = sched.pop().unwrap();
        assert_eq!(first.id, MessageId::new(7));
        assert_eq!(first.source_server, ServerId::new(1));
        assert_eq!(first.dest_server, ServerId::new(2));
        assert_eq!(first.port, ServerPort::ObjectRouting);
        let inner = ObjectMessage::decode(&mut first.payload.clone()).unwrap();
        assert_eq!(inner, message(7));

        // Ownership moved out: the second message is the only one left.
        assert_eq!(sched.pop().map(|m| m.id), Some(MessageId::new(8)));
        assert!(sched.pop().is_none());
        assert!(sched.is_empty());
    }
}
