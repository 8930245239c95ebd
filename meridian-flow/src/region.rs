//! Static-weight flow scheduler.
//!
//! All traffic to the destination shares one bounded FIFO. The scheduler's
//! weight is a fixed function of the two servers' regions, so it reports
//! the same figure as both its active and used weight regardless of load.

use meridian_core::{LocationEntry, ObjectMessage, ServerId, ServerMessage};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{DropReason, FlowError, FlowResult};
use crate::queue::{BoundedQueue, ServiceQueue};
use crate::scheduler::{Admitted, FlowScheduler, QueuedMessage, SchedulerContext};
use crate::weight::{server_bounds, WeightCalculator};

/// Configuration for region schedulers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionSchedulerConfig {
    /// Weight of a server pair as a function of their regions.
    pub weight_function: WeightCalculator,
}

impl RegionSchedulerConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            weight_function: WeightCalculator::InverseSquare {
                scale: 1.0,
                min_distance: 1.0,
            },
        }
    }

    /// Sets the weight function.
    #[must_use]
    pub const fn with_weight_function(mut self, weight_function: WeightCalculator) -> Self {
        self.weight_function = weight_function;
        self
    }
}

/// Flow scheduler with a single FIFO and a region-derived weight.
#[derive(Debug)]
pub struct RegionFlowScheduler {
    config: RegionSchedulerConfig,
    ctx: SchedulerContext,
    dest: ServerId,
    queue: Mutex<BoundedQueue<QueuedMessage>>,
}

impl RegionFlowScheduler {
    /// Creates a scheduler for `dest` holding at most `max_size` bytes.
    #[must_use]
    pub fn new(
        config: RegionSchedulerConfig,
        ctx: SchedulerContext,
        dest: ServerId,
        max_size: u32,
    ) -> Self {
        Self {
            config,
            ctx,
            dest,
            queue: Mutex::new(BoundedQueue::new(max_size)),
        }
    }

    /// Weight of the (own region, destination region) pair.
    #[must_use]
    pub fn region_weight(&self) -> f64 {
        let own = server_bounds(self.ctx.partition.as_ref(), self.ctx.server);
        let dest = server_bounds(self.ctx.partition.as_ref(), self.dest);
        self.config.weight_function.weight(&own, &dest)
    }
}

impl ServiceQueue for RegionFlowScheduler {
    type Item = ServerMessage;

    fn front(&mut self) -> Option<&ServerMessage> {
        self.queue.get_mut().front().map(|queued| &queued.msg)
    }

    fn pop(&mut self) -> Option<ServerMessage> {
        self.queue.get_mut().pop().map(|queued| queued.msg)
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    fn size(&self) -> u32 {
        self.queue.lock().size()
    }

    fn max_size(&self) -> u32 {
        self.queue.lock().max_size()
    }
}

impl FlowScheduler for RegionFlowScheduler {
    fn dest_server(&self) -> ServerId {
        self.dest
    }

    fn push(
        &self,
        msg: ObjectMessage,
        _source: &LocationEntry,
        _dest: &LocationEntry,
        _now_us: u64,
    ) -> FlowResult<Admitted> {
        let queued = QueuedMessage::wrap(&msg, self.ctx.server, self.dest);
        let mut queue = self.queue.lock();
        let was_empty = queue.is_empty();
        if queue.try_push(queued).is_err() {
            trace!(dest = %self.dest, msg = %msg.id, "region queue full");
            return Err(FlowError::Dropped {
                reason: DropReason::Overflow,
            });
        }
        Ok(if was_empty {
            Admitted::FrontChanged
        } else {
            Admitted::Queued
        })
    }

    fn total_active_weight(&self) -> f64 {
        self.region_weight()
    }

    fn total_sender_used_weight(&self) -> f64 {
        self.region_weight()
    }

    fn total_receiver_used_weight(&self) -> f64 {
        self.region_weight()
    }

    fn update_sender_stats(&self, _total_weight: f64, _capacity: f64) {}

    fn update_receiver_stats(&self, _total_weight: f64, _capacity: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weight::{NoObjectLocator, SpatialPartition};
    use meridian_core::{BoundingBox3, MessageId, ObjectId, Vector3};
    use std::sync::Arc;

    struct Line;

    impl SpatialPartition for Line {
        fn server_region(&self, server: ServerId) -> Vec<BoundingBox3> {
            #[allow(clippy::cast_precision_loss)]
            let x = server.get() as f32 * 10.0;
            vec![BoundingBox3::new(
                Vector3::new(x, 0.0, 0.0),
                Vector3::new(x + 10.0, 10.0, 10.0),
            )]
        }
    }

    fn scheduler(dest: u64, max_size: u32) -> RegionFlowScheduler {
        let ctx = SchedulerContext::new(ServerId::new(1), Arc::new(Line), Arc::new(NoObjectLocator));
        RegionFlowScheduler::new(
            RegionSchedulerConfig::for_testing(),
            ctx,
            ServerId::new(dest),
            max_size,
        )
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

    fn entry() -> LocationEntry {
        LocationEntry::new(ServerId::new(2), 1.0)
    }

    #[test]
    fn test_fifo_delivery() {
        let mut sched = scheduler(2, 1000);
        for id in 1..=3 {
            sched.push(message(id), &entry(), &entry(), 0).unwrap();
        }
        let ids: Vec<u64> = std::iter::from_fn(|| sched.pop()).map(|m| m.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_full_queue_drops() {
        let sched = scheduler(2, 250);
        sched.push(message(1), &entry(), &entry(), 0).unwrap();
        sched.push(message(2), &entry(), &entry(), 0).unwrap();
        let result = sched.push(message(3), &entry(), &entry(), 0);
        assert!(matches!(
            result,
            Err(FlowError::Dropped {
                reason: DropReason::Overflow
            })
        ));
        assert_eq!(sched.size(), 200);
    }

    #[test]
    fn test_weight_is_static_and_spatial() {
        let near = scheduler(2, 1000);
        let far = scheduler(9, 1000);
        assert!(near.total_active_weight() > far.total_active_weight());

        let before = near.total_sender_used_weight();
        near.push(message(1), &entry(), &entry(), 0).unwrap();
        near.update_receiver_stats(100.0, 5000.0);
        assert!((near.total_sender_used_weight() - before).abs() < f64::EPSILON);
        assert!((near.total_receiver_used_weight() - before).abs() < f64::EPSILON);
    }

    #[test]
    fn test_front_changed_only_when_empty() {
        let mut sched = scheduler(2, 1000);
        assert_eq!(
            sched.push(message(1), &entry(), &entry(), 0).unwrap(),
            Admitted::FrontChanged
        );
        assert_eq!(
            sched.push(message(2), &entry(), &entry(), 0).unwrap(),
            Admitted::Queued
        );
        sched.pop();
        sched.pop();
        assert_eq!(
            sched.push(message(3), &entry(), &entry(), 0).unwrap(),
            Admitted::FrontChanged
        );
    }
}
