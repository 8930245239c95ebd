//! Per-destination outbound queues of the forwarder.
//!
//! Each destination server gets a small fair queue over services: object
//! traffic goes through the destination's flow scheduler, while cache and
//! weight updates ride their own bounded FIFOs. Control traffic therefore
//! never waits behind, or competes for admission with, object messages.

use std::collections::BTreeMap;

use meridian_core::{LocationEntry, ObjectMessage, ServerId, ServerMessage};
use meridian_flow::{
    Admitted, AnyFlowScheduler, BoundedQueue, FairQueue, FlowError, FlowResult, FlowScheduler,
    FlowSchedulerConfig, PushQueue, SchedulerContext, ServiceQueue,
};
use tracing::{debug, error};

use crate::link::MessageSource;

/// A logical channel inside one destination's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceId {
    /// Routed object messages, via the flow scheduler.
    ObjectMessages,
    /// Location cache corrections.
    CacheUpdates,
    /// Weight exchange records.
    WeightUpdates,
}

impl ServiceId {
    /// Every service, in registration order.
    pub const ALL: [Self; 3] = [Self::ObjectMessages, Self::CacheUpdates, Self::WeightUpdates];
}

#[derive(Debug)]
enum ServiceLane {
    Objects(AnyFlowScheduler),
    Control(BoundedQueue<ServerMessage>),
}

impl ServiceQueue for ServiceLane {
    type Item = ServerMessage;

    fn front(&mut self) -> Option<&ServerMessage> {
        match self {
            Self::Objects(sched) => sched.front(),
            Self::Control(queue) => queue.front(),
        }
    }

    fn pop(&mut self) -> Option<ServerMessage> {
        match self {
            Self::Objects(sched) => sched.pop(),
            Self::Control(queue) => queue.pop(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Objects(sched) => sched.is_empty(),
            Self::Control(queue) => queue.is_empty(),
        }
    }

    fn size(&self) -> u32 {
        match self {
            Self::Objects(sched) => sched.size(),
            Self::Control(queue) => queue.size(),
        }
    }

    fn max_size(&self) -> u32 {
        match self {
            Self::Objects(sched) => sched.max_size(),
            Self::Control(queue) => queue.max_size(),
        }
    }
}

type DestinationQueue = FairQueue<ServiceId, ServiceLane>;

/// Outbound queues for every destination this server talks to.
#[derive(Debug)]
pub struct ForwarderServiceQueue {
    ctx: SchedulerContext,
    scheduler_config: FlowSchedulerConfig,
    send_queue_bytes: u32,
    control_queue_bytes: u32,
    dests: BTreeMap<ServerId, DestinationQueue>,
}

impl ForwarderServiceQueue {
    /// Creates an empty set of destination queues.
    ///
    /// Object traffic to each destination is buffered up to
    /// `send_queue_bytes`; each control service up to `control_queue_bytes`.
    #[must_use]
    pub fn new(
        ctx: SchedulerContext,
        scheduler_config: FlowSchedulerConfig,
        send_queue_bytes: u32,
        control_queue_bytes: u32,
    ) -> Self {
        Self {
            ctx,
            scheduler_config,
            send_queue_bytes,
            control_queue_bytes,
            dests: BTreeMap::new(),
        }
    }

    /// Creates the queues and flow scheduler for `dest` if missing.
    ///
    /// Returns true if they were created by this call.
    pub fn pre_push(&mut self, dest: ServerId) -> bool {
        if self.dests.contains_key(&dest) {
            return false;
        }
        match self.build_destination(dest) {
            Ok(queue) => {
                debug!(server = %self.ctx.server, %dest, kind = ?self.scheduler_config.kind, "created flow scheduler");
                self.dests.insert(dest, queue);
                true
            }
            Err(err) => {
                error!(server = %self.ctx.server, %dest, %err, "failed to create destination queues");
                false
            }
        }
    }

    fn build_destination(&self, dest: ServerId) -> FlowResult<DestinationQueue> {
        let sched = AnyFlowScheduler::new(
            &self.scheduler_config,
            self.ctx.clone(),
            dest,
            self.send_queue_bytes,
        );
        let mut queue = FairQueue::new();
        queue.add_queue(ServiceId::ObjectMessages, ServiceLane::Objects(sched), 1.0)?;
        for service in [ServiceId::CacheUpdates, ServiceId::WeightUpdates] {
            let lane = ServiceLane::Control(BoundedQueue::new(self.control_queue_bytes));
            queue.add_queue(service, lane, 1.0)?;
        }
        Ok(queue)
    }

    /// True if `dest` has queues.
    #[must_use]
    pub fn has_destination(&self, dest: ServerId) -> bool {
        self.dests.contains_key(&dest)
    }

    /// Destinations with queues, in id order.
    pub fn destinations(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.dests.keys().copied()
    }

    /// The flow scheduler feeding `dest`.
    #[must_use]
    pub fn scheduler(&self, dest: ServerId) -> Option<&AnyFlowScheduler> {
        match self.dests.get(&dest)?.queue(&ServiceId::ObjectMessages)? {
            ServiceLane::Objects(sched) => Some(sched),
            ServiceLane::Control(_) => None,
        }
    }

    /// Every flow scheduler with its destination.
    pub fn schedulers(&self) -> impl Iterator<Item = (ServerId, &AnyFlowScheduler)> + '_ {
        self.dests
            .keys()
            .filter_map(|dest| self.scheduler(*dest).map(|sched| (*dest, sched)))
    }

    /// Offers an object message to `dest`'s flow scheduler, creating it if
    /// needed.
    ///
    /// # Errors
    /// Returns the scheduler's refusal; the message is dropped.
    pub fn push_object(
        &mut self,
        dest: ServerId,
        msg: ObjectMessage,
        source: &LocationEntry,
        dest_entry: &LocationEntry,
        now_us: u64,
    ) -> FlowResult<Admitted> {
        self.pre_push(dest);
        let queue = self.dests.get_mut(&dest).ok_or(FlowError::UnknownQueue)?;
        let admitted = match queue.queue(&ServiceId::ObjectMessages) {
            Some(ServiceLane::Objects(sched)) => sched.push(msg, source, dest_entry, now_us)?,
            _ => return Err(FlowError::UnknownQueue),
        };
        if admitted == Admitted::FrontChanged {
            queue.notify_push_front(&ServiceId::ObjectMessages);
        }
        Ok(admitted)
    }

    /// Queues a control message for `msg.dest_server` on `service`.
    ///
    /// # Errors
    /// Returns `FlowError::UnknownQueue` for the object service, or
    /// `FlowError::QueueFull` if the control buffer is full.
    pub fn push_control(&mut self, service: ServiceId, msg: ServerMessage) -> FlowResult<()> {
        if service == ServiceId::ObjectMessages {
            return Err(FlowError::UnknownQueue);
        }
        let dest = msg.dest_server;
        self.pre_push(dest);
        let queue = self.dests.get_mut(&dest).ok_or(FlowError::UnknownQueue)?;
        queue.push(&service, msg)
    }

    /// Bytes queued for `dest` across all services.
    #[must_use]
    pub fn queued_bytes(&self, dest: ServerId) -> u32 {
        self.dests.get(&dest).map_or(0, |queue| {
            ServiceId::ALL.iter().map(|service| queue.size(service)).sum()
        })
    }

    /// Forgets idle flows in every scheduler. Returns how many.
    pub fn evict_idle_flows(&self, now_us: u64) -> u32 {
        self.schedulers()
            .map(|(_, sched)| sched.evict_idle_flows(now_us))
            .sum()
    }
}

impl MessageSource for ForwarderServiceQueue {
    fn pull(&mut self, dest: ServerId) -> Option<ServerMessage> {
        self.dests.get_mut(&dest)?.pop().map(|(_, msg)| msg)
    }

    fn is_empty(&self, dest: ServerId) -> bool {
        self.dests.get(&dest).map_or(true, DestinationQueue::is_empty)
    }
}

impl PushQueue for ServiceLane {
    fn push(&mut self, item: ServerMessage) -> FlowResult<()> {
        match self {
            Self::Control(queue) => queue.push(item),
            Self::Objects(_) => Err(FlowError::UnknownQueue),
        }
    }
}
