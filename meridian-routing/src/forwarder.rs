//! The forwarder: routes object messages to the server that owns their
//! destination.
//!
//! # Message life cycle
//!
//! ```text
//! received ──► space / local object? ──yes──► local delivery
//!                     │ no
//!                     ▼
//!              location cache hit? ──yes──► flow scheduler of cached owner
//!                     │ no
//!                     ▼
//!              authoritative lookup ──► owner is us? ──yes──► local delivery
//!                                              │ no
//!                                              ▼
//!                               flow scheduler of owner ──► link ──► sent
//!                                              │
//!                                              └──► cache update to previous hop
//! ```
//!
//! Any refusal along the way drops the one message and records why; nothing
//! is retried here.
//!
//! # Weight exchange
//!
//! Every 10ms the forwarder sends each peer with a flow scheduler a
//! [`WeightUpdate`] describing how much of the link its traffic uses, and
//! applies the updates it receives to the matching scheduler and to the
//! local link schedulers.
//!
//! # Threading
//!
//! A forwarder is owned by one control flow. Lookup answers and work from
//! other threads arrive as [`ForwarderTask`]s through its strand.

use std::collections::VecDeque;
use std::sync::Arc;

use meridian_core::{
    Error as CoreError, LocationEntry, MessageId, ObjectId, ObjectMessage, ServerId, ServerMessage,
    ServerPort, Transmittable, DEFAULT_OBJECT_RADIUS,
};
use meridian_flow::{
    AnyFlowScheduler, FlowScheduler, ObjectLocator, SchedulerContext, SpatialPartition,
};
use tracing::{debug, error, info, trace, warn};

use crate::codec::{decode_object_message, CacheUpdate, WeightUpdate};
use crate::config::ForwarderConfig;
use crate::error::{RoutingError, RoutingResult};
use crate::link::{LinkReceiveScheduler, LinkSendScheduler, LinkTransport, MessageSource};
use crate::location::{LocationService, LookupReply};
use crate::location_cache::LocationCache;
use crate::lookup::{LookupQueue, Parked, PendingMessage};
use crate::poller::Poller;
use crate::service_queue::{ForwarderServiceQueue, ServiceId};
use crate::strand::{ForwarderTask, StrandHandle, StrandReceiver};
use crate::trace::{DropCause, ResolvedBy, TraceEvent, TraceSink};

/// Delivery to objects hosted on this server.
pub trait LocalDispatcher: Send {
    /// True if `object` is connected to this server.
    fn is_local(&self, object: ObjectId) -> bool;

    /// Delivers a message to a local object, or to the space itself for
    /// messages addressed to [`ObjectId::SPACE`].
    ///
    /// # Errors
    /// Returns the message if it cannot be delivered.
    fn dispatch(&mut self, msg: ObjectMessage) -> Result<(), ObjectMessage>;
}

/// The services a forwarder is built from.
pub struct ForwarderParts {
    /// Authoritative object locations.
    pub location: Box<dyn LocationService>,
    /// Delivery to local objects.
    pub dispatcher: Box<dyn LocalDispatcher>,
    /// Outbound link scheduling.
    pub link_sender: Box<dyn LinkSendScheduler>,
    /// Inbound link bookkeeping.
    pub link_receiver: Box<dyn LinkReceiveScheduler>,
    /// Region ownership.
    pub partition: Arc<dyn SpatialPartition>,
    /// Exact object bounds, where known.
    pub locator: Arc<dyn ObjectLocator>,
    /// Trace events.
    pub trace: Arc<dyn TraceSink>,
}

/// What happened to a routed message, as far as the forwarder knows now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered here, or posted for local delivery.
    DeliveredLocally,
    /// Admitted by the flow scheduler for `dest`.
    Enqueued {
        /// Next-hop server.
        dest: ServerId,
    },
    /// Waiting on an authoritative lookup.
    LookupPending,
    /// Buffered for processing on a later strand turn.
    Buffered,
}

/// Outcome of [`Forwarder::try_cache_forward`].
#[derive(Debug)]
pub enum CacheForward {
    /// The cache knew a remote owner; the message was routed or dropped.
    Handled(RoutingResult<RouteOutcome>),
    /// No usable entry. The message is handed back.
    Miss(ObjectMessage),
}

/// Forwarder counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    /// Messages accepted from local objects.
    pub routed: u64,
    /// Server messages received from peers.
    pub server_messages_received: u64,
    /// Messages delivered locally.
    pub local_dispatches: u64,
    /// Destinations found in the location cache.
    pub cache_hits: u64,
    /// Destinations not found in the location cache.
    pub cache_misses: u64,
    /// Authoritative lookups issued.
    pub lookups_issued: u64,
    /// Messages that joined an outstanding lookup.
    pub lookups_coalesced: u64,
    /// Messages admitted by a flow scheduler.
    pub enqueued: u64,
    /// Messages pulled by the link sender.
    pub sent: u64,
    /// Cache updates sent to previous hops.
    pub cache_updates_sent: u64,
    /// Cache updates received from peers.
    pub cache_updates_received: u64,
    /// Weight updates sent.
    pub weight_updates_sent: u64,
    /// Weight updates received.
    pub weight_updates_received: u64,
    drops: [u64; DropCause::ALL.len()],
}

impl ForwarderStats {
    /// Messages dropped for `cause`.
    #[must_use]
    pub const fn drops(&self, cause: DropCause) -> u64 {
        self.drops[cause.index()]
    }

    /// Messages dropped for any cause.
    #[must_use]
    pub fn total_drops(&self) -> u64 {
        self.drops.iter().sum()
    }
}

/// A received message waiting for its strand turn.
#[derive(Debug)]
enum Inbound {
    Object { msg: ObjectMessage, from: ServerId },
    Control(ServerMessage),
}

/// Routes object messages for one space server.
pub struct Forwarder {
    config: ForwarderConfig,
    server: ServerId,
    outgoing: ForwarderServiceQueue,
    cache: LocationCache,
    lookups: LookupQueue,
    location: Box<dyn LocationService>,
    dispatcher: Box<dyn LocalDispatcher>,
    link_sender: Box<dyn LinkSendScheduler>,
    link_receiver: Box<dyn LinkReceiveScheduler>,
    trace: Arc<dyn TraceSink>,
    strand: StrandHandle,
    received: VecDeque<Inbound>,
    processing_posted: bool,
    weight_poller: Poller,
    maintenance_poller: Poller,
    next_message_id: MessageId,
    stats: ForwarderStats,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("server", &self.server)
            .field("destinations", &self.outgoing.destinations().count())
            .field("pending_lookups", &self.lookups.len())
            .field("received", &self.received.len())
            .finish_non_exhaustive()
    }
}

impl Forwarder {
    /// Creates a stopped forwarder for `server`.
    ///
    /// # Errors
    /// Returns `RoutingError::Limit` if the configuration is invalid.
    pub fn new(
        config: ForwarderConfig,
        server: ServerId,
        parts: ForwarderParts,
        strand: StrandHandle,
    ) -> RoutingResult<Self> {
        config.validate()?;
        let ctx = SchedulerContext::new(server, parts.partition, parts.locator);
        let outgoing = ForwarderServiceQueue::new(
            ctx,
            config.scheduler.clone(),
            config.limits.max_send_queue_bytes,
            config.limits.max_control_queue_bytes,
        );
        Ok(Self {
            outgoing,
            cache: LocationCache::new(config.cache),
            lookups: LookupQueue::new(config.lookup),
            location: parts.location,
            dispatcher: parts.dispatcher,
            link_sender: parts.link_sender,
            link_receiver: parts.link_receiver,
            trace: parts.trace,
            strand,
            received: VecDeque::new(),
            processing_posted: false,
            weight_poller: Poller::new(config.limits.weight_exchange_interval_us),
            maintenance_poller: Poller::new(config.maintenance_interval_us),
            // Control message ids are namespaced by server.
            next_message_id: MessageId::new((server.get() << 48) | 1),
            stats: ForwarderStats::default(),
            server,
            config,
        })
    }

    /// Starts the periodic weight exchange and maintenance.
    pub fn start(&mut self, now_us: u64) {
        self.weight_poller.start(now_us);
        self.maintenance_poller.start(now_us);
        info!(server = %self.server, kind = ?self.config.scheduler.kind, "forwarder started");
    }

    /// Stops the periodic tasks. Queued traffic stays queued.
    pub fn stop(&mut self) {
        self.weight_poller.stop();
        self.maintenance_poller.stop();
        info!(server = %self.server, "forwarder stopped");
    }

    /// True between `start` and `stop`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.weight_poller.is_running()
    }

    /// This server.
    #[must_use]
    pub const fn server_id(&self) -> ServerId {
        self.server
    }

    /// A handle for posting work to this forwarder.
    #[must_use]
    pub fn strand(&self) -> StrandHandle {
        self.strand.clone()
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &ForwarderStats {
        &self.stats
    }

    /// The location cache.
    #[must_use]
    pub const fn cache(&self) -> &LocationCache {
        &self.cache
    }

    /// Forgets every cached location on `server`, e.g. after it disconnects.
    pub fn invalidate_server(&mut self, server: ServerId) {
        self.cache.invalidate_server(server);
    }

    /// The outbound queues.
    #[must_use]
    pub const fn service_queue(&self) -> &ForwarderServiceQueue {
        &self.outgoing
    }

    /// The flow scheduler feeding `dest`, if one exists.
    #[must_use]
    pub fn scheduler(&self, dest: ServerId) -> Option<&AnyFlowScheduler> {
        self.outgoing.scheduler(dest)
    }

    /// The outbound link scheduler.
    #[must_use]
    pub fn link_sender(&self) -> &dyn LinkSendScheduler {
        self.link_sender.as_ref()
    }

    /// The inbound link scheduler.
    #[must_use]
    pub fn link_receiver(&self) -> &dyn LinkReceiveScheduler {
        self.link_receiver.as_ref()
    }

    /// Outstanding authoritative lookups.
    #[must_use]
    pub fn pending_lookups(&self) -> usize {
        self.lookups.len()
    }

    /// Received messages waiting for a strand turn.
    #[must_use]
    pub fn received_backlog(&self) -> usize {
        self.received.len()
    }

    /// Runs one posted task.
    pub fn handle_task(&mut self, task: ForwarderTask, now_us: u64) {
        match task {
            ForwarderTask::Route(msg) => {
                let _ = self.route(msg, now_us);
            }
            ForwarderTask::LookupResolved { object, location } => {
                self.lookup_resolved(object, location, now_us);
            }
            ForwarderTask::ServerMessageReceived(msg) => {
                let _ = self.server_message_received(msg, now_us);
            }
            ForwarderTask::ConnectionReceived(peer) => self.server_connection_received(peer),
            ForwarderTask::DeliverLocal(msg) => {
                let _ = self.deliver_local(msg);
            }
            ForwarderTask::ProcessReceived => self.process_received(now_us),
        }
    }

    /// Runs posted tasks until none are left. Returns how many ran.
    pub fn run_pending(&mut self, rx: &mut StrandReceiver, now_us: u64) -> usize {
        let mut ran = 0;
        while let Some(task) = rx.try_next() {
            self.handle_task(task, now_us);
            ran += 1;
        }
        ran
    }

    /// Runs the periodic tasks that are due.
    pub fn tick(&mut self, now_us: u64) {
        if self.weight_poller.poll(now_us) {
            self.update_server_weights(now_us);
        }
        if self.maintenance_poller.poll(now_us) {
            self.maintain(now_us);
        }
    }

    /// Routes a message sent by a locally hosted object.
    ///
    /// # Errors
    /// Returns why the message was dropped. Drops are also traced.
    pub fn route(&mut self, msg: ObjectMessage, now_us: u64) -> RoutingResult<RouteOutcome> {
        self.stats.routed += 1;
        let size = msg.size_bytes();
        if size > self.config.limits.max_object_message_bytes {
            warn!(server = %self.server, msg = %msg.id, size, "object message too large");
            self.record_drop(msg.id, DropCause::Oversized);
            return Err(RoutingError::Limit(CoreError::MessageTooLarge {
                max_bytes: self.config.limits.max_object_message_bytes,
                actual_bytes: size,
            }));
        }
        self.trace.record(TraceEvent::ForwardingStarted {
            msg: msg.id,
            dest_object: msg.dest_object,
        });

        if msg.is_space_bound() || self.dispatcher.is_local(msg.dest_object) {
            return self.deliver_local(msg);
        }
        match self.try_cache_forward(msg, now_us) {
            CacheForward::Handled(result) => result,
            CacheForward::Miss(msg) => self.forward(msg, None, now_us),
        }
    }

    /// Routes a message using only the location cache.
    pub fn try_cache_forward(&mut self, msg: ObjectMessage, now_us: u64) -> CacheForward {
        let object = msg.dest_object;
        let cached = self
            .cache
            .get(object, now_us)
            .or_else(|| self.location.cache_lookup(object))
            .and_then(LocationEntry::known);

        match cached {
            Some(location) if location.server() != self.server => {
                self.stats.cache_hits += 1;
                self.trace.record(TraceEvent::CacheHit {
                    msg: msg.id,
                    server: location.server(),
                });
                let result = self.route_to_server(msg, location, ResolvedBy::Cache, None, now_us);
                CacheForward::Handled(result)
            }
            stale => {
                if stale.is_some() {
                    // Cached as ours but not connected here any more.
                    self.cache.invalidate(object);
                }
                self.stats.cache_misses += 1;
                self.trace.record(TraceEvent::CacheMiss { msg: msg.id });
                CacheForward::Miss(msg)
            }
        }
    }

    /// Parks a message behind an authoritative lookup of its destination.
    ///
    /// `forward_from` is the peer that sent it here, which receives a cache
    /// update once the real owner is known.
    ///
    /// # Errors
    /// Returns why the message was dropped.
    pub fn forward(
        &mut self,
        msg: ObjectMessage,
        forward_from: Option<ServerId>,
        now_us: u64,
    ) -> RoutingResult<RouteOutcome> {
        let object = msg.dest_object;
        match self.lookups.park(msg, forward_from, now_us) {
            Err(refused) => {
                debug!(server = %self.server, %object, "lookup queue full");
                self.record_drop(refused.msg.id, DropCause::LookupQueueFull);
                Err(RoutingError::LookupQueueFull { object })
            }
            Ok(Parked::Coalesced) => {
                self.stats.lookups_coalesced += 1;
                Ok(RouteOutcome::LookupPending)
            }
            Ok(Parked::NewLookup) => {
                self.stats.lookups_issued += 1;
                let reply = LookupReply::new(object, self.strand.clone());
                if self.location.lookup(object, reply) {
                    return Ok(RouteOutcome::LookupPending);
                }
                warn!(server = %self.server, %object, "location service refused lookup");
                let waiting = self.lookups.resolve(object).unwrap_or_default();
                self.drop_all(waiting, DropCause::LookupFailed);
                Err(RoutingError::LookupFailed { object })
            }
        }
    }

    /// Handles the answer to an authoritative lookup.
    pub fn lookup_resolved(&mut self, object: ObjectId, location: LocationEntry, now_us: u64) {
        let Some(waiting) = self.lookups.resolve(object) else {
            // The lookup timed out; the answer is still worth caching.
            self.cache.put(object, location, now_us);
            return;
        };
        if location.is_null() {
            debug!(server = %self.server, %object, dropped = waiting.len(), "object unknown to location service");
            self.drop_all(waiting, DropCause::LookupFailed);
            return;
        }

        self.cache.put(object, location, now_us);
        for PendingMessage { msg, forward_from } in waiting {
            let _ = self.route_to_server(msg, location, ResolvedBy::Lookup, forward_from, now_us);
        }
    }

    /// Sends a message toward `location`'s server through its flow scheduler.
    fn route_to_server(
        &mut self,
        msg: ObjectMessage,
        location: LocationEntry,
        resolved_by: ResolvedBy,
        forward_from: Option<ServerId>,
        now_us: u64,
    ) -> RoutingResult<RouteOutcome> {
        let dest = location.server();
        let id = msg.id;
        let object = msg.dest_object;
        self.trace.record(TraceEvent::LookupFinished {
            msg: id,
            server: dest,
            resolved_by,
        });

        if dest == self.server {
            // The object moved here while the lookup was outstanding.
            if self.strand.post(ForwarderTask::DeliverLocal(msg)) {
                return Ok(RouteOutcome::DeliveredLocally);
            }
            self.record_drop(id, DropCause::LocalDeliveryFailed);
            return Err(RoutingError::LocalDeliveryFailed { object });
        }

        let source = LocationEntry::new(self.server, DEFAULT_OBJECT_RADIUS);
        match self
            .outgoing
            .push_object(dest, msg, &source, &location, now_us)
        {
            Ok(_) => {
                self.stats.enqueued += 1;
                self.trace.record(TraceEvent::Enqueued { msg: id, dest });
                self.link_sender.message_ready(dest);
                if resolved_by == ResolvedBy::Lookup {
                    if let Some(peer) = forward_from {
                        self.send_cache_update(peer, object, location);
                    }
                }
                Ok(RouteOutcome::Enqueued { dest })
            }
            Err(err) => {
                let cause = DropCause::from_flow_error(&err);
                trace!(server = %self.server, %dest, msg = %id, %cause, "flow scheduler refused message");
                self.record_drop(id, cause);
                Err(RoutingError::Admission(err))
            }
        }
    }

    fn send_cache_update(&mut self, peer: ServerId, object: ObjectId, location: LocationEntry) {
        let record = CacheUpdate { object, location };
        let msg = record.to_message(self.next_message_id(), self.server, peer);
        match self.outgoing.push_control(ServiceId::CacheUpdates, msg) {
            Ok(()) => {
                self.stats.cache_updates_sent += 1;
                self.link_sender.message_ready(peer);
            }
            Err(err) => {
                trace!(server = %self.server, %peer, %err, "cache update dropped");
            }
        }
    }

    /// Delivers a message to a local object or the space.
    fn deliver_local(&mut self, msg: ObjectMessage) -> RoutingResult<RouteOutcome> {
        let id = msg.id;
        match self.dispatcher.dispatch(msg) {
            Ok(()) => {
                self.stats.local_dispatches += 1;
                self.trace.record(TraceEvent::DeliveredLocally { msg: id });
                Ok(RouteOutcome::DeliveredLocally)
            }
            Err(msg) => {
                warn!(server = %self.server, msg = %id, object = %msg.dest_object, "local delivery failed");
                self.record_drop(id, DropCause::LocalDeliveryFailed);
                Err(RoutingError::LocalDeliveryFailed {
                    object: msg.dest_object,
                })
            }
        }
    }

    /// Accepts a server message from a peer.
    ///
    /// Object messages for local objects, or with a cached owner, are
    /// handled immediately. Everything else is buffered and processed a
    /// bounded number per strand turn.
    ///
    /// # Errors
    /// Returns why the message was dropped.
    pub fn server_message_received(
        &mut self,
        msg: ServerMessage,
        now_us: u64,
    ) -> RoutingResult<RouteOutcome> {
        self.stats.server_messages_received += 1;
        self.link_receiver
            .message_received(msg.source_server, msg.size_bytes(), now_us);

        let inbound = if msg.port == ServerPort::ObjectRouting {
            let object = match decode_object_message(&msg) {
                Ok(object) => object,
                Err(err) => {
                    error!(server = %self.server, from = %msg.source_server, msg = %msg.id, %err, "invalid object message");
                    self.record_drop(msg.id, DropCause::ParseFailure);
                    return Err(RoutingError::Parse(err));
                }
            };
            if object.is_space_bound() || self.dispatcher.is_local(object.dest_object) {
                return self.deliver_local(object);
            }
            match self.try_cache_forward(object, now_us) {
                CacheForward::Handled(result) => return result,
                CacheForward::Miss(object) => Inbound::Object {
                    msg: object,
                    from: msg.source_server,
                },
            }
        } else {
            Inbound::Control(msg)
        };

        if self.received.len() >= self.config.limits.max_received_messages as usize {
            let id = match &inbound {
                Inbound::Object { msg, .. } => msg.id,
                Inbound::Control(msg) => msg.id,
            };
            warn!(server = %self.server, "receive queue full");
            self.record_drop(id, DropCause::ReceiveQueueFull);
            return Err(RoutingError::ReceiveQueueFull);
        }
        self.received.push_back(inbound);
        if !self.processing_posted {
            self.processing_posted = self.strand.post(ForwarderTask::ProcessReceived);
        }
        Ok(RouteOutcome::Buffered)
    }

    /// Processes up to the per-turn budget of buffered received messages.
    pub fn process_received(&mut self, now_us: u64) {
        self.processing_posted = false;
        for _ in 0..self.config.limits.received_messages_per_turn {
            let Some(inbound) = self.received.pop_front() else {
                break;
            };
            match inbound {
                Inbound::Object { msg, from } => {
                    let _ = self.forward(msg, Some(from), now_us);
                }
                Inbound::Control(msg) => self.receive_control(msg, now_us),
            }
        }
        if !self.received.is_empty() {
            self.processing_posted = self.strand.post(ForwarderTask::ProcessReceived);
        }
    }

    fn receive_control(&mut self, msg: ServerMessage, now_us: u64) {
        match msg.port {
            ServerPort::WeightUpdate => self.receive_weight_update(&msg),
            ServerPort::CacheUpdate => self.receive_cache_update(&msg, now_us),
            ServerPort::ObjectRouting => {
                debug!(server = %self.server, msg = %msg.id, "object message on control path");
            }
        }
    }

    fn receive_weight_update(&mut self, msg: &ServerMessage) {
        let update = match WeightUpdate::from_message(msg) {
            Ok(update) => update,
            Err(err) => {
                error!(server = %self.server, from = %msg.source_server, %err, "invalid weight update");
                self.record_drop(msg.id, DropCause::ParseFailure);
                return;
            }
        };
        self.stats.weight_updates_received += 1;
        let peer = msg.source_server;
        trace!(
            server = %self.server,
            %peer,
            pair_total = update.server_pair_total_weight,
            pair_used = update.server_pair_used_weight,
            receiver_total = update.receiver_total_weight,
            receiver_capacity = update.receiver_capacity,
            "weight update received"
        );

        self.link_receiver.update_sender_stats(
            peer,
            update.server_pair_total_weight,
            update.server_pair_used_weight,
        );
        if let Some(sched) = self.outgoing.scheduler(peer) {
            sched.update_receiver_stats(update.receiver_total_weight, update.receiver_capacity);
            sched.update_sender_stats(
                self.link_sender.total_used_weight(),
                self.link_sender.capacity(),
            );
        }
    }

    fn receive_cache_update(&mut self, msg: &ServerMessage, now_us: u64) {
        match CacheUpdate::from_message(msg) {
            Ok(update) => {
                self.stats.cache_updates_received += 1;
                debug!(server = %self.server, from = %msg.source_server, object = %update.object, owner = %update.location.server(), "cache corrected");
                self.cache.put(update.object, update.location, now_us);
            }
            Err(err) => {
                error!(server = %self.server, from = %msg.source_server, %err, "invalid cache update");
                self.record_drop(msg.id, DropCause::ParseFailure);
            }
        }
    }

    /// Sends a weight update to every peer with a flow scheduler and feeds
    /// the sender-side figures into the link sender.
    pub fn update_server_weights(&mut self, _now_us: u64) {
        let receiver_total_weight = self.link_receiver.total_used_weight();
        let receiver_capacity = self.link_receiver.capacity();
        let reports: Vec<(ServerId, WeightUpdate, f64)> = self
            .outgoing
            .schedulers()
            .map(|(dest, sched)| {
                let update = WeightUpdate {
                    server_pair_total_weight: sched.total_active_weight(),
                    server_pair_used_weight: sched.total_receiver_used_weight(),
                    receiver_total_weight,
                    receiver_capacity,
                };
                (dest, update, sched.total_sender_used_weight())
            })
            .collect();

        for (dest, update, sender_used_weight) in reports {
            let msg = update.to_message(self.next_message_id(), self.server, dest);
            match self.outgoing.push_control(ServiceId::WeightUpdates, msg) {
                Ok(()) => {
                    self.stats.weight_updates_sent += 1;
                    self.link_sender.message_ready(dest);
                }
                Err(err) => {
                    trace!(server = %self.server, %dest, %err, "weight update queue full");
                }
            }
            self.link_sender.update_receiver_stats(
                dest,
                update.server_pair_total_weight,
                sender_used_weight,
            );
        }
    }

    /// A peer connected: create its queues so weight exchange starts.
    pub fn server_connection_received(&mut self, peer: ServerId) {
        if self.outgoing.pre_push(peer) {
            debug!(server = %self.server, %peer, "peer connected");
        }
    }

    /// Lets the link sender move queued messages to `transport`.
    /// Returns how many were sent.
    pub fn service_link(&mut self, transport: &mut dyn LinkTransport, now_us: u64) -> u32 {
        let mut source = TracedSource {
            queue: &mut self.outgoing,
            trace: self.trace.as_ref(),
            pulled: 0,
        };
        let sent = self.link_sender.service(&mut source, transport, now_us);
        self.stats.sent += source.pulled;
        sent
    }

    fn maintain(&mut self, now_us: u64) {
        let evicted_flows = self.outgoing.evict_idle_flows(now_us);
        let expired = self.lookups.expire(now_us);
        let timed_out = expired.len();
        for (object, waiting) in expired {
            debug!(server = %self.server, %object, dropped = waiting.len(), "lookup timed out");
            self.drop_all(waiting, DropCause::LookupTimedOut);
        }
        let evicted_locations = self.cache.evict_expired(now_us);
        if evicted_flows > 0 || timed_out > 0 || evicted_locations > 0 {
            debug!(
                server = %self.server,
                evicted_flows,
                timed_out,
                evicted_locations,
                "forwarder maintenance"
            );
        }
    }

    fn drop_all(&mut self, waiting: Vec<PendingMessage>, cause: DropCause) {
        for pending in waiting {
            self.record_drop(pending.msg.id, cause);
        }
    }

    fn record_drop(&mut self, msg: MessageId, cause: DropCause) {
        self.stats.drops[cause.index()] += 1;
        self.trace.record(TraceEvent::Dropped { msg, cause });
    }

    fn next_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id = id.next();
        id
    }
}

/// Records each message the link sender pulls.
struct TracedSource<'a> {
    queue: &'a mut ForwarderServiceQueue,
    trace: &'a dyn TraceSink,
    pulled: u64,
}

impl MessageSource for TracedSource<'_> {
    fn pull(&mut self, dest: ServerId) -> Option<ServerMessage> {
        let msg = self.queue.pull(dest)?;
        self.pulled += 1;
        self.trace.record(TraceEvent::Sent { msg: msg.id, dest });
        Some(msg)
    }

    fn is_empty(&self, dest: ServerId) -> bool {
        self.queue.is_empty(dest)
    }
}
