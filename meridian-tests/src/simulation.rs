//! Deterministic multi-server simulation.
//!
//! A [`Simulation`] owns several forwarders, an authoritative location
//! table shared by all of them, and the links between them. Time advances
//! in fixed steps; on each step every server:
//!
//! 1. receives the server messages whose link latency has elapsed,
//! 2. runs its posted tasks (lookup answers, received-message batches),
//! 3. ticks (weight exchange, maintenance),
//! 4. services its link sender, subject to a per-link byte budget.
//!
//! Nothing reads a clock and servers are visited in id order, so a run is
//! fully determined by its inputs.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use meridian_core::{
    BoundingBox3, LocationEntry, MessageId, ObjectId, ObjectMessage, ServerId, ServerMessage,
    Transmittable, Vector3, DEFAULT_OBJECT_RADIUS,
};
use meridian_flow::{NoObjectLocator, SpatialPartition};
use meridian_routing::{
    strand, FairLinkSender, Forwarder, ForwarderConfig, ForwarderParts, LinkReceiver,
    LinkTransport, LocalDispatcher, MemoryTraceSink, OracleLocationService, RouteOutcome,
    RoutingResult, StrandReceiver, TraceEvent,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Servers own consecutive slabs of space along the x axis.
#[derive(Debug, Clone, Copy)]
pub struct SlabPartition {
    /// Width of each server's slab.
    pub width: f32,
}

impl SpatialPartition for SlabPartition {
    fn server_region(&self, server: ServerId) -> Vec<BoundingBox3> {
        if server.is_null() {
            return Vec::new();
        }
        #[allow(clippy::cast_precision_loss)] // Server ids in tests are small.
        let x = (server.get() - 1) as f32 * self.width;
        vec![BoundingBox3::new(
            Vector3::new(x, 0.0, 0.0),
            Vector3::new(x + self.width, self.width, self.width),
        )]
    }
}

/// Objects connected to one simulated server, and what was delivered to
/// them.
#[derive(Debug, Clone, Default)]
pub struct SimHost {
    objects: Arc<Mutex<HashSet<ObjectId>>>,
    delivered: Arc<Mutex<Vec<ObjectMessage>>>,
}

impl SimHost {
    /// True if `object` is connected here.
    #[must_use]
    pub fn hosts(&self, object: ObjectId) -> bool {
        self.objects.lock().contains(&object)
    }

    /// Messages delivered so far, in delivery order.
    #[must_use]
    pub fn delivered(&self) -> Vec<ObjectMessage> {
        self.delivered.lock().clone()
    }

    fn attach(&self, object: ObjectId) {
        self.objects.lock().insert(object);
    }

    fn detach(&self, object: ObjectId) {
        self.objects.lock().remove(&object);
    }
}

impl LocalDispatcher for SimHost {
    fn is_local(&self, object: ObjectId) -> bool {
        self.hosts(object)
    }

    fn dispatch(&mut self, msg: ObjectMessage) -> Result<(), ObjectMessage> {
        if msg.is_space_bound() || self.hosts(msg.dest_object) {
            self.delivered.lock().push(msg);
            Ok(())
        } else {
            Err(msg)
        }
    }
}

/// One simulated space server.
#[derive(Debug)]
pub struct SimServer {
    forwarder: Forwarder,
    tasks: StrandReceiver,
    host: SimHost,
    trace: Arc<MemoryTraceSink>,
}

impl SimServer {
    /// The server's forwarder.
    #[must_use]
    pub const fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// The server's local objects.
    #[must_use]
    pub const fn host(&self) -> &SimHost {
        &self.host
    }

    /// Everything the forwarder traced.
    #[must_use]
    pub fn trace(&self) -> &MemoryTraceSink {
        &self.trace
    }
}

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Length of one step.
    pub step_us: u64,
    /// One-way link latency. Rounded up to whole steps.
    pub latency_us: u64,
    /// Bytes each directed link carries per step.
    pub link_bytes_per_step: u32,
    /// Forwarder settings shared by every server.
    pub forwarder: ForwarderConfig,
    /// Width of each server's slab of space.
    pub slab_width: f32,
}

impl SimConfig {
    /// Millisecond steps, 1ms latency, unconstrained links.
    #[must_use]
    pub fn new(forwarder: ForwarderConfig) -> Self {
        Self {
            step_us: 1_000,
            latency_us: 1_000,
            link_bytes_per_step: u32::MAX,
            forwarder,
            slab_width: 100.0,
        }
    }

    /// Sets the per-link byte budget per step.
    #[must_use]
    pub const fn with_link_bytes_per_step(mut self, bytes: u32) -> Self {
        self.link_bytes_per_step = bytes;
        self
    }

    /// Sets the link latency.
    #[must_use]
    pub const fn with_latency_us(mut self, latency_us: u64) -> Self {
        self.latency_us = latency_us;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(ForwarderConfig::for_testing())
    }
}

/// A server message on the wire.
#[derive(Debug)]
struct InFlight {
    arrive_us: u64,
    msg: ServerMessage,
}

/// Link service for one server during one step.
struct StepTransport<'a> {
    arrive_us: u64,
    budget: u32,
    used: BTreeMap<ServerId, u32>,
    wire: &'a mut VecDeque<InFlight>,
}

impl LinkTransport for StepTransport<'_> {
    fn try_send(&mut self, msg: ServerMessage) -> Result<(), ServerMessage> {
        let used = self.used.entry(msg.dest_server).or_insert(0);
        let size = msg.size_bytes();
        if used.saturating_add(size) > self.budget {
            return Err(msg);
        }
        *used += size;
        self.wire.push_back(InFlight {
            arrive_us: self.arrive_us,
            msg,
        });
        Ok(())
    }
}

/// A set of forwarders connected by simulated links.
pub struct Simulation {
    config: SimConfig,
    now_us: u64,
    servers: BTreeMap<ServerId, SimServer>,
    oracle: OracleLocationService,
    partition: Arc<SlabPartition>,
    wire: VecDeque<InFlight>,
    next_message_id: u64,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("now_us", &self.now_us)
            .field("servers", &self.servers.len())
            .field("in_flight", &self.wire.len())
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Creates an empty simulation at time zero.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let partition = Arc::new(SlabPartition {
            width: config.slab_width,
        });
        Self {
            config,
            now_us: 0,
            servers: BTreeMap::new(),
            oracle: OracleLocationService::new(),
            partition,
            wire: VecDeque::new(),
            next_message_id: 1,
        }
    }

    /// Creates a simulation with servers `1..=count`, fully connected.
    ///
    /// # Panics
    /// Panics if the forwarder configuration is invalid.
    #[must_use]
    pub fn with_servers(config: SimConfig, count: u64) -> Self {
        let mut sim = Self::new(config);
        for id in 1..=count {
            sim.add_server(ServerId::new(id));
        }
        sim.connect_all();
        sim
    }

    /// Adds a started server.
    ///
    /// # Panics
    /// Panics if the forwarder configuration is invalid.
    pub fn add_server(&mut self, id: ServerId) {
        let (handle, tasks) = strand();
        let host = SimHost::default();
        let trace = Arc::new(MemoryTraceSink::new());
        let config = self.config.forwarder.clone();
        let parts = ForwarderParts {
            location: Box::new(self.oracle.clone()),
            dispatcher: Box::new(host.clone()),
            link_sender: Box::new(FairLinkSender::new(config.link_sender)),
            link_receiver: Box::new(LinkReceiver::new(config.link_receiver)),
            partition: self.partition.clone(),
            locator: Arc::new(NoObjectLocator),
            trace: trace.clone(),
        };
        let mut forwarder =
            Forwarder::new(config, id, parts, handle).expect("valid forwarder config");
        forwarder.start(self.now_us);
        self.servers.insert(
            id,
            SimServer {
                forwarder,
                tasks,
                host,
                trace,
            },
        );
    }

    /// Announces every server to every other server.
    pub fn connect_all(&mut self) {
        let ids: Vec<ServerId> = self.servers.keys().copied().collect();
        for (id, server) in &mut self.servers {
            for peer in ids.iter().filter(|peer| *peer != id) {
                server.forwarder.server_connection_received(*peer);
            }
        }
    }

    /// Server ids, in order.
    #[must_use]
    pub fn server_ids(&self) -> Vec<ServerId> {
        self.servers.keys().copied().collect()
    }

    /// A server.
    ///
    /// # Panics
    /// Panics if `id` was never added.
    #[must_use]
    pub fn server(&self, id: ServerId) -> &SimServer {
        &self.servers[&id]
    }

    /// The authoritative location table.
    #[must_use]
    pub const fn oracle(&self) -> &OracleLocationService {
        &self.oracle
    }

    /// Current simulated time.
    #[must_use]
    pub const fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Server messages on the wire.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.wire.len()
    }

    /// Connects `object` to `server`, disconnecting it from wherever it was.
    /// Caches are left alone, so other servers may now be wrong about it.
    pub fn place_object(&mut self, object: ObjectId, server: ServerId) {
        for (id, sim) in &self.servers {
            if *id == server {
                sim.host.attach(object);
            } else {
                sim.host.detach(object);
            }
        }
        self.oracle
            .set(object, LocationEntry::new(server, DEFAULT_OBJECT_RADIUS));
        debug!(%object, %server, "object placed");
    }

    /// Builds a message with a fresh id.
    pub fn message(&mut self, from: ObjectId, to: ObjectId, payload_bytes: usize) -> ObjectMessage {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id += 1;
        ObjectMessage::new(id, from, 0, to, 0, vec![0u8; payload_bytes])
    }

    /// Routes a message sent by an object on `server`.
    ///
    /// # Errors
    /// Returns the forwarder's refusal.
    ///
    /// # Panics
    /// Panics if `server` was never added.
    pub fn send(&mut self, server: ServerId, msg: ObjectMessage) -> RoutingResult<RouteOutcome> {
        let now = self.now_us;
        let sim = self
            .servers
            .get_mut(&server)
            .expect("message sent from an unknown server");
        sim.forwarder.route(msg, now)
    }

    /// Advances one step.
    pub fn step(&mut self) {
        self.now_us += self.config.step_us;
        let now = self.now_us;

        while self.wire.front().is_some_and(|m| m.arrive_us <= now) {
            let Some(InFlight { msg, .. }) = self.wire.pop_front() else {
                break;
            };
            match self.servers.get_mut(&msg.dest_server) {
                Some(server) => {
                    let _ = server.forwarder.server_message_received(msg, now);
                }
                None => trace!(dest = %msg.dest_server, "message for unknown server lost"),
            }
        }

        let steps = self.config.latency_us.div_ceil(self.config.step_us).max(1);
        let arrive_us = now + steps * self.config.step_us;
        for server in self.servers.values_mut() {
            server.forwarder.run_pending(&mut server.tasks, now);
            server.forwarder.tick(now);
            let mut transport = StepTransport {
                arrive_us,
                budget: self.config.link_bytes_per_step,
                used: BTreeMap::new(),
                wire: &mut self.wire,
            };
            while server.forwarder.service_link(&mut transport, now) > 0 {}
        }
    }

    /// Advances by at least `duration_us`.
    pub fn run_for(&mut self, duration_us: u64) {
        let end = self.now_us.saturating_add(duration_us);
        while self.now_us < end {
            self.step();
        }
    }

    /// Every object message delivered anywhere, with the server that
    /// delivered it.
    #[must_use]
    pub fn deliveries(&self) -> Vec<(ServerId, ObjectMessage)> {
        self.servers
            .iter()
            .flat_map(|(id, server)| server.host.delivered().into_iter().map(|m| (*id, m)))
            .collect()
    }

    /// Every traced drop, across all servers.
    #[must_use]
    pub fn drops(&self) -> Vec<(ServerId, TraceEvent)> {
        self.servers
            .iter()
            .flat_map(|(id, server)| {
                server
                    .trace
                    .events()
                    .into_iter()
                    .filter(|e| matches!(e, TraceEvent::Dropped { .. }))
                    .map(|e| (*id, e))
            })
            .collect()
    }
}
