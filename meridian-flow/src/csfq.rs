//! Core-stateless fair queueing (CSFQ) flow scheduler.
//!
//! Approximates weighted fair sharing between object-pair flows without a
//! queue per flow. Each flow keeps only a rate estimate; the link keeps a
//! single fair rate `alpha` driven by a feedback loop against downstream
//! capacity.
//!
//! # Per-message algorithm
//!
//! 1. Find or create the flow and its spatial weight. A zero weight is
//!    refused outright.
//! 2. Update the flow's rate (time constant `Kf`) and derive its share of
//!    the link arrival rate.
//! 3. Label the message with that share divided by the flow's normalized
//!    weight.
//! 4. Drop with probability `max(0, 1 - alpha / label)` once `alpha` is
//!    known. Before that, admit everything and remember the largest label.
//! 5. If the buffer is full, damp `alpha` (a bounded number of times per
//!    congestion episode) and drop.
//! 6. Otherwise enqueue and re-estimate `alpha`.
//!
//! # Fair rate estimation
//!
//! The link is congested when the smaller of the sender-side and
//! receiver-side capacity available to it is at or below the aggregate
//! arrival rate (time constant `Ka`). While congested, `alpha` is scaled by
//! `capacity / accepted_rate` once per window. While uncongested, the
//! largest label seen in a window becomes the new `alpha`, or `alpha`
//! resets to zero if the buffer has drained.
//!
//! A flow's spatial weight is computed when the flow is created and not
//! refreshed as the objects move. Idle flows are evicted and recreated with
//! a fresh weight.
//!
//! Bookkeeping lives behind a mutex so `push` can be called from any thread.

use std::collections::BTreeMap;

use meridian_core::{
    BoundingBox3, LocationEntry, ObjectId, ObjectMessage, ServerId, ServerMessage, Transmittable,
    DEFAULT_OBJECT_RADIUS,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, warn};

use crate::error::{DropReason, FlowError, FlowResult};
use crate::queue::{BoundedQueue, ServiceQueue};
use crate::rate::RateEstimator;
use crate::scheduler::{Admitted, FlowScheduler, QueuedMessage, SchedulerContext};
use crate::weight::{server_bounds, WeightCalculator};

/// Flow rate averaging constant (10s).
pub const FLOW_TIME_CONSTANT_US: u64 = 10_000_000;

/// Link rate averaging constant (200ms).
pub const LINK_TIME_CONSTANT_US: u64 = 200_000;

/// Maximum overflow reductions of `alpha` per congestion episode.
pub const MAX_ALPHA_REDUCTIONS: u32 = 29;

const SENDER: usize = 0;
const RECEIVER: usize = 1;

/// Configuration for CSFQ schedulers.
#[derive(Debug, Clone)]
pub struct CsfqConfig {
    /// Flow rate averaging constant (`Kf`).
    pub flow_time_constant_us: u64,
    /// Link rate averaging constant (`Ka`).
    pub link_time_constant_us: u64,
    /// Length of a congestion or relaxation window.
    pub congestion_window_us: u64,
    /// Overflow reductions of `alpha` allowed per congestion episode.
    pub max_alpha_reductions: u32,
    /// Factor applied to `alpha` on buffer overflow.
    pub overflow_damping: f64,
    /// `alpha` used when congestion starts before any label was seen.
    pub min_congested_alpha: f64,
    /// Buffer fill, as a fraction of its size, below which it counts as
    /// drained.
    pub low_water_fraction: f64,
    /// Flows silent for this long are forgotten on eviction.
    pub flow_idle_timeout_us: u64,
    /// Weight of an object pair from their regions.
    pub weight_function: WeightCalculator,
    /// Seed for drop decisions.
    pub seed: u64,
}

impl CsfqConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            flow_time_constant_us: FLOW_TIME_CONSTANT_US,
            link_time_constant_us: LINK_TIME_CONSTANT_US,
            congestion_window_us: LINK_TIME_CONSTANT_US,
            max_alpha_reductions: MAX_ALPHA_REDUCTIONS,
            overflow_damping: 0.99,
            min_congested_alpha: 1.0,
            low_water_fraction: 0.25,
            flow_idle_timeout_us: 30_000_000,
            weight_function: WeightCalculator::Constant(1.0),
            seed: 7,
        }
    }

    /// Sets the weight function.
    #[must_use]
    pub const fn with_weight_function(mut self, weight_function: WeightCalculator) -> Self {
        self.weight_function = weight_function;
        self
    }

    /// Sets the random seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the idle flow timeout.
    #[must_use]
    pub const fn with_flow_idle_timeout_us(mut self, timeout_us: u64) -> Self {
        self.flow_idle_timeout_us = timeout_us;
        self
    }

    /// Sets the low water fraction.
    #[must_use]
    pub fn with_low_water_fraction(mut self, fraction: f64) -> Self {
        self.low_water_fraction = fraction;
        self
    }
}

impl Default for CsfqConfig {
    fn default() -> Self {
        Self {
            weight_function: WeightCalculator::default(),
            seed: 0,
            ..Self::for_testing()
        }
    }
}

/// Snapshot of a CSFQ scheduler's state.
#[derive(Debug, Clone, Default)]
pub struct CsfqStats {
    /// Current fair rate.
    pub alpha: f64,
    /// Whether the link is considered congested.
    pub congested: bool,
    /// Aggregate arrival rate in bytes per second.
    pub arrival_rate: f64,
    /// Aggregate accepted rate in bytes per second.
    pub accepted_rate: f64,
    /// Flows currently tracked.
    pub flow_count: u32,
    /// Bytes queued.
    pub queued_bytes: u32,
    /// Messages dropped by the probabilistic test.
    pub probabilistic_drops: u64,
    /// Messages dropped on buffer overflow.
    pub overflow_drops: u64,
}

type FlowKey = (ObjectId, ObjectId);

/// Per object-pair state.
#[derive(Debug)]
struct FlowInfo {
    weight: f64,
    used_weight: [f64; 2],
    rate: RateEstimator,
    last_seen_us: u64,
}

/// Capacity report from one downstream side.
#[derive(Debug, Clone, Copy, Default)]
struct Downstream {
    /// Unknown until the first report.
    capacity: Option<f64>,
    total_weight: f64,
}

impl Downstream {
    /// A zero or non-finite capacity counts as unknown.
    fn report(total_weight: f64, capacity: f64) -> Self {
        Self {
            capacity: (capacity.is_finite() && capacity > 0.0).then_some(capacity),
            total_weight,
        }
    }
}

#[derive(Debug)]
struct CsfqState {
    flows: BTreeMap<FlowKey, FlowInfo>,
    arrival_rate: RateEstimator,
    accepted_rate: RateEstimator,
    sum_estimated_rates: f64,
    alpha: f64,
    alpha_windowed: f64,
    congested: bool,
    congestion_start_us: u64,
    reductions_left: u32,
    total_active_weight: f64,
    total_used_weight: [f64; 2],
    downstream: [Downstream; 2],
    rng: ChaCha8Rng,
    queue: BoundedQueue<QueuedMessage>,
    low_water_bytes: u32,
    warned_zero_weight: bool,
    warned_local_approximation: bool,
    probabilistic_drops: u64,
    overflow_drops: u64,
}

impl CsfqState {
    fn exceeds_low_water_mark(&self) -> bool {
        self.queue.size() > self.low_water_bytes
    }

    /// Capacity available to this link: the tighter of the two sides, each
    /// scaled by this link's share of that side's weight.
    fn effective_capacity(&self) -> f64 {
        let mut cap = f64::INFINITY;
        for side in [SENDER, RECEIVER] {
            let Some(side_cap) = self.downstream[side].capacity else {
                continue;
            };
            let used = self.total_used_weight[side];
            let total = self.downstream[side].total_weight.max(used);
            let frac = if total > 0.0 { used / total } else { 1.0 };
            cap = cap.min(side_cap * frac);
        }
        cap
    }

    fn estimate_alpha(
        &mut self,
        config: &CsfqConfig,
        bytes: u32,
        now_us: u64,
        label: f64,
        dropped: bool,
    ) {
        self.arrival_rate.estimate(now_us, bytes);
        if !dropped {
            self.accepted_rate.estimate(now_us, bytes);
        }

        if self.alpha == 0.0 {
            if !self.exceeds_low_water_mark() {
                self.alpha_windowed = self.alpha_windowed.max(label);
                return;
            }
            self.alpha = self.alpha.max(self.alpha_windowed);
            if self.alpha == 0.0 {
                self.alpha = config.min_congested_alpha;
            }
            self.alpha_windowed = 0.0;
        }

        let cap = self.effective_capacity();
        let window_open = now_us < self.congestion_start_us.saturating_add(config.congestion_window_us);

        if cap <= self.arrival_rate.rate() {
            if !self.congested {
                self.congested = true;
                self.congestion_start_us = now_us;
                self.reductions_left = config.max_alpha_reductions;
            } else {
                if window_open {
                    return;
                }
                self.congestion_start_us = now_us;
                let accepted = self.accepted_rate.get(now_us);
                if accepted > 0.0 {
                    self.alpha *= cap / accepted;
                }
                if cap < self.alpha {
                    self.alpha = cap;
                }
            }
        } else if self.congested {
            self.congested = false;
            self.congestion_start_us = now_us;
            self.alpha_windowed = 0.0;
        } else if window_open {
            self.alpha_windowed = self.alpha_windowed.max(label);
        } else {
            self.alpha = self.alpha_windowed;
            self.congestion_start_us = now_us;
            if self.exceeds_low_water_mark() {
                self.alpha_windowed = 0.0;
            } else {
                self.alpha = 0.0;
            }
        }
    }

    fn remove_flow(&mut self, key: &FlowKey) {
        if let Some(flow) = self.flows.remove(key) {
            self.total_active_weight -= flow.weight;
            self.sum_estimated_rates -= flow.rate.rate();
            for side in [SENDER, RECEIVER] {
                self.total_used_weight[side] -= flow.used_weight[side];
            }
        }
        if self.flows.is_empty() {
            // Clear accumulated rounding.
            self.total_active_weight = 0.0;
            self.sum_estimated_rates = 0.0;
            self.total_used_weight = [0.0; 2];
        }
    }
}

/// Flow scheduler using core-stateless fair queueing.
#[derive(Debug)]
pub struct CsfqFlowScheduler {
    config: CsfqConfig,
    ctx: SchedulerContext,
    dest: ServerId,
    state: Mutex<CsfqState>,
}

impl CsfqFlowScheduler {
    /// Creates a scheduler for `dest` holding at most `max_size` bytes.
    #[must_use]
    pub fn new(config: CsfqConfig, ctx: SchedulerContext, dest: ServerId, max_size: u32) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let low_water_bytes = (f64::from(max_size) * config.low_water_fraction.clamp(0.0, 1.0)) as u32;
        let state = CsfqState {
            flows: BTreeMap::new(),
            arrival_rate: RateEstimator::new(config.link_time_constant_us, 0),
            accepted_rate: RateEstimator::new(config.link_time_constant_us, 0),
            sum_estimated_rates: 0.0,
            alpha: 0.0,
            alpha_windowed: 0.0,
            congested: true,
            congestion_start_us: 0,
            reductions_left: config.max_alpha_reductions,
            total_active_weight: 0.0,
            total_used_weight: [0.0; 2],
            downstream: [Downstream::default(); 2],
            rng: ChaCha8Rng::seed_from_u64(config.seed ^ dest.get()),
            queue: BoundedQueue::new(max_size),
            low_water_bytes,
            warned_zero_weight: false,
            warned_local_approximation: false,
            probabilistic_drops: 0,
            overflow_drops: 0,
        };
        Self {
            config,
            ctx,
            dest,
            state: Mutex::new(state),
        }
    }

    /// Current fair rate.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.state.lock().alpha
    }

    /// Number of flows tracked.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn flow_count(&self) -> u32 {
        self.state.lock().flows.len() as u32
    }

    /// Snapshot of the scheduler's state.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn stats(&self) -> CsfqStats {
        let state = self.state.lock();
        CsfqStats {
            alpha: state.alpha,
            congested: state.congested,
            arrival_rate: state.arrival_rate.rate(),
            accepted_rate: state.accepted_rate.rate(),
            flow_count: state.flows.len() as u32,
            queued_bytes: state.queue.size(),
            probabilistic_drops: state.probabilistic_drops,
            overflow_drops: state.overflow_drops,
        }
    }

    /// Region used to weigh `object`: exact bounds if known, otherwise a
    /// box of the entry's radius at the center of the owning server.
    fn object_region(&self, state: &mut CsfqState, object: ObjectId, entry: &LocationEntry) -> BoundingBox3 {
        if let Some(bounds) = self.ctx.locator.object_bounds(object) {
            return bounds;
        }

        if entry.server() == self.ctx.server && !state.warned_local_approximation {
            state.warned_local_approximation = true;
            warn!(server = %self.ctx.server, dest = %self.dest, %object, "approximating region of local object");
        }
        #[allow(clippy::float_cmp)]
        if entry.radius() == DEFAULT_OBJECT_RADIUS {
            debug!(%object, "using default radius for object region");
        }

        let server_box = server_bounds(self.ctx.partition.as_ref(), entry.server());
        BoundingBox3::from_center_radius(server_box.center(), entry.radius())
    }
}

impl ServiceQueue for CsfqFlowScheduler {
    type Item = ServerMessage;

    fn front(&mut self) -> Option<&ServerMessage> {
        self.state.get_mut().queue.front().map(|queued| &queued.msg)
    }

    fn pop(&mut self) -> Option<ServerMessage> {
        self.state.get_mut().queue.pop().map(|queued| queued.msg)
    }

    fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    fn size(&self) -> u32 {
        self.state.lock().queue.size()
    }

    fn max_size(&self) -> u32 {
        self.state.lock().queue.max_size()
    }
}

impl FlowScheduler for CsfqFlowScheduler {
    fn dest_server(&self) -> ServerId {
        self.dest
    }

    #[allow(clippy::too_many_lines)]
    fn push(
        &self,
        msg: ObjectMessage,
        source: &LocationEntry,
        dest: &LocationEntry,
        now_us: u64,
    ) -> FlowResult<Admitted> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let key = (msg.source_object, msg.dest_object);
        if !state.flows.contains_key(&key) {
            let source_box = self.object_region(state, msg.source_object, source);
            let dest_box = self.object_region(state, msg.dest_object, dest);
            let weight = self.config.weight_function.weight(&source_box, &dest_box);
            state.flows.insert(
                key,
                FlowInfo {
                    weight,
                    used_weight: [weight; 2],
                    rate: RateEstimator::new(self.config.flow_time_constant_us, now_us),
                    last_seen_us: now_us,
                },
            );
            state.total_active_weight += weight;
            for side in [SENDER, RECEIVER] {
                state.total_used_weight[side] += weight;
            }
        }

        let packet_size = msg.size_bytes();
        let Some(flow) = state.flows.get_mut(&key) else {
            return Err(FlowError::ZeroWeight);
        };
        let weight = flow.weight;
        if weight <= 0.0 {
            if !state.warned_zero_weight {
                state.warned_zero_weight = true;
                warn!(server = %self.ctx.server, dest = %self.dest, "flow weight unavailable, refusing message");
            }
            return Err(FlowError::ZeroWeight);
        }
        flow.last_seen_us = now_us;

        // Swap the flow's old used weight out of the totals.
        let saved_used = state.total_used_weight;
        for side in [SENDER, RECEIVER] {
            state.total_used_weight[side] -= flow.used_weight[side];
        }

        state.sum_estimated_rates -= flow.rate.rate();
        let est_flow_rate = flow.rate.estimate(now_us, packet_size);
        state.sum_estimated_rates += est_flow_rate;

        let arrival = state.arrival_rate.rate();
        let flow_rate = if state.sum_estimated_rates == 0.0 {
            arrival
        } else {
            est_flow_rate / state.sum_estimated_rates * arrival
        };
        let normalized_weight = weight / state.total_active_weight;
        let label = flow_rate / normalized_weight;

        for side in [SENDER, RECEIVER] {
            let downstream = state.downstream[side];
            flow.used_weight[side] = downstream.capacity.map_or(weight, |capacity| {
                let total = downstream.total_weight.max(saved_used[side]);
                (flow_rate * (total / capacity.max(1.0))).min(weight)
            });
            state.total_used_weight[side] += flow.used_weight[side];
        }

        let drop_probability = if label > 0.0 {
            (1.0 - state.alpha / label).max(0.0)
        } else {
            0.0
        };

        // Until alpha is known everything is admitted.
        if state.alpha != 0.0 && state.rng.gen::<f64>() < drop_probability {
            state.estimate_alpha(&self.config, packet_size, now_us, label, true);
            state.probabilistic_drops += 1;
            trace!(dest = %self.dest, msg = %msg.id, label, alpha = state.alpha, "csfq probabilistic drop");
            return Err(FlowError::Dropped {
                reason: DropReason::Probabilistic,
            });
        }

        let was_empty = state.queue.is_empty();
        let queued = QueuedMessage::wrap(&msg, self.ctx.server, self.dest);
        if state.queue.try_push(queued).is_err() {
            if state.reductions_left > 0 {
                state.reductions_left -= 1;
                state.alpha *= self.config.overflow_damping;
            }
            state.overflow_drops += 1;
            trace!(dest = %self.dest, msg = %msg.id, alpha = state.alpha, "csfq overflow drop");
            return Err(FlowError::Dropped {
                reason: DropReason::Overflow,
            });
        }

        state.estimate_alpha(&self.config, packet_size, now_us, label, false);

        Ok(if was_empty {
            Admitted::FrontChanged
        } else {
            Admitted::Queued
        })
    }

    fn total_active_weight(&self) -> f64 {
        self.state.lock().total_active_weight
    }

    fn total_sender_used_weight(&self) -> f64 {
        self.state.lock().total_used_weight[SENDER]
    }

    fn total_receiver_used_weight(&self) -> f64 {
        self.state.lock().total_used_weight[RECEIVER]
    }

    fn update_sender_stats(&self, total_weight: f64, capacity: f64) {
        self.state.lock().downstream[SENDER] = Downstream::report(total_weight, capacity);
    }

    fn update_receiver_stats(&self, total_weight: f64, capacity: f64) {
        self.state.lock().downstream[RECEIVER] = Downstream::report(total_weight, capacity);
    }

    fn evict_idle_flows(&self, now_us: u64) -> u32 {
        let mut state = self.state.lock();
        let timeout = self.config.flow_idle_timeout_us;
        let idle: Vec<FlowKey> = state
            .flows
            .iter()
            .filter(|(_, flow)| now_us.saturating_sub(flow.last_seen_us) > timeout)
            .map(|(key, _)| *key)
            .collect();
        for key in &idle {
            state.remove_flow(key);
        }
        if !idle.is_empty() {
            debug!(dest = %self.dest, evicted = idle.len(), remaining = state.flows.len(), "evicted idle flows");
        }
        #[allow(clippy::cast_possible_truncation)]
        let evicted = idle.len() as u32;
        evicted
    }
}
