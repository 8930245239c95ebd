//! Weighted fair queue over keyed sub-queues.
//!
//! Implements virtual-time weighted fair queuing (WFQ). Each sub-queue's head
//! item is stamped with a virtual finish time
//!
//! ```text
//! finish = max(virtual_time, previous finish for the key) + size / weight
//! ```
//!
//! and the enabled sub-queue with the smallest finish time is served next.
//! Popping advances the virtual clock to the popped finish time, never
//! backwards.
//!
//! The queue is used at two levels: keyed by destination server to multiplex
//! one outbound link, and keyed by service inside each destination to keep
//! control traffic separate from object traffic. A `FairQueue` is itself a
//! [`ServiceQueue`], so the levels nest.
//!
//! Virtual time is an integer in units of [`VIRTUAL_TIME_SCALE`] per byte at
//! weight 1.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use meridian_core::Transmittable;
use tracing::{debug, warn};

use crate::error::{FlowError, FlowResult};
use crate::queue::{PushQueue, ServiceQueue};

/// Virtual time units per byte at weight 1.
pub const VIRTUAL_TIME_SCALE: u64 = 1_000;

/// Transmission time charged to the head of a zero-weight queue.
pub const ZERO_WEIGHT_TX_TIME: u64 = 1_000_000 * VIRTUAL_TIME_SCALE;

/// Position in the finish-time index.
///
/// Ties on finish time go to the heavier queue, then to whichever entry was
/// scheduled first. Non-negative `f64::to_bits` orders like the float.
type FinishKey = (u64, Reverse<u64>, u64);

/// Scheduling state for one sub-queue.
struct QueueInfo<Q> {
    queue: Q,
    weight: f64,
    weight_inv: f64,
    enabled: bool,
    /// Index entry of the current head, if it has one.
    scheduled: Option<FinishKey>,
    /// Finish time of the last item popped from this queue.
    last_finish: u64,
    /// `last_finish` before the last pop, for [`FairQueue::restore_front`].
    finish_before_pop: u64,
}

/// A weighted fair queue multiplexing sub-queues of type `Q` keyed by `K`.
pub struct FairQueue<K, Q> {
    queues: BTreeMap<K, QueueInfo<Q>>,
    by_finish: BTreeMap<FinishKey, K>,
    virtual_time: u64,
    /// Memoized key of the queue holding the front item.
    front_queue: Option<K>,
    next_seq: u64,
    warned_zero_weight: bool,
}

impl<K, Q> FairQueue<K, Q>
where
    K: Ord + Clone,
    Q: ServiceQueue,
{
    /// Creates an empty fair queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queues: BTreeMap::new(),
            by_finish: BTreeMap::new(),
            virtual_time: 0,
            front_queue: None,
            next_seq: 0,
            warned_zero_weight: false,
        }
    }

    /// Registers a sub-queue under `key` with the given weight.
    ///
    /// # Errors
    /// Returns `FlowError::DuplicateQueue` if `key` is already registered.
    pub fn add_queue(&mut self, key: K, queue: Q, weight: f64) -> FlowResult<()> {
        if self.queues.contains_key(&key) {
            return Err(FlowError::DuplicateQueue);
        }
        let weight = sanitize_weight(weight);
        self.queues.insert(
            key.clone(),
            QueueInfo {
                queue,
                weight,
                weight_inv: invert(weight),
                enabled: true,
                scheduled: None,
                last_finish: 0,
                finish_before_pop: 0,
            },
        );
        self.schedule(&key);
        self.front_queue = None;
        Ok(())
    }

    /// Removes a sub-queue, returning it with whatever it still holds.
    pub fn remove_queue(&mut self, key: &K) -> Option<Q> {
        let mut info = self.queues.remove(key)?;
        if let Some(entry) = info.scheduled.take() {
            self.by_finish.remove(&entry);
        }
        if self.front_queue.as_ref() == Some(key) {
            self.front_queue = None;
        }
        Some(info.queue)
    }

    /// Changes the weight of a sub-queue.
    ///
    /// The new weight applies from the next head item, except that a queue
    /// leaving weight zero is rescheduled immediately so it does not wait
    /// out the zero-weight transmission time.
    pub fn set_queue_weight(&mut self, key: &K, weight: f64) {
        let Some(info) = self.queues.get_mut(key) else {
            return;
        };
        let old_weight = info.weight;
        info.weight = sanitize_weight(weight);
        info.weight_inv = invert(info.weight);

        if old_weight == 0.0 {
            self.unschedule(key);
            self.schedule(key);
        }
        self.front_queue = None;
    }

    /// Weight of a sub-queue, or 0 if unknown.
    #[must_use]
    pub fn queue_weight(&self, key: &K) -> f64 {
        self.queues.get(key).map_or(0.0, |info| info.weight)
    }

    /// Makes a sub-queue eligible for service again.
    pub fn enable_queue(&mut self, key: &K) {
        if let Some(info) = self.queues.get_mut(key) {
            if !info.enabled {
                info.enabled = true;
                self.front_queue = None;
            }
        }
    }

    /// Excludes a sub-queue from service. Its items and finish time are kept.
    pub fn disable_queue(&mut self, key: &K) {
        if let Some(info) = self.queues.get_mut(key) {
            info.enabled = false;
            if self.front_queue.as_ref() == Some(key) {
                self.front_queue = None;
            }
        }
    }

    /// Returns true if the sub-queue is currently eligible for service.
    #[must_use]
    pub fn is_enabled(&self, key: &K) -> bool {
        self.queues.get(key).is_some_and(|info| info.enabled)
    }

    /// Returns true if a sub-queue is registered under `key`.
    #[must_use]
    pub fn has_queue(&self, key: &K) -> bool {
        self.queues.contains_key(key)
    }

    /// Number of registered sub-queues.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Queue counts bounded by peers.
    pub fn num_queues(&self) -> u32 {
        self.queues.len() as u32
    }

    /// Average weight of registered sub-queues, or 1 when there are none.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_weight(&self) -> f64 {
        if self.queues.is_empty() {
            return 1.0;
        }
        let sum: f64 = self.queues.values().map(|info| info.weight).sum();
        sum / self.queues.len() as f64
    }

    /// Registered keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.queues.keys()
    }

    /// Bytes held by a sub-queue, or 0 if unknown.
    #[must_use]
    pub fn size(&self, key: &K) -> u32 {
        self.queues.get(key).map_or(0, |info| info.queue.size())
    }

    /// Capacity of a sub-queue in bytes, or 0 if unknown.
    #[must_use]
    pub fn max_size(&self, key: &K) -> u32 {
        self.queues.get(key).map_or(0, |info| info.queue.max_size())
    }

    /// Direct access to a sub-queue.
    ///
    /// If the caller changes what the sub-queue's front is, it must follow
    /// up with [`notify_push_front`](Self::notify_push_front).
    pub fn queue_mut(&mut self, key: &K) -> Option<&mut Q> {
        self.queues.get_mut(key).map(|info| &mut info.queue)
    }

    /// Shared access to a sub-queue.
    #[must_use]
    pub fn queue(&self, key: &K) -> Option<&Q> {
        self.queues.get(key).map(|info| &info.queue)
    }

    /// Tells the fair queue that the front of `key`'s sub-queue changed.
    ///
    /// Needed for sub-queues that are filled behind the fair queue's back.
    /// Safe to call on every push.
    pub fn notify_push_front(&mut self, key: &K) {
        if !self.queues.contains_key(key) {
            return;
        }
        self.unschedule(key);
        self.schedule(key);
        self.front_queue = None;
    }

    /// Reinstates the item just popped from `key` after the caller put it
    /// back into the sub-queue.
    ///
    /// The item keeps the finish time it was popped with and the queue's
    /// clock goes back to where it was, so a refused item is not charged
    /// twice. Only valid before anything else is popped from `key`.
    pub fn restore_front(&mut self, key: &K) {
        let Some(info) = self.queues.get_mut(key) else {
            return;
        };
        if let Some(entry) = info.scheduled.take() {
            self.by_finish.remove(&entry);
        }
        let finish = info.last_finish;
        info.last_finish = info.finish_before_pop;
        if info.queue.front().is_none() {
            return;
        }
        let entry = (finish, Reverse(info.weight.to_bits()), self.next_seq);
        self.next_seq += 1;
        info.scheduled = Some(entry);
        self.by_finish.insert(entry, key.clone());
        self.front_queue = None;
    }

    /// Current virtual time.
    #[must_use]
    pub const fn virtual_time(&self) -> u64 {
        self.virtual_time
    }

    /// Virtual finish time of a sub-queue's head item, if it has one.
    #[must_use]
    pub fn finish_time(&self, key: &K) -> Option<u64> {
        self.queues
            .get(key)
            .and_then(|info| info.scheduled)
            .map(|(finish, _, _)| finish)
    }

    /// The next item to be served and its key.
    pub fn front(&mut self) -> Option<(&K, &Q::Item)> {
        loop {
            let key = match &self.front_queue {
                Some(key) => key.clone(),
                None => {
                    let key = self.next_ready_key()?;
                    self.front_queue = Some(key.clone());
                    key
                }
            };
            let resolvable = self
                .queues
                .get_mut(&key)
                .is_some_and(|info| info.queue.front().is_some());
            if resolvable {
                break;
            }
            // The sub-queue changed under us; drop it from the index until
            // it is notified again.
            self.unschedule(&key);
            self.schedule(&key);
            self.front_queue = None;
        }

        let key = self.front_queue.as_ref()?;
        let item = self.queues.get_mut(key)?.queue.front()?;
        Some((key, item))
    }

    /// Removes and returns the next item and its key.
    pub fn pop(&mut self) -> Option<(K, Q::Item)> {
        self.front()?;
        let key = self.front_queue.take()?;
        let info = self.queues.get_mut(&key)?;
        let entry = info.scheduled.take()?;
        self.by_finish.remove(&entry);
        let item = info.queue.pop()?;
        let (finish, _, _) = entry;
        info.finish_before_pop = info.last_finish;
        info.last_finish = finish;

        // A skipped entry may have finished earlier; the clock never rewinds.
        self.virtual_time = self.virtual_time.max(finish);
        self.schedule(&key);
        Some((key, item))
    }

    /// True if no enabled sub-queue has an item ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self
            .by_finish
            .values()
            .any(|key| self.queues.get(key).is_some_and(|info| info.enabled))
    }

    /// True if any sub-queue, enabled or not, has an item ready.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.by_finish.is_empty()
    }

    /// First enabled key in finish-time order.
    fn next_ready_key(&self) -> Option<K> {
        self.by_finish
            .values()
            .find(|key| self.queues.get(*key).is_some_and(|info| info.enabled))
            .cloned()
    }

    fn unschedule(&mut self, key: &K) {
        if let Some(entry) = self.queues.get_mut(key).and_then(|info| info.scheduled.take()) {
            self.by_finish.remove(&entry);
        }
    }

    /// Computes the finish time of `key`'s head and indexes it.
    fn schedule(&mut self, key: &K) {
        let Some(info) = self.queues.get_mut(key) else {
            return;
        };
        debug_assert!(info.scheduled.is_none());
        if info.queue.is_empty() {
            return;
        }
        let Some(size) = info.queue.front().map(Transmittable::size_bytes) else {
            return;
        };

        let start = self.virtual_time.max(info.last_finish);
        let tx_time = if info.weight == 0.0 {
            if !self.warned_zero_weight {
                self.warned_zero_weight = true;
                warn!("fair queue encountered zero weight, charging default transmission time");
            }
            ZERO_WEIGHT_TX_TIME
        } else {
            transmit_time(size, info.weight_inv)
        };

        let entry = (
            start.saturating_add(tx_time),
            Reverse(info.weight.to_bits()),
            self.next_seq,
        );
        self.next_seq += 1;
        info.scheduled = Some(entry);
        self.by_finish.insert(entry, key.clone());
    }
}

impl<K, Q> FairQueue<K, Q>
where
    K: Ord + Clone,
    Q: PushQueue,
{
    /// Pushes an item onto `key`'s sub-queue.
    ///
    /// # Errors
    /// Returns `FlowError::UnknownQueue` if `key` is not registered, or the
    /// sub-queue's error if it refuses the item. The item is dropped.
    pub fn push(&mut self, key: &K, item: Q::Item) -> FlowResult<()> {
        let info = self.queues.get_mut(key).ok_or(FlowError::UnknownQueue)?;
        let was_unscheduled = info.scheduled.is_none();
        info.queue.push(item)?;
        if was_unscheduled {
            self.schedule(key);
            self.front_queue = None;
        }
        Ok(())
    }
}

impl<K, Q> Default for FairQueue<K, Q>
where
    K: Ord + Clone,
    Q: ServiceQueue,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, Q> std::fmt::Debug for FairQueue<K, Q>
where
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairQueue")
            .field("keys", &self.queues.keys().collect::<Vec<_>>())
            .field("virtual_time", &self.virtual_time)
            .field("scheduled", &self.by_finish.len())
            .finish_non_exhaustive()
    }
}

impl<K, Q> ServiceQueue for FairQueue<K, Q>
where
    K: Ord + Clone,
    Q: ServiceQueue,
{
    type Item = Q::Item;

    fn front(&mut self) -> Option<&Q::Item> {
        Self::front(self).map(|(_, item)| item)
    }

    fn pop(&mut self) -> Option<Q::Item> {
        Self::pop(self).map(|(_, item)| item)
    }

    fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    fn size(&self) -> u32 {
        self.queues.values().map(|info| info.queue.size()).sum()
    }

    fn max_size(&self) -> u32 {
        self.queues.values().map(|info| info.queue.max_size()).sum()
    }
}

fn sanitize_weight(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

fn invert(weight: f64) -> f64 {
    if weight == 0.0 {
        0.0
    } else {
        1.0 / weight
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn transmit_time(size: u32, weight_inv: f64) -> u64 {
    #[allow(clippy::cast_precision_loss)]
    let scaled = (f64::from(size) * weight_inv * VIRTUAL_TIME_SCALE as f64).round();
    if scaled < 1.0 {
        debug!(size, "zero duration transmission, charging minimum");
        return 1;
    }
    scaled as u64
}
