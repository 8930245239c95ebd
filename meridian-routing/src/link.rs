//! Link schedulers: the network side of the forwarder.
//!
//! The forwarder fills per-destination queues; a [`LinkSendScheduler`] pulls
//! from them and decides which destination gets the link next. A
//! [`LinkReceiveScheduler`] tracks what peers send to this server. Both report
//! a total used weight and a capacity, which the forwarder feeds into its
//! flow schedulers and into the weight updates it sends to peers.
//!
//! [`FairLinkSender`] and [`LinkReceiver`] are the reference implementations.

use std::collections::BTreeMap;

use meridian_core::{ServerId, ServerMessage, Transmittable};
use meridian_flow::{FairQueue, RateEstimator, ServiceQueue};
use tracing::{debug, trace};

/// Default cap on messages handed to the transport per service round.
pub const LINK_MESSAGES_PER_ROUND_DEFAULT: u32 = 100;

/// Default time constant of link rate estimators (200ms).
pub const LINK_RATE_TIME_CONSTANT_US_DEFAULT: u64 = 200_000;

/// Where a link sender pulls outbound messages from.
pub trait MessageSource {
    /// Removes the next message for `dest`, if any.
    fn pull(&mut self, dest: ServerId) -> Option<ServerMessage>;

    /// True if nothing is waiting for `dest`.
    fn is_empty(&self, dest: ServerId) -> bool;
}

/// The network below the link sender.
pub trait LinkTransport {
    /// Hands a message to the network.
    ///
    /// # Errors
    /// Returns the message if the link to its destination cannot take it now.
    fn try_send(&mut self, msg: ServerMessage) -> Result<(), ServerMessage>;
}

/// Multiplexes destinations onto this server's outbound link.
pub trait LinkSendScheduler: Send {
    /// Sum of the weights of all destinations.
    fn total_used_weight(&self) -> f64;

    /// Outbound capacity in bytes per second. Zero if unknown.
    fn capacity(&self) -> f64;

    /// Records what a peer reported about our traffic to it.
    fn update_receiver_stats(&mut self, peer: ServerId, total_weight: f64, used_weight: f64);

    /// Tells the scheduler that messages for `peer` may be waiting.
    fn message_ready(&mut self, peer: ServerId);

    /// Moves messages from `source` to `transport`. Returns how many were sent.
    fn service(
        &mut self,
        source: &mut dyn MessageSource,
        transport: &mut dyn LinkTransport,
        now_us: u64,
    ) -> u32;
}

/// Tracks this server's inbound link.
pub trait LinkReceiveScheduler: Send {
    /// Sum of the used weights peers reported.
    fn total_used_weight(&self) -> f64;

    /// Inbound capacity in bytes per second. Zero if unknown.
    fn capacity(&self) -> f64;

    /// Records a peer's report of its traffic toward this server.
    fn update_sender_stats(&mut self, peer: ServerId, total_weight: f64, used_weight: f64);

    /// Records bytes received from a peer.
    fn message_received(&mut self, peer: ServerId, bytes: u32, now_us: u64);
}

/// Configuration for [`FairLinkSender`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSenderConfig {
    /// Maximum messages sent per call to `service`.
    pub messages_per_round: u32,
    /// Nominal capacity in bytes per second. `None` estimates it from
    /// bytes actually sent.
    pub capacity_bytes_per_sec: Option<f64>,
    /// Time constant of the sent-bytes estimator.
    pub rate_time_constant_us: u64,
}

impl LinkSenderConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            messages_per_round: 16,
            capacity_bytes_per_sec: None,
            rate_time_constant_us: LINK_RATE_TIME_CONSTANT_US_DEFAULT,
        }
    }

    /// Sets a nominal capacity.
    #[must_use]
    pub const fn with_capacity(mut self, bytes_per_sec: f64) -> Self {
        self.capacity_bytes_per_sec = Some(bytes_per_sec);
        self
    }

    /// Sets the per-round message cap.
    #[must_use]
    pub const fn with_messages_per_round(mut self, messages: u32) -> Self {
        self.messages_per_round = messages;
        self
    }
}

impl Default for LinkSenderConfig {
    fn default() -> Self {
        Self {
            messages_per_round: LINK_MESSAGES_PER_ROUND_DEFAULT,
            capacity_bytes_per_sec: None,
            rate_time_constant_us: LINK_RATE_TIME_CONSTANT_US_DEFAULT,
        }
    }
}

/// One message pulled ahead for a destination.
#[derive(Debug, Default)]
struct PeerSlot {
    pending: Option<ServerMessage>,
}

impl ServiceQueue for PeerSlot {
    type Item = ServerMessage;

    fn front(&mut self) -> Option<&ServerMessage> {
        self.pending.as_ref()
    }

    fn pop(&mut self) -> Option<ServerMessage> {
        self.pending.take()
    }

    fn is_empty(&self) -> bool {
        self.pending.is_none()
    }

    fn size(&self) -> u32 {
        self.pending.as_ref().map_or(0, Transmittable::size_bytes)
    }

    fn max_size(&self) -> u32 {
        u32::MAX
    }
}

/// Weighted fair link sender keyed by destination server.
///
/// Each destination holds at most one message pulled ahead from the source,
/// which is enough for the fair queue to stamp a finish time. A destination
/// whose transport refuses a message is disabled until the next round.
#[derive(Debug)]
pub struct FairLinkSender {
    config: LinkSenderConfig,
    peers: FairQueue<ServerId, PeerSlot>,
    blocked: Vec<ServerId>,
    sent_rate: RateEstimator,
    bytes_sent: u64,
    messages_sent: u64,
}

impl FairLinkSender {
    /// Creates a sender with no destinations.
    #[must_use]
    pub fn new(config: LinkSenderConfig) -> Self {
        Self {
            sent_rate: RateEstimator::new(config.rate_time_constant_us, 0),
            config,
            peers: FairQueue::new(),
            blocked: Vec::new(),
            bytes_sent: 0,
            messages_sent: 0,
        }
    }

    /// Weight of a destination, or 0 if unknown.
    #[must_use]
    pub fn peer_weight(&self, peer: ServerId) -> f64 {
        self.peers.queue_weight(&peer)
    }

    /// True if the transport refused `peer` during the last round.
    #[must_use]
    pub fn is_blocked(&self, peer: ServerId) -> bool {
        self.blocked.contains(&peer)
    }

    /// Total bytes handed to the transport.
    #[must_use]
    pub const fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total messages handed to the transport.
    #[must_use]
    pub const fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    fn ensure_peer(&mut self, peer: ServerId, weight: f64) {
        if !self.peers.has_queue(&peer) {
            // Cannot fail: the key was just checked.
            let _ = self.peers.add_queue(peer, PeerSlot::default(), weight);
        }
    }

    /// Pulls the next message for `peer` into its slot if the slot is free.
    fn refill(&mut self, peer: ServerId, source: &mut dyn MessageSource) {
        let Some(slot) = self.peers.queue_mut(&peer) else {
            return;
        };
        if slot.pending.is_some() {
            return;
        }
        if let Some(msg) = source.pull(peer) {
            slot.pending = Some(msg);
            self.peers.notify_push_front(&peer);
        }
    }
}

impl LinkSendScheduler for FairLinkSender {
    fn total_used_weight(&self) -> f64 {
        self.peers.keys().map(|peer| self.peers.queue_weight(peer)).sum()
    }

    fn capacity(&self) -> f64 {
        self.config
            .capacity_bytes_per_sec
            .unwrap_or_else(|| self.sent_rate.rate())
    }

    fn update_receiver_stats(&mut self, peer: ServerId, total_weight: f64, used_weight: f64) {
        trace!(%peer, total_weight, used_weight, "link sender weight update");
        if self.peers.has_queue(&peer) {
            self.peers.set_queue_weight(&peer, used_weight);
        } else {
            self.ensure_peer(peer, used_weight);
        }
    }

    fn message_ready(&mut self, peer: ServerId) {
        let weight = self.peers.avg_weight();
        self.ensure_peer(peer, weight);
    }

    fn service(
        &mut self,
        source: &mut dyn MessageSource,
        transport: &mut dyn LinkTransport,
        now_us: u64,
    ) -> u32 {
        for peer in std::mem::take(&mut self.blocked) {
            self.peers.enable_queue(&peer);
        }

        let idle: Vec<ServerId> = self
            .peers
            .keys()
            .filter(|peer| !source.is_empty(**peer))
            .copied()
            .collect();
        for peer in idle {
            self.refill(peer, source);
        }

        let mut sent = 0;
        while sent < self.config.messages_per_round {
            let Some((peer, msg)) = self.peers.pop() else {
                break;
            };
            let bytes = msg.size_bytes();
            match transport.try_send(msg) {
                Ok(()) => {
                    sent += 1;
                    self.messages_sent += 1;
                    self.bytes_sent += u64::from(bytes);
                    self.sent_rate.estimate(now_us, bytes);
                    self.refill(peer, source);
                }
                Err(msg) => {
                    debug!(%peer, "link blocked, disabling destination");
                    if let Some(slot) = self.peers.queue_mut(&peer) {
                        slot.pending = Some(msg);
                    }
                    self.peers.restore_front(&peer);
                    self.peers.disable_queue(&peer);
                    self.blocked.push(peer);
                }
            }
        }
        sent
    }
}

/// Configuration for [`LinkReceiver`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkReceiverConfig {
    /// Nominal capacity in bytes per second. `None` estimates it from
    /// bytes actually received.
    pub capacity_bytes_per_sec: Option<f64>,
    /// Time constant of the received-bytes estimator.
    pub rate_time_constant_us: u64,
}

impl LinkReceiverConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            capacity_bytes_per_sec: None,
            rate_time_constant_us: LINK_RATE_TIME_CONSTANT_US_DEFAULT,
        }
    }

    /// Sets a nominal capacity.
    #[must_use]
    pub const fn with_capacity(mut self, bytes_per_sec: f64) -> Self {
        self.capacity_bytes_per_sec = Some(bytes_per_sec);
        self
    }
}

impl Default for LinkReceiverConfig {
    fn default() -> Self {
        Self::for_testing()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SenderWeights {
    total_weight: f64,
    used_weight: f64,
}

/// Receive-side bookkeeping: what each peer says it sends us.
#[derive(Debug)]
pub struct LinkReceiver {
    config: LinkReceiverConfig,
    senders: BTreeMap<ServerId, SenderWeights>,
    received_rate: RateEstimator,
    bytes_received: u64,
}

impl LinkReceiver {
    /// Creates a receiver with no known senders.
    #[must_use]
    pub fn new(config: LinkReceiverConfig) -> Self {
        Self {
            received_rate: RateEstimator::new(config.rate_time_constant_us, 0),
            config,
            senders: BTreeMap::new(),
            bytes_received: 0,
        }
    }

    /// Used weight last reported by `peer`.
    #[must_use]
    pub fn sender_used_weight(&self, peer: ServerId) -> Option<f64> {
        self.senders.get(&peer).map(|w| w.used_weight)
    }

    /// Total bytes received.
    #[must_use]
    pub const fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

impl LinkReceiveScheduler for LinkReceiver {
    fn total_used_weight(&self) -> f64 {
        self.senders.values().map(|w| w.used_weight).sum()
    }

    fn capacity(&self) -> f64 {
        self.config
            .capacity_bytes_per_sec
            .unwrap_or_else(|| self.received_rate.rate())
    }

    fn update_sender_stats(&mut self, peer: ServerId, total_weight: f64, used_weight: f64) {
        trace!(%peer, total_weight, used_weight, "link receiver weight update");
        self.senders.insert(
            peer,
            SenderWeights {
                total_weight,
                used_weight,
            },
        );
    }

    fn message_received(&mut self, _peer: ServerId, bytes: u32, now_us: u64) {
        self.bytes_received += u64::from(bytes);
        self.received_rate.estimate(now_us, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{MessageId, ServerPort};
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    struct Queues {
        by_dest: HashMap<ServerId, VecDeque<ServerMessage>>,
    }

    impl Queues {
        fn fill(&mut self, dest: u64, count: u64) {
            let queue = self.by_dest.entry(ServerId::new(dest)).or_default();
            for i in 0..count {
                queue.push_back(ServerMessage::new(
                    MessageId::new(dest * 1000 + i),
                    ServerId::new(1),
                    ServerId::new(dest),
                    ServerPort::ObjectRouting,
                    vec![0u8; 70],
                ));
            }
        }
    }

    impl MessageSource for Queues {
        fn pull(&mut self, dest: ServerId) -> Option<ServerMessage> {
            self.by_dest.get_mut(&dest).and_then(VecDeque::pop_front)
        }

        fn is_empty(&self, dest: ServerId) -> bool {
            self.by_dest.get(&dest).map_or(true, VecDeque::is_empty)
        }
    }

    #[derive(Default)]
    struct Wire {
        sent: Vec<ServerMessage>,
        refuse: Option<ServerId>,
    }

    impl LinkTransport for Wire {
        fn try_send(&mut self, msg: ServerMessage) -> Result<(), ServerMessage> {
            if self.refuse == Some(msg.dest_server) {
                return Err(msg);
            }
            self.sent.push(msg);
            Ok(())
        }
    }

    fn dests(wire: &Wire) -> Vec<u64> {
        wire.sent.iter().map(|m| m.dest_server.get()).collect()
    }

    #[test]
    fn test_weights_split_link() {
        let mut sender = FairLinkSender::new(LinkSenderConfig::for_testing().with_messages_per_round(6));
        sender.update_receiver_stats(ServerId::new(2), 3.0, 1.0);
        sender.update_receiver_stats(ServerId::new(3), 3.0, 2.0);
        let mut source = Queues::default();
        source.fill(2, 10);
        source.fill(3, 10);
        let mut wire = Wire::default();

        assert_eq!(sender.service(&mut source, &mut wire, 0), 6);
        let to_3 = dests(&wire).iter().filter(|d| **d == 3).count();
        assert_eq!(to_3, 4);
        assert!((sender.total_used_weight() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_message_ready_uses_average_weight() {
        let mut sender = FairLinkSender::new(LinkSenderConfig::for_testing());
        sender.update_receiver_stats(ServerId::new(2), 0.0, 2.0);
        sender.update_receiver_stats(ServerId::new(3), 0.0, 4.0);
        sender.message_ready(ServerId::new(4));
        assert!((sender.peer_weight(ServerId::new(4)) - 3.0).abs() < 1e-9);

        // A later report replaces the default.
        sender.update_receiver_stats(ServerId::new(4), 0.0, 1.0);
        assert!((sender.peer_weight(ServerId::new(4)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_blocked_destination_skipped_for_round() {
        let mut sender = FairLinkSender::new(LinkSenderConfig::for_testing());
        sender.message_ready(ServerId::new(2));
        sender.message_ready(ServerId::new(3));
        let mut source = Queues::default();
        source.fill(2, 3);
        source.fill(3, 3);
        let mut wire = Wire {
            refuse: Some(ServerId::new(2)),
            ..Wire::default()
        };

        assert_eq!(sender.service(&mut source, &mut wire, 0), 3);
        assert_eq!(dests(&wire), vec![3, 3, 3]);
        assert!(sender.is_blocked(ServerId::new(2)));

        // The refused message was kept and goes first once the link clears.
        wire.refuse = None;
        wire.sent.clear();
        assert_eq!(sender.service(&mut source, &mut wire, 10_000), 3);
        assert_eq!(wire.sent[0].id, MessageId::new(2000));
        assert!(!sender.is_blocked(ServerId::new(2)));
    }

    #[test]
    fn test_refused_message_not_charged_twice() {
        let mut sender = FairLinkSender::new(LinkSenderConfig::for_testing());
        sender.message_ready(ServerId::new(2));
        sender.message_ready(ServerId::new(3));
        let mut source = Queues::default();
        source.fill(2, 3);
        source.fill(3, 3);
        let mut wire = Wire {
            refuse: Some(ServerId::new(2)),
            ..Wire::default()
        };

        sender.service(&mut source, &mut wire, 0);
        // Still the finish time of its first 100-byte message at weight 1.
        assert_eq!(
            sender.peers.finish_time(&ServerId::new(2)),
            Some(100 * meridian_flow::VIRTUAL_TIME_SCALE)
        );
    }

    #[test]
    fn test_round_cap() {
        let mut sender = FairLinkSender::new(LinkSenderConfig::for_testing().with_messages_per_round(4));
        sender.message_ready(ServerId::new(2));
        let mut source = Queues::default();
        source.fill(2, 10);
        let mut wire = Wire::default();

        assert_eq!(sender.service(&mut source, &mut wire, 0), 4);
        assert_eq!(sender.service(&mut source, &mut wire, 1_000), 4);
        assert_eq!(sender.messages_sent(), 8);
        assert_eq!(sender.bytes_sent(), 8 * 100);
    }

    #[test]
    fn test_sender_capacity() {
        let nominal = FairLinkSender::new(LinkSenderConfig::for_testing().with_capacity(5000.0));
        assert!((nominal.capacity() - 5000.0).abs() < f64::EPSILON);

        let mut estimated = FairLinkSender::new(LinkSenderConfig::for_testing());
        assert!(estimated.capacity() == 0.0);
        estimated.message_ready(ServerId::new(2));
        let mut source = Queues::default();
        source.fill(2, 40);
        let mut wire = Wire::default();
        for step in 0..10u64 {
            estimated.service(&mut source, &mut wire, step * 100_000);
        }
        assert!(estimated.capacity() > 0.0);
    }

    #[test]
    fn test_receiver_tracks_senders() {
        let mut receiver = LinkReceiver::new(LinkReceiverConfig::for_testing().with_capacity(8000.0));
        receiver.update_sender_stats(ServerId::new(2), 4.0, 1.5);
        receiver.update_sender_stats(ServerId::new(3), 4.0, 2.0);
        receiver.update_sender_stats(ServerId::new(2), 4.0, 0.5);
        assert!((receiver.total_used_weight() - 2.5).abs() < 1e-9);
        assert_eq!(receiver.sender_used_weight(ServerId::new(2)), Some(0.5));
        assert!((receiver.capacity() - 8000.0).abs() < f64::EPSILON);

        receiver.message_received(ServerId::new(2), 100, 0);
        receiver.message_received(ServerId::new(2), 100, 50_000);
        assert_eq!(receiver.bytes_received(), 200);
    }
}
