//! Messages parked behind authoritative location lookups.
//!
//! One lookup is in flight per destination object. Messages for an object
//! whose lookup is already outstanding wait on it instead of issuing another.
//! The queue is bounded by total parked bytes, and lookups that never
//! resolve are abandoned after a timeout.

use std::collections::HashMap;

use meridian_core::{ObjectId, ObjectMessage, ServerId, Transmittable};

/// Default bound on bytes parked behind pending lookups (1MB).
pub const LOOKUP_PENDING_BYTES_MAX_DEFAULT: u32 = 1024 * 1024;

/// Default time after which a pending lookup is abandoned (5 seconds).
pub const LOOKUP_TIMEOUT_US_DEFAULT: u64 = 5_000_000;

/// Configuration for the lookup queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupQueueConfig {
    /// Maximum bytes of object messages waiting on lookups.
    pub max_pending_bytes: u32,
    /// Age at which a lookup is abandoned. Zero waits forever.
    pub timeout_us: u64,
}

impl LookupQueueConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_pending_bytes: 64 * 1024,
            timeout_us: 1_000_000,
        }
    }

    /// Sets the parked-bytes bound.
    #[must_use]
    pub const fn with_max_pending_bytes(mut self, max_pending_bytes: u32) -> Self {
        self.max_pending_bytes = max_pending_bytes;
        self
    }

    /// Sets the lookup timeout.
    #[must_use]
    pub const fn with_timeout_us(mut self, timeout_us: u64) -> Self {
        self.timeout_us = timeout_us;
        self
    }
}

impl Default for LookupQueueConfig {
    fn default() -> Self {
        Self {
            max_pending_bytes: LOOKUP_PENDING_BYTES_MAX_DEFAULT,
            timeout_us: LOOKUP_TIMEOUT_US_DEFAULT,
        }
    }
}

/// A message waiting for its destination to be located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// The message.
    pub msg: ObjectMessage,
    /// The server that forwarded it here, if it arrived from a peer.
    pub forward_from: Option<ServerId>,
}

/// Whether parking a message needs a new lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parked {
    /// First message for the object; the caller must issue a lookup.
    NewLookup,
    /// A lookup is already outstanding.
    Coalesced,
}

#[derive(Debug)]
struct PendingLookup {
    issued_at_us: u64,
    messages: Vec<PendingMessage>,
}

/// Object messages grouped by the object lookup they wait on.
#[derive(Debug)]
pub struct LookupQueue {
    config: LookupQueueConfig,
    pending: HashMap<ObjectId, PendingLookup>,
    pending_bytes: u32,
}

impl LookupQueue {
    /// Creates an empty lookup queue.
    #[must_use]
    pub fn new(config: LookupQueueConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            pending_bytes: 0,
        }
    }

    /// Parks a message until its destination resolves.
    ///
    /// # Errors
    /// Returns the message if the byte bound would be exceeded.
    pub fn park(
        &mut self,
        msg: ObjectMessage,
        forward_from: Option<ServerId>,
        now_us: u64,
    ) -> Result<Parked, PendingMessage> {
        let bytes = msg.size_bytes();
        if self.pending_bytes.saturating_add(bytes) > self.config.max_pending_bytes {
            return Err(PendingMessage { msg, forward_from });
        }
        self.pending_bytes += bytes;

        let object = msg.dest_object;
        let entry = PendingMessage { msg, forward_from };
        if let Some(lookup) = self.pending.get_mut(&object) {
            lookup.messages.push(entry);
            return Ok(Parked::Coalesced);
        }
        self.pending.insert(
            object,
            PendingLookup {
                issued_at_us: now_us,
                messages: vec![entry],
            },
        );
        Ok(Parked::NewLookup)
    }

    /// Releases every message waiting on `object`, in arrival order.
    ///
    /// Returns `None` if no lookup is outstanding for it.
    pub fn resolve(&mut self, object: ObjectId) -> Option<Vec<PendingMessage>> {
        let lookup = self.pending.remove(&object)?;
        self.release(&lookup.messages);
        Some(lookup.messages)
    }

    /// Removes lookups older than the timeout, returning their messages.
    pub fn expire(&mut self, now_us: u64) -> Vec<(ObjectId, Vec<PendingMessage>)> {
        if self.config.timeout_us == 0 {
            return Vec::new();
        }
        let timeout_us = self.config.timeout_us;
        let mut expired: Vec<ObjectId> = self
            .pending
            .iter()
            .filter(|(_, lookup)| now_us.saturating_sub(lookup.issued_at_us) >= timeout_us)
            .map(|(object, _)| *object)
            .collect();
        expired.sort_unstable();

        expired
            .into_iter()
            .filter_map(|object| self.resolve(object).map(|messages| (object, messages)))
            .collect()
    }

    /// True if a lookup for `object` is outstanding.
    #[must_use]
    pub fn is_pending(&self, object: ObjectId) -> bool {
        self.pending.contains_key(&object)
    }

    /// Number of outstanding lookups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Bytes of object messages currently parked.
    #[must_use]
    pub const fn pending_bytes(&self) -> u32 {
        self.pending_bytes
    }

    fn release(&mut self, messages: &[PendingMessage]) {
        let bytes: u32 = messages.iter().map(|p| p.msg.size_bytes()).sum();
        self.pending_bytes -= bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::MessageId;

    fn message(id: u64, dest: u64) -> ObjectMessage {
        ObjectMessage::new(
            MessageId::new(id),
            ObjectId::new(1),
            0,
            ObjectId::new(dest),
            0,
            vec![0u8; 68],
        )
    }

    #[test]
    fn test_coalesces_per_object() {
        let mut queue = LookupQueue::new(LookupQueueConfig::for_testing());
        assert_eq!(queue.park(message(1, 7), None, 0), Ok(Parked::NewLookup));
        assert_eq!(
            queue.park(message(2, 7), Some(ServerId::new(3)), 10),
            Ok(Parked::Coalesced)
        );
        assert_eq!(queue.park(message(3, 8), None, 20), Ok(Parked::NewLookup));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending_bytes(), 300);

        let released = queue.resolve(ObjectId::new(7)).unwrap();
        let ids: Vec<u64> = released.iter().map(|p| p.msg.id.get()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(released[1].forward_from, Some(ServerId::new(3)));
        assert_eq!(queue.pending_bytes(), 100);
        assert!(!queue.is_pending(ObjectId::new(7)));
    }

    #[test]
    fn test_resolve_unknown_object() {
        let mut queue = LookupQueue::new(LookupQueueConfig::for_testing());
        assert!(queue.resolve(ObjectId::new(7)).is_none());
    }

    #[test]
    fn test_byte_bound() {
        let config = LookupQueueConfig::for_testing().with_max_pending_bytes(250);
        let mut queue = LookupQueue::new(config);
        queue.park(message(1, 7), None, 0).unwrap();
        queue.park(message(2, 8), None, 0).unwrap();

        let refused = queue.park(message(3, 7), None, 0).unwrap_err();
        assert_eq!(refused.msg.id, MessageId::new(3));
        assert_eq!(queue.pending_bytes(), 200);
    }

    #[test]
    fn test_expire_by_issue_time() {
        let mut queue = LookupQueue::new(LookupQueueConfig::for_testing());
        queue.park(message(1, 7), None, 0).unwrap();
        queue.park(message(2, 8), None, 600_000).unwrap();
        // Coalescing does not refresh the issue time.
        queue.park(message(3, 7), None, 900_000).unwrap();

        let expired = queue.expire(1_000_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, ObjectId::new(7));
        assert_eq!(expired[0].1.len(), 2);
        assert!(queue.is_pending(ObjectId::new(8)));
        assert_eq!(queue.pending_bytes(), 100);
    }

    #[test]
    fn test_zero_timeout_waits_forever() {
        let config = LookupQueueConfig::for_testing().with_timeout_us(0);
        let mut queue = LookupQueue::new(config);
        queue.park(message(1, 7), None, 0).unwrap();
        assert!(queue.expire(u64::MAX).is_empty());
        assert_eq!(queue.len(), 1);
    }
}
