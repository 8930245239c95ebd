//! System limits and configuration bounds.
//!
//! Every queue, buffer, and cache in the forwarding path has an explicit
//! maximum size. A full queue drops rather than blocks, so these bounds are
//! what keep a congested server predictable.

/// Maximum encoded size of a single object message in bytes.
pub const OBJECT_MESSAGE_BYTES_MAX: u32 = 64 * 1024;

/// Default period of the forwarder weight exchange (10ms).
pub const WEIGHT_EXCHANGE_INTERVAL_US_DEFAULT: u64 = 10_000;

/// Default number of received server messages handled per strand turn.
pub const RECEIVED_MESSAGES_PER_TURN_DEFAULT: u32 = 20;

/// Forwarding limits for one space server.
///
/// Default values match what a single server needs for a few hundred peers.
/// Production deployments tune these per link speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum encoded size of an object message in bytes.
    pub max_object_message_bytes: u32,
    /// Outbound object-message buffer per destination server, in bytes.
    pub max_send_queue_bytes: u32,
    /// Outbound buffer for each control service per destination, in bytes.
    pub max_control_queue_bytes: u32,
    /// Maximum number of received server messages buffered before drops.
    pub max_received_messages: u32,
    /// Maximum bytes of object messages parked behind pending lookups.
    pub max_pending_lookup_bytes: u32,
    /// Maximum entries in the location cache.
    pub max_location_cache_entries: u32,
    /// Time-to-live of a location cache entry in microseconds.
    pub location_cache_ttl_us: u64,
    /// Time after which an unresolved location lookup is abandoned.
    pub lookup_timeout_us: u64,
    /// Period of the weight exchange with peers in microseconds.
    pub weight_exchange_interval_us: u64,
    /// Received server messages processed per strand turn.
    pub received_messages_per_turn: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_object_message_bytes: OBJECT_MESSAGE_BYTES_MAX,

            // Send: 16KB of object traffic and 4KB of control per peer.
            max_send_queue_bytes: 16 * 1024,
            max_control_queue_bytes: 4 * 1024,
            max_received_messages: 4096,

            // Lookups: 1MB parked, give up after 5s.
            max_pending_lookup_bytes: 1024 * 1024,
            lookup_timeout_us: 5 * 1_000_000,

            // Cache: 100k objects, 30s TTL.
            max_location_cache_entries: 100_000,
            location_cache_ttl_us: 30 * 1_000_000,

            weight_exchange_interval_us: WEIGHT_EXCHANGE_INTERVAL_US_DEFAULT,
            received_messages_per_turn: RECEIVED_MESSAGES_PER_TURN_DEFAULT,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_object_message_bytes == 0 {
            return Err(crate::Error::not_positive("max_object_message_bytes"));
        }

        // A send queue that cannot hold one maximal message never admits it.
        if self.max_send_queue_bytes < self.max_object_message_bytes.min(1024) {
            return Err(crate::Error::InvalidSetting {
                setting: "max_send_queue_bytes",
                requirement: "must hold at least one small object message",
            });
        }

        if self.weight_exchange_interval_us == 0 {
            return Err(crate::Error::not_positive("weight_exchange_interval_us"));
        }

        if self.received_messages_per_turn == 0 {
            return Err(crate::Error::not_positive("received_messages_per_turn"));
        }

        if self.max_location_cache_entries == 0 {
            return Err(crate::Error::not_positive("max_location_cache_entries"));
        }

        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        let limits = Limits::new();
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_zero_exchange_interval_rejected() {
        let mut limits = Limits::new();
        limits.weight_exchange_interval_us = 0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_tiny_send_queue_rejected() {
        let mut limits = Limits::new();
        limits.max_send_queue_bytes = 16;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_default_exchange_period_is_ten_ms() {
        assert_eq!(Limits::new().weight_exchange_interval_us, 10_000);
    }
}
