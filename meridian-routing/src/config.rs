//! Forwarder configuration.

use meridian_core::Limits;
use meridian_flow::{FlowSchedulerConfig, FlowSchedulerKind};

use crate::link::{LinkReceiverConfig, LinkSenderConfig};
use crate::location_cache::LocationCacheConfig;
use crate::lookup::LookupQueueConfig;

/// Default period of flow eviction and lookup expiry (1 second).
pub const MAINTENANCE_INTERVAL_US_DEFAULT: u64 = 1_000_000;

/// Everything a forwarder needs to know at construction.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Queue sizes, timeouts and periods.
    pub limits: Limits,
    /// Which flow scheduler to build per destination, and its settings.
    pub scheduler: FlowSchedulerConfig,
    /// Location cache settings.
    pub cache: LocationCacheConfig,
    /// Pending lookup settings.
    pub lookup: LookupQueueConfig,
    /// Outbound link settings, for callers that use [`FairLinkSender`].
    ///
    /// [`FairLinkSender`]: crate::FairLinkSender
    pub link_sender: LinkSenderConfig,
    /// Inbound link settings, for callers that use [`LinkReceiver`].
    ///
    /// [`LinkReceiver`]: crate::LinkReceiver
    pub link_receiver: LinkReceiverConfig,
    /// Period of idle flow eviction, lookup expiry and cache expiry.
    pub maintenance_interval_us: u64,
}

impl ForwarderConfig {
    /// Derives cache and lookup settings from `limits`.
    #[must_use]
    pub fn from_limits(limits: Limits, scheduler: FlowSchedulerConfig) -> Self {
        Self {
            cache: LocationCacheConfig {
                max_entries: limits.max_location_cache_entries as usize,
                ttl_us: limits.location_cache_ttl_us,
            },
            lookup: LookupQueueConfig {
                max_pending_bytes: limits.max_pending_lookup_bytes,
                timeout_us: limits.lookup_timeout_us,
            },
            limits,
            scheduler,
            link_sender: LinkSenderConfig::default(),
            link_receiver: LinkReceiverConfig::default(),
            maintenance_interval_us: MAINTENANCE_INTERVAL_US_DEFAULT,
        }
    }

    /// Creates a configuration for testing: deterministic schedulers, short
    /// timeouts.
    #[must_use]
    pub fn for_testing() -> Self {
        let mut config = Self::from_limits(Limits::new(), FlowSchedulerConfig::for_testing());
        config.cache = LocationCacheConfig::for_testing();
        config.lookup = LookupQueueConfig::for_testing();
        config.link_sender = LinkSenderConfig::for_testing();
        config.link_receiver = LinkReceiverConfig::for_testing();
        config.maintenance_interval_us = 100_000;
        config
    }

    /// Sets the flow scheduler configuration.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: FlowSchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Sets the flow scheduler kind.
    #[must_use]
    pub fn with_scheduler_kind(mut self, kind: FlowSchedulerKind) -> Self {
        self.scheduler.kind = kind;
        self
    }

    /// Sets the per-destination object buffer size.
    #[must_use]
    pub const fn with_send_queue_bytes(mut self, bytes: u32) -> Self {
        self.limits.max_send_queue_bytes = bytes;
        self
    }

    /// Sets the lookup queue configuration.
    #[must_use]
    pub const fn with_lookup(mut self, lookup: LookupQueueConfig) -> Self {
        self.lookup = lookup;
        self
    }

    /// Sets the location cache configuration.
    #[must_use]
    pub const fn with_cache(mut self, cache: LocationCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the limits are inconsistent, or a period or rate
    /// averaging constant is zero.
    pub fn validate(&self) -> meridian_core::Result<()> {
        self.limits.validate()?;
        if self.maintenance_interval_us == 0 {
            return Err(meridian_core::Error::not_positive("maintenance_interval_us"));
        }
        if self.link_sender.messages_per_round == 0 {
            return Err(meridian_core::Error::not_positive("link_sender.messages_per_round"));
        }
        let time_constants = [
            ("scheduler.csfq.flow_time_constant_us", self.scheduler.csfq.flow_time_constant_us),
            ("scheduler.csfq.link_time_constant_us", self.scheduler.csfq.link_time_constant_us),
            ("link_sender.rate_time_constant_us", self.link_sender.rate_time_constant_us),
            ("link_receiver.rate_time_constant_us", self.link_receiver.rate_time_constant_us),
        ];
        if let Some((setting, _)) = time_constants.into_iter().find(|(_, us)| *us == 0) {
            return Err(meridian_core::Error::not_positive(setting));
        }
        Ok(())
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self::from_limits(Limits::new(), FlowSchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_limits() {
        let config = ForwarderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.ttl_us, config.limits.location_cache_ttl_us);
        assert_eq!(config.lookup.timeout_us, config.limits.lookup_timeout_us);
        assert_eq!(config.scheduler.kind, FlowSchedulerKind::Region);
    }

    #[test]
    fn test_builders() {
        let config = ForwarderConfig::for_testing()
            .with_scheduler_kind(FlowSchedulerKind::Csfq)
            .with_send_queue_bytes(4096);
        assert_eq!(config.scheduler.kind, FlowSchedulerKind::Csfq);
        assert_eq!(config.limits.max_send_queue_bytes, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_maintenance_interval_rejected() {
        let mut config = ForwarderConfig::for_testing();
        config.maintenance_interval_us = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_rate_time_constants_rejected() {
        let mut config = ForwarderConfig::for_testing();
        config.scheduler.csfq.link_time_constant_us = 0;
        assert_eq!(
            config.validate(),
            Err(meridian_core::Error::not_positive("scheduler.csfq.link_time_constant_us"))
        );

        let mut config = ForwarderConfig::for_testing();
        config.scheduler.csfq.flow_time_constant_us = 0;
        assert!(config.validate().is_err());

        let mut config = ForwarderConfig::for_testing();
        config.link_sender.rate_time_constant_us = 0;
        assert!(config.validate().is_err());

        let mut config = ForwarderConfig::for_testing();
        config.link_receiver.rate_time_constant_us = 0;
        assert!(config.validate().is_err());
    }
}
