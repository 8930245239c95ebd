//! Node configuration.
//!
//! A space server's forwarding settings, loadable from TOML:
//!
//! ```toml
//! server_id = 3
//! flow_scheduler = "csfq"
//! send_queue_bytes = 16384
//!
//! [location_cache]
//! ttl_ms = 30000
//!
//! [csfq]
//! seed = 42
//! ```

use std::path::Path;
use std::time::Duration;

use meridian_core::{Limits, ServerId};
use meridian_flow::{FlowSchedulerConfig, FlowSchedulerKind};
use meridian_routing::{ForwarderConfig, LinkReceiverConfig, LinkSenderConfig};
use serde::{Deserialize, Serialize};

/// Location cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Maximum cached objects.
    pub max_entries: u32,
    /// Entry lifetime in milliseconds.
    pub ttl_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            ttl_ms: 30_000,
        }
    }
}

/// Authoritative lookup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupSection {
    /// Bytes of traffic allowed to wait on lookups.
    pub max_pending_bytes: u32,
    /// Milliseconds before a lookup is abandoned. 0 waits forever.
    pub timeout_ms: u64,
}

impl Default for LookupSection {
    fn default() -> Self {
        Self {
            max_pending_bytes: 1024 * 1024,
            timeout_ms: 5_000,
        }
    }
}

/// CSFQ settings. Only used when `flow_scheduler = "csfq"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsfqSection {
    /// Seed for drop decisions.
    pub seed: u64,
    /// Milliseconds of silence before a flow is forgotten.
    pub flow_idle_timeout_ms: u64,
}

impl Default for CsfqSection {
    fn default() -> Self {
        Self {
            seed: 7,
            flow_idle_timeout_ms: 30_000,
        }
    }
}

/// Link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    /// Nominal send capacity in bytes per second. Estimated if absent.
    pub send_capacity_bytes_per_sec: Option<f64>,
    /// Nominal receive capacity in bytes per second. Estimated if absent.
    pub receive_capacity_bytes_per_sec: Option<f64>,
    /// Messages sent per service round.
    pub messages_per_round: u32,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            send_capacity_bytes_per_sec: None,
            receive_capacity_bytes_per_sec: None,
            messages_per_round: 100,
        }
    }
}

/// A space server's forwarding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This server.
    pub server_id: u64,
    /// `region` or `csfq`.
    pub flow_scheduler: String,
    /// Object traffic buffered per destination, in bytes.
    pub send_queue_bytes: u32,
    /// Control traffic buffered per destination and service, in bytes.
    pub control_queue_bytes: u32,
    /// Received server messages buffered before processing.
    pub receive_queue_messages: u32,
    /// Period of the weight exchange, in milliseconds.
    pub weight_exchange_interval_ms: u64,
    /// Period of the driver tick, in milliseconds.
    pub tick_interval_ms: u64,
    /// Location cache.
    pub location_cache: CacheSection,
    /// Authoritative lookups.
    pub lookup: LookupSection,
    /// CSFQ.
    pub csfq: CsfqSection,
    /// Links.
    pub link: LinkSection,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let limits = Limits::new();
        Self {
            server_id: 1,
            flow_scheduler: "region".to_string(),
            send_queue_bytes: limits.max_send_queue_bytes,
            control_queue_bytes: limits.max_control_queue_bytes,
            receive_queue_messages: limits.max_received_messages,
            weight_exchange_interval_ms: limits.weight_exchange_interval_us / 1000,
            tick_interval_ms: 10,
            location_cache: CacheSection::default(),
            lookup: LookupSection::default(),
            csfq: CsfqSection::default(),
            link: LinkSection::default(),
        }
    }
}

impl NodeConfig {
    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the TOML cannot be parsed.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Serializes the configuration to TOML.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// This server's id.
    #[must_use]
    pub const fn server(&self) -> ServerId {
        ServerId::new(self.server_id)
    }

    /// Period of the driver tick.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Builds and validates the forwarder configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` for an unknown scheduler, a null
    /// server id, a zero tick, or limits the forwarder rejects.
    pub fn forwarder_config(&self) -> Result<ForwarderConfig, ConfigError> {
        if self.server_id == 0 {
            return Err(invalid("server_id must be non-zero"));
        }
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms must be positive"));
        }
        let kind: FlowSchedulerKind = self.flow_scheduler.parse().map_err(invalid)?;

        let mut limits = Limits::new();
        limits.max_send_queue_bytes = self.send_queue_bytes;
        limits.max_control_queue_bytes = self.control_queue_bytes;
        limits.max_received_messages = self.receive_queue_messages;
        limits.max_location_cache_entries = self.location_cache.max_entries;
        limits.location_cache_ttl_us = self.location_cache.ttl_ms.saturating_mul(1000);
        limits.max_pending_lookup_bytes = self.lookup.max_pending_bytes;
        limits.lookup_timeout_us = self.lookup.timeout_ms.saturating_mul(1000);
        limits.weight_exchange_interval_us = self.weight_exchange_interval_ms.saturating_mul(1000);

        let mut scheduler = FlowSchedulerConfig::default().with_kind(kind);
        scheduler.csfq = scheduler
            .csfq
            .with_seed(self.csfq.seed)
            .with_flow_idle_timeout_us(self.csfq.flow_idle_timeout_ms.saturating_mul(1000));

        let mut config = ForwarderConfig::from_limits(limits, scheduler);
        let mut sender =
            LinkSenderConfig::default().with_messages_per_round(self.link.messages_per_round);
        if let Some(capacity) = self.link.send_capacity_bytes_per_sec {
            sender = sender.with_capacity(capacity);
        }
        let mut receiver = LinkReceiverConfig::default();
        if let Some(capacity) = self.link.receive_capacity_bytes_per_sec {
            receiver = receiver.with_capacity(capacity);
        }
        config.link_sender = sender;
        config.link_receiver = receiver;

        config.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(config)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config from {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The TOML could not be parsed.
    #[error("failed to parse config: {message}")]
    Parse {
        /// Error message.
        message: String,
    },
    /// The values are inconsistent.
    #[error("invalid config: {message}")]
    Invalid {
        /// Error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default().forwarder_config().unwrap();
        assert_eq!(config.scheduler.kind, FlowSchedulerKind::Region);
        assert_eq!(config.limits.max_send_queue_bytes, 16384);
        assert_eq!(config.limits.weight_exchange_interval_us, 10_000);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = NodeConfig::from_toml(
            r#"
            server_id = 3
            flow_scheduler = "csfq"

            [csfq]
            seed = 42

            [link]
            send_capacity_bytes_per_sec = 125000.0
            "#,
        )
        .unwrap();
        assert_eq!(config.server(), ServerId::new(3));
        assert_eq!(config.lookup, LookupSection::default());

        let fwd = config.forwarder_config().unwrap();
        assert_eq!(fwd.scheduler.kind, FlowSchedulerKind::Csfq);
        assert_eq!(fwd.scheduler.csfq.seed, 42);
        assert_eq!(fwd.link_sender.capacity_bytes_per_sec, Some(125_000.0));
        assert_eq!(fwd.link_receiver.capacity_bytes_per_sec, None);
    }

    #[test]
    fn test_unknown_scheduler_rejected() {
        let config = NodeConfig {
            flow_scheduler: "fifo".to_string(),
            ..NodeConfig::default()
        };
        assert!(matches!(
            config.forwarder_config(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        assert!(matches!(
            NodeConfig::from_toml("server_id = \"three\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = NodeConfig {
            server_id: 9,
            ..NodeConfig::default()
        };
        let parsed = NodeConfig::from_toml(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            NodeConfig::from_file("/nonexistent/meridian.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
