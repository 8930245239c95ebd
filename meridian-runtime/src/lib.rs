//! Meridian Runtime - Running a forwarder on tokio.
//!
//! This crate turns the forwarding core into something that runs: a TOML
//! node configuration, an async driver that owns a forwarder and serves as
//! its strand, and an in-process channel transport between servers.
//!
//! # Overview
//!
//! - `NodeConfig`: Forwarding settings for one space server
//! - `Driver`: Owns a `Forwarder`, runs its tasks, ticks and link service
//! - `DriverHandle`: Posts work to a running driver and stops it
//! - `ChannelTransport`: Bounded per-peer channels standing in for links
//!
//! # Example
//!
//! ```ignore
//! use meridian_runtime::{inbox, ChannelTransport, Driver, NodeConfig};
//!
//! let config = NodeConfig::from_file("node.toml")?;
//! let (inbox_tx, inbox_rx) = inbox(1024);
//! let transport = ChannelTransport::new(config.server());
//! let (driver, handle) = Driver::new(&config, services, transport, inbox_rx)?;
//! tokio::spawn(driver.run());
//! handle.route(msg);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod driver;
mod transport;

pub use config::{CacheSection, ConfigError, CsfqSection, LinkSection, LookupSection, NodeConfig};
pub use driver::{Driver, DriverError, DriverHandle, NodeServices};
pub use transport::{inbox, ChannelTransport, INBOX_CAPACITY_DEFAULT};
