//! Async driver for a forwarder.
//!
//! The driver owns a [`Forwarder`] and is its strand: every task, inbound
//! server message and tick runs on the driver's loop, one at a time.
//!
//! # Loop
//!
//! - Posted tasks (routes, lookup answers) run in order
//! - Inbound server messages go to `server_message_received`
//! - A periodic tick drives weight exchange and maintenance
//! - After each event the link sender moves what it can to the transport

use std::sync::Arc;

use meridian_core::{ObjectMessage, ServerId, ServerMessage};
use meridian_flow::{ObjectLocator, SpatialPartition};
use meridian_routing::{
    FairLinkSender, Forwarder, ForwarderParts, ForwarderTask, LinkReceiver, LocalDispatcher,
    LocationService, RoutingError, StrandHandle, StrandReceiver, TraceSink,
};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::info;

use crate::config::{ConfigError, NodeConfig};
use crate::transport::ChannelTransport;

/// Driver errors.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The node configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The forwarder could not be built.
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Services a node is built from, other than its links.
pub struct NodeServices {
    /// Authoritative object locations.
    pub location: Box<dyn LocationService>,
    /// Delivery to local objects.
    pub dispatcher: Box<dyn LocalDispatcher>,
    /// Region ownership.
    pub partition: Arc<dyn SpatialPartition>,
    /// Exact object bounds, where known.
    pub locator: Arc<dyn ObjectLocator>,
    /// Trace events.
    pub trace: Arc<dyn TraceSink>,
}

/// Handle for talking to a running driver.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    server: ServerId,
    strand: StrandHandle,
    shutdown: mpsc::UnboundedSender<()>,
}

impl DriverHandle {
    /// The driven server.
    #[must_use]
    pub const fn server_id(&self) -> ServerId {
        self.server
    }

    /// Routes a message from a local object. Returns false if the driver
    /// has stopped.
    pub fn route(&self, msg: ObjectMessage) -> bool {
        self.strand.post(ForwarderTask::Route(msg))
    }

    /// Tells the forwarder a peer connected.
    pub fn peer_connected(&self, peer: ServerId) -> bool {
        self.strand.post(ForwarderTask::ConnectionReceived(peer))
    }

    /// Asks the driver to stop after the current event.
    pub fn stop(&self) -> bool {
        self.shutdown.send(()).is_ok()
    }
}

/// Runs one forwarder on tokio.
pub struct Driver {
    forwarder: Forwarder,
    tasks: StrandReceiver,
    inbox: mpsc::Receiver<ServerMessage>,
    shutdown: mpsc::UnboundedReceiver<()>,
    transport: ChannelTransport,
    tick_interval: Duration,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("forwarder", &self.forwarder)
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Builds a forwarder from `config` and wraps it in a driver.
    ///
    /// Peers already connected on `transport` are announced to the
    /// forwarder so weight exchange starts with them.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: &NodeConfig,
        services: NodeServices,
        transport: ChannelTransport,
        inbox: mpsc::Receiver<ServerMessage>,
    ) -> Result<(Self, DriverHandle), DriverError> {
        let fwd_config = config.forwarder_config()?;
        let server = config.server();
        let (strand, tasks) = meridian_routing::strand();
        let parts = ForwarderParts {
            location: services.location,
            dispatcher: services.dispatcher,
            link_sender: Box::new(FairLinkSender::new(fwd_config.link_sender)),
            link_receiver: Box::new(LinkReceiver::new(fwd_config.link_receiver)),
            partition: services.partition,
            locator: services.locator,
            trace: services.trace,
        };
        let forwarder = Forwarder::new(fwd_config, server, parts, strand.clone())?;
        for peer in transport.peers() {
            strand.post(ForwarderTask::ConnectionReceived(peer));
        }

        let (shutdown_tx, shutdown) = mpsc::unbounded_channel();
        let handle = DriverHandle {
            server,
            strand,
            shutdown: shutdown_tx,
        };
        let driver = Self {
            forwarder,
            tasks,
            inbox,
            shutdown,
            transport,
            tick_interval: config.tick_interval(),
        };
        Ok((driver, handle))
    }

    /// Runs until stopped, then returns the forwarder for inspection.
    pub async fn run(self) -> Forwarder {
        let Self {
            mut forwarder,
            mut tasks,
            mut inbox,
            mut shutdown,
            mut transport,
            tick_interval,
        } = self;
        let epoch = Instant::now();
        let now_us = || u64::try_from(epoch.elapsed().as_micros()).unwrap_or(u64::MAX);

        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        forwarder.start(now_us());

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(server = %forwarder.server_id(), "driver shutting down");
                    break;
                }

                Some(task) = tasks.recv() => {
                    forwarder.handle_task(task, now_us());
                }

                Some(msg) = inbox.recv() => {
                    let _ = forwarder.server_message_received(msg, now_us());
                }

                _ = ticker.tick() => {
                    forwarder.tick(now_us());
                }
            }

            forwarder.service_link(&mut transport, now_us());
        }

        forwarder.stop();
        forwarder
    }
}
