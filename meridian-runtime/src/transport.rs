//! In-process link transport over tokio channels.
//!
//! Each peer is reached through a bounded channel into its inbox. A full
//! inbox refuses the message, which the link sender treats as a blocked
//! link and retries on its next round.

use std::collections::BTreeMap;

use meridian_core::{ServerId, ServerMessage};
use meridian_routing::LinkTransport;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Default inbox depth, in messages.
pub const INBOX_CAPACITY_DEFAULT: usize = 1024;

/// Creates an inbox: the sender is handed to peers, the receiver to the
/// server's driver.
#[must_use]
pub fn inbox(capacity: usize) -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(capacity.max(1))
}

/// Sends server messages into peers' inboxes.
#[derive(Debug)]
pub struct ChannelTransport {
    server: ServerId,
    peers: BTreeMap<ServerId, mpsc::Sender<ServerMessage>>,
}

impl ChannelTransport {
    /// Creates a transport for `server` with no peers.
    #[must_use]
    pub const fn new(server: ServerId) -> Self {
        Self {
            server,
            peers: BTreeMap::new(),
        }
    }

    /// Adds or replaces the route to `peer`.
    pub fn connect(&mut self, peer: ServerId, inbox: mpsc::Sender<ServerMessage>) {
        debug!(server = %self.server, %peer, "link connected");
        self.peers.insert(peer, inbox);
    }

    /// Removes the route to `peer`.
    pub fn disconnect(&mut self, peer: ServerId) {
        self.peers.remove(&peer);
    }

    /// Connected peers, in id order.
    pub fn peers(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.peers.keys().copied()
    }
}

impl LinkTransport for ChannelTransport {
    fn try_send(&mut self, msg: ServerMessage) -> Result<(), ServerMessage> {
        let dest = msg.dest_server;
        let Some(inbox) = self.peers.get(&dest) else {
            warn!(server = %self.server, %dest, msg = %msg.id, "no link to destination, dropping");
            return Ok(());
        };
        match inbox.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => Err(msg),
            Err(TrySendError::Closed(msg)) => {
                warn!(server = %self.server, %dest, msg = %msg.id, "peer inbox closed, dropping");
                self.peers.remove(&dest);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{MessageId, ServerPort};

    fn message(id: u64, dest: u64) -> ServerMessage {
        ServerMessage::new(
            MessageId::new(id),
            ServerId::new(1),
            ServerId::new(dest),
            ServerPort::CacheUpdate,
            vec![0u8; 4],
        )
    }

    #[test]
    fn test_full_inbox_refuses() {
        let (tx, mut rx) = inbox(1);
        let mut transport = ChannelTransport::new(ServerId::new(1));
        transport.connect(ServerId::new(2), tx);

        assert!(transport.try_send(message(1, 2)).is_ok());
        let refused = transport.try_send(message(2, 2)).unwrap_err();
        assert_eq!(refused.id, MessageId::new(2));

        assert_eq!(rx.try_recv().unwrap().id, MessageId::new(1));
        assert!(transport.try_send(refused).is_ok());
    }

    #[test]
    fn test_closed_inbox_disconnects() {
        let (tx, rx) = inbox(4);
        let mut transport = ChannelTransport::new(ServerId::new(1));
        transport.connect(ServerId::new(2), tx);
        drop(rx);

        assert!(transport.try_send(message(1, 2)).is_ok());
        assert_eq!(transport.peers().count(), 0);
    }

    #[test]
    fn test_unknown_peer_dropped() {
        let mut transport = ChannelTransport::new(ServerId::new(1));
        assert!(transport.try_send(message(1, 9)).is_ok());
    }
}
