//! The forwarder's task queue.
//!
//! All routing state is owned by one control flow. Other threads (network
//! receive, location service callbacks) never touch it directly; they post
//! a [`ForwarderTask`] through a [`StrandHandle`] and the owner runs it on
//! its next turn.

use meridian_core::{LocationEntry, ObjectId, ObjectMessage, ServerId, ServerMessage};
use tokio::sync::mpsc;

/// Work posted to the forwarder.
#[derive(Debug)]
pub enum ForwarderTask {
    /// Route a message sent by a locally hosted object.
    Route(ObjectMessage),
    /// An authoritative lookup finished. A null location means unknown.
    LookupResolved {
        /// The object that was looked up.
        object: ObjectId,
        /// Where it lives.
        location: LocationEntry,
    },
    /// A server message arrived from a peer.
    ServerMessageReceived(ServerMessage),
    /// A peer opened a connection to this server.
    ConnectionReceived(ServerId),
    /// Hand a message to local delivery.
    DeliverLocal(ObjectMessage),
    /// Continue draining the received-message buffer.
    ProcessReceived,
}

/// Cloneable sender side of the strand.
#[derive(Debug, Clone)]
pub struct StrandHandle {
    tx: mpsc::UnboundedSender<ForwarderTask>,
}

impl StrandHandle {
    /// Posts a task. Returns false if the forwarder has shut down.
    pub fn post(&self, task: ForwarderTask) -> bool {
        self.tx.send(task).is_ok()
    }

    /// True if the receiving side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of the strand, held by whoever drives the forwarder.
#[derive(Debug)]
pub struct StrandReceiver {
    rx: mpsc::UnboundedReceiver<ForwarderTask>,
}

impl StrandReceiver {
    /// Returns the next task without waiting.
    pub fn try_next(&mut self) -> Option<ForwarderTask> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next task. Returns `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<ForwarderTask> {
        self.rx.recv().await
    }
}

/// Creates a connected handle and receiver.
#[must_use]
pub fn strand() -> (StrandHandle, StrandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StrandHandle { tx }, StrandReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_arrive_in_order() {
        let (handle, mut rx) = strand();
        assert!(handle.post(ForwarderTask::ConnectionReceived(ServerId::new(1))));
        assert!(handle.post(ForwarderTask::ProcessReceived));

        assert!(matches!(
            rx.try_next(),
            Some(ForwarderTask::ConnectionReceived(s)) if s == ServerId::new(1)
        ));
        assert!(matches!(rx.try_next(), Some(ForwarderTask::ProcessReceived)));
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn test_post_after_close() {
        let (handle, rx) = strand();
        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.post(ForwarderTask::ProcessReceived));
    }
}
