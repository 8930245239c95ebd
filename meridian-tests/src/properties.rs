//! Delivery properties checked against a finished simulation.
//!
//! Once traffic has drained, every object message that was sent must have
//! exactly one fate: delivered once, to the server hosting its destination,
//! or dropped once with a traced cause.

use std::collections::BTreeMap;

use meridian_core::{MessageId, ObjectId, ServerId};
use meridian_routing::{DropCause, TraceEvent};

use crate::simulation::Simulation;

/// A violated delivery property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    /// Neither delivered nor dropped.
    Lost {
        /// The message.
        msg: MessageId,
    },
    /// Delivered or dropped more than once.
    Duplicated {
        /// The message.
        msg: MessageId,
        /// Deliveries.
        deliveries: usize,
        /// Drops.
        drops: usize,
    },
    /// Delivered somewhere the destination object is not connected.
    Misdelivered {
        /// The message.
        msg: MessageId,
        /// Where it was delivered.
        server: ServerId,
        /// Its destination object.
        object: ObjectId,
    },
}

impl std::fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lost { msg } => write!(f, "message {msg} was neither delivered nor dropped"),
            Self::Duplicated {
                msg,
                deliveries,
                drops,
            } => write!(
                f,
                "message {msg} has {deliveries} deliveries and {drops} drops"
            ),
            Self::Misdelivered {
                msg,
                server,
                object,
            } => write!(f, "message {msg} for {object} delivered on {server}"),
        }
    }
}

#[derive(Debug, Default)]
struct Fate {
    deliveries: usize,
    drops: usize,
}

/// Checks that each of `sent` was delivered or dropped exactly once.
///
/// Assumes objects did not move after the messages were sent.
#[must_use]
pub fn check_exactly_once(sim: &Simulation, sent: &[MessageId]) -> Vec<PropertyViolation> {
    let mut fates: BTreeMap<MessageId, Fate> =
        sent.iter().map(|id| (*id, Fate::default())).collect();
    let mut violations = Vec::new();

    for (server, msg) in sim.deliveries() {
        if let Some(fate) = fates.get_mut(&msg.id) {
            fate.deliveries += 1;
        }
        if !msg.is_space_bound() && !sim.server(server).host().hosts(msg.dest_object) {
            violations.push(PropertyViolation::Misdelivered {
                msg: msg.id,
                server,
                object: msg.dest_object,
            });
        }
    }
    for (_, event) in sim.drops() {
        if let TraceEvent::Dropped { msg, .. } = event {
            if let Some(fate) = fates.get_mut(&msg) {
                fate.drops += 1;
            }
        }
    }

    for (msg, fate) in fates {
        match fate.deliveries + fate.drops {
            1 => {}
            0 => violations.push(PropertyViolation::Lost { msg }),
            _ => violations.push(PropertyViolation::Duplicated {
                msg,
                deliveries: fate.deliveries,
                drops: fate.drops,
            }),
        }
    }
    violations
}

/// Drops across all servers, by cause.
#[must_use]
pub fn drops_by_cause(sim: &Simulation) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for (_, event) in sim.drops() {
        if let TraceEvent::Dropped { cause, .. } = event {
            *counts.entry(cause.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Drops with `cause` across all servers.
#[must_use]
pub fn drop_count(sim: &Simulation, cause: DropCause) -> usize {
    sim.server_ids()
        .into_iter()
        .map(|id| sim.server(id).trace().drops(cause))
        .sum()
}
