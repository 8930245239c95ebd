//! Meridian Core - Identifiers, messages and limits for Meridian space servers.
//!
//! A Meridian deployment partitions a simulated world across many space
//! servers. This crate holds the vocabulary every other crate shares:
//! typed ids, the object and server message envelopes, location entries,
//! the small amount of geometry used for spatial weights, and forwarding
//! limits.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up `ServerId` with `ObjectId`
//! - **Explicit limits**: Every queue has a bounded maximum
//! - **Explicit types**: Use u32/u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod geometry;
mod limits;
mod location;
mod message;
mod types;

pub use error::{Error, Result};
pub use geometry::{BoundingBox3, Vector3};
pub use limits::{
    Limits, OBJECT_MESSAGE_BYTES_MAX, RECEIVED_MESSAGES_PER_TURN_DEFAULT,
    WEIGHT_EXCHANGE_INTERVAL_US_DEFAULT,
};
pub use location::{LocationEntry, DEFAULT_OBJECT_RADIUS};
pub use message::{ObjectMessage, ServerMessage, ServerPort, Transmittable};
pub use types::{MessageId, ObjectId, ServerId};
