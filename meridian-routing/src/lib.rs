//! Meridian Routing - Object message forwarding between space servers.
//!
//! This crate moves object messages to the server that owns their
//! destination object, and keeps inter-server links fairly shared.
//!
//! # Design
//!
//! - **Location caching**: Most messages skip the authoritative lookup
//! - **Cache correction**: A server that receives misrouted traffic tells
//!   the previous hop where the object really is
//! - **Weight exchange**: Peers trade link usage every 10ms so flow
//!   schedulers on both ends agree on fair shares
//! - **Explicit limits**: Every buffer is bounded, every drop is traced

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod codec;
mod config;
mod error;
mod forwarder;
mod link;
mod location;
mod location_cache;
mod lookup;
mod poller;
mod service_queue;
mod strand;
mod trace;

pub use codec::{
    decode_object_message, CacheUpdate, CodecError, WeightUpdate, CACHE_UPDATE_BYTES,
    WEIGHT_UPDATE_BYTES,
};
pub use config::{ForwarderConfig, MAINTENANCE_INTERVAL_US_DEFAULT};
pub use error::{RoutingError, RoutingResult};
pub use forwarder::{
    CacheForward, Forwarder, ForwarderParts, ForwarderStats, LocalDispatcher, RouteOutcome,
};
pub use link::{
    FairLinkSender, LinkReceiveScheduler, LinkReceiver, LinkReceiverConfig, LinkSendScheduler,
    LinkSenderConfig, LinkTransport, MessageSource, LINK_MESSAGES_PER_ROUND_DEFAULT,
    LINK_RATE_TIME_CONSTANT_US_DEFAULT,
};
pub use location::{LocationService, LookupReply, OracleLocationService};
pub use location_cache::{
    LocationCache, LocationCacheConfig, LOCATION_CACHE_ENTRIES_MAX, LOCATION_CACHE_TTL_US_DEFAULT,
};
pub use lookup::{
    LookupQueue, LookupQueueConfig, Parked, PendingMessage, LOOKUP_PENDING_BYTES_MAX_DEFAULT,
    LOOKUP_TIMEOUT_US_DEFAULT,
};
pub use poller::Poller;
pub use service_queue::{ForwarderServiceQueue, ServiceId};
pub use strand::{strand, ForwarderTask, StrandHandle, StrandReceiver};
pub use trace::{DropCause, MemoryTraceSink, NullTraceSink, ResolvedBy, TraceEvent, TraceSink};
