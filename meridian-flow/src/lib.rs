//! Flow scheduling for Meridian space servers.
//!
//! This crate decides which message crosses an inter-server link next and
//! which messages are not worth sending at all. It includes:
//!
//! - **Weighted fair queue**: virtual-time WFQ over keyed sub-queues, used
//!   per link (keyed by destination server) and per destination (keyed by
//!   service).
//! - **Flow schedulers**: per-destination admission and queueing, either a
//!   static region-weighted FIFO or core-stateless fair queueing (CSFQ).
//! - **Rate estimation and spatial weights** shared by both.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                FairQueue<ServerId, per-destination>            │
//! │                                                                │
//! │  ┌──────────────────────────────┐   ┌──────────────────────┐   │
//! │  │ FairQueue<service, ...>      │   │ FairQueue<service,..>│   │
//! │  │  ┌──────────────┐ ┌───────┐  │   │        ...           │   │
//! │  │  │FlowScheduler │ │control│  │   │                      │   │
//! │  │  │ (Region/CSFQ)│ │ FIFOs │  │   │                      │   │
//! │  │  └──────────────┘ └───────┘  │   │                      │   │
//! │  └──────────────────────────────┘   └──────────────────────┘   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # DST Compatibility
//!
//! All time-dependent operations accept `now_us` as a parameter rather than
//! reading a clock, and CSFQ draws from a seeded RNG, so simulations are
//! deterministic.
//!
//! # Example
//!
//! ```rust
//! use meridian_core::{ObjectId, MessageId, ObjectMessage};
//! use meridian_flow::{BoundedQueue, FairQueue};
//!
//! let mut fq = FairQueue::new();
//! fq.add_queue(1u32, BoundedQueue::new(4096), 1.0).unwrap();
//! fq.add_queue(2u32, BoundedQueue::new(4096), 2.0).unwrap();
//!
//! let msg = ObjectMessage::new(MessageId::new(1), ObjectId::new(1), 0, ObjectId::new(2), 0, vec![0u8; 16]);
//! fq.push(&2, msg).unwrap();
//!
//! let (key, _msg) = fq.pop().unwrap();
//! assert_eq!(key, 2);
//! ```

#![warn(missing_docs)]

pub mod csfq;
pub mod error;
pub mod fair_queue;
pub mod queue;
pub mod rate;
pub mod region;
pub mod scheduler;
pub mod weight;

// Re-export main types for convenience.
pub use csfq::{CsfqConfig, CsfqFlowScheduler, CsfqStats};
pub use error::{DropReason, FlowError, FlowResult};
pub use fair_queue::{FairQueue, VIRTUAL_TIME_SCALE};
pub use queue::{BoundedQueue, PushQueue, ServiceQueue};
pub use rate::RateEstimator;
pub use region::{RegionFlowScheduler, RegionSchedulerConfig};
pub use scheduler::{
    Admitted, AnyFlowScheduler, FlowScheduler, FlowSchedulerConfig, FlowSchedulerKind,
    SchedulerContext,
};
pub use weight::{server_bounds, NoObjectLocator, ObjectLocator, SpatialPartition, WeightCalculator};
