//! Meridian Tests - deterministic multi-server simulation for Meridian.
//!
//! This crate holds the simulation harness and the cross-crate tests that
//! run forwarders, flow schedulers and links together.
//!
//! ## Test Organization
//!
//! **Simulation tests**: randomized traffic over several servers
//! - `simulation_tests`: exactly-once delivery across seeds, schedulers and
//!   link budgets
//! - `forwarder_tests`: lookups, cache correction and weight exchange
//!
//! **Scheduler tests**: single-component behaviour over long runs
//! - `fair_queue_tests`: weighted shares, idle queues, weight changes
//! - `csfq_tests`: drop distribution under congestion and recovery
//!
//! **Support Modules**:
//! - `simulation`: the stepped multi-server [`simulation::Simulation`]
//! - `properties`: delivery properties checked after a run
//! - `scenarios`: topologies, workloads and seeds
//!
//! ## Naming Conventions
//!
//! - Cross-crate tests: `test_<component>_<scenario>` or
//!   `test_<behaviour>`
//! - Unit tests: inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;
pub mod simulation;

// Single-component tests.
#[cfg(test)]
mod csfq_tests;
#[cfg(test)]
mod fair_queue_tests;

// Multi-server tests.
#[cfg(test)]
mod forwarder_tests;
