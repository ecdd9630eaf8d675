//! The `ideam-harness` library crate provisions devices in bulk against an
//! IDEAM middleware and measures how long the middleware takes to register
//! and deregister them.
//!
//! A provisioning run is organized as follows:
//!
//! - A [`Coordinator`](coordinator::Coordinator) receives a set of
//!   [`Devices`](devices::Devices) and launches one
//!   [`Worker`](worker::Worker) task per device, bounded by a concurrency
//!   limit
//! - Each worker registers its device, deregisters it, and times both
//!   operations
//! - Timings are appended to a [`ResultSink`](sink::ResultSink), a pair of
//!   append-only files, one per operation
//! - Once every worker has terminated, the coordinator returns a
//!   [`ProvisionReport`](report::ProvisionReport) with the outcome of each
//!   device
//!
//! The crate also provides the follow/share/bind handshake
//! [`Scenario`](scenario::Scenario) and a
//! [`PublishDriver`](publish::PublishDriver) that pushes sample payloads
//! through the middleware.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Command line interface.
pub mod cli;
/// Provisioning run settings.
pub mod config;
/// The fan-out coordinator.
pub mod coordinator;
/// The set of devices to provision.
pub mod devices;
/// A driver publishing payloads on behalf of a device.
pub mod publish;
/// Aggregate outcome of a provisioning run.
pub mod report;
/// The follow/share/bind handshake between a device and an application.
pub mod scenario;
/// Append-only timing files.
pub mod sink;
/// The per-device unit of work.
pub mod worker;

#[cfg(test)]
mod tests;
