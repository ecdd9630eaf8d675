//! The `ideam-client` library crate provides an asynchronous client for the
//! `REST` API of the IDEAM middleware.
//!
//! Each remote operation exposed by the middleware maps onto exactly one
//! method of [`client::Client`]:
//!
//! - Registering and deregistering an entity
//! - Publishing data to a stream of an entity
//! - Requesting to follow another entity and approving such requests
//! - Binding a queue to the stream of another entity
//! - Fetching the data delivered to an entity
//!
//! Every method translates the `HTTP` status code and body returned by the
//! middleware into a [`Result`](error::Result). Expected failures, such as
//! a refused registration or an unreachable middleware, are logged and
//! returned as an [`Error`](error::Error), never as a panic.
//!
//! The client relies on `tokio` through `reqwest`, hence a single instance
//! can be shared by many concurrent tasks.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The middleware client.
pub mod client;
/// Middleware connection settings.
pub mod config;
/// Error management.
pub mod error;
/// Response bodies returned to the caller.
pub mod response;
