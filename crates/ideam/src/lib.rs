//! The data exchanged among IDEAM middleware entities and their clients.
//!
//! This crate provides APIs to:
//!
//! - Validate entity identifiers and API keys before they are embedded into
//!   `REST` paths and headers.
//! - Describe the permissions an entity may request on another entity and
//!   the streams through which data flows.
//! - Encode the `JSON` bodies sent to the middleware and decode the ones it
//!   sends back.
//!
//! Both a client and a middleware implementation rely on these structures:
//! a client serializes requests and deserializes responses, while a
//! middleware does the opposite.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Entity identifiers and API keys.
pub mod entity;
/// Access permissions and entity streams.
pub mod permission;
/// Request bodies sent to the middleware.
pub mod request;
/// Response bodies returned by the middleware.
pub mod response;

#[cfg(test)]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
