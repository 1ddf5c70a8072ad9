//! vigil-core — shared domain types for the Vigil resilience layer.
//!
//! Defines the closed set of upstream [`Service`]s, the per-service
//! [`ServiceTable`] arena, health and circuit breaker vocabulary, and
//! the [`ServiceRegistry`] configuration layer.
//!
//! # Architecture
//!
//! The service set is a compile-time enum, so every per-service
//! structure in the layer is a fixed array rather than a map. Snapshot
//! types serialize to JSON for host applications; configuration loads
//! from TOML with built-in defaults.

pub mod error;
pub mod registry;
pub mod service;
pub mod types;

pub use error::{ProbeError, UnknownService};
pub use registry::{ServiceConfig, ServiceRegistry};
pub use service::{Service, ServiceTable};
pub use types::*;
