//! vigil-monitor — health probing for upstream services.
//!
//! The [`HealthMonitor`] runs on-demand and periodic checks against
//! every known service, classifies responses into health statuses,
//! feeds outcomes to the circuit breakers, and publishes results
//! through the state hub. Probing is abstracted behind
//! [`ProbeTransport`] with an HTTPS implementation for production.

pub mod monitor;
pub mod transport;

pub use monitor::HealthMonitor;
pub use transport::{HttpProbe, ProbeResponse, ProbeTransport};
