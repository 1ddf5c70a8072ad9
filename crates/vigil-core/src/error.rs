//! Error types shared across the resilience layer.

use thiserror::Error;

/// A service name that is not in the known set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown service: {0}")]
pub struct UnknownService(pub String);

/// Ways a single health probe can fail.
///
/// Probe failures are expected operating conditions, not bugs. They
/// feed the circuit breaker and surface in health check messages
/// rather than aborting anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The probe exceeded the service's configured timeout.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Connection, DNS, or transport failure before any HTTP response.
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The service answered with a non-success HTTP status.
    #[error("server error: HTTP {0}")]
    ServerError(u16),

    /// The circuit breaker rejected the call without touching the network.
    #[error("circuit open; call rejected without network contact")]
    CircuitOpen,
}
