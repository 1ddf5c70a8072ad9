//! Domain types for service health and circuit breaker state.
//!
//! These types are the shared vocabulary between the probe layer, the
//! circuit breakers, and the aggregated state published to the UI.
//! All of them serialize to JSON for transport to host applications.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::service::Service;

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Health status ─────────────────────────────────────────────────

/// Health classification of a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Responded successfully within the expected latency.
    Healthy,
    /// Responded successfully but slower than expected.
    Degraded,
    /// Failed, timed out, or returned a server error.
    Unhealthy,
    /// A probe is currently in flight.
    Checking,
    /// Never probed, or no settled result available.
    Unknown,
}

impl HealthStatus {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Checking => "checking",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the most recent health check for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealthCheck {
    pub service: Service,
    pub status: HealthStatus,
    /// Observed response time, absent when the probe never completed.
    pub response_time_ms: Option<u64>,
    /// Unix timestamp (ms) when this result was recorded.
    pub last_checked_ms: u64,
    /// Human-readable detail for operators and the UI.
    pub message: String,
}

impl ServiceHealthCheck {
    /// Successful probe within the expected latency.
    pub fn healthy(service: Service, response_time_ms: u64) -> Self {
        Self {
            service,
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            last_checked_ms: epoch_ms(),
            message: format!("ok ({response_time_ms}ms)"),
        }
    }

    /// Successful probe, but slower than the degraded threshold.
    pub fn degraded(service: Service, response_time_ms: u64, threshold_ms: u64) -> Self {
        Self {
            service,
            status: HealthStatus::Degraded,
            response_time_ms: Some(response_time_ms),
            last_checked_ms: epoch_ms(),
            message: format!("slow response: {response_time_ms}ms exceeds {threshold_ms}ms"),
        }
    }

    /// Failed probe with a reason.
    pub fn unhealthy(service: Service, message: impl Into<String>) -> Self {
        Self {
            service,
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            last_checked_ms: epoch_ms(),
            message: message.into(),
        }
    }

    /// Probe in flight.
    pub fn checking(service: Service) -> Self {
        Self {
            service,
            status: HealthStatus::Checking,
            response_time_ms: None,
            last_checked_ms: epoch_ms(),
            message: "probe in flight".to_string(),
        }
    }

    /// No settled result for this service.
    pub fn unknown(service: Service, message: impl Into<String>) -> Self {
        Self {
            service,
            status: HealthStatus::Unknown,
            response_time_ms: None,
            last_checked_ms: epoch_ms(),
            message: message.into(),
        }
    }
}

// ── Circuit breaker ───────────────────────────────────────────────

/// Circuit breaker position for a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without touching the network.
    Open,
    /// One trial call is admitted to test recovery.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one service's circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub service: Service,
    pub state: BreakerState,
    /// Consecutive failures observed while closed or half-open.
    pub failure_count: u32,
    /// Unix timestamp (ms) of the most recent recorded failure.
    pub last_failure_ms: Option<u64>,
    /// Unix timestamp (ms) when an open breaker next admits a trial.
    /// Set exactly when `state` is [`BreakerState::Open`].
    pub next_attempt_ms: Option<u64>,
}

impl BreakerSnapshot {
    /// A breaker that has never seen a failure.
    pub fn closed(service: Service) -> Self {
        Self {
            service,
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_ms: None,
            next_attempt_ms: None,
        }
    }
}

// ── Aggregated snapshot ───────────────────────────────────────────

/// Aggregated resilience state published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceSnapshot {
    /// Host-reported device connectivity.
    pub is_online: bool,
    /// Latest health check per service that has one.
    pub services: BTreeMap<Service, ServiceHealthCheck>,
    /// Latest breaker view per service that has one.
    pub circuit_breakers: BTreeMap<Service, BreakerSnapshot>,
    /// Rollup of `services` per [`overall_health`].
    pub overall_health: HealthStatus,
}

impl ResilienceSnapshot {
    /// An empty snapshot: online, nothing checked yet.
    pub fn initial() -> Self {
        Self {
            is_online: true,
            services: BTreeMap::new(),
            circuit_breakers: BTreeMap::new(),
            overall_health: HealthStatus::Unknown,
        }
    }
}

/// Derive the overall health rollup from per-service checks.
///
/// Any unhealthy service dominates; otherwise any degraded service
/// does. The rollup is healthy only when every checked service is
/// healthy and at least one check exists. Everything else, including
/// the empty set and in-flight checks, is unknown.
pub fn overall_health<'a>(
    checks: impl IntoIterator<Item = &'a ServiceHealthCheck>,
) -> HealthStatus {
    let mut any_degraded = false;
    let mut any_healthy = false;
    let mut any_unsettled = false;

    for check in checks {
        match check.status {
            HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
            HealthStatus::Degraded => any_degraded = true,
            HealthStatus::Healthy => any_healthy = true,
            HealthStatus::Checking | HealthStatus::Unknown => any_unsettled = true,
        }
    }

    if any_degraded {
        HealthStatus::Degraded
    } else if any_healthy && !any_unsettled {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_state_display_is_screaming_snake() {
        assert_eq!(BreakerState::Closed.to_string(), "CLOSED");
        assert_eq!(BreakerState::Open.to_string(), "OPEN");
        assert_eq!(BreakerState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn breaker_state_serde_round_trip() {
        let json = serde_json::to_string(&BreakerState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
        let back: BreakerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BreakerState::HalfOpen);
    }

    #[test]
    fn healthy_check_records_latency() {
        let check = ServiceHealthCheck::healthy(Service::Glucoserver, 42);
        assert_eq!(check.status, HealthStatus::Healthy);
        assert_eq!(check.response_time_ms, Some(42));
        assert!(check.last_checked_ms > 0);
        assert!(check.message.contains("42ms"));
    }

    #[test]
    fn unhealthy_check_has_no_latency() {
        let check = ServiceHealthCheck::unhealthy(Service::Tidepool, "connection refused");
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert_eq!(check.response_time_ms, None);
        assert_eq!(check.message, "connection refused");
    }

    #[test]
    fn overall_empty_is_unknown() {
        let none: [ServiceHealthCheck; 0] = [];
        assert_eq!(overall_health(&none), HealthStatus::Unknown);
    }

    #[test]
    fn overall_unhealthy_dominates() {
        let checks = [
            ServiceHealthCheck::healthy(Service::Glucoserver, 10),
            ServiceHealthCheck::unhealthy(Service::Tidepool, "down"),
            ServiceHealthCheck::degraded(Service::Appointments, 900, 500),
        ];
        assert_eq!(overall_health(&checks), HealthStatus::Unhealthy);
    }

    #[test]
    fn overall_degraded_beats_healthy() {
        let checks = [
            ServiceHealthCheck::healthy(Service::Glucoserver, 10),
            ServiceHealthCheck::degraded(Service::Tidepool, 900, 500),
        ];
        assert_eq!(overall_health(&checks), HealthStatus::Degraded);
    }

    #[test]
    fn overall_all_healthy() {
        let checks = [
            ServiceHealthCheck::healthy(Service::Glucoserver, 10),
            ServiceHealthCheck::healthy(Service::Tidepool, 20),
        ];
        assert_eq!(overall_health(&checks), HealthStatus::Healthy);
    }

    #[test]
    fn overall_in_flight_check_blocks_healthy() {
        let checks = [
            ServiceHealthCheck::healthy(Service::Glucoserver, 10),
            ServiceHealthCheck::checking(Service::Tidepool),
        ];
        assert_eq!(overall_health(&checks), HealthStatus::Unknown);
    }

    #[test]
    fn overall_all_unknown_is_unknown() {
        let checks = [
            ServiceHealthCheck::unknown(Service::Glucoserver, "not checked yet"),
            ServiceHealthCheck::unknown(Service::Tidepool, "not checked yet"),
        ];
        assert_eq!(overall_health(&checks), HealthStatus::Unknown);
    }

    #[test]
    fn initial_snapshot_is_empty_and_unknown() {
        let snap = ResilienceSnapshot::initial();
        assert!(snap.is_online);
        assert!(snap.services.is_empty());
        assert!(snap.circuit_breakers.is_empty());
        assert_eq!(snap.overall_health, HealthStatus::Unknown);
    }
}
