//! Circuit breaker state machine for external service calls.
//!
//! One breaker cell per service, each behind its own mutex so that
//! outcome recording for a service is serialized while different
//! services never contend.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN       (consecutive failures reach threshold)
//! OPEN → HALF_OPEN    (open timeout elapsed, first admission)
//! HALF_OPEN → CLOSED  (trial call succeeds)
//! HALF_OPEN → OPEN    (trial call fails)
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use vigil_core::{
    BreakerSnapshot, BreakerState, Service, ServiceRegistry, ServiceTable, epoch_ms,
};

/// Admission decision for a prospective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker is closed; call normally.
    Allowed,
    /// Breaker is half-open and this caller holds the single trial slot.
    Trial,
    /// Call rejected without network contact.
    Rejected {
        /// Time until the breaker next admits a trial. Zero when a
        /// trial is already in flight.
        retry_in: Duration,
    },
}

impl Admission {
    /// Whether the call may proceed.
    pub fn is_permitted(self) -> bool {
        matches!(self, Admission::Allowed | Admission::Trial)
    }
}

/// Mutable state for one service's breaker.
#[derive(Debug)]
struct BreakerCell {
    state: BreakerState,
    /// Consecutive failures; any success while closed resets it.
    failure_count: u32,
    last_failure: Option<Instant>,
    /// When an open breaker next admits a trial. Set exactly while open.
    next_attempt: Option<Instant>,
    /// A half-open trial call is outstanding.
    trial_in_flight: bool,
    threshold: u32,
    open_timeout: Duration,
}

impl BreakerCell {
    fn new(threshold: u32, open_timeout: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
            next_attempt: None,
            trial_in_flight: false,
            threshold,
            open_timeout,
        }
    }
}

/// Circuit breakers for every known service.
#[derive(Debug)]
pub struct CircuitBreaker {
    cells: ServiceTable<Mutex<BreakerCell>>,
}

impl CircuitBreaker {
    /// Build breakers from the registry's per-service thresholds.
    pub fn new(registry: &ServiceRegistry) -> Self {
        Self {
            cells: ServiceTable::from_fn(|service| {
                let config = registry.config(service);
                Mutex::new(BreakerCell::new(
                    config.circuit_breaker_threshold,
                    Duration::from_millis(config.circuit_breaker_timeout_ms),
                ))
            }),
        }
    }

    /// Decide whether a call to `service` may proceed right now.
    ///
    /// An open breaker whose timeout has elapsed transitions to
    /// half-open here, and the caller that observes the transition is
    /// handed the single trial slot. Every admitted call must be
    /// followed by exactly one [`record_outcome`](Self::record_outcome).
    pub fn try_acquire(&self, service: Service) -> Admission {
        let mut cell = self.lock(service);

        match cell.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open => {
                let now = Instant::now();
                let due = cell.next_attempt.is_none_or(|at| now >= at);
                if due {
                    let previous = cell.state;
                    cell.state = BreakerState::HalfOpen;
                    cell.next_attempt = None;
                    cell.trial_in_flight = true;
                    info!(
                        service = %service,
                        from = %previous,
                        to = %BreakerState::HalfOpen,
                        "circuit breaker admitting trial call"
                    );
                    Admission::Trial
                } else {
                    let retry_in = cell
                        .next_attempt
                        .map(|at| at.saturating_duration_since(now))
                        .unwrap_or(Duration::ZERO);
                    Admission::Rejected { retry_in }
                }
            }
            BreakerState::HalfOpen => {
                if cell.trial_in_flight {
                    Admission::Rejected {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    cell.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Record the outcome of an admitted call.
    pub fn record_outcome(&self, service: Service, success: bool) {
        let mut cell = self.lock(service);
        cell.trial_in_flight = false;

        match (cell.state, success) {
            (BreakerState::Closed, true) => {
                if cell.failure_count != 0 {
                    debug!(service = %service, "failure streak cleared");
                }
                cell.failure_count = 0;
            }
            (BreakerState::Closed, false) => {
                cell.failure_count += 1;
                cell.last_failure = Some(Instant::now());
                if cell.failure_count >= cell.threshold {
                    Self::trip_open(service, &mut cell);
                }
            }
            (BreakerState::HalfOpen, true) => {
                let previous = cell.state;
                cell.state = BreakerState::Closed;
                cell.failure_count = 0;
                cell.next_attempt = None;
                info!(
                    service = %service,
                    from = %previous,
                    to = %BreakerState::Closed,
                    "circuit breaker closed after successful trial"
                );
            }
            (BreakerState::HalfOpen, false) => {
                cell.failure_count += 1;
                cell.last_failure = Some(Instant::now());
                Self::trip_open(service, &mut cell);
            }
            (BreakerState::Open, _) => {
                // Admitted calls cannot land here; an in-flight call
                // from before the trip may.
                warn!(
                    service = %service,
                    success,
                    "outcome recorded while circuit open, ignoring"
                );
            }
        }
    }

    /// Force a breaker back to closed with a clean slate.
    pub fn reset(&self, service: Service) {
        let mut cell = self.lock(service);
        let previous = cell.state;
        cell.state = BreakerState::Closed;
        cell.failure_count = 0;
        cell.last_failure = None;
        cell.next_attempt = None;
        cell.trial_in_flight = false;
        if previous != BreakerState::Closed {
            info!(
                service = %service,
                from = %previous,
                to = %BreakerState::Closed,
                "circuit breaker reset"
            );
        }
    }

    /// Current state for one service.
    pub fn state(&self, service: Service) -> BreakerState {
        self.lock(service).state
    }

    /// Point-in-time view of one service's breaker.
    pub fn snapshot(&self, service: Service) -> BreakerSnapshot {
        let cell = self.lock(service);
        let now = Instant::now();
        let now_ms = epoch_ms();
        BreakerSnapshot {
            service,
            state: cell.state,
            failure_count: cell.failure_count,
            last_failure_ms: cell
                .last_failure
                .map(|at| now_ms.saturating_sub(at.elapsed().as_millis() as u64)),
            next_attempt_ms: cell
                .next_attempt
                .map(|at| now_ms + at.saturating_duration_since(now).as_millis() as u64),
        }
    }

    /// Snapshots for every service, in registry order.
    pub fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        Service::ALL.iter().map(|&s| self.snapshot(s)).collect()
    }

    fn trip_open(service: Service, cell: &mut BreakerCell) {
        let previous = cell.state;
        cell.state = BreakerState::Open;
        cell.next_attempt = Some(Instant::now() + cell.open_timeout);
        warn!(
            service = %service,
            from = %previous,
            to = %BreakerState::Open,
            failures = cell.failure_count,
            threshold = cell.threshold,
            "circuit breaker opened"
        );
    }

    fn lock(&self, service: Service) -> std::sync::MutexGuard<'_, BreakerCell> {
        self.cells
            .get(service)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{ServiceConfig, ServiceTable};

    /// Registry with tiny breaker timings so tests run fast.
    fn test_registry(threshold: u32, open_timeout_ms: u64) -> ServiceRegistry {
        ServiceRegistry::from_table(ServiceTable::from_fn(|service| ServiceConfig {
            name: service.as_str().to_string(),
            base_url: format!("https://{service}.test/status"),
            timeout_ms: 100,
            retry_attempts: 1,
            circuit_breaker_threshold: threshold,
            circuit_breaker_timeout_ms: open_timeout_ms,
            offline_support: false,
            degraded_threshold_ms: 50,
        }))
    }

    const SVC: Service = Service::Glucoserver;

    #[test]
    fn starts_closed_and_allows_calls() {
        let breaker = CircuitBreaker::new(&test_registry(3, 50));
        assert_eq!(breaker.state(SVC), BreakerState::Closed);
        assert_eq!(breaker.try_acquire(SVC), Admission::Allowed);
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new(&test_registry(3, 50));
        breaker.record_outcome(SVC, false);
        breaker.record_outcome(SVC, false);
        assert_eq!(breaker.state(SVC), BreakerState::Closed);
        assert!(breaker.try_acquire(SVC).is_permitted());
    }

    #[test]
    fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(&test_registry(3, 50));
        breaker.record_outcome(SVC, false);
        breaker.record_outcome(SVC, false);
        breaker.record_outcome(SVC, true);
        breaker.record_outcome(SVC, false);
        breaker.record_outcome(SVC, false);
        // Streak never reached three in a row.
        assert_eq!(breaker.state(SVC), BreakerState::Closed);
    }

    #[test]
    fn opens_at_threshold_with_future_next_attempt() {
        let breaker = CircuitBreaker::new(&test_registry(3, 60_000));
        for _ in 0..3 {
            breaker.record_outcome(SVC, false);
        }
        assert_eq!(breaker.state(SVC), BreakerState::Open);

        let snap = breaker.snapshot(SVC);
        assert_eq!(snap.failure_count, 3);
        assert!(snap.next_attempt_ms.unwrap() > epoch_ms());
        assert!(snap.last_failure_ms.is_some());

        match breaker.try_acquire(SVC) {
            Admission::Rejected { retry_in } => assert!(retry_in > Duration::ZERO),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn admits_single_trial_after_open_timeout() {
        let breaker = CircuitBreaker::new(&test_registry(2, 20));
        breaker.record_outcome(SVC, false);
        breaker.record_outcome(SVC, false);
        assert_eq!(breaker.state(SVC), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(breaker.try_acquire(SVC), Admission::Trial);
        assert_eq!(breaker.state(SVC), BreakerState::HalfOpen);
        // Second caller is rejected while the trial is outstanding.
        assert_eq!(
            breaker.try_acquire(SVC),
            Admission::Rejected {
                retry_in: Duration::ZERO
            }
        );
    }

    #[tokio::test]
    async fn trial_success_closes_breaker() {
        let breaker = CircuitBreaker::new(&test_registry(2, 10));
        breaker.record_outcome(SVC, false);
        breaker.record_outcome(SVC, false);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(breaker.try_acquire(SVC), Admission::Trial);

        breaker.record_outcome(SVC, true);
        assert_eq!(breaker.state(SVC), BreakerState::Closed);
        let snap = breaker.snapshot(SVC);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.next_attempt_ms, None);
        assert_eq!(breaker.try_acquire(SVC), Admission::Allowed);
    }

    #[tokio::test]
    async fn trial_failure_reopens_breaker() {
        let breaker = CircuitBreaker::new(&test_registry(2, 10));
        breaker.record_outcome(SVC, false);
        breaker.record_outcome(SVC, false);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(breaker.try_acquire(SVC), Admission::Trial);

        breaker.record_outcome(SVC, false);
        assert_eq!(breaker.state(SVC), BreakerState::Open);
        let snap = breaker.snapshot(SVC);
        assert_eq!(snap.failure_count, 3);
        assert!(snap.next_attempt_ms.is_some());
    }

    #[tokio::test]
    async fn trial_slot_frees_after_outcome() {
        let breaker = CircuitBreaker::new(&test_registry(1, 10));
        breaker.record_outcome(SVC, false);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(breaker.try_acquire(SVC), Admission::Trial);
        breaker.record_outcome(SVC, false);

        // Reopened; once the new timeout elapses a fresh trial is handed out.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(breaker.try_acquire(SVC), Admission::Trial);
    }

    #[test]
    fn reset_forces_closed_from_open() {
        let breaker = CircuitBreaker::new(&test_registry(1, 60_000));
        breaker.record_outcome(SVC, false);
        assert_eq!(breaker.state(SVC), BreakerState::Open);

        breaker.reset(SVC);
        let snap = breaker.snapshot(SVC);
        assert_eq!(snap.state, BreakerState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.last_failure_ms, None);
        assert_eq!(snap.next_attempt_ms, None);
        assert_eq!(breaker.try_acquire(SVC), Admission::Allowed);
    }

    #[test]
    fn outcome_while_open_is_ignored() {
        let breaker = CircuitBreaker::new(&test_registry(1, 60_000));
        breaker.record_outcome(SVC, false);
        assert_eq!(breaker.state(SVC), BreakerState::Open);

        // A call that was in flight when the breaker tripped.
        breaker.record_outcome(SVC, true);
        assert_eq!(breaker.state(SVC), BreakerState::Open);
        assert_eq!(breaker.snapshot(SVC).failure_count, 1);
    }

    #[test]
    fn services_are_independent() {
        let breaker = CircuitBreaker::new(&test_registry(1, 60_000));
        breaker.record_outcome(Service::Tidepool, false);

        assert_eq!(breaker.state(Service::Tidepool), BreakerState::Open);
        for service in Service::ALL {
            if service != Service::Tidepool {
                assert_eq!(breaker.state(service), BreakerState::Closed);
            }
        }
    }

    #[test]
    fn next_attempt_set_exactly_while_open() {
        let breaker = CircuitBreaker::new(&test_registry(2, 60_000));
        assert_eq!(breaker.snapshot(SVC).next_attempt_ms, None);

        breaker.record_outcome(SVC, false);
        assert_eq!(breaker.snapshot(SVC).next_attempt_ms, None);

        breaker.record_outcome(SVC, false);
        assert!(breaker.snapshot(SVC).next_attempt_ms.is_some());
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        use std::sync::Arc;

        let breaker = Arc::new(CircuitBreaker::new(&test_registry(10_000, 50)));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let breaker = Arc::clone(&breaker);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    breaker.record_outcome(SVC, false);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(breaker.snapshot(SVC).failure_count, 200);
    }

    #[test]
    fn snapshot_all_covers_every_service() {
        let breaker = CircuitBreaker::new(&test_registry(3, 50));
        let snaps = breaker.snapshot_all();
        assert_eq!(snaps.len(), Service::COUNT);
        let order: Vec<Service> = snaps.iter().map(|s| s.service).collect();
        assert_eq!(order, Service::ALL.to_vec());
    }
}
