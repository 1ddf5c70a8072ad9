//! Health monitor: probes services, classifies results, and feeds the
//! circuit breakers and the state hub.
//!
//! Checks for the same service are serialized on a per-service async
//! mutex, so a second caller waits for the in-flight probe and then
//! re-evaluates breaker admission instead of doubling the traffic.
//! An optional auto-refresh task sweeps every service on an interval.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vigil_breaker::{Admission, CircuitBreaker};
use vigil_core::{
    ProbeError, Service, ServiceConfig, ServiceHealthCheck, ServiceRegistry, ServiceTable,
};
use vigil_state::StateHub;

use crate::transport::{ProbeResponse, ProbeTransport};

/// Background refresh task state.
struct RefreshSlot {
    /// Handle to the sweep task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this task.
    shutdown_tx: watch::Sender<bool>,
}

/// Everything a check needs, shared with the refresh task.
struct MonitorInner {
    registry: Arc<ServiceRegistry>,
    breaker: Arc<CircuitBreaker>,
    hub: Arc<StateHub>,
    transport: Arc<dyn ProbeTransport>,
    /// One probe at a time per service.
    probe_locks: ServiceTable<Mutex<()>>,
}

/// Probes every known service and publishes results.
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    /// Active auto-refresh task, if any.
    refresh: Mutex<Option<RefreshSlot>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        breaker: Arc<CircuitBreaker>,
        hub: Arc<StateHub>,
        transport: Arc<dyn ProbeTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                registry,
                breaker,
                hub,
                transport,
                probe_locks: ServiceTable::from_fn(|_| Mutex::new(())),
            }),
            refresh: Mutex::new(None),
        }
    }

    /// Check one service and record the outcome.
    ///
    /// While the breaker for `service` is open the last known result
    /// is returned without any network contact. Otherwise one probe
    /// runs under the service's timeout, the outcome feeds the
    /// breaker, and the hub publishes the terminal result together
    /// with the updated breaker view.
    pub async fn check_service(&self, service: Service) -> ServiceHealthCheck {
        self.inner.check_service(service).await
    }

    /// Check every service in parallel.
    ///
    /// Always yields one entry per service; a failing service shows up
    /// as unhealthy rather than poisoning the sweep.
    pub async fn perform_health_check(&self) -> BTreeMap<Service, ServiceHealthCheck> {
        self.inner.sweep().await
    }

    /// Force a breaker closed and probe the service immediately.
    pub async fn reset_circuit_breaker(&self, service: Service) -> ServiceHealthCheck {
        self.inner.breaker.reset(service);
        self.inner
            .hub
            .record_breaker(self.inner.breaker.snapshot(service));
        info!(service = %service, "circuit breaker reset, probing");
        self.inner.check_service(service).await
    }

    /// Start the periodic all-service sweep.
    ///
    /// A second start replaces the previous task rather than stacking
    /// another timer.
    pub async fn start_auto_refresh(&self, interval: Duration) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            run_refresh_loop(inner, interval, shutdown_rx).await;
        });

        let mut slot = self.refresh.lock().await;
        if let Some(old) = slot.replace(RefreshSlot {
            handle,
            shutdown_tx,
        }) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        info!(interval_ms = interval.as_millis() as u64, "auto-refresh started");
    }

    /// Stop the periodic sweep, if one is running.
    pub async fn stop_auto_refresh(&self) {
        let mut slot = self.refresh.lock().await;
        if let Some(old) = slot.take() {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
            info!("auto-refresh stopped");
        }
    }

    /// Whether the periodic sweep is active.
    pub async fn is_refreshing(&self) -> bool {
        self.refresh.lock().await.is_some()
    }

    /// Tear the monitor down: close the hub first so in-flight probe
    /// results are discarded, then stop the refresh task.
    pub async fn shutdown(&self) {
        self.inner.hub.close();
        self.stop_auto_refresh().await;
        info!("health monitor shut down");
    }
}

impl MonitorInner {
    async fn check_service(&self, service: Service) -> ServiceHealthCheck {
        let _guard = self.probe_locks.get(service).lock().await;
        let config = self.registry.config(service);

        match self.breaker.try_acquire(service) {
            Admission::Rejected { retry_in } => {
                debug!(
                    service = %service,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "probe skipped, circuit open"
                );
                return self.hub.last_check(service).unwrap_or_else(|| {
                    ServiceHealthCheck::unknown(service, ProbeError::CircuitOpen.to_string())
                });
            }
            Admission::Allowed | Admission::Trial => {}
        }

        self.hub
            .record_check(ServiceHealthCheck::checking(service), None);

        let result = self.probe_once(service, config).await;
        let (check, success) = classify(service, config, result);

        if self.hub.is_closed() {
            // Teardown raced the probe; discard the result entirely.
            debug!(service = %service, "hub closed during probe, discarding result");
            return check;
        }

        self.breaker.record_outcome(service, success);
        self.hub
            .record_check(check.clone(), Some(self.breaker.snapshot(service)));

        if !success {
            warn!(service = %service, message = %check.message, "health check failed");
        }
        check
    }

    async fn sweep(&self) -> BTreeMap<Service, ServiceHealthCheck> {
        let futures: Vec<_> = Service::ALL
            .iter()
            .map(|&service| async move { (service, self.check_service(service).await) })
            .collect();
        futures::future::join_all(futures).await.into_iter().collect()
    }

    async fn probe_once(
        &self,
        service: Service,
        config: &ServiceConfig,
    ) -> Result<ProbeResponse, ProbeError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        match tokio::time::timeout(timeout, self.transport.probe(service, config)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(config.timeout_ms)),
        }
    }
}

/// The periodic sweep loop for the auto-refresh task.
async fn run_refresh_loop(
    inner: Arc<MonitorInner>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("auto-refresh loop starting");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                inner.sweep().await;
            }
            _ = shutdown.changed() => {
                debug!("auto-refresh loop shutting down");
                break;
            }
        }
    }
}

/// Turn a raw probe result into a health check plus the breaker verdict.
///
/// Slow successes count as degraded for health but as successes for
/// the breaker; the breaker only cares whether the service answered.
fn classify(
    service: Service,
    config: &ServiceConfig,
    result: Result<ProbeResponse, ProbeError>,
) -> (ServiceHealthCheck, bool) {
    let result = result.and_then(|response| {
        if (200..300).contains(&response.status_code) {
            Ok(response)
        } else {
            Err(ProbeError::ServerError(response.status_code))
        }
    });

    match result {
        Ok(response) if response.latency_ms > config.degraded_threshold_ms => (
            ServiceHealthCheck::degraded(
                service,
                response.latency_ms,
                config.degraded_threshold_ms,
            ),
            true,
        ),
        Ok(response) => (
            ServiceHealthCheck::healthy(service, response.latency_ms),
            true,
        ),
        Err(e) => (ServiceHealthCheck::unhealthy(service, e.to_string()), false),
    }
}
