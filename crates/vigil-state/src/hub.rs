//! Aggregated resilience state and subscriber fan-out.
//!
//! The hub holds the latest health check and breaker view per service
//! plus device connectivity, and publishes a full snapshot to every
//! subscriber on each state transition. Mutation and fan-out happen
//! under one lock, so subscribers observe transitions in the order
//! they occurred, exactly once each, with no coalescing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};

use vigil_core::{
    BreakerSnapshot, ResilienceSnapshot, Service, ServiceHealthCheck, ServiceTable,
    overall_health,
};

use crate::cache::{CacheStore, NullCache};

struct HubInner {
    is_online: bool,
    services: ServiceTable<Option<ServiceHealthCheck>>,
    breakers: ServiceTable<Option<BreakerSnapshot>>,
    subscribers: Vec<mpsc::UnboundedSender<ResilienceSnapshot>>,
    closed: bool,
}

impl HubInner {
    fn build_snapshot(&self) -> ResilienceSnapshot {
        let mut services = BTreeMap::new();
        for (service, check) in self.services.iter() {
            if let Some(check) = check {
                services.insert(service, check.clone());
            }
        }
        let mut circuit_breakers = BTreeMap::new();
        for (service, snap) in self.breakers.iter() {
            if let Some(snap) = snap {
                circuit_breakers.insert(service, snap.clone());
            }
        }
        let overall = overall_health(services.values());
        ResilienceSnapshot {
            is_online: self.is_online,
            services,
            circuit_breakers,
            overall_health: overall,
        }
    }

    /// Send the current snapshot to every live subscriber, pruning
    /// any whose receiver is gone. Callers hold the hub lock.
    fn publish(&mut self) {
        let snapshot = self.build_snapshot();
        self.subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

/// Shared hub for the aggregated resilience state.
pub struct StateHub {
    inner: Mutex<HubInner>,
    cache: Arc<dyn CacheStore>,
}

impl StateHub {
    /// Hub with no host cache attached.
    pub fn new() -> Self {
        Self::with_cache(Arc::new(NullCache))
    }

    /// Hub that forwards cache invalidation to `cache`.
    pub fn with_cache(cache: Arc<dyn CacheStore>) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                is_online: true,
                services: ServiceTable::from_fn(|_| None),
                breakers: ServiceTable::from_fn(|_| None),
                subscribers: Vec::new(),
                closed: false,
            }),
            cache,
        }
    }

    /// Subscribe to state transitions.
    ///
    /// The receiver is seeded with the current snapshot, then gets
    /// exactly one further snapshot per transition. A closed hub
    /// still seeds, but delivers nothing afterwards.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ResilienceSnapshot> {
        let mut inner = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(inner.build_snapshot());
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        rx
    }

    /// Current aggregated snapshot.
    pub fn snapshot(&self) -> ResilienceSnapshot {
        self.lock().build_snapshot()
    }

    /// Latest recorded check for `service`, if any.
    pub fn last_check(&self, service: Service) -> Option<ServiceHealthCheck> {
        self.lock().services.get(service).clone()
    }

    /// Record a health check result, optionally with the breaker view
    /// produced by the same probe. One call is one transition.
    pub fn record_check(&self, check: ServiceHealthCheck, breaker: Option<BreakerSnapshot>) {
        let mut inner = self.lock();
        if inner.closed {
            debug!(service = %check.service, "hub closed, dropping check result");
            return;
        }
        let service = check.service;
        *inner.services.get_mut(service) = Some(check);
        if let Some(snap) = breaker {
            *inner.breakers.get_mut(service) = Some(snap);
        }
        inner.publish();
    }

    /// Record a breaker-only transition, e.g. an operator reset.
    pub fn record_breaker(&self, snap: BreakerSnapshot) {
        let mut inner = self.lock();
        if inner.closed {
            debug!(service = %snap.service, "hub closed, dropping breaker update");
            return;
        }
        let service = snap.service;
        *inner.breakers.get_mut(service) = Some(snap);
        inner.publish();
    }

    /// Record host-reported connectivity. Publishing only happens when
    /// the value actually changes.
    pub fn set_online(&self, online: bool) {
        let mut inner = self.lock();
        if inner.closed || inner.is_online == online {
            return;
        }
        inner.is_online = online;
        info!(online, "device connectivity changed");
        inner.publish();
    }

    /// Ask the host cache to drop entries for one service, or for all
    /// services when `service` is `None`. Not a state transition, so
    /// subscribers are not notified, and it keeps working after close.
    pub fn clear_cache(&self, service: Option<Service>) {
        match service {
            Some(service) => {
                info!(service = %service, "clearing cached service data");
                self.cache.clear(service);
            }
            None => {
                info!("clearing cached data for all services");
                for service in Service::ALL {
                    self.cache.clear(service);
                }
            }
        }
    }

    /// Tear the hub down. Subsequent updates are dropped and no
    /// further notifications are delivered.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.subscribers.clear();
        info!("state hub closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StateHub {
    fn default() -> Self {
        Self::new()
    }
}
