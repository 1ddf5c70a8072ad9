//! Cache invalidation seam.
//!
//! The resilience layer never owns cached service data; the host
//! application does. [`CacheStore`] is the hook through which the
//! layer asks the host to drop stale entries, for example after an
//! operator resets a circuit breaker.

use vigil_core::Service;

/// Host-owned cache that can invalidate per-service entries.
pub trait CacheStore: Send + Sync {
    /// Drop all cached data for `service`.
    fn clear(&self, service: Service);
}

/// No-op cache for hosts without offline storage.
#[derive(Debug, Default)]
pub struct NullCache;

impl CacheStore for NullCache {
    fn clear(&self, _service: Service) {}
}
