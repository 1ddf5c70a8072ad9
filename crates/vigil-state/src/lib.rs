//! vigil-state — aggregated resilience state for host applications.
//!
//! The [`StateHub`] folds per-service health checks, breaker views,
//! and device connectivity into one [`vigil_core::ResilienceSnapshot`]
//! and fans every transition out to subscribers in order. Hosts plug
//! their offline storage in through [`CacheStore`].

pub mod cache;
pub mod hub;

pub use cache::{CacheStore, NullCache};
pub use hub::StateHub;
