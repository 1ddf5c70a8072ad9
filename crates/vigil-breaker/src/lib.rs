//! vigil-breaker — per-service circuit breakers.
//!
//! Tracks consecutive failures per service and fails fast while a
//! backend is down, admitting a single trial call once the open
//! timeout elapses. Cells live in a fixed per-service table; breakers
//! for different services never share a lock.

pub mod breaker;

pub use breaker::{Admission, CircuitBreaker};
