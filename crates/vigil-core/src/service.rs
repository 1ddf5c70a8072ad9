//! The closed set of upstream services and a fixed-size table keyed by it.
//!
//! The resilience layer tracks a known, compile-time set of backends.
//! Keeping the set closed lets every per-service structure be a plain
//! array instead of a map, and makes "forgot to handle a service"
//! a compile error rather than a runtime surprise.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An upstream service the client depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// Primary glucose data backend.
    Glucoserver,
    /// Third-party diabetes data platform.
    Tidepool,
    /// Appointment scheduling backend.
    Appointments,
    /// API gateway fronting the clinical services.
    ApiGateway,
    /// Internal back-office administration service.
    Backoffice,
}

impl Service {
    /// Number of known services.
    pub const COUNT: usize = 5;

    /// Every known service, in registry order.
    pub const ALL: [Service; Self::COUNT] = [
        Service::Glucoserver,
        Service::Tidepool,
        Service::Appointments,
        Service::ApiGateway,
        Service::Backoffice,
    ];

    /// Stable dense index for table storage.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Canonical lowercase name, matching the config file keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Glucoserver => "glucoserver",
            Service::Tidepool => "tidepool",
            Service::Appointments => "appointments",
            Service::ApiGateway => "api_gateway",
            Service::Backoffice => "backoffice",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Service {
    type Err = crate::error::UnknownService;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .iter()
            .copied()
            .find(|service| service.as_str() == s)
            .ok_or_else(|| crate::error::UnknownService(s.to_string()))
    }
}

/// A value of type `T` for every known service.
///
/// Backed by a fixed array indexed by [`Service::index`], so lookups
/// never allocate and iteration order is always registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTable<T>([T; Service::COUNT]);

impl<T> ServiceTable<T> {
    /// Build a table by calling `f` once per service, in registry order.
    pub fn from_fn(mut f: impl FnMut(Service) -> T) -> Self {
        Self(Service::ALL.map(&mut f))
    }

    /// The entry for `service`.
    pub fn get(&self, service: Service) -> &T {
        &self.0[service.index()]
    }

    /// Mutable entry for `service`.
    pub fn get_mut(&mut self, service: Service) -> &mut T {
        &mut self.0[service.index()]
    }

    /// Replace the entry for `service`, returning the previous value.
    pub fn replace(&mut self, service: Service, value: T) -> T {
        std::mem::replace(&mut self.0[service.index()], value)
    }

    /// Iterate entries in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (Service, &T)> {
        Service::ALL.iter().copied().zip(self.0.iter())
    }

    /// Iterate values in registry order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }
}

impl<T: Default> Default for ServiceTable<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}
