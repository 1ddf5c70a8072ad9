//! Service registry: static per-service configuration with optional
//! overrides from a `vigil.toml` file.
//!
//! The registry is read-only after construction. Built-in defaults
//! cover every service; a config file only needs to name the fields
//! it wants to change.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::service::{Service, ServiceTable};

/// Per-service tuning for probes and circuit breaking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Display name for logs and UI.
    pub name: String,
    /// Endpoint the health probe targets.
    pub base_url: String,
    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retry budget advertised to callers of this service.
    pub retry_attempts: u32,
    /// Consecutive failures before the breaker opens.
    pub circuit_breaker_threshold: u32,
    /// How long an open breaker waits before admitting a trial (ms).
    pub circuit_breaker_timeout_ms: u64,
    /// Whether cached data can stand in while the service is down.
    pub offline_support: bool,
    /// Successful responses slower than this are degraded (ms).
    pub degraded_threshold_ms: u64,
}

/// Optional per-service overrides, as they appear in `vigil.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceOverride {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_timeout_ms: Option<u64>,
    pub offline_support: Option<bool>,
    pub degraded_threshold_ms: Option<u64>,
}

impl ServiceOverride {
    fn apply(&self, config: &mut ServiceConfig) {
        if let Some(v) = &self.name {
            config.name = v.clone();
        }
        if let Some(v) = &self.base_url {
            config.base_url = v.clone();
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
            // Track the timeout unless the file pins a threshold too.
            if self.degraded_threshold_ms.is_none() {
                config.degraded_threshold_ms = v / 2;
            }
        }
        if let Some(v) = self.retry_attempts {
            config.retry_attempts = v;
        }
        if let Some(v) = self.circuit_breaker_threshold {
            config.circuit_breaker_threshold = v;
        }
        if let Some(v) = self.circuit_breaker_timeout_ms {
            config.circuit_breaker_timeout_ms = v;
        }
        if let Some(v) = self.offline_support {
            config.offline_support = v;
        }
        if let Some(v) = self.degraded_threshold_ms {
            config.degraded_threshold_ms = v;
        }
    }
}

/// On-disk shape of `vigil.toml`. Keys under `[services.*]` are the
/// canonical lowercase service names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    services: BTreeMap<String, ServiceOverride>,
}

/// Read-only configuration for every known service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistry {
    configs: ServiceTable<ServiceConfig>,
}

impl ServiceRegistry {
    /// Built-in defaults for every service.
    ///
    /// Degraded thresholds default to half the probe timeout.
    pub fn builtin() -> Self {
        Self {
            configs: ServiceTable::from_fn(default_config),
        }
    }

    /// Construct from an explicit table, bypassing the defaults.
    pub fn from_table(configs: ServiceTable<ServiceConfig>) -> Self {
        Self { configs }
    }

    /// Built-in defaults with overrides loaded from a TOML file.
    ///
    /// Unknown service keys in the file are a hard error so that a
    /// typo cannot silently leave a service on defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: RegistryFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let mut registry = Self::builtin();
        for (key, overrides) in &file.services {
            let service: Service = key
                .parse()
                .with_context(|| format!("invalid service key in {}", path.display()))?;
            overrides.apply(registry.configs.get_mut(service));
            debug!(service = %service, "applied config overrides");
        }
        Ok(registry)
    }

    /// Configuration for one service.
    pub fn config(&self, service: Service) -> &ServiceConfig {
        self.configs.get(service)
    }

    /// Iterate configurations in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (Service, &ServiceConfig)> {
        self.configs.iter()
    }

    /// Render the effective configuration as a `vigil.toml` document.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        let mut file = RegistryFile::default();
        for (service, config) in self.configs.iter() {
            file.services.insert(
                service.as_str().to_string(),
                ServiceOverride {
                    name: Some(config.name.clone()),
                    base_url: Some(config.base_url.clone()),
                    timeout_ms: Some(config.timeout_ms),
                    retry_attempts: Some(config.retry_attempts),
                    circuit_breaker_threshold: Some(config.circuit_breaker_threshold),
                    circuit_breaker_timeout_ms: Some(config.circuit_breaker_timeout_ms),
                    offline_support: Some(config.offline_support),
                    degraded_threshold_ms: Some(config.degraded_threshold_ms),
                },
            );
        }
        Ok(toml::to_string_pretty(&file)?)
    }
}

fn default_config(service: Service) -> ServiceConfig {
    match service {
        Service::Glucoserver => ServiceConfig {
            name: "Glucoserver".to_string(),
            base_url: "https://glucoserver.example.com/status".to_string(),
            timeout_ms: 5_000,
            retry_attempts: 3,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 30_000,
            offline_support: true,
            degraded_threshold_ms: 2_500,
        },
        Service::Tidepool => ServiceConfig {
            name: "Tidepool".to_string(),
            base_url: "https://api.tidepool.org/status".to_string(),
            timeout_ms: 10_000,
            retry_attempts: 2,
            circuit_breaker_threshold: 3,
            circuit_breaker_timeout_ms: 60_000,
            offline_support: true,
            degraded_threshold_ms: 5_000,
        },
        Service::Appointments => ServiceConfig {
            name: "Appointments".to_string(),
            base_url: "https://appointments.example.com/status".to_string(),
            timeout_ms: 5_000,
            retry_attempts: 2,
            circuit_breaker_threshold: 4,
            circuit_breaker_timeout_ms: 45_000,
            offline_support: true,
            degraded_threshold_ms: 2_500,
        },
        Service::ApiGateway => ServiceConfig {
            name: "API Gateway".to_string(),
            base_url: "https://gateway.example.com/status".to_string(),
            timeout_ms: 3_000,
            retry_attempts: 3,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 30_000,
            offline_support: false,
            degraded_threshold_ms: 1_500,
        },
        Service::Backoffice => ServiceConfig {
            name: "Backoffice".to_string(),
            base_url: "https://backoffice.example.com/status".to_string(),
            timeout_ms: 8_000,
            retry_attempts: 1,
            circuit_breaker_threshold: 3,
            circuit_breaker_timeout_ms: 120_000,
            offline_support: false,
            degraded_threshold_ms: 4_000,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_covers_every_service() {
        let registry = ServiceRegistry::builtin();
        for service in Service::ALL {
            let config = registry.config(service);
            assert!(!config.name.is_empty());
            assert!(config.base_url.starts_with("https://"));
            assert!(config.timeout_ms > 0);
            assert!(config.circuit_breaker_threshold > 0);
        }
    }

    #[test]
    fn builtin_degraded_threshold_is_half_timeout() {
        let registry = ServiceRegistry::builtin();
        for service in Service::ALL {
            let config = registry.config(service);
            assert_eq!(config.degraded_threshold_ms, config.timeout_ms / 2);
        }
    }

    #[test]
    fn from_file_applies_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[services.tidepool]
timeout_ms = 4000
circuit_breaker_threshold = 7

[services.api_gateway]
base_url = "https://gw.internal/status"
"#
        )
        .unwrap();

        let registry = ServiceRegistry::from_file(file.path()).unwrap();

        let tidepool = registry.config(Service::Tidepool);
        assert_eq!(tidepool.timeout_ms, 4000);
        assert_eq!(tidepool.circuit_breaker_threshold, 7);
        // Degraded threshold follows the overridden timeout.
        assert_eq!(tidepool.degraded_threshold_ms, 2000);
        // Untouched fields keep their defaults.
        assert_eq!(tidepool.retry_attempts, 2);

        let gateway = registry.config(Service::ApiGateway);
        assert_eq!(gateway.base_url, "https://gw.internal/status");
        assert_eq!(gateway.timeout_ms, 3000);

        // Services absent from the file stay on defaults entirely.
        assert_eq!(*registry.config(Service::Glucoserver), default_config(Service::Glucoserver));
    }

    #[test]
    fn from_file_pinned_degraded_threshold_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[services.glucoserver]
timeout_ms = 6000
degraded_threshold_ms = 900
"#
        )
        .unwrap();

        let registry = ServiceRegistry::from_file(file.path()).unwrap();
        let config = registry.config(Service::Glucoserver);
        assert_eq!(config.timeout_ms, 6000);
        assert_eq!(config.degraded_threshold_ms, 900);
    }

    #[test]
    fn from_file_rejects_unknown_service() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[services.glucoservr]
timeout_ms = 4000
"#
        )
        .unwrap();

        assert!(ServiceRegistry::from_file(file.path()).is_err());
    }

    #[test]
    fn from_file_missing_path_errors() {
        let result = ServiceRegistry::from_file(Path::new("/nonexistent/vigil.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn to_toml_round_trips() {
        let registry = ServiceRegistry::builtin();
        let rendered = registry.to_toml_string().unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();

        let reloaded = ServiceRegistry::from_file(file.path()).unwrap();
        assert_eq!(reloaded, registry);
    }
}
