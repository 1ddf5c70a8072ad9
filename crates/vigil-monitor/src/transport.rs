//! Probe transport: how a health check actually reaches a service.
//!
//! The monitor is generic over [`ProbeTransport`] so tests can script
//! responses without a network. The production implementation is
//! [`HttpProbe`], a thin HTTPS GET against each service's configured
//! endpoint. Timeout enforcement lives in the monitor, not here.

use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use vigil_core::{ProbeError, Service, ServiceConfig};

/// Raw result of a probe that reached the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP status code of the response.
    pub status_code: u16,
    /// Time to response headers, in milliseconds.
    pub latency_ms: u64,
}

/// A way to reach a service for one health probe.
///
/// Implementations return `Ok` for any HTTP response, whatever the
/// status code, and `Err` only when no response was obtained. Status
/// classification is the monitor's job.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn probe(
        &self,
        service: Service,
        config: &ServiceConfig,
    ) -> Result<ProbeResponse, ProbeError>;
}

/// HTTPS probe client backed by [`reqwest`].
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("vigil-monitor/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("http client construction"),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeTransport for HttpProbe {
    async fn probe(
        &self,
        service: Service,
        config: &ServiceConfig,
    ) -> Result<ProbeResponse, ProbeError> {
        let started = Instant::now();
        match self.client.get(&config.base_url).send().await {
            Ok(response) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                debug!(
                    service = %service,
                    status = response.status().as_u16(),
                    latency_ms,
                    "probe completed"
                );
                Ok(ProbeResponse {
                    status_code: response.status().as_u16(),
                    latency_ms,
                })
            }
            Err(e) => {
                debug!(service = %service, error = %e, "probe failed to reach service");
                Err(ProbeError::Unreachable(e.to_string()))
            }
        }
    }
}
