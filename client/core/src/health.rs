//! Relay Health Probing
//!
//! A single bounded-timeout `GET /healthz` classifying connectivity. The
//! prober is stateless and idempotent: no retries, no caching, no circuit
//! breaking. Callers re-probe explicitly when it matters (endpoint change,
//! app foregrounding).

use std::time::Duration;

use crate::relay::{HealthReply, HEALTHZ_PATH};

/// Default probe timeout
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connectivity classification for a relay endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No endpoint has been configured yet
    NotConfigured,
    /// The relay answered the probe
    Connected {
        /// Model name the relay reports
        model: String,
    },
    /// The relay is unreachable or unhealthy
    Error,
}

impl ConnectionStatus {
    /// Whether the relay is usable for chat
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Health prober for relay endpoints
#[derive(Clone, Debug)]
pub struct HealthProber {
    http: reqwest::Client,
    timeout: Duration,
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProber {
    /// Create a prober with the default timeout
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    /// Create a prober with a custom timeout
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Probe an endpoint and classify the result.
    ///
    /// `None` classifies as [`ConnectionStatus::NotConfigured`] without
    /// touching the network. Any transport error, timeout, non-2xx status,
    /// or unparseable body classifies as [`ConnectionStatus::Error`].
    pub async fn probe(&self, endpoint: Option<&str>) -> ConnectionStatus {
        let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) else {
            return ConnectionStatus::NotConfigured;
        };

        match self.fetch_health(endpoint).await {
            Ok(reply) => {
                tracing::debug!(model = %reply.model, status = %reply.status, "relay healthy");
                ConnectionStatus::Connected { model: reply.model }
            }
            Err(e) => {
                tracing::debug!("health probe failed: {e}");
                ConnectionStatus::Error
            }
        }
    }

    /// The raw probe request; errors collapse into `Error` in [`Self::probe`]
    async fn fetch_health(&self, endpoint: &str) -> Result<HealthReply, reqwest::Error> {
        let url = format!("{}{HEALTHZ_PATH}", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        response.json().await
    }
}
