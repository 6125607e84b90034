//! Single-shot liveness probe against a service's health endpoint

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;

use conductor_core::models::HealthStatus;

/// Result of one liveness check
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl ProbeOutcome {
    #[must_use]
    pub const fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    #[must_use]
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: Some(detail.into()),
        }
    }
}

/// Performs one bounded-timeout liveness check.
///
/// No retries here: retry policy belongs to callers.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, name: &str, url: &str, probe_timeout: Duration) -> ProbeOutcome;
}

/// HTTP prober implementing the universal `GET <base>/health` contract
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProber for HttpProber {
    async fn probe(&self, name: &str, url: &str, probe_timeout: Duration) -> ProbeOutcome {
        let result = timeout(probe_timeout, self.client.get(url).send()).await;

        let outcome = match result {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    ProbeOutcome::healthy()
                } else {
                    ProbeOutcome::unhealthy(format!("health endpoint returned {status}"))
                }
            }
            Ok(Err(e)) => ProbeOutcome::unhealthy(e.to_string()),
            Err(_) => ProbeOutcome::unhealthy(format!(
                "health probe timed out after {}s",
                probe_timeout.as_secs()
            )),
        };

        if let Some(detail) = &outcome.detail {
            tracing::warn!(service = %name, url = %url, detail = %detail, "Health probe failed");
        } else {
            tracing::debug!(service = %name, url = %url, "Health probe succeeded");
        }

        outcome
    }
}
