//! Registration client configuration

use std::time::Duration;

use conductor_core::Config;

/// Everything a service process needs to register and stay registered
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator base URL, e.g. `http://127.0.0.1:8500`
    pub coordinator_url: String,
    /// Bearer credential sent with registry calls when set
    pub auth_token: Option<String>,
    pub service_name: String,
    pub host: String,
    pub port: u16,
    pub version: String,
    pub heartbeat_interval: Duration,
    pub register_timeout: Duration,
    pub heartbeat_timeout: Duration,
    /// Timeout for discovery and forwarded calls
    pub request_timeout: Duration,
    /// Sleep after an unexpected heartbeat failure before retrying
    pub retry_backoff: Duration,
}

impl ClientConfig {
    /// Defaults chosen to sit comfortably inside a >= 50s staleness window
    #[must_use]
    pub fn new(
        coordinator_url: impl Into<String>,
        service_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        version: impl Into<String>,
    ) -> Self {
        Self {
            coordinator_url: coordinator_url.into(),
            auth_token: None,
            service_name: service_name.into(),
            host: host.into(),
            port,
            version: version.into(),
            heartbeat_interval: Duration::from_secs(25),
            register_timeout: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
        }
    }

    /// Build from the shared application configuration
    #[must_use]
    pub fn from_config(
        config: &Config,
        service_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        version: impl Into<String>,
    ) -> Self {
        Self {
            coordinator_url: config.coordinator.base_url.clone(),
            auth_token: config.coordinator.auth_token.clone(),
            service_name: service_name.into(),
            host: host.into(),
            port,
            version: version.into(),
            heartbeat_interval: Duration::from_secs(
                config.registration.heartbeat_interval_seconds,
            ),
            register_timeout: Duration::from_secs(config.registration.register_timeout_seconds),
            heartbeat_timeout: Duration::from_secs(config.registration.heartbeat_timeout_seconds),
            request_timeout: Duration::from_secs(config.coordinator.request_timeout_seconds),
            retry_backoff: Duration::from_secs(config.registration.retry_backoff_seconds),
        }
    }

    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}
