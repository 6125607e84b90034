//! Degradation-aware request routing
//!
//! Every coordinator capability that depends on a named downstream service
//! goes through the same decision ladder: feature flag, cached health, then
//! either a real forwarded call or a structured degraded payload. The
//! coordinator answers every request; it never turns a dead dependency into
//! its own 5xx.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use serde_json::{json, Value};
use tokio::time::timeout;

use conductor_core::config::CapabilityConfig;
use conductor_core::{Error, Result};

use crate::health::HealthCache;
use crate::store::RegistryStore;

/// Response from a forwarded downstream call
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: u16,
    pub body: Value,
}

/// Generic forward-call capability (method, path, body -> response or failure)
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        base_url: &str,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ForwardResponse>;
}

/// Forwarder over reqwest with a hard per-call timeout
pub struct HttpForwarder {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpForwarder {
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            request_timeout,
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        base_url: &str,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ForwardResponse> {
        let url = format!("{base_url}{path}");
        let mut request = self
            .client
            .request(reqwest::Method::from_str(method.as_str()).unwrap_or(reqwest::Method::GET), &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| Error::Timeout(format!("forward call to {url} timed out")))??;

        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Ok(ForwardResponse { status, body })
    }
}

/// One capability's resolved degradation policy
#[derive(Debug, Clone)]
pub struct Capability {
    pub name: String,
    pub enabled: bool,
    pub service: String,
    pub method: Method,
    pub route: String,
    pub forward_path: String,
    pub degraded: Value,
    pub retry_after_seconds: Option<u64>,
}

impl Capability {
    /// Resolve a configured capability; rejects unknown HTTP methods
    pub fn from_config(name: &str, config: &CapabilityConfig) -> Result<Self> {
        let method = Method::from_str(&config.method.to_uppercase())
            .map_err(|_| Error::Configuration(format!("capability {name}: bad method {}", config.method)))?;
        if !matches!(
            method,
            Method::GET | Method::POST | Method::PUT | Method::DELETE | Method::PATCH
        ) {
            return Err(Error::Configuration(format!(
                "capability {name}: unsupported method {method}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            enabled: config.enabled,
            service: config.service.clone(),
            method,
            route: config.route.clone(),
            forward_path: config.forward_path().to_string(),
            degraded: config.degraded.clone(),
            retry_after_seconds: config.retry_after_seconds,
        })
    }
}

/// Terminal state of one capability invocation.
///
/// No state is retried automatically within a single invocation; callers
/// back off via the `retry_after_seconds` hint instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedResponse {
    /// Feature flag off; no probe, no forward
    Disabled { payload: Value },
    /// Forwarded and the dependency answered 2xx
    Success { status: u16, payload: Value },
    /// Forwarded and the dependency answered an error; passed through verbatim
    UpstreamError { status: u16, payload: Value },
    /// Dependency unavailable; structured fallback payload
    Degraded { payload: Value },
}

/// Routes coordinator capabilities through flag, health, and forward checks
pub struct DegradationRouter {
    capabilities: HashMap<String, Capability>,
    /// Per-dependency base URL overrides, consulted before discovery
    overrides: HashMap<String, String>,
    store: Arc<dyn RegistryStore>,
    health: Arc<HealthCache>,
    forwarder: Arc<dyn Forwarder>,
}

impl DegradationRouter {
    pub fn new(
        capability_configs: &HashMap<String, CapabilityConfig>,
        overrides: HashMap<String, String>,
        store: Arc<dyn RegistryStore>,
        health: Arc<HealthCache>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Result<Self> {
        let mut capabilities = HashMap::new();
        for (name, config) in capability_configs {
            capabilities.insert(name.clone(), Capability::from_config(name, config)?);
        }
        Ok(Self {
            capabilities,
            overrides,
            store,
            health,
            forwarder,
        })
    }

    /// Configured capabilities, for route assembly
    #[must_use]
    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.values()
    }

    /// Dispatch one capability invocation.
    ///
    /// `Err` only for capabilities that were never configured; every
    /// dependency failure maps to a terminal `RoutedResponse` instead.
    pub async fn dispatch(&self, capability: &str, body: Option<Value>) -> Result<RoutedResponse> {
        let capability = self
            .capabilities
            .get(capability)
            .ok_or_else(|| Error::NotFound(format!("capability {capability}")))?;

        if !capability.enabled {
            tracing::debug!(capability = %capability.name, "Capability disabled by feature flag");
            return Ok(RoutedResponse::Disabled {
                payload: json!({"status": "disabled", "service_available": false}),
            });
        }

        let Some(target) = self.resolve_target(&capability.service) else {
            tracing::warn!(
                capability = %capability.name,
                service = %capability.service,
                "Dependency not resolvable, answering degraded"
            );
            return Ok(self.degraded(capability));
        };

        let healthy = self
            .health
            .get_or_probe_with(&capability.service, &target.health_url, target.probe_timeout)
            .await;

        if !healthy {
            tracing::warn!(
                capability = %capability.name,
                service = %capability.service,
                "Dependency unhealthy, answering degraded"
            );
            return Ok(self.degraded(capability));
        }

        match self
            .forwarder
            .forward(
                &target.base_url,
                &capability.method,
                &capability.forward_path,
                body.as_ref(),
            )
            .await
        {
            Ok(response) if (200..300).contains(&response.status) => Ok(RoutedResponse::Success {
                status: response.status,
                payload: response.body,
            }),
            Ok(response) => {
                // A healthy dependency answered with an application error;
                // masking it would hide real defects
                tracing::debug!(
                    capability = %capability.name,
                    service = %capability.service,
                    status = response.status,
                    "Upstream error passed through"
                );
                Ok(RoutedResponse::UpstreamError {
                    status: response.status,
                    payload: response.body,
                })
            }
            Err(e) => {
                // The dependency died between probe and call; drop the cached
                // health verdict so the next invocation re-probes
                tracing::warn!(
                    capability = %capability.name,
                    service = %capability.service,
                    error = %e,
                    "Forward call failed, answering degraded"
                );
                self.health.invalidate(&capability.service);
                Ok(self.degraded(capability))
            }
        }
    }

    fn resolve_target(&self, service: &str) -> Option<ResolvedTarget> {
        if let Some(base_url) = self.overrides.get(service) {
            return Some(ResolvedTarget {
                base_url: base_url.clone(),
                health_url: format!("{base_url}/health"),
                probe_timeout: self.health.probe_timeout(),
            });
        }

        let record = self.store.get(service)?;
        Some(ResolvedTarget {
            base_url: record.identity.base_url(),
            health_url: record.identity.health_url(),
            probe_timeout: Duration::from_secs(record.identity.health.timeout_seconds),
        })
    }

    fn degraded(&self, capability: &Capability) -> RoutedResponse {
        // Fail closed: no configured shape still yields a well-formed payload
        let mut payload = match &capability.degraded {
            Value::Object(map) => Value::Object(map.clone()),
            Value::Null => json!({}),
            other => json!({ "data": other.clone() }),
        };

        if let Value::Object(map) = &mut payload {
            map.insert("service_available".to_string(), Value::Bool(false));
            if let Some(secs) = capability.retry_after_seconds {
                map.insert("retry_after_seconds".to_string(), json!(secs));
            }
        }

        RoutedResponse::Degraded { payload }
    }
}

struct ResolvedTarget {
    base_url: String,
    health_url: String,
    probe_timeout: Duration,
}
