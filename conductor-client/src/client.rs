//! Self-registration, heartbeat, and discovery client
//!
//! The heartbeat loop is a supervised background task: it is cancelled
//! through a `CancellationToken` and joined by `stop()`, and it never exits
//! on its own. A rejected heartbeat triggers an immediate re-registration
//! so a restarted coordinator re-learns the service without operator help.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use http::Method;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conductor_core::models::{
    HealthDescriptor, MetadataPatch, RegistrationRecord, ServiceIdentity,
};
use conductor_core::{Error, Result};

use crate::config::ClientConfig;

/// Response from a forwarded call to another service
#[derive(Debug, Clone)]
pub struct CallResponse {
    pub status: u16,
    pub body: Value,
}

impl CallResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

struct HeartbeatTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ClientInner {
    config: ClientConfig,
    http: reqwest::Client,
    /// Local identity copy; the originating process is the source of truth,
    /// so re-registration always sends this copy, patches included
    identity: RwLock<ServiceIdentity>,
}

impl ClientInner {
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.coordinator_url.trim_end_matches('/'), path)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn service_name(&self) -> String {
        self.identity.read().name.clone()
    }

    async fn register(&self) -> Result<()> {
        let identity = self.identity.read().clone();
        let response = self
            .with_auth(self.http.post(self.endpoint("/registry/register")))
            .json(&identity)
            .timeout(self.config.register_timeout)
            .send()
            .await?;

        if response.status().is_success() {
            debug!(service = %identity.name, "Registered with coordinator");
            Ok(())
        } else {
            Err(Error::Registry(format!(
                "registration rejected with status {}",
                response.status()
            )))
        }
    }

    /// One heartbeat; `Ok(false)` means the registry rejected it
    async fn heartbeat_once(&self) -> Result<bool> {
        let name = self.service_name();
        let response = self
            .with_auth(
                self.http
                    .post(self.endpoint(&format!("/registry/services/{name}/heartbeat"))),
            )
            .timeout(self.config.heartbeat_timeout)
            .send()
            .await?;

        Ok(response.status().is_success())
    }

    async fn deregister(&self) -> Result<()> {
        let name = self.service_name();
        let response = self
            .with_auth(
                self.http
                    .delete(self.endpoint(&format!("/registry/services/{name}"))),
            )
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        // An already-expired registration is fine
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Error::Registry(format!(
                "deregistration rejected with status {}",
                response.status()
            )))
        }
    }
}

/// Embeddable registration client
pub struct RegistrationClient {
    inner: Arc<ClientInner>,
    heartbeat: tokio::sync::Mutex<Option<HeartbeatTask>>,
}

impl RegistrationClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let identity = ServiceIdentity::new(
            config.service_name.clone(),
            config.host.clone(),
            config.port,
            config.version.clone(),
        );
        Self {
            inner: Arc::new(ClientInner {
                config,
                http: reqwest::Client::new(),
                identity: RwLock::new(identity),
            }),
            heartbeat: tokio::sync::Mutex::new(None),
        }
    }

    /// Register with the coordinator and launch the heartbeat loop.
    ///
    /// Idempotent: calling `start` while running is a no-op without any
    /// network I/O. On a failed registration the loop is not started.
    pub async fn start(&self) -> Result<()> {
        self.start_with(None, None).await
    }

    /// `start` with metadata and health-descriptor overrides
    pub async fn start_with(
        &self,
        metadata: Option<HashMap<String, String>>,
        health: Option<HealthDescriptor>,
    ) -> Result<()> {
        let mut guard = self.heartbeat.lock().await;
        if guard.is_some() {
            debug!(service = %self.inner.service_name(), "Client already running");
            return Ok(());
        }

        {
            let mut identity = self.inner.identity.write();
            if let Some(metadata) = metadata {
                identity.metadata.extend(metadata);
            }
            if let Some(health) = health {
                identity.health = health;
            }
        }

        self.inner.register().await?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_loop(self.inner.clone(), cancel.clone()));
        *guard = Some(HeartbeatTask { cancel, handle });

        info!(service = %self.inner.service_name(), "Registration client started");
        Ok(())
    }

    /// Cancel the heartbeat loop, await its termination, then deregister
    /// best-effort. Safe to call when not running.
    pub async fn stop(&self) {
        let task = self.heartbeat.lock().await.take();
        let Some(task) = task else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(error = %e, "Heartbeat task join failed");
        }

        if let Err(e) = self.inner.deregister().await {
            warn!(
                service = %self.inner.service_name(),
                error = %e,
                "Best-effort deregistration failed"
            );
        }

        info!(service = %self.inner.service_name(), "Registration client stopped");
    }

    /// Whether the heartbeat loop is currently running
    pub async fn is_running(&self) -> bool {
        self.heartbeat.lock().await.is_some()
    }

    /// Send a partial metadata update.
    ///
    /// `Ok(false)` without any network I/O when the client is not running.
    /// The local identity copy is patched first so a later re-registration
    /// carries the update even if this call fails remotely.
    pub async fn update_metadata(&self, patch: HashMap<String, String>) -> Result<bool> {
        if !self.is_running().await {
            return Ok(false);
        }

        {
            let mut identity = self.inner.identity.write();
            identity.metadata.extend(patch.clone());
        }

        let name = self.inner.service_name();
        let response = self
            .inner
            .with_auth(
                self.inner
                    .http
                    .patch(self.inner.endpoint(&format!("/registry/services/{name}/metadata"))),
            )
            .json(&MetadataPatch { metadata: patch })
            .timeout(self.inner.config.request_timeout)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(true)
        } else {
            Err(Error::Registry(format!(
                "metadata update rejected with status {}",
                response.status()
            )))
        }
    }

    /// Look up another service's current registration by name.
    ///
    /// `Ok(None)` means the name is unknown to the registry; transport
    /// failures are a distinct `Err` so callers can tell the cases apart.
    pub async fn discover(&self, name: &str) -> Result<Option<RegistrationRecord>> {
        let response = self
            .inner
            .http
            .get(self.inner.endpoint(&format!("/registry/services/{name}")))
            .timeout(self.inner.config.request_timeout)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json().await?)),
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => Err(Error::Registry(format!(
                "discovery for {name} failed with status {status}"
            ))),
        }
    }

    /// All live services of a capability type, in registry order
    pub async fn discover_by_type(&self, service_type: &str) -> Result<Vec<RegistrationRecord>> {
        let response = self
            .inner
            .http
            .get(self.inner.endpoint("/registry/services"))
            .query(&[("type", service_type)])
            .timeout(self.inner.config.request_timeout)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(Error::Registry(format!(
                "discovery by type {service_type} failed with status {}",
                response.status()
            )))
        }
    }

    /// `protocol://host:port` of a discovered service
    pub async fn resolve_base_url(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .discover(name)
            .await?
            .map(|record| record.identity.base_url()))
    }

    /// Resolve a service and forward a call to it.
    ///
    /// `Ok(None)` when the service cannot be resolved; an error response
    /// from a resolved service still comes back as `Ok(Some(_))` and the
    /// caller decides what to do with the status.
    pub async fn call(
        &self,
        name: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<CallResponse>> {
        let Some(base_url) = self.resolve_base_url(name).await? else {
            debug!(service = %name, "Call target not resolvable");
            return Ok(None);
        };

        let url = format!("{base_url}{path}");
        let mut request = self
            .inner
            .http
            .request(
                reqwest::Method::from_str(method.as_str()).unwrap_or(reqwest::Method::GET),
                &url,
            )
            .timeout(self.inner.config.request_timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Ok(Some(CallResponse { status, body }))
    }

    /// Current local identity copy
    #[must_use]
    pub fn identity(&self) -> ServiceIdentity {
        self.inner.identity.read().clone()
    }
}

async fn heartbeat_loop(inner: Arc<ClientInner>, cancel: CancellationToken) {
    let period = inner.config.heartbeat_interval;
    // First beat one full period after registration, not immediately
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(service = %inner.service_name(), "Heartbeat loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                match inner.heartbeat_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        // The registry no longer knows us; self-heal instead
                        // of beating against a dead registration
                        warn!(service = %inner.service_name(), "Heartbeat rejected, re-registering");
                        if let Err(e) = inner.register().await {
                            warn!(
                                service = %inner.service_name(),
                                error = %e,
                                "Re-registration failed"
                            );
                        }
                    }
                    Err(e) => {
                        warn!(service = %inner.service_name(), error = %e, "Heartbeat failed");
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            () = tokio::time::sleep(inner.config.retry_backoff) => {}
                        }
                    }
                }
            }
        }
    }
}
