//! Service identity and registration records
//!
//! A service announces a `ServiceIdentity` once at startup; the registry
//! keeps a `RegistrationRecord` reference copy refreshed by heartbeats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key that carries the service's capability type
pub const TYPE_METADATA_KEY: &str = "type";

/// How a prober must check a service's liveness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthDescriptor {
    pub protocol: String,
    pub path: String,
    pub timeout_seconds: u64,
    pub method: String,
}

impl Default for HealthDescriptor {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            path: "/health".to_string(),
            timeout_seconds: 5,
            method: "GET".to_string(),
        }
    }
}

/// Identity a service announces at registration
///
/// Immutable for the process lifetime except `metadata`, which may be
/// patched while the service is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub health: HealthDescriptor,
}

impl ServiceIdentity {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            version: version.into(),
            metadata: HashMap::new(),
            health: HealthDescriptor::default(),
        }
    }

    /// Attach metadata at construction time
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Override the default health descriptor
    #[must_use]
    pub fn with_health(mut self, health: HealthDescriptor) -> Self {
        self.health = health;
        self
    }

    /// Base URL composed from the health descriptor protocol
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.health.protocol, self.host, self.port)
    }

    /// Absolute URL of the health endpoint
    #[must_use]
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url(), self.health.path)
    }

    /// Capability type advertised via metadata, if any
    #[must_use]
    pub fn service_type(&self) -> Option<&str> {
        self.metadata.get(TYPE_METADATA_KEY).map(String::as_str)
    }
}

/// Registry-side view of a registered service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub identity: ServiceIdentity,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl RegistrationRecord {
    #[must_use]
    pub fn new(identity: ServiceIdentity) -> Self {
        let now = Utc::now();
        Self {
            identity,
            registered_at: now,
            last_heartbeat_at: now,
        }
    }

    /// Check if the record is stale (no recent heartbeat)
    #[must_use]
    pub fn is_stale(&self, window_secs: i64) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_heartbeat_at);
        elapsed.num_seconds() > window_secs
    }

    /// Refresh the heartbeat clock
    pub fn touch(&mut self) {
        self.last_heartbeat_at = Utc::now();
    }
}

/// Partial metadata update applied to a registered identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub metadata: HashMap<String, String>,
}

impl MetadataPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }
}

/// Observed liveness of a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}
