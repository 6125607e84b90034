use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Application configuration
///
/// Resolved once at startup and threaded through constructors; no component
/// reads the environment after this point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub coordinator: CoordinatorConfig,
    pub registration: RegistrationConfig,
    pub registry: RegistryConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
    /// Degradation policy per coordinator capability, keyed by capability name
    pub capabilities: HashMap<String, CapabilityConfig>,
    /// Per-dependency base URL overrides, keyed by service name.
    /// Takes precedence over registry discovery when routing.
    pub dependencies: HashMap<String, String>,
}

/// Coordinator HTTP server binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8500,
        }
    }
}

/// How embedded clients reach the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub base_url: String,
    /// Bearer credential sent with registry calls when set
    pub auth_token: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8500".to_string(),
            auth_token: None,
            request_timeout_seconds: 30,
        }
    }
}

/// Client-side registration and heartbeat tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Seconds between heartbeats; must sit comfortably inside the
    /// registry staleness window
    pub heartbeat_interval_seconds: u64,
    pub register_timeout_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    /// Sleep after an unexpected heartbeat-loop failure before retrying
    pub retry_backoff_seconds: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 25,
            register_timeout_seconds: 30,
            heartbeat_timeout_seconds: 10,
            retry_backoff_seconds: 5,
        }
    }
}

/// Registry-side staleness and eviction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Staleness window = heartbeat interval * grace factor; minimum 2
    pub grace_factor: u32,
    pub eviction_interval_seconds: u64,
    /// Bearer credential required on mutating registry routes when set
    pub auth_token: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_factor: 2,
            eviction_interval_seconds: 30,
            auth_token: None,
        }
    }
}

/// Health probing and cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub cache_ttl_seconds: u64,
    pub probe_timeout_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 300,
            probe_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Degradation policy for one coordinator capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Feature flag; a disabled capability answers without any network I/O
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Logical name of the downstream service this capability depends on
    pub service: String,
    /// HTTP method for both the coordinator route and the forwarded call
    #[serde(default = "default_method")]
    pub method: String,
    /// Route exposed on the coordinator
    pub route: String,
    /// Downstream path the call is forwarded to; defaults to the route
    #[serde(default)]
    pub path: Option<String>,
    /// Payload shape returned when the dependency is unavailable.
    /// Absent means fail closed with an empty object.
    #[serde(default)]
    pub degraded: serde_json::Value,
    /// Back-off hint attached to degraded responses
    #[serde(default)]
    pub retry_after_seconds: Option<u64>,
}

const fn default_enabled() -> bool {
    true
}

fn default_method() -> String {
    "GET".to_string()
}

impl CapabilityConfig {
    /// Downstream path, falling back to the coordinator route
    #[must_use]
    pub fn forward_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.route)
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (CONDUCTOR_SERVER__HTTP_PORT, etc.)
        builder = builder.add_source(
            Environment::with_prefix("CONDUCTOR")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        // The staleness window must cover at least two missed heartbeats
        self.registry.grace_factor = self.registry.grace_factor.max(2);

        if self.registration.heartbeat_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "registration.heartbeat_interval_seconds must be positive".to_string(),
            ));
        }

        for (name, capability) in &self.capabilities {
            if capability.service.is_empty() {
                return Err(ConfigError::Message(format!(
                    "capability {name} has no service"
                )));
            }
            if !capability.route.starts_with('/') {
                return Err(ConfigError::Message(format!(
                    "capability {name} route must start with '/'"
                )));
            }
        }

        Ok(self)
    }

    /// Coordinator HTTP bind address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Registry staleness window in seconds
    #[must_use]
    pub fn staleness_window_seconds(&self) -> i64 {
        (self.registration.heartbeat_interval_seconds * u64::from(self.registry.grace_factor))
            as i64
    }
}
