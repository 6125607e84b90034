//! Full-stack tests: registration client against a live coordinator,
//! capability routing against stubbed downstream services.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use conductor_client::{ClientConfig, RegistrationClient};
use conductor_core::config::CapabilityConfig;
use conductor_core::Config;
use conductor_registry::{
    create_router, AppState, DegradationRouter, HealthCache, HttpForwarder, HttpProber,
    InMemoryRegistry, RegistryStore,
};

struct Coordinator {
    base_url: String,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn start_coordinator(config: Config) -> Coordinator {
    let store: Arc<dyn RegistryStore> =
        Arc::new(InMemoryRegistry::new(config.staleness_window_seconds()));
    let health = Arc::new(HealthCache::new(
        Arc::new(HttpProber::new()),
        Duration::from_secs(config.health.cache_ttl_seconds),
        Duration::from_secs(config.health.probe_timeout_seconds),
    ));
    let forwarder = Arc::new(HttpForwarder::new(Duration::from_secs(
        config.coordinator.request_timeout_seconds,
    )));
    let router = Arc::new(
        DegradationRouter::new(
            &config.capabilities,
            config.dependencies.clone(),
            store.clone(),
            health.clone(),
            forwarder,
        )
        .unwrap(),
    );

    let state = AppState::new(store, health, router, config.registry.auth_token.clone());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Coordinator {
        base_url: format!("http://{addr}"),
        server,
    }
}

fn capability(service: &str, enabled: bool, route: &str, http_method: &str) -> CapabilityConfig {
    CapabilityConfig {
        enabled,
        service: service.to_string(),
        method: http_method.to_string(),
        route: route.to_string(),
        path: None,
        degraded: json!({"status": "degraded"}),
        retry_after_seconds: Some(30),
    }
}

/// Register a stub downstream service under the given name, pointing the
/// registry at the wiremock server's real host and port.
async fn register_stub_service(coordinator: &Coordinator, name: &str, stub: &MockServer) {
    let address = stub.address();
    let body = json!({
        "name": name,
        "host": address.ip().to_string(),
        "port": address.port(),
        "version": "1.0.0",
    });
    let response = reqwest::Client::new()
        .post(format!("{}/registry/register", coordinator.base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn test_register_heartbeat_discover_roundtrip() {
    let coordinator = start_coordinator(Config::default()).await;

    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), "worker".to_string());

    let client = RegistrationClient::new(ClientConfig::new(
        coordinator.base_url.clone(),
        "alpha",
        "10.0.0.5",
        9000,
        "0.1.0",
    ));

    // Nothing of type worker exists before registration
    assert!(client.discover_by_type("worker").await.unwrap().is_empty());

    client.start_with(Some(metadata), None).await.unwrap();

    let record = client.discover("alpha").await.unwrap().unwrap();
    assert_eq!(record.identity.host, "10.0.0.5");
    assert_eq!(record.identity.port, 9000);

    let workers = client.discover_by_type("worker").await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].identity.name, "alpha");

    // Deregistration removes the record from discovery
    client.stop().await;
    assert!(client.discover("alpha").await.unwrap().is_none());
}

#[tokio::test]
async fn test_capability_forwards_when_dependency_healthy() {
    let dependency = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&dependency)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/agents"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"agent_id": "a-1"})))
        .mount(&dependency)
        .await;

    let mut config = Config::default();
    config.capabilities.insert(
        "create_agent".to_string(),
        capability("agent-manager", true, "/api/agents", "POST"),
    );

    let coordinator = start_coordinator(config).await;
    register_stub_service(&coordinator, "agent-manager", &dependency).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/agents", coordinator.base_url))
        .json(&json!({"name": "scout"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"agent_id": "a-1"}));
}

#[tokio::test]
async fn test_capability_degrades_when_dependency_down() {
    let dependency = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&dependency)
        .await;

    let mut config = Config::default();
    config.capabilities.insert(
        "evolution_status".to_string(),
        capability("evolution-runner", true, "/api/evolution/status", "GET"),
    );

    let coordinator = start_coordinator(config).await;
    register_stub_service(&coordinator, "evolution-runner", &dependency).await;

    let response = reqwest::Client::new()
        .get(format!("{}/api/evolution/status", coordinator.base_url))
        .send()
        .await
        .unwrap();

    // Degradation is a structured 200, never a coordinator 5xx
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["service_available"], json!(false));
    assert_eq!(body["retry_after_seconds"], json!(30));

    // The business endpoint was never called
    let hits = dependency
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() != "/health")
        .count();
    assert_eq!(hits, 0);
}

#[tokio::test]
async fn test_disabled_capability_answers_without_any_io() {
    let dependency = MockServer::start().await;

    let mut config = Config::default();
    config.capabilities.insert(
        "create_agent".to_string(),
        capability("agent-manager", false, "/api/agents", "POST"),
    );

    let coordinator = start_coordinator(config).await;
    register_stub_service(&coordinator, "agent-manager", &dependency).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/agents", coordinator.base_url))
        .json(&json!({"name": "scout"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"status": "disabled", "service_available": false}));

    // No probe, no forward: the dependency never saw a request
    assert!(dependency.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_coordinator_health_is_independent_of_dependencies() {
    let mut config = Config::default();
    config.capabilities.insert(
        "create_agent".to_string(),
        capability("agent-manager", true, "/api/agents", "POST"),
    );

    // No dependency registered at all; every capability would degrade
    let coordinator = start_coordinator(config).await;

    let response = reqwest::Client::new()
        .get(format!("{}/health", coordinator.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_status_reports_fleet_and_health_cache() {
    let dependency = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&dependency)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/evolution/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"generation": 42})))
        .mount(&dependency)
        .await;

    let mut config = Config::default();
    config.capabilities.insert(
        "evolution_status".to_string(),
        capability("evolution-runner", true, "/api/evolution/status", "GET"),
    );

    let coordinator = start_coordinator(config).await;
    register_stub_service(&coordinator, "evolution-runner", &dependency).await;

    // Drive one capability call so the health cache has an entry
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/api/evolution/status", coordinator.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let status: serde_json::Value = client
        .get(format!("{}/status", coordinator.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let services = status["services"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["name"], "evolution-runner");
    assert_eq!(services[0]["health"], "healthy");

    let cache = status["health_cache"].as_array().unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache[0]["service"], "evolution-runner");
}

#[tokio::test]
async fn test_mutating_registry_routes_require_bearer_when_configured() {
    let mut config = Config::default();
    config.registry.auth_token = Some("fleet-secret".to_string());

    let coordinator = start_coordinator(config).await;
    let http = reqwest::Client::new();
    let body = json!({"name": "alpha", "host": "10.0.0.5", "port": 9000, "version": "0.1.0"});

    // Without the credential: rejected
    let response = http
        .post(format!("{}/registry/register", coordinator.base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    // With it: accepted, and open discovery still works
    let response = http
        .post(format!("{}/registry/register", coordinator.base_url))
        .bearer_auth("fleet-secret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let response = http
        .get(format!("{}/registry/services/alpha", coordinator.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}
