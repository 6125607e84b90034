//! HTTP protocol tests for the registry surface

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use conductor_registry::{
    create_router, AppState, DegradationRouter, HealthCache, HttpForwarder, HttpProber,
    InMemoryRegistry, RegistryStore,
};

async fn start_app() -> String {
    let store: Arc<dyn RegistryStore> = Arc::new(InMemoryRegistry::new(50));
    let health = Arc::new(HealthCache::new(
        Arc::new(HttpProber::new()),
        Duration::from_secs(300),
        Duration::from_secs(5),
    ));
    let router = Arc::new(
        DegradationRouter::new(
            &HashMap::new(),
            HashMap::new(),
            store.clone(),
            health.clone(),
            Arc::new(HttpForwarder::new(Duration::from_secs(30))),
        )
        .unwrap(),
    );

    let app = create_router(AppState::new(store, health, router, None));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn identity_body(name: &str) -> serde_json::Value {
    json!({"name": name, "host": "10.0.0.5", "port": 9000, "version": "0.1.0"})
}

#[tokio::test]
async fn test_register_then_get() {
    let base = start_app().await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{base}/registry/register"))
        .json(&identity_body("alpha"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let record: serde_json::Value = response.json().await.unwrap();
    assert_eq!(record["identity"]["name"], "alpha");
    // Unspecified health descriptor falls back to the universal contract
    assert_eq!(record["identity"]["health"]["path"], "/health");

    let response = http
        .get(format!("{base}/registry/services/alpha"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = http
        .get(format!("{base}/registry/services/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_register_rejects_incomplete_identity() {
    let base = start_app().await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{base}/registry/register"))
        .json(&json!({"name": "", "host": "10.0.0.5", "port": 9000, "version": "0.1.0"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], 400);
    assert!(body["error"].as_str().unwrap().contains("name"));
}

#[tokio::test]
async fn test_heartbeat_known_and_unknown() {
    let base = start_app().await;
    let http = reqwest::Client::new();

    http.post(format!("{base}/registry/register"))
        .json(&identity_body("alpha"))
        .send()
        .await
        .unwrap();

    let response = http
        .post(format!("{base}/registry/services/alpha/heartbeat"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Unknown name: the 404 that drives client-side re-registration
    let response = http
        .post(format!("{base}/registry/services/ghost/heartbeat"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_metadata_patch_merges() {
    let base = start_app().await;
    let http = reqwest::Client::new();

    http.post(format!("{base}/registry/register"))
        .json(&json!({
            "name": "alpha", "host": "10.0.0.5", "port": 9000, "version": "0.1.0",
            "metadata": {"type": "worker"}
        }))
        .send()
        .await
        .unwrap();

    let response = http
        .patch(format!("{base}/registry/services/alpha/metadata"))
        .json(&json!({"metadata": {"load": "0.7"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let record: serde_json::Value = response.json().await.unwrap();
    assert_eq!(record["identity"]["metadata"]["load"], "0.7");
    assert_eq!(record["identity"]["metadata"]["type"], "worker");
}

#[tokio::test]
async fn test_list_services_with_type_filter() {
    let base = start_app().await;
    let http = reqwest::Client::new();

    http.post(format!("{base}/registry/register"))
        .json(&json!({
            "name": "alpha", "host": "10.0.0.5", "port": 9000, "version": "0.1.0",
            "metadata": {"type": "worker"}
        }))
        .send()
        .await
        .unwrap();
    http.post(format!("{base}/registry/register"))
        .json(&identity_body("web"))
        .send()
        .await
        .unwrap();

    let all: serde_json::Value = http
        .get(format!("{base}/registry/services"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.as_array().unwrap().len(), 2);

    let workers: serde_json::Value = http
        .get(format!("{base}/registry/services?type=worker"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let workers = workers.as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["identity"]["name"], "alpha");

    let schedulers: serde_json::Value = http
        .get(format!("{base}/registry/services?type=scheduler"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(schedulers.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_deregister() {
    let base = start_app().await;
    let http = reqwest::Client::new();

    http.post(format!("{base}/registry/register"))
        .json(&identity_body("alpha"))
        .send()
        .await
        .unwrap();

    let response = http
        .delete(format!("{base}/registry/services/alpha"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let response = http
        .delete(format!("{base}/registry/services/alpha"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = http
        .get(format!("{base}/registry/services/alpha"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
