// Module: http
// Coordinator HTTP surface: registry API, liveness, fleet status, and the
// capability routes dispatched through the degradation router.

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put, MethodRouter},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use conductor_core::models::{
    HealthStatus, MetadataPatch, RegistrationRecord, ServiceIdentity,
};

use crate::health::{HealthCache, HealthSnapshot};
use crate::router::{DegradationRouter, RoutedResponse};
use crate::store::RegistryStore;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RegistryStore>,
    pub health: Arc<HealthCache>,
    pub router: Arc<DegradationRouter>,
    /// Bearer credential required on mutating registry routes when set
    pub auth_token: Option<String>,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn RegistryStore>,
        health: Arc<HealthCache>,
        router: Arc<DegradationRouter>,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            store,
            health,
            router,
            auth_token,
        }
    }

    fn ensure_authorized(&self, headers: &HeaderMap) -> AppResult<()> {
        let Some(expected) = &self.auth_token else {
            return Ok(());
        };

        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match bearer {
            Some(token) if token == expected => Ok(()),
            _ => Err(AppError::unauthorized("Missing or invalid bearer token")),
        }
    }
}

/// Create the coordinator HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(coordinator_status))
        .route("/registry/register", post(register_service))
        .route("/registry/services", get(list_services))
        .route(
            "/registry/services/{name}",
            get(get_service).delete(deregister_service),
        )
        .route("/registry/services/{name}/metadata", patch(patch_metadata))
        .route("/registry/services/{name}/heartbeat", post(heartbeat_service));

    for (route, method_router) in capability_routes(&state.router) {
        app = app.route(&route, method_router);
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Build one method router per configured capability route
fn capability_routes(router: &DegradationRouter) -> HashMap<String, MethodRouter<AppState>> {
    let mut routes: HashMap<String, MethodRouter<AppState>> = HashMap::new();

    for capability in router.capabilities() {
        let name = capability.name.clone();
        let handler = move |State(state): State<AppState>, body: Bytes| async move {
            dispatch_capability(state, name, body).await
        };

        let method_router = match capability.method {
            Method::POST => post(handler),
            Method::PUT => put(handler),
            Method::DELETE => delete(handler),
            Method::PATCH => patch(handler),
            _ => get(handler),
        };

        match routes.entry(capability.route.clone()) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                let merged = occupied.get().clone().merge(method_router);
                occupied.insert(merged);
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(method_router);
            }
        }
    }

    routes
}

async fn dispatch_capability(state: AppState, capability: String, body: Bytes) -> Response {
    let payload = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                return AppError::bad_request(format!("Invalid JSON body: {e}")).into_response()
            }
        }
    };

    match state.router.dispatch(&capability, payload).await {
        Ok(routed) => routed_response(routed),
        Err(e) => AppError::from(e).into_response(),
    }
}

fn routed_response(routed: RoutedResponse) -> Response {
    match routed {
        // The coordinator keeps answering: degradation is 200, never a 5xx
        RoutedResponse::Disabled { payload } | RoutedResponse::Degraded { payload } => {
            (StatusCode::OK, Json(payload)).into_response()
        }
        RoutedResponse::Success { status, payload }
        | RoutedResponse::UpstreamError { status, payload } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(payload)).into_response()
        }
    }
}

/// Basic health check, independent of every dependency
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "conductor"}))
}

/// One registered service joined with its cached health verdict
#[derive(Debug, Serialize)]
struct ServiceStatus {
    name: String,
    version: String,
    base_url: String,
    last_heartbeat_at: chrono::DateTime<chrono::Utc>,
    health: HealthStatus,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    services: Vec<ServiceStatus>,
    health_cache: Vec<HealthSnapshot>,
}

/// Aggregate fleet view: live registrations plus health-cache contents
async fn coordinator_status(State(state): State<AppState>) -> impl IntoResponse {
    let services = state
        .store
        .list()
        .into_iter()
        .map(|record| ServiceStatus {
            name: record.identity.name.clone(),
            version: record.identity.version.clone(),
            base_url: record.identity.base_url(),
            last_heartbeat_at: record.last_heartbeat_at,
            health: state
                .health
                .cached_status(&record.identity.name)
                .unwrap_or(HealthStatus::Unknown),
        })
        .collect();

    Json(StatusResponse {
        services,
        health_cache: state.health.snapshot(),
    })
}

async fn register_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(identity): Json<ServiceIdentity>,
) -> AppResult<impl IntoResponse> {
    state.ensure_authorized(&headers)?;

    if identity.name.is_empty() {
        return Err(AppError::bad_request("service name must not be empty"));
    }
    if identity.host.is_empty() {
        return Err(AppError::bad_request("service host must not be empty"));
    }

    let record = state.store.register(identity);
    tracing::info!(service = %record.identity.name, "Service registered");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn deregister_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> AppResult<StatusCode> {
    state.ensure_authorized(&headers)?;

    if state.store.deregister(&name) {
        tracing::info!(service = %name, "Service deregistered");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("service {name} not registered")))
    }
}

async fn heartbeat_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> AppResult<Json<RegistrationRecord>> {
    state.ensure_authorized(&headers)?;

    state.store.heartbeat(&name).map(Json).ok_or_else(|| {
        // 404 drives the client through a fresh registration
        AppError::not_found(format!("service {name} not registered"))
    })
}

async fn patch_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(patch): Json<MetadataPatch>,
) -> AppResult<Json<RegistrationRecord>> {
    state.ensure_authorized(&headers)?;

    state
        .store
        .patch_metadata(&name, &patch)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("service {name} not registered")))
}

async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<RegistrationRecord>> {
    state
        .store
        .get(&name)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("service {name} not registered")))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(rename = "type")]
    service_type: Option<String>,
}

async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<RegistrationRecord>> {
    let records = match query.service_type.as_deref() {
        Some(service_type) => state.store.list_by_type(service_type),
        None => state.store.list(),
    };
    Json(records)
}
