// Conductor registry library
//
// Coordinator-side service catalog, health-check caching, and the
// degradation-aware request router behind the HTTP surface.

pub mod health;
pub mod http;
pub mod router;
pub mod store;

pub use health::{HealthCache, HealthProber, HttpProber};
pub use http::{create_router, AppState};
pub use router::{DegradationRouter, Forwarder, HttpForwarder, RoutedResponse};
pub use store::{spawn_eviction_sweep, InMemoryRegistry, RegistryStore};
