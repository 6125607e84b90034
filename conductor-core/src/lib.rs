// Conductor core library
//
// Shared types, configuration, and error taxonomy for the service
// registry and health-aware degradation layer.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{
    HealthDescriptor, HealthStatus, MetadataPatch, RegistrationRecord, ServiceIdentity,
};
