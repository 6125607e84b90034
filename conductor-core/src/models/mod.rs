//! Wire types for registration, discovery, and health reporting

pub mod service;

pub use service::{
    HealthDescriptor, HealthStatus, MetadataPatch, RegistrationRecord, ServiceIdentity,
};
