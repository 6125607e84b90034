// Conductor registration client
//
// Embedded in each service process: registers the service's identity with
// the coordinator, keeps it alive with a supervised heartbeat loop, and
// offers discovery plus a generic forward-call capability.

pub mod client;
pub mod config;

pub use client::{CallResponse, RegistrationClient};
pub use config::ClientConfig;
