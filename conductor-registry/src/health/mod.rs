//! Dependency health probing and TTL-bounded caching

pub mod cache;
pub mod prober;

pub use cache::{HealthCache, HealthSnapshot};
pub use prober::{HealthProber, HttpProber, ProbeOutcome};
