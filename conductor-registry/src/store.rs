//! In-memory registry of currently-live services
//!
//! Keyed by logical service name, last-register-wins. Records that stop
//! heartbeating become invisible to discovery and are removed by the
//! eviction sweep.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use conductor_core::models::{MetadataPatch, RegistrationRecord, ServiceIdentity};

/// Contract the coordinator core defines for its service catalog
pub trait RegistryStore: Send + Sync {
    /// Upsert a registration, last-register-wins for a given name
    fn register(&self, identity: ServiceIdentity) -> RegistrationRecord;

    /// Remove a registration; returns whether one existed
    fn deregister(&self, name: &str) -> bool;

    /// Refresh the heartbeat clock. `None` for unknown or expired names,
    /// which is the signal that drives client-side re-registration.
    fn heartbeat(&self, name: &str) -> Option<RegistrationRecord>;

    /// Merge a partial metadata update into a live registration
    fn patch_metadata(&self, name: &str, patch: &MetadataPatch) -> Option<RegistrationRecord>;

    /// Single-service discovery; stale records are not returned
    fn get(&self, name: &str) -> Option<RegistrationRecord>;

    /// All live registrations in registry order
    fn list(&self) -> Vec<RegistrationRecord>;

    /// Live registrations whose `type` metadata matches, in registry order
    fn list_by_type(&self, service_type: &str) -> Vec<RegistrationRecord>;

    /// Remove expired registrations and report their names
    fn evict_stale(&self) -> Vec<String>;
}

/// In-memory `RegistryStore` used by the coordinator
pub struct InMemoryRegistry {
    entries: RwLock<IndexMap<String, RegistrationRecord>>,
    staleness_window_secs: i64,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new(staleness_window_secs: i64) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            staleness_window_secs,
        }
    }

    #[must_use]
    pub const fn staleness_window_seconds(&self) -> i64 {
        self.staleness_window_secs
    }

    fn is_live(&self, record: &RegistrationRecord) -> bool {
        !record.is_stale(self.staleness_window_secs)
    }
}

impl RegistryStore for InMemoryRegistry {
    fn register(&self, identity: ServiceIdentity) -> RegistrationRecord {
        let mut entries = self.entries.write();
        let name = identity.name.clone();
        let mut record = RegistrationRecord::new(identity);

        // Re-registration keeps the original registration clock
        if let Some(existing) = entries.get(&name) {
            record.registered_at = existing.registered_at;
        }

        tracing::debug!(service = %name, "Service registered");
        entries.insert(name, record.clone());
        record
    }

    fn deregister(&self, name: &str) -> bool {
        let removed = self.entries.write().shift_remove(name).is_some();
        if removed {
            tracing::debug!(service = %name, "Service deregistered");
        }
        removed
    }

    fn heartbeat(&self, name: &str) -> Option<RegistrationRecord> {
        let mut entries = self.entries.write();
        let record = entries.get_mut(name)?;

        if record.is_stale(self.staleness_window_secs) {
            // Expired mid-flight; force the client through a fresh register
            tracing::warn!(service = %name, "Heartbeat for expired registration, evicting");
            entries.shift_remove(name);
            return None;
        }

        record.touch();
        Some(record.clone())
    }

    fn patch_metadata(&self, name: &str, patch: &MetadataPatch) -> Option<RegistrationRecord> {
        let mut entries = self.entries.write();
        let record = entries.get_mut(name)?;

        if record.is_stale(self.staleness_window_secs) {
            return None;
        }

        for (key, value) in &patch.metadata {
            record
                .identity
                .metadata
                .insert(key.clone(), value.clone());
        }
        Some(record.clone())
    }

    fn get(&self, name: &str) -> Option<RegistrationRecord> {
        let entries = self.entries.read();
        entries
            .get(name)
            .filter(|record| self.is_live(record))
            .cloned()
    }

    fn list(&self) -> Vec<RegistrationRecord> {
        let entries = self.entries.read();
        entries
            .values()
            .filter(|record| self.is_live(record))
            .cloned()
            .collect()
    }

    fn list_by_type(&self, service_type: &str) -> Vec<RegistrationRecord> {
        let entries = self.entries.read();
        entries
            .values()
            .filter(|record| {
                self.is_live(record) && record.identity.service_type() == Some(service_type)
            })
            .cloned()
            .collect()
    }

    fn evict_stale(&self) -> Vec<String> {
        let mut entries = self.entries.write();
        let stale: Vec<String> = entries
            .values()
            .filter(|record| record.is_stale(self.staleness_window_secs))
            .map(|record| record.identity.name.clone())
            .collect();

        for name in &stale {
            entries.shift_remove(name);
            tracing::info!(service = %name, "Evicted stale registration");
        }
        stale
    }
}

/// Run the eviction sweep on an interval until cancelled
///
/// Returns the `JoinHandle` so the caller can await termination on shutdown.
pub fn spawn_eviction_sweep(
    store: Arc<dyn RegistryStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Eviction sweep shutting down");
                    return;
                }
                _ = timer.tick() => {
                    let evicted = store.evict_stale();
                    if !evicted.is_empty() {
                        tracing::info!(count = evicted.len(), "Eviction sweep removed stale services");
                    }
                }
            }
        }
    })
}
