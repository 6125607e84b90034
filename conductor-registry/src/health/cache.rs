//! TTL-bounded memo of the last health result per service name
//!
//! The invariant is "no health decision is older than the TTL": an expired
//! entry is refreshed synchronously before a value is returned, never served
//! stale. Concurrent misses for one name collapse into a single probe via
//! singleflight; writes are last-write-wins by probe timestamp, not by
//! completion order.

use std::sync::Arc;
use std::time::Duration;

use async_singleflight::Group;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use conductor_core::models::HealthStatus;

use super::prober::{HealthProber, ProbeOutcome};

#[derive(Debug, Clone)]
struct CacheEntry {
    status: HealthStatus,
    checked_at: Instant,
    detail: Option<String>,
}

/// Serializable view of one cached health result
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub service: String,
    pub status: HealthStatus,
    pub checked_seconds_ago: u64,
    pub detail: Option<String>,
}

/// Health cache owned by the routing coordinator
pub struct HealthCache {
    ttl: Duration,
    probe_timeout: Duration,
    prober: Arc<dyn HealthProber>,
    entries: DashMap<String, CacheEntry>,
    flight: Group<String, ProbeOutcome, String>,
}

impl HealthCache {
    #[must_use]
    pub fn new(prober: Arc<dyn HealthProber>, ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            ttl,
            probe_timeout,
            prober,
            entries: DashMap::new(),
            flight: Group::new(),
        }
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Cached health decision, probing on miss or expiry.
    ///
    /// Uses the cache-level probe timeout.
    pub async fn get_or_probe(&self, name: &str, url: &str) -> bool {
        self.get_or_probe_with(name, url, self.probe_timeout).await
    }

    /// Cached health decision with a per-service probe timeout
    pub async fn get_or_probe_with(&self, name: &str, url: &str, timeout: Duration) -> bool {
        if let Some(outcome) = self.fresh_outcome(name) {
            return outcome.status.is_healthy();
        }

        let flight_name = name.to_string();
        let flight_url = url.to_string();
        let key = flight_name.clone();
        let result = self
            .flight
            .work(&key, async move {
                // A waiter that queued behind the previous leader sees the
                // entry that leader just wrote
                if let Some(outcome) = self.fresh_outcome(&flight_name) {
                    return Ok(outcome);
                }
                let checked_at = Instant::now();
                let outcome = self
                    .prober
                    .probe(&flight_name, &flight_url, timeout)
                    .await;
                self.store(&flight_name, &outcome, checked_at);
                Ok::<_, String>(outcome)
            })
            .await;

        match result {
            Ok(outcome) => outcome.status.is_healthy(),
            Err(_) => {
                // Leader dropped mid-flight; fall back to a direct probe
                let checked_at = Instant::now();
                let outcome = self.prober.probe(name, url, timeout).await;
                self.store(name, &outcome, checked_at);
                outcome.status.is_healthy()
            }
        }
    }

    /// Drop the cached entry so the next query re-probes
    pub fn invalidate(&self, name: &str) {
        self.entries.remove(name);
    }

    /// Cached status without probing; `None` when absent or expired
    #[must_use]
    pub fn cached_status(&self, name: &str) -> Option<HealthStatus> {
        self.fresh_outcome(name).map(|outcome| outcome.status)
    }

    /// Snapshot of every cached entry, expired ones included
    #[must_use]
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        self.entries
            .iter()
            .map(|entry| HealthSnapshot {
                service: entry.key().clone(),
                status: entry.status,
                checked_seconds_ago: entry.checked_at.elapsed().as_secs(),
                detail: entry.detail.clone(),
            })
            .collect()
    }

    fn fresh_outcome(&self, name: &str) -> Option<ProbeOutcome> {
        let entry = self.entries.get(name)?;
        if entry.checked_at.elapsed() >= self.ttl {
            return None;
        }
        Some(ProbeOutcome {
            status: entry.status,
            detail: entry.detail.clone(),
        })
    }

    fn store(&self, name: &str, outcome: &ProbeOutcome, checked_at: Instant) {
        use dashmap::mapref::entry::Entry;

        match self.entries.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                // Last-write-wins by probe timestamp, not completion order
                if checked_at >= occupied.get().checked_at {
                    occupied.insert(CacheEntry {
                        status: outcome.status,
                        checked_at,
                        detail: outcome.detail.clone(),
                    });
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    status: outcome.status,
                    checked_at,
                    detail: outcome.detail.clone(),
                });
            }
        }
    }
}
