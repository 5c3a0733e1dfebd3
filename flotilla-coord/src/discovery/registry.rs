//! In-memory service registry
//!
//! The authoritative membership table: which service instances exist, where
//! they listen, and when they last heartbeated. State is process-local and
//! not persisted across restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

/// A registered service instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub health_path: String,
    /// Informational only; liveness decisions use the heartbeat age
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ServiceRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            health_path: "/health".to_string(),
            status: "healthy".to_string(),
            last_heartbeat: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_health_path(mut self, health_path: impl Into<String>) -> Self {
        self.health_path = health_path.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Base URL other services use to reach this instance
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Absolute URL of the instance's health endpoint
    #[must_use]
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url(), self.health_path)
    }

    /// Time since the last heartbeat (negative under clock skew)
    #[must_use]
    pub fn heartbeat_age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.last_heartbeat)
    }

    /// Check liveness by heartbeat recency (age strictly below the window)
    #[must_use]
    pub fn is_healthy(&self, window: Duration) -> bool {
        self.heartbeat_age().num_milliseconds() < window.as_millis() as i64
    }

    /// Check staleness for eviction (age strictly above the timeout)
    #[must_use]
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.heartbeat_age().num_milliseconds() > stale_after.as_millis() as i64
    }
}

/// Shared in-memory registry of service records.
///
/// All mutation is serialized behind one `RwLock`; every read returns a
/// cloned snapshot, never a live reference.
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, ServiceRecord>>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace the record under its name, stamping a fresh
    /// heartbeat. Registration is an idempotent upsert and always succeeds.
    pub async fn register(&self, mut record: ServiceRecord) {
        record.last_heartbeat = Utc::now();
        tracing::info!(
            service = %record.name,
            address = %record.base_url(),
            "Service registered"
        );
        self.services.write().await.insert(record.name.clone(), record);
    }

    /// Remove a record; whether it existed
    pub async fn deregister(&self, name: &str) -> bool {
        let removed = self.services.write().await.remove(name).is_some();
        if removed {
            tracing::info!(service = %name, "Service deregistered");
        }
        removed
    }

    /// Exact lookup, returning a snapshot copy
    pub async fn get(&self, name: &str) -> Option<ServiceRecord> {
        self.services.read().await.get(name).cloned()
    }

    /// Snapshot of every registered record
    pub async fn list_all(&self) -> Vec<ServiceRecord> {
        self.services.read().await.values().cloned().collect()
    }

    /// Records whose heartbeat age is strictly below `window`
    pub async fn list_healthy(&self, window: Duration) -> Vec<ServiceRecord> {
        self.services
            .read()
            .await
            .values()
            .filter(|record| record.is_healthy(window))
            .cloned()
            .collect()
    }

    /// Bump a record's heartbeat; false if the name is unknown
    pub async fn heartbeat(&self, name: &str) -> bool {
        let mut services = self.services.write().await;
        match services.get_mut(name) {
            Some(record) => {
                record.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Update the informational status string; false if unknown
    pub async fn set_status(&self, name: &str, status: &str) -> bool {
        let mut services = self.services.write().await;
        match services.get_mut(name) {
            Some(record) => {
                record.status = status.to_string();
                true
            }
            None => false,
        }
    }

    /// Evict every record whose heartbeat age exceeds `stale_after`.
    ///
    /// Returns the number removed; an immediate second sweep removes zero.
    pub async fn sweep_stale(&self, stale_after: Duration) -> usize {
        let mut services = self.services.write().await;
        let before = services.len();
        services.retain(|name, record| {
            let stale = record.is_stale(stale_after);
            if stale {
                tracing::warn!(
                    service = %name,
                    last_heartbeat = %record.last_heartbeat,
                    "Evicting stale service record"
                );
            }
            !stale
        });
        before - services.len()
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
