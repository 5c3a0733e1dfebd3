//! Discovery client
//!
//! High-level operations over the registry: self-registration, instance
//! lookup, URL resolution and active HTTP health probing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;

use crate::error::{Error, Result};

use super::registry::{ServiceRecord, ServiceRegistry};

const DEFAULT_HEALTHY_WINDOW: Duration = Duration::from_secs(30);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side view of the service registry.
///
/// Wraps a shared [`ServiceRegistry`] with the policy knobs a caller needs:
/// how recent a heartbeat must be to count as healthy, and how long an
/// active probe may take.
pub struct DiscoveryClient {
    registry: Arc<ServiceRegistry>,
    http: reqwest::Client,
    healthy_window: Duration,
    probe_timeout: Duration,
}

impl DiscoveryClient {
    pub fn new(registry: Arc<ServiceRegistry>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            registry,
            http,
            healthy_window: DEFAULT_HEALTHY_WINDOW,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_healthy_window(mut self, window: Duration) -> Self {
        self.healthy_window = window;
        self
    }

    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Register this process under `name`
    pub async fn register_self(
        &self,
        name: &str,
        host: &str,
        port: u16,
        health_path: &str,
        metadata: HashMap<String, Value>,
    ) {
        let record = ServiceRecord::new(name, host, port)
            .with_health_path(health_path)
            .with_metadata(metadata);
        self.registry.register(record).await;
    }

    /// Remove a service's record; whether it existed
    pub async fn deregister(&self, name: &str) -> bool {
        self.registry.deregister(name).await
    }

    /// Base URL of `name` if it is registered and recently heartbeated.
    ///
    /// A registered instance whose heartbeat has aged out of the healthy
    /// window is invisible here, exactly as an unknown one is.
    pub async fn discover(&self, name: &str) -> Option<String> {
        match self.registry.get(name).await {
            Some(record) if record.is_healthy(self.healthy_window) => Some(record.base_url()),
            Some(record) => {
                tracing::debug!(
                    service = %name,
                    last_heartbeat = %record.last_heartbeat,
                    "Service found but heartbeat is outside the healthy window"
                );
                None
            }
            None => None,
        }
    }

    /// Join a discovered base URL with `path`, or None if undiscoverable
    pub async fn resolve_url(&self, name: &str, path: &str) -> Option<String> {
        let base = self.discover(name).await?;
        if path.starts_with('/') {
            Some(format!("{base}{path}"))
        } else {
            Some(format!("{base}/{path}"))
        }
    }

    /// Actively probe a service's health endpoint.
    ///
    /// Exactly HTTP 200 counts as healthy and refreshes the record's
    /// heartbeat. Any other status, a connection error or a timeout marks
    /// the record unhealthy without evicting it.
    pub async fn probe(&self, name: &str) -> bool {
        let Some(record) = self.registry.get(name).await else {
            return false;
        };

        let response = self
            .http
            .get(record.health_url())
            .timeout(self.probe_timeout)
            .send()
            .await;

        match response {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                self.registry.heartbeat(name).await;
                self.registry.set_status(name, "healthy").await;
                true
            }
            Ok(response) => {
                tracing::warn!(
                    service = %name,
                    status = %response.status(),
                    "Health probe returned non-200 status"
                );
                self.registry.set_status(name, "unhealthy").await;
                false
            }
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "Health probe failed");
                self.registry.set_status(name, "unhealthy").await;
                false
            }
        }
    }

    /// Probe every registered service concurrently
    pub async fn probe_all(&self) -> HashMap<String, bool> {
        let names: Vec<String> = self
            .registry
            .list_all()
            .await
            .into_iter()
            .map(|record| record.name)
            .collect();

        let results = join_all(names.iter().map(|name| self.probe(name))).await;
        names.into_iter().zip(results).collect()
    }

    /// Refresh this process's own heartbeat; false if not registered
    pub async fn send_heartbeat(&self, name: &str) -> bool {
        let refreshed = self.registry.heartbeat(name).await;
        if !refreshed {
            tracing::warn!(service = %name, "Heartbeat for unregistered service");
        }
        refreshed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DiscoveryClient {
        DiscoveryClient::new(Arc::new(ServiceRegistry::new())).unwrap()
    }

    #[tokio::test]
    async fn test_discover_unknown_service() {
        let discovery = client();
        assert!(discovery.discover("ghost").await.is_none());
        assert!(discovery.resolve_url("ghost", "/api").await.is_none());
    }

    #[tokio::test]
    async fn test_discover_registered_service() {
        let discovery = client();
        discovery
            .register_self("svc-a", "localhost", 9001, "/health", HashMap::new())
            .await;

        assert_eq!(
            discovery.discover("svc-a").await.as_deref(),
            Some("http://localhost:9001")
        );
    }

    #[tokio::test]
    async fn test_discover_hides_aged_out_service() {
        let discovery = client().with_healthy_window(Duration::from_millis(50));
        discovery
            .register_self("svc-a", "localhost", 9001, "/health", HashMap::new())
            .await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(discovery.discover("svc-a").await.is_none());
        // Still registered, just not discoverable
        assert!(discovery.registry().get("svc-a").await.is_some());

        assert!(discovery.send_heartbeat("svc-a").await);
        assert!(discovery.discover("svc-a").await.is_some());
    }

    #[tokio::test]
    async fn test_resolve_url_normalizes_path() {
        let discovery = client();
        discovery
            .register_self("svc-a", "localhost", 9001, "/health", HashMap::new())
            .await;

        assert_eq!(
            discovery.resolve_url("svc-a", "/api/v1/items").await.as_deref(),
            Some("http://localhost:9001/api/v1/items")
        );
        assert_eq!(
            discovery.resolve_url("svc-a", "api/v1/items").await.as_deref(),
            Some("http://localhost:9001/api/v1/items")
        );
    }

    #[tokio::test]
    async fn test_probe_unknown_service() {
        let discovery = client();
        assert!(!discovery.probe("ghost").await);
    }

    #[tokio::test]
    async fn test_heartbeat_unregistered() {
        let discovery = client();
        assert!(!discovery.send_heartbeat("ghost").await);
    }
}
