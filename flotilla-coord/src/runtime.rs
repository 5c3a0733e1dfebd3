//! Coordinator lifecycle management
//!
//! Wires the registry, discovery, breakers, health checks, and the
//! configuration client into one unit with a start/shutdown lifecycle:
//! on start the process registers itself and begins heartbeating, on
//! shutdown it deregisters and stops its background work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use flotilla_core::breaker::{BreakerConfig, CircuitBreakerRegistry};
use flotilla_core::{Config, HealthCheckManager};

use crate::config_client::ConfigClient;
use crate::discovery::{DiscoveryClient, RegistryMaintenance, ServiceRegistry};
use crate::error::Result;
use crate::service_client::ServiceClient;

/// Generate a unique instance ID for this process
fn generate_instance_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    // Random suffix distinguishes restarts on the same host
    let suffix = nanoid::nanoid!(6);
    format!("{hostname}-{suffix}")
}

/// Container for one process's coordination machinery
pub struct Coordinator {
    config: Config,
    registry: Arc<ServiceRegistry>,
    discovery: Arc<DiscoveryClient>,
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<HealthCheckManager>,
    config_client: Arc<ConfigClient>,
    service_client: Arc<ServiceClient>,
    maintenance: RegistryMaintenance,
    maintenance_handle: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Build every component from the loaded configuration.
    ///
    /// Nothing runs yet; call [`Coordinator::start`] to register this
    /// process and begin background maintenance.
    pub fn new(config: Config) -> Result<Self> {
        info!(service = %config.service.name, "Initializing coordinator");

        let registry = Arc::new(ServiceRegistry::new());
        let discovery = Arc::new(
            DiscoveryClient::new(registry.clone())?
                .with_healthy_window(Duration::from_secs(config.discovery.healthy_window_seconds))
                .with_probe_timeout(Duration::from_secs(config.discovery.probe_timeout_seconds)),
        );

        let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            open_timeout: Duration::from_secs(config.breaker.open_timeout_seconds),
        }));

        let health = Arc::new(
            HealthCheckManager::new(config.service.name.clone())
                .with_cache_ttl(Duration::from_secs(config.health.cache_ttl_seconds)),
        );

        let config_client = Arc::new(ConfigClient::new(discovery.clone(), &config.config_service)?);
        let service_client = Arc::new(ServiceClient::new(
            discovery.clone(),
            breakers.clone(),
            &config.http,
        )?);

        let maintenance = RegistryMaintenance::new(discovery.clone(), config.service.name.clone())
            .with_heartbeat_interval(Duration::from_secs(
                config.discovery.heartbeat_interval_seconds,
            ))
            .with_sweep_interval(Duration::from_secs(config.discovery.sweep_interval_seconds))
            .with_stale_after(Duration::from_secs(config.discovery.stale_after_seconds));

        info!(service = %config.service.name, "Coordinator initialized");

        Ok(Self {
            config,
            registry,
            discovery,
            breakers,
            health,
            config_client,
            service_client,
            maintenance,
            maintenance_handle: None,
        })
    }

    /// Register this process and start heartbeat and sweep maintenance
    pub async fn start(&mut self) {
        if self.maintenance_handle.is_some() {
            warn!("Coordinator already started");
            return;
        }

        let service = &self.config.service;
        let metadata = HashMap::from([
            ("version".to_string(), json!(service.version)),
            ("environment".to_string(), json!(service.environment)),
            ("instance_id".to_string(), json!(generate_instance_id())),
            ("started_at".to_string(), json!(Utc::now().to_rfc3339())),
        ]);
        self.discovery
            .register_self(
                &service.name,
                &service.host,
                service.port,
                &service.health_path,
                metadata,
            )
            .await;

        self.maintenance_handle = Some(self.maintenance.start());
        info!(service = %service.name, "Coordinator started");
    }

    /// Stop background maintenance and deregister this process
    pub async fn shutdown(&mut self) {
        info!("Coordinator shutting down");

        self.maintenance.shutdown();
        if let Some(handle) = self.maintenance_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance task ended abnormally");
            }
        }

        self.discovery.deregister(&self.config.service.name).await;
        info!("Coordinator shut down complete");
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    #[must_use]
    pub fn discovery(&self) -> Arc<DiscoveryClient> {
        self.discovery.clone()
    }

    #[must_use]
    pub fn breakers(&self) -> Arc<CircuitBreakerRegistry> {
        self.breakers.clone()
    }

    #[must_use]
    pub fn health(&self) -> Arc<HealthCheckManager> {
        self.health.clone()
    }

    #[must_use]
    pub fn config_client(&self) -> Arc<ConfigClient> {
        self.config_client.clone()
    }

    #[must_use]
    pub fn service_client(&self) -> Arc<ServiceClient> {
        self.service_client.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_registers_and_deregisters() {
        let mut coordinator = Coordinator::new(Config::default()).unwrap();
        let name = coordinator.config().service.name.clone();

        assert!(coordinator.registry().get(&name).await.is_none());

        coordinator.start().await;
        let record = coordinator.registry().get(&name).await.unwrap();
        assert!(record.metadata.contains_key("version"));
        assert!(record.metadata.contains_key("instance_id"));
        assert!(record.metadata.contains_key("started_at"));

        coordinator.shutdown().await;
        assert!(coordinator.registry().get(&name).await.is_none());
    }

    #[tokio::test]
    async fn test_start_twice_is_harmless() {
        let mut coordinator = Coordinator::new(Config::default()).unwrap();
        coordinator.start().await;
        coordinator.start().await;

        coordinator.shutdown().await;
        assert!(coordinator
            .registry()
            .get(&coordinator.config().service.name)
            .await
            .is_none());
    }
}
