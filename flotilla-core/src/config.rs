use config::{Config as ConfigBuilder, ConfigError, Environment as EnvSource, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::Environment;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub discovery: DiscoveryConfig,
    pub health: HealthConfig,
    pub breaker: CircuitBreakerConfig,
    pub config_service: ConfigServiceConfig,
    pub http: HttpClientConfig,
    pub logging: LoggingConfig,
}

/// Identity of the service embedding this crate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Host other services use to reach this one
    pub host: String,
    pub port: u16,
    pub health_path: String,
    pub environment: Environment,
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            host: "localhost".to_string(),
            port: 8000,
            health_path: "/health".to_string(),
            environment: Environment::Development,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Registry and discovery tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum heartbeat age for a record to be considered alive
    pub healthy_window_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub sweep_interval_seconds: u64,
    /// Heartbeat age past which the sweep evicts a record
    pub stale_after_seconds: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            healthy_window_seconds: 30,
            probe_timeout_seconds: 5,
            heartbeat_interval_seconds: 10,
            sweep_interval_seconds: 30,
            stale_after_seconds: 60,
        }
    }
}

/// Health check manager tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub cache_ttl_seconds: u64,
    pub check_timeout_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 30,
            check_timeout_seconds: 5,
        }
    }
}

/// Circuit breaker tuning for outbound calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_seconds: 60,
        }
    }
}

/// Where and how to fetch runtime configuration and feature flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigServiceConfig {
    /// Registered name of the configuration service
    pub service_name: String,
    pub value_ttl_seconds: u64,
    /// Flags must propagate faster than plain configuration
    pub flag_ttl_seconds: u64,
    pub fetch_timeout_seconds: u64,
    pub cache_capacity: u64,
}

impl Default for ConfigServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "config-service".to_string(),
            value_ttl_seconds: 300,
            flag_ttl_seconds: 60,
            fetch_timeout_seconds: 10,
            cache_capacity: 10_000,
        }
    }
}

/// Outbound service-to-service HTTP tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub request_timeout_seconds: u64,
    /// Retry attempts for transient failures, not counting the first try
    pub retries: u32,
    pub retry_min_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            retries: 3,
            retry_min_delay_ms: 200,
            retry_max_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (FLOTILLA_SERVICE_HOST, etc.)
        builder = builder.add_source(
            EnvSource::with_prefix("FLOTILLA")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Base URL other services use to reach this one
    #[must_use]
    pub fn service_base_url(&self) -> String {
        format!("http://{}:{}", self.service.host, self.service.port)
    }

    /// This service's own health endpoint URL
    #[must_use]
    pub fn service_health_url(&self) -> String {
        format!("{}{}", self.service_base_url(), self.service.health_path)
    }
}
