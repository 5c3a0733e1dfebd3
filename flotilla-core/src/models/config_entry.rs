//! Configuration entry snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::environment::Environment;

/// A single configuration entry as served by the configuration service.
///
/// Cached copies are immutable snapshots; freshness is enforced by the cache
/// layer, not by the entry itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub config_key: String,
    pub config_value: Value,
    #[serde(default)]
    pub environment: Environment,
    /// `None` means the entry is global (applies to every service).
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Sensitive values are masked by the server unless explicitly requested.
    #[serde(default)]
    pub is_sensitive: bool,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl ConfigEntry {
    #[must_use]
    pub fn new(config_key: impl Into<String>, config_value: Value, environment: Environment) -> Self {
        Self {
            config_key: config_key.into(),
            config_value,
            environment,
            service_name: None,
            description: None,
            is_sensitive: false,
            version: 1,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    /// Scope the entry to a single service
    #[must_use]
    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Whether the entry is global (not scoped to any service)
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.service_name.is_none()
    }

    /// Whether the entry applies to a `(environment, service)` request.
    ///
    /// Global entries apply to every service; `environment` follows the usual
    /// scope rule (exact match or the entry is scoped `all`).
    #[must_use]
    pub fn applies_to(&self, environment: Environment, service_name: Option<&str>) -> bool {
        if !self.environment.matches(environment) {
            return false;
        }
        match (&self.service_name, service_name) {
            (None, _) => true,
            (Some(own), Some(requested)) => own == requested,
            (Some(_), None) => false,
        }
    }
}
