//! Configuration service client
//!
//! Fetches configuration values and feature flags from the registered
//! configuration service, with layered TTL caching:
//! - Values and bulk snapshots: long TTL, served from one cache
//! - Flag verdicts and flag definitions: short TTL, separate caches
//!
//! Every read path degrades to a caller-supplied default instead of
//! returning an error. A missing value, an unreachable service, and a
//! malformed response all look the same to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use flotilla_core::config::ConfigServiceConfig;
use flotilla_core::{ConfigEntry, Environment, FeatureFlagEntry, FlagEvaluation};

use crate::discovery::DiscoveryClient;
use crate::error::{Error, Result};

/// Outcome of a single value fetch at one scope
enum ValueFetch {
    /// The service answered with a concrete value
    Found(Value),
    /// The service answered, but has no value at this scope
    Absent,
    /// Transport error, timeout, or an unexpected status
    Failed,
}

/// Outcome of a flag definition fetch
enum FlagFetch {
    Found(FeatureFlagEntry),
    Missing,
    Failed,
}

/// Caching client for the configuration service.
///
/// Values resolve through a scope chain: a service-scoped lookup falls back
/// to the global scope before the caller's default applies. The default is
/// cached only after a successful round trip proved the value absent;
/// failures leave the cache untouched so recovery is immediate.
pub struct ConfigClient {
    discovery: Arc<DiscoveryClient>,
    http: reqwest::Client,
    config_service: String,
    values: moka::future::Cache<String, Value>,
    flag_verdicts: moka::future::Cache<String, bool>,
    flag_entries: moka::future::Cache<String, FeatureFlagEntry>,
}

impl ConfigClient {
    pub fn new(discovery: Arc<DiscoveryClient>, settings: &ConfigServiceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(settings.fetch_timeout_seconds))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        let values = moka::future::CacheBuilder::new(settings.cache_capacity)
            .time_to_live(Duration::from_secs(settings.value_ttl_seconds))
            .build();
        let flag_verdicts = moka::future::CacheBuilder::new(settings.cache_capacity)
            .time_to_live(Duration::from_secs(settings.flag_ttl_seconds))
            .build();
        let flag_entries = moka::future::CacheBuilder::new(settings.cache_capacity)
            .time_to_live(Duration::from_secs(settings.flag_ttl_seconds))
            .build();

        Ok(Self {
            discovery,
            http,
            config_service: settings.service_name.clone(),
            values,
            flag_verdicts,
            flag_entries,
        })
    }

    /// Resolve a configuration value, falling back to `default`.
    ///
    /// With a `service_name` the service-scoped value wins; when the service
    /// has none, the same key is retried at global scope. Both the resolved
    /// value and a proven absence are cached under the requested scope.
    pub async fn get_value(
        &self,
        key: &str,
        environment: Environment,
        service_name: Option<&str>,
        default: Value,
    ) -> Value {
        let cache_key = format!(
            "value:{key}:{environment}:{}",
            service_name.unwrap_or("-")
        );
        if let Some(value) = self.values.get(&cache_key).await {
            tracing::debug!(key = %key, "Configuration value cache hit");
            return value;
        }

        let Some(base) = self.base_url().await else {
            return default;
        };

        let resolved = match self.fetch_value(&base, key, environment, service_name).await {
            ValueFetch::Found(value) => Some(value),
            ValueFetch::Absent if service_name.is_some() => {
                match self.fetch_value(&base, key, environment, None).await {
                    ValueFetch::Found(value) => Some(value),
                    ValueFetch::Absent => None,
                    ValueFetch::Failed => return default,
                }
            }
            ValueFetch::Absent => None,
            ValueFetch::Failed => return default,
        };

        let value = match resolved {
            Some(value) => value,
            None => {
                tracing::debug!(key = %key, "Configuration key absent at every scope, using default");
                default
            }
        };
        self.values.insert(cache_key, value.clone()).await;
        value
    }

    /// Fetch all values visible at a scope as one map.
    ///
    /// The whole snapshot is cached under the scope pair. Any failure
    /// yields an empty map.
    pub async fn get_bulk(
        &self,
        environment: Environment,
        service_name: Option<&str>,
    ) -> HashMap<String, Value> {
        let cache_key = format!("bulk:{environment}:{}", service_name.unwrap_or("-"));
        if let Some(Value::Object(map)) = self.values.get(&cache_key).await {
            tracing::debug!(environment = %environment, "Bulk configuration cache hit");
            return map.into_iter().collect();
        }

        let Some(base) = self.base_url().await else {
            return HashMap::new();
        };

        let url = format!("{base}/api/v1/configurations/bulk");
        let mut request = self
            .http
            .get(&url)
            .query(&[("environment", environment.to_string())]);
        if let Some(service) = service_name {
            request = request.query(&[("service_name", service)]);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<Value>().await {
                    Ok(body) => match body.get("configurations") {
                        Some(Value::Object(map)) => {
                            let map = map.clone();
                            self.values.insert(cache_key, Value::Object(map.clone())).await;
                            map.into_iter().collect()
                        }
                        _ => {
                            tracing::warn!("Bulk configuration response missing configurations map");
                            HashMap::new()
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to parse bulk configuration response");
                        HashMap::new()
                    }
                }
            }
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    "Bulk configuration fetch returned unexpected status"
                );
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Bulk configuration fetch failed");
                HashMap::new()
            }
        }
    }

    /// Fetch the full configuration entry for a key, metadata included.
    ///
    /// None covers both an unknown key and any fetch failure.
    pub async fn get_entry(
        &self,
        key: &str,
        environment: Environment,
        service_name: Option<&str>,
    ) -> Option<ConfigEntry> {
        let cache_key = format!(
            "entry:{key}:{environment}:{}",
            service_name.unwrap_or("-")
        );
        if let Some(raw) = self.values.get(&cache_key).await {
            if let Ok(entry) = serde_json::from_value::<ConfigEntry>(raw) {
                return Some(entry);
            }
        }

        let base = self.base_url().await?;
        let url = format!("{base}/api/v1/configurations/key/{key}");
        let mut request = self
            .http
            .get(&url)
            .query(&[("environment", environment.to_string())]);
        if let Some(service) = service_name {
            request = request.query(&[("service_name", service)]);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<ConfigEntry>().await {
                    Ok(entry) => {
                        if let Ok(raw) = serde_json::to_value(&entry) {
                            self.values.insert(cache_key, raw).await;
                        }
                        Some(entry)
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to parse configuration entry");
                        None
                    }
                }
            }
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => None,
            Ok(response) => {
                tracing::warn!(
                    key = %key,
                    status = %response.status(),
                    "Configuration entry fetch returned unexpected status"
                );
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Configuration entry fetch failed");
                None
            }
        }
    }

    /// Check whether a flag is enabled for a user.
    ///
    /// Verdicts are cached per (flag, user, environment). When the check
    /// endpoint is unreachable, a cached flag definition is evaluated
    /// locally; with neither, the flag reads as disabled.
    pub async fn is_feature_enabled(
        &self,
        flag_key: &str,
        user_id: Option<&str>,
        environment: Environment,
    ) -> bool {
        let cache_key = format!("{flag_key}:{}:{environment}", user_id.unwrap_or("-"));
        if let Some(verdict) = self.flag_verdicts.get(&cache_key).await {
            tracing::debug!(flag = %flag_key, "Flag verdict cache hit");
            return verdict;
        }

        match self.fetch_flag_check(flag_key, user_id, environment).await {
            Some(enabled) => {
                self.flag_verdicts.insert(cache_key, enabled).await;
                enabled
            }
            None => {
                let entry_key = format!("{flag_key}:{environment}");
                if let Some(entry) = self.flag_entries.get(&entry_key).await {
                    tracing::debug!(flag = %flag_key, "Evaluating flag from cached definition");
                    return entry.is_enabled_for(user_id, environment);
                }
                tracing::warn!(flag = %flag_key, "Flag check failed with no cached definition, treating as disabled");
                false
            }
        }
    }

    /// Evaluate a flag locally from its definition, with the deciding reason.
    ///
    /// The fetched definition is cached so later failures can still be
    /// answered from it.
    pub async fn evaluate_flag(
        &self,
        flag_key: &str,
        user_id: Option<&str>,
        environment: Environment,
    ) -> FlagEvaluation {
        let entry_key = format!("{flag_key}:{environment}");
        match self.fetch_flag_entry(flag_key, environment).await {
            FlagFetch::Found(entry) => {
                self.flag_entries.insert(entry_key, entry.clone()).await;
                entry.evaluate(user_id, environment, Utc::now())
            }
            FlagFetch::Missing => FlagEvaluation::not_found(flag_key),
            FlagFetch::Failed => {
                if let Some(entry) = self.flag_entries.get(&entry_key).await {
                    tracing::debug!(flag = %flag_key, "Evaluating flag from cached definition");
                    return entry.evaluate(user_id, environment, Utc::now());
                }
                FlagEvaluation {
                    flag_key: flag_key.to_string(),
                    enabled: false,
                    reason: "flag lookup failed".to_string(),
                    rollout_percentage: 0,
                }
            }
        }
    }

    /// Drop every cached value, verdict, and definition
    pub fn clear_cache(&self) {
        self.values.invalidate_all();
        self.flag_verdicts.invalidate_all();
        self.flag_entries.invalidate_all();
        tracing::debug!("Configuration caches cleared");
    }

    async fn base_url(&self) -> Option<String> {
        let base = self.discovery.discover(&self.config_service).await;
        if base.is_none() {
            tracing::warn!(
                service = %self.config_service,
                "Configuration service is not discoverable"
            );
        }
        base
    }

    async fn fetch_value(
        &self,
        base: &str,
        key: &str,
        environment: Environment,
        service_name: Option<&str>,
    ) -> ValueFetch {
        let url = format!("{base}/api/v1/configurations/value/{key}");
        let mut request = self
            .http
            .get(&url)
            .query(&[("environment", environment.to_string())]);
        if let Some(service) = service_name {
            request = request.query(&[("service_name", service)]);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<Value>().await {
                    Ok(body) => match body.get("value") {
                        Some(value) if !value.is_null() => ValueFetch::Found(value.clone()),
                        _ => ValueFetch::Absent,
                    },
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to parse configuration value");
                        ValueFetch::Failed
                    }
                }
            }
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                ValueFetch::Absent
            }
            Ok(response) => {
                tracing::warn!(
                    key = %key,
                    status = %response.status(),
                    "Configuration value fetch returned unexpected status"
                );
                ValueFetch::Failed
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Configuration value fetch failed");
                ValueFetch::Failed
            }
        }
    }

    async fn fetch_flag_check(
        &self,
        flag_key: &str,
        user_id: Option<&str>,
        environment: Environment,
    ) -> Option<bool> {
        let base = self.base_url().await?;
        let url = format!("{base}/api/v1/feature-flags/check/{flag_key}");
        let mut request = self
            .http
            .get(&url)
            .query(&[("environment", environment.to_string())]);
        if let Some(user) = user_id {
            request = request.query(&[("user_id", user)]);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("enabled").and_then(Value::as_bool)),
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                tracing::debug!(flag = %flag_key, "Flag is not defined");
                None
            }
            Ok(response) => {
                tracing::warn!(
                    flag = %flag_key,
                    status = %response.status(),
                    "Flag check returned unexpected status"
                );
                None
            }
            Err(e) => {
                tracing::warn!(flag = %flag_key, error = %e, "Flag check failed");
                None
            }
        }
    }

    async fn fetch_flag_entry(&self, flag_key: &str, environment: Environment) -> FlagFetch {
        let Some(base) = self.base_url().await else {
            return FlagFetch::Failed;
        };
        let url = format!("{base}/api/v1/feature-flags/key/{flag_key}");
        let request = self
            .http
            .get(&url)
            .query(&[("environment", environment.to_string())]);

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<FeatureFlagEntry>().await {
                    Ok(entry) => FlagFetch::Found(entry),
                    Err(e) => {
                        tracing::warn!(flag = %flag_key, error = %e, "Failed to parse flag definition");
                        FlagFetch::Failed
                    }
                }
            }
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                FlagFetch::Missing
            }
            Ok(response) => {
                tracing::warn!(
                    flag = %flag_key,
                    status = %response.status(),
                    "Flag definition fetch returned unexpected status"
                );
                FlagFetch::Failed
            }
            Err(e) => {
                tracing::warn!(flag = %flag_key, error = %e, "Flag definition fetch failed");
                FlagFetch::Failed
            }
        }
    }
}
