//! Health check manager and status aggregation
//!
//! Runs registered checks concurrently, caches their results, and folds them
//! into a single service-level status. Critical checks can fail the whole
//! service; non-critical ones can only degrade it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::check::{HealthCheck, HealthCheckResult, HealthStatus};

/// Default freshness window for cached check results
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Count breakdown over one aggregation round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub total_duration_ms: u64,
}

/// Aggregated service health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverallHealth {
    pub service: String,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: HashMap<String, HealthCheckResult>,
    pub summary: HealthSummary,
}

impl OverallHealth {
    /// Whether the service can still take traffic.
    ///
    /// Degraded still means serviceable; readiness endpoints map this to a
    /// 2xx response and only `unhealthy` to a non-2xx one.
    #[must_use]
    pub fn is_serviceable(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Owns a service's named health checks and their cached results
pub struct HealthCheckManager {
    service_name: String,
    cache_ttl: Duration,
    checks: RwLock<HashMap<String, Arc<HealthCheck>>>,
    cached: RwLock<HashMap<String, HealthCheckResult>>,
}

impl HealthCheckManager {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            checks: RwLock::new(HashMap::new()),
            cached: RwLock::new(HashMap::new()),
        }
    }

    /// Override the result cache TTL
    #[must_use]
    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Register a check, replacing any previous one with the same name
    pub async fn add_check(&self, check: HealthCheck) {
        let name = check.name().to_string();
        tracing::debug!(check = %name, critical = check.is_critical(), "Registered health check");
        self.checks.write().await.insert(name, Arc::new(check));
    }

    /// Remove a check and its cached result; whether it existed
    pub async fn remove_check(&self, name: &str) -> bool {
        self.cached.write().await.remove(name);
        self.checks.write().await.remove(name).is_some()
    }

    /// Names of all registered checks
    pub async fn check_names(&self) -> Vec<String> {
        self.checks.read().await.keys().cloned().collect()
    }

    /// Drop all cached results, forcing the next run to execute probes
    pub async fn clear_cache(&self) {
        self.cached.write().await.clear();
    }

    /// Run one check by name, honoring the result cache.
    ///
    /// Returns `None` for an unknown name. With `use_cache`, a result younger
    /// than the cache TTL is returned without re-probing.
    pub async fn run_check(&self, name: &str, use_cache: bool) -> Option<HealthCheckResult> {
        let check = self.checks.read().await.get(name).cloned()?;

        if use_cache {
            if let Some(cached) = self.cached.read().await.get(name) {
                if self.is_fresh(cached) {
                    return Some(cached.clone());
                }
            }
        }

        let result = check.execute().await;
        if result.status != HealthStatus::Healthy {
            tracing::warn!(
                check = %name,
                status = %result.status,
                message = %result.message,
                "Health check did not pass"
            );
        }
        self.cached
            .write()
            .await
            .insert(name.to_string(), result.clone());
        Some(result)
    }

    /// Run every registered check concurrently.
    ///
    /// Each check is bounded by its own timeout; one failing or slow check
    /// never blocks the others. The result map is unordered.
    pub async fn run_all(&self, use_cache: bool) -> HashMap<String, HealthCheckResult> {
        let names: Vec<String> = self.checks.read().await.keys().cloned().collect();

        let results = join_all(names.iter().map(|name| self.run_check(name, use_cache))).await;

        results
            .into_iter()
            .flatten()
            .map(|result| (result.name.clone(), result))
            .collect()
    }

    /// Run all checks and fold them into one service-level verdict.
    ///
    /// Any critical check unhealthy makes the service unhealthy. A degraded
    /// critical check, or any unhealthy non-critical check, only degrades it.
    pub async fn overall_health(&self, use_cache: bool) -> OverallHealth {
        let results = self.run_all(use_cache).await;
        let critical: HashSet<String> = {
            let checks = self.checks.read().await;
            checks
                .iter()
                .filter(|(_, check)| check.is_critical())
                .map(|(name, _)| name.clone())
                .collect()
        };

        let critical_unhealthy = results
            .iter()
            .any(|(name, r)| critical.contains(name) && r.status == HealthStatus::Unhealthy);
        let critical_degraded = results
            .iter()
            .any(|(name, r)| critical.contains(name) && r.status == HealthStatus::Degraded);
        let noncritical_unhealthy = results
            .iter()
            .any(|(name, r)| !critical.contains(name) && r.status == HealthStatus::Unhealthy);

        let status = if critical_unhealthy {
            HealthStatus::Unhealthy
        } else if critical_degraded || noncritical_unhealthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let summary = HealthSummary {
            total: results.len(),
            healthy: Self::count(&results, HealthStatus::Healthy),
            degraded: Self::count(&results, HealthStatus::Degraded),
            unhealthy: Self::count(&results, HealthStatus::Unhealthy),
            total_duration_ms: results.values().map(|r| r.duration_ms).sum(),
        };

        OverallHealth {
            service: self.service_name.clone(),
            status,
            timestamp: Utc::now(),
            checks: results,
            summary,
        }
    }

    fn count(results: &HashMap<String, HealthCheckResult>, status: HealthStatus) -> usize {
        results.values().filter(|r| r.status == status).count()
    }

    fn is_fresh(&self, result: &HealthCheckResult) -> bool {
        result.age().to_std().is_ok_and(|age| age < self.cache_ttl)
    }
}
