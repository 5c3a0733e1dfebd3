//! Health check definitions and probe execution

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default budget for a single probe execution
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health state of a single check or of a whole service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// What a probe reports when it completes on its own.
///
/// Probes that cannot even produce a report return `Err`; the executor turns
/// both errors and timeouts into unhealthy results, so callers always get a
/// uniform [`HealthCheckResult`] back.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub status: HealthStatus,
    pub message: String,
    pub details: HashMap<String, Value>,
}

impl ProbeReport {
    #[must_use]
    pub fn healthy(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Healthy, message)
    }

    #[must_use]
    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded, message)
    }

    #[must_use]
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy, message)
    }

    #[must_use]
    pub fn with_status(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Attach a detail entry
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Result of one check execution
///
/// Cached results keep their original `timestamp`, so consumers can compute
/// staleness themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, Value>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Age of this result relative to now
    #[must_use]
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.timestamp)
    }
}

type ProbeFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<ProbeReport>> + Send + Sync>;

/// A named probe with its own timeout and criticality.
///
/// A critical check failing marks the whole service unhealthy; a non-critical
/// one only degrades it. Checks are owned by a single
/// [`HealthCheckManager`](super::manager::HealthCheckManager).
pub struct HealthCheck {
    name: String,
    probe: ProbeFn,
    timeout: Duration,
    critical: bool,
}

impl HealthCheck {
    /// Create a check from an async probe returning a [`ProbeReport`]
    pub fn new<F, Fut>(name: impl Into<String>, probe: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<ProbeReport>> + Send + 'static,
    {
        Self {
            name: name.into(),
            probe: Box::new(move || Box::pin(probe())),
            timeout: DEFAULT_CHECK_TIMEOUT,
            critical: true,
        }
    }

    /// Adapt a boolean probe: `true` maps to healthy, `false` to unhealthy
    pub fn from_bool<F, Fut>(name: impl Into<String>, probe: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        Self::new(name, move || {
            let outcome = probe();
            async move {
                if outcome.await {
                    Ok(ProbeReport::healthy("check passed"))
                } else {
                    Ok(ProbeReport::unhealthy("check failed"))
                }
            }
        })
    }

    /// Set the probe timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mark the check critical or non-critical (default: critical)
    #[must_use]
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the probe under its timeout.
    ///
    /// Never returns an error and never outlives the timeout: a probe that
    /// exceeds its budget or fails is reported as unhealthy.
    pub(crate) async fn execute(&self) -> HealthCheckResult {
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.timeout, (self.probe)()).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let timestamp = Utc::now();

        match outcome {
            Ok(Ok(report)) => HealthCheckResult {
                name: self.name.clone(),
                status: report.status,
                message: report.message,
                details: report.details,
                duration_ms,
                timestamp,
            },
            Ok(Err(err)) => {
                let mut details = HashMap::new();
                details.insert("error".to_string(), Value::String(err.to_string()));
                HealthCheckResult {
                    name: self.name.clone(),
                    status: HealthStatus::Unhealthy,
                    message: format!("Check failed: {err}"),
                    details,
                    duration_ms,
                    timestamp,
                }
            }
            Err(_) => HealthCheckResult {
                name: self.name.clone(),
                status: HealthStatus::Unhealthy,
                message: format!("Check timed out after {:?}", self.timeout),
                details: HashMap::new(),
                duration_ms,
                timestamp,
            },
        }
    }
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}
