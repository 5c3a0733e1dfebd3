//! Resilient service-to-service HTTP client
//!
//! Resolves the target through discovery, then sends the request under a
//! per-target circuit breaker with exponential backoff retry (via `backon`)
//! for transient failures. Every logical request carries one correlation id
//! across all of its retry attempts.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use serde_json::Value;

use flotilla_core::breaker::{BreakerError, CircuitBreakerRegistry};
use flotilla_core::config::HttpClientConfig;
use flotilla_core::logging::generate_correlation_id;

use crate::discovery::DiscoveryClient;
use crate::error::{Error, Result};

/// JSON-over-HTTP client for calls between registered services.
///
/// One retried request counts as a single breaker outcome, so the failure
/// threshold measures logical calls rather than individual attempts.
pub struct ServiceClient {
    discovery: Arc<DiscoveryClient>,
    breakers: Arc<CircuitBreakerRegistry>,
    http: reqwest::Client,
    retries: u32,
    retry_min_delay: Duration,
    retry_max_delay: Duration,
}

impl ServiceClient {
    pub fn new(
        discovery: Arc<DiscoveryClient>,
        breakers: Arc<CircuitBreakerRegistry>,
        settings: &HttpClientConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .user_agent(concat!("flotilla/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            discovery,
            breakers,
            http,
            retries: settings.retries,
            retry_min_delay: Duration::from_millis(settings.retry_min_delay_ms),
            retry_max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        })
    }

    /// GET a JSON document from another service
    pub async fn get_json(&self, target: &str, path: &str) -> Result<Value> {
        self.request(reqwest::Method::GET, target, path, None).await
    }

    /// POST a JSON body to another service and return the JSON response
    pub async fn post_json(&self, target: &str, path: &str, body: &Value) -> Result<Value> {
        self.request(reqwest::Method::POST, target, path, Some(body))
            .await
    }

    async fn request(
        &self,
        method: reqwest::Method,
        target: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self
            .discovery
            .resolve_url(target, path)
            .await
            .ok_or_else(|| Error::Unavailable(format!("service '{target}' is not discoverable")))?;

        let breaker = self.breakers.breaker(target);
        let result = breaker
            .call(|| self.request_with_retry(method, target, &url, body))
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(BreakerError::Open { target }) => Err(Error::CircuitOpen { target }),
            Err(BreakerError::Inner(err)) => Err(err),
        }
    }

    /// Send with exponential backoff retry for transient failures
    async fn request_with_retry(
        &self,
        method: reqwest::Method,
        target: &str,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let correlation_id = generate_correlation_id();
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_min_delay)
            .with_max_delay(self.retry_max_delay)
            .with_max_times(self.retries as usize)
            .with_jitter()
            .build();

        let mut last_err = None;
        for delay in std::iter::once(Duration::ZERO).chain(backoff) {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }

            match self
                .send_once(method.clone(), target, url, &correlation_id, body)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_transient() {
                        return Err(e);
                    }
                    tracing::warn!(
                        service = %target,
                        correlation_id = %correlation_id,
                        error = %e,
                        "Request attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Request("retry budget exhausted".to_string())))
    }

    async fn send_once(
        &self,
        method: reqwest::Method,
        target: &str,
        url: &str,
        correlation_id: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let mut request = self
            .http
            .request(method, url)
            .header("X-Correlation-ID", correlation_id);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                target: target.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
