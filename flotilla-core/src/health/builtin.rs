//! Ready-made health checks

use serde_json::Value;

use super::check::{HealthCheck, ProbeReport};

/// TCP reachability check against `host:port`.
///
/// Useful for databases and peers that expose no HTTP health endpoint. The
/// dial is bounded by the check's own timeout. A refused or failed connection
/// is an unhealthy report, not a probe error.
#[must_use]
pub fn tcp_connect_check(name: impl Into<String>, addr: impl Into<String>) -> HealthCheck {
    let addr = addr.into();
    HealthCheck::new(name, move || {
        let addr = addr.clone();
        async move {
            match tokio::net::TcpStream::connect(&addr).await {
                Ok(_) => Ok(ProbeReport::healthy(format!("connected to {addr}"))),
                Err(err) => Ok(ProbeReport::unhealthy(format!("connect to {addr} failed"))
                    .with_detail("error", Value::String(err.to_string()))),
            }
        }
    })
}
