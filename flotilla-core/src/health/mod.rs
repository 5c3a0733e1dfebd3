//! Service health checks and aggregation

pub mod builtin;
pub mod check;
pub mod manager;

pub use builtin::tcp_connect_check;
pub use check::{HealthCheck, HealthCheckResult, HealthStatus, ProbeReport, DEFAULT_CHECK_TIMEOUT};
pub use manager::{HealthCheckManager, HealthSummary, OverallHealth, DEFAULT_CACHE_TTL};
