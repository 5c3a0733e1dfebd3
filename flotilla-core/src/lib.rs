pub mod breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod models;

pub use breaker::{BreakerError, BreakerState, CircuitBreaker, CircuitBreakerRegistry};
pub use config::Config;
pub use error::{Error, Result};
pub use health::{
    HealthCheck, HealthCheckManager, HealthCheckResult, HealthStatus, OverallHealth, ProbeReport,
};
pub use models::{ConfigEntry, Environment, FeatureFlagEntry, FlagEvaluation};
