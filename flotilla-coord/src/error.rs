//! Error types for the coordination crate

use thiserror::Error;

/// Coordination error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Circuit breaker for '{target}' is open")]
    CircuitOpen { target: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected status {status} from '{target}'")]
    UnexpectedStatus { target: String, status: u16 },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for coordination operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a retry could plausibly succeed.
    ///
    /// Server errors and transport failures are transient; discovery misses,
    /// open breakers, and client errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500,
            Self::Configuration(_)
            | Self::Unavailable(_)
            | Self::CircuitOpen { .. }
            | Self::Serialization(_) => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}
