//! Deployment environment scope

use serde::{Deserialize, Serialize};

/// Deployment environment a configuration entry or feature flag is scoped to.
///
/// `All` matches every environment on the server side; a record scoped to a
/// concrete environment only matches requests for that same environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
    All,
}

impl Environment {
    /// Whether a record scoped to `self` applies to a request for `requested`.
    #[must_use]
    pub fn matches(self, requested: Environment) -> bool {
        self == requested || self == Environment::All
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
            Self::All => write!(f, "all"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            "all" => Ok(Self::All),
            _ => Err(anyhow::anyhow!("Invalid environment: {s}")),
        }
    }
}
