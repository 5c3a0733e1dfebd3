//! Feature flag entry and rollout evaluation
//!
//! Evaluation is a pure function of the entry's fields, the user id, and the
//! current time. The percentage rollout buckets users deterministically, so
//! the same (flag, user) pair always receives the same verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::environment::Environment;

/// A feature flag as served by the configuration service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlagEntry {
    pub flag_key: String,
    pub is_enabled: bool,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub service_name: Option<String>,
    /// 0 disables the rollout entirely, 100 covers every user
    #[serde(default)]
    pub rollout_percentage: u8,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of evaluating a flag for a user, with the deciding reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagEvaluation {
    pub flag_key: String,
    pub enabled: bool,
    pub reason: String,
    pub rollout_percentage: u8,
}

impl FlagEvaluation {
    /// Verdict for a flag the configuration service does not know about
    #[must_use]
    pub fn not_found(flag_key: impl Into<String>) -> Self {
        Self {
            flag_key: flag_key.into(),
            enabled: false,
            reason: "flag not found".to_string(),
            rollout_percentage: 0,
        }
    }
}

impl FeatureFlagEntry {
    #[must_use]
    pub fn new(flag_key: impl Into<String>, environment: Environment) -> Self {
        Self {
            flag_key: flag_key.into(),
            is_enabled: true,
            environment,
            service_name: None,
            rollout_percentage: 100,
            expires_at: None,
        }
    }

    /// Set the rollout percentage (values above 100 behave like 100)
    #[must_use]
    pub fn with_rollout(mut self, percentage: u8) -> Self {
        self.rollout_percentage = percentage;
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the flag has passed its expiry time
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }

    /// Deterministic rollout bucket in `0..100` for a (flag, user) pair.
    ///
    /// Hashes `"{flag_key}:{user_id}"`; without a user id the flag key alone
    /// is hashed, so userless evaluation is still reproducible.
    #[must_use]
    pub fn rollout_bucket(flag_key: &str, user_id: Option<&str>) -> u8 {
        let mut hasher = Sha256::new();
        match user_id {
            Some(user) => hasher.update(format!("{flag_key}:{user}").as_bytes()),
            None => hasher.update(flag_key.as_bytes()),
        }
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        #[allow(clippy::cast_possible_truncation)]
        {
            (u64::from_be_bytes(prefix) % 100) as u8
        }
    }

    /// Evaluate the flag for a user at a given instant.
    ///
    /// Order of precedence: environment scope, expiry, the enabled switch,
    /// then the percentage rollout.
    #[must_use]
    pub fn evaluate(
        &self,
        user_id: Option<&str>,
        environment: Environment,
        now: DateTime<Utc>,
    ) -> FlagEvaluation {
        let verdict = |enabled: bool, reason: String| FlagEvaluation {
            flag_key: self.flag_key.clone(),
            enabled,
            reason,
            rollout_percentage: self.rollout_percentage,
        };

        if !self.environment.matches(environment) {
            return verdict(false, format!("flag not enabled for environment {environment}"));
        }
        if self.is_expired_at(now) {
            return verdict(false, "flag has expired".to_string());
        }
        if !self.is_enabled {
            return verdict(false, "flag is disabled".to_string());
        }
        if self.rollout_percentage >= 100 {
            return verdict(true, "rollout covers all users".to_string());
        }
        if self.rollout_percentage == 0 {
            return verdict(false, "rollout covers no users".to_string());
        }

        let bucket = Self::rollout_bucket(&self.flag_key, user_id);
        if bucket < self.rollout_percentage {
            verdict(
                true,
                format!("user bucket {bucket} within {}% rollout", self.rollout_percentage),
            )
        } else {
            verdict(
                false,
                format!("user bucket {bucket} outside {}% rollout", self.rollout_percentage),
            )
        }
    }

    /// Boolean shorthand over [`FeatureFlagEntry::evaluate`] using the current time
    #[must_use]
    pub fn is_enabled_for(&self, user_id: Option<&str>, environment: Environment) -> bool {
        self.evaluate(user_id, environment, Utc::now()).enabled
    }
}
