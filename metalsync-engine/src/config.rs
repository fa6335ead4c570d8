//! Engine configuration.
//!
//! The front end hands the engine a JSON provider block; every field is
//! optional and falls back to the defaults below. Durations are expressed in
//! milliseconds (`*_ms` keys).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::poll::PollPolicy;
use crate::retry::RetryPolicy;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunables for a convergence engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry for individual create/update/delete/unassign/read calls.
    pub call_retry: RetryPolicy,
    /// Waiting for a new server to become active.
    pub provision: PollPolicy,
    /// Waiting for a reinstalled server to be deployed.
    pub reinstall: PollPolicy,
    /// Length of the root password generated for reinstalls.
    pub password_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_retry: RetryPolicy::default(),
            provision: PollPolicy::default(),
            reinstall: PollPolicy {
                initial_interval: Duration::from_secs(10),
                multiplier: 1.5,
                max_interval: Duration::from_secs(60),
                max_elapsed: Duration::from_secs(40 * 60),
            },
            password_length: 24,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON provider block.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "call_retry.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        validate_poll("provision", &self.provision)?;
        validate_poll("reinstall", &self.reinstall)?;
        if self.password_length < 12 {
            return Err(ConfigError::Invalid {
                field: "password_length",
                reason: format!("{} is too short, minimum is 12", self.password_length),
            });
        }
        Ok(())
    }
}

fn validate_poll(field: &'static str, policy: &PollPolicy) -> Result<(), ConfigError> {
    if policy.initial_interval.is_zero() {
        return Err(ConfigError::Invalid {
            field,
            reason: "initial_interval_ms must be greater than zero".into(),
        });
    }
    if policy.max_interval < policy.initial_interval {
        return Err(ConfigError::Invalid {
            field,
            reason: "max_interval_ms must not be below initial_interval_ms".into(),
        });
    }
    if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("multiplier {} must be a finite number >= 1", policy.multiplier),
        });
    }
    if policy.max_elapsed.is_zero() {
        return Err(ConfigError::Invalid {
            field,
            reason: "max_elapsed_ms must be greater than zero".into(),
        });
    }
    Ok(())
}

/// Per-pass overrides of the poll budgets, supplied by the front end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default, with = "duration_ms::option")]
    pub create: Option<Duration>,
    #[serde(default, with = "duration_ms::option")]
    pub update: Option<Duration>,
    #[serde(default, with = "duration_ms::option")]
    pub delete: Option<Duration>,
}

/// Serde helper: `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.provision.max_elapsed, Duration::from_secs(1800));
        assert_eq!(config.call_retry.max_attempts, 4);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "provision": { "max_elapsed_ms": 600000 }, "call_retry": { "max_attempts": 2 } }"#,
        )
        .unwrap();

        assert_eq!(config.provision.max_elapsed, Duration::from_secs(600));
        assert_eq!(config.provision.initial_interval, Duration::from_secs(5));
        assert_eq!(config.call_retry.max_attempts, 2);
        assert_eq!(config.reinstall, EngineConfig::default().reinstall);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = EngineConfig::from_json(r#"{ "reinstall": { "initial_interval_ms": 0 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("reinstall"));
    }

    #[test]
    fn test_rejects_shrinking_multiplier() {
        let err =
            EngineConfig::from_json(r#"{ "provision": { "multiplier": 0.5 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "provision", .. }));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_timeouts_from_json() {
        let timeouts: Timeouts = serde_json::from_str(r#"{ "create": 120000 }"#).unwrap();
        assert_eq!(timeouts.create, Some(Duration::from_secs(120)));
        assert_eq!(timeouts.update, None);
    }
}
