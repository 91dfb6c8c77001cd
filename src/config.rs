//! Service configuration.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::workflow::WorkflowPolicy;

const STORAGE_TIMEOUT_VAR: &str = "MAKER_CHECKER_STORAGE_TIMEOUT_MS";
const MAX_RETRIES_VAR: &str = "MAKER_CHECKER_MAX_RETRIES";
const ADMIN_MAY_FINALIZE_VAR: &str = "MAKER_CHECKER_ADMIN_MAY_FINALIZE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Knobs for [`WorkflowService`](crate::WorkflowService).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Upper bound on one unit of work, from `begin` to `commit`.
    pub storage_timeout: Duration,
    /// How many times a command is re-run after a concurrent modification.
    pub max_retries: u32,
    pub policy: WorkflowPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(5),
            max_retries: 3,
            policy: WorkflowPolicy::default(),
        }
    }
}

impl WorkflowConfig {
    /// Defaults overridden by `MAKER_CHECKER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(STORAGE_TIMEOUT_VAR) {
            let millis = value.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                var: STORAGE_TIMEOUT_VAR,
                value: value.clone(),
            })?;
            config.storage_timeout = Duration::from_millis(millis);
        }

        if let Some(value) = lookup(MAX_RETRIES_VAR) {
            config.max_retries = value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: MAX_RETRIES_VAR,
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup(ADMIN_MAY_FINALIZE_VAR) {
            config.policy.admin_may_finalize = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: ADMIN_MAY_FINALIZE_VAR,
                        value,
                    });
                }
            };
        }

        Ok(config)
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| vars.get(var).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = WorkflowConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WorkflowConfig::default());
        assert!(!config.policy.admin_may_finalize);
    }

    #[test]
    fn overrides_are_applied() {
        let config = WorkflowConfig::from_lookup(lookup(&[
            (STORAGE_TIMEOUT_VAR, "250"),
            (MAX_RETRIES_VAR, "0"),
            (ADMIN_MAY_FINALIZE_VAR, "true"),
        ]))
        .unwrap();
        assert_eq!(config.storage_timeout, Duration::from_millis(250));
        assert_eq!(config.max_retries, 0);
        assert!(config.policy.admin_may_finalize);
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let err = WorkflowConfig::from_lookup(lookup(&[(MAX_RETRIES_VAR, "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: MAX_RETRIES_VAR,
                value: "many".to_string()
            }
        );
    }
}
