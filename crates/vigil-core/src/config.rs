//! Engine configuration.
//!
//! Loaded from YAML, then overridden from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `VIGIL_CONCURRENCY` | `concurrency` |
//! | `VIGIL_CONTROL_TIMEOUT` | `control_timeout_secs` |
//! | `VIGIL_MAX_RETRIES` | `retry.max_attempts` |
//! | `VIGIL_ON_DUPLICATE` | `on_duplicate` |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_evidence::{CollectorOptions, RetryPolicy};
use vigil_registry::DuplicatePolicy;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Controls evaluated at the same time.
    pub concurrency: usize,
    /// Per-control evaluation deadline.
    pub control_timeout_secs: u64,
    /// Time in-flight evaluations get to finish after cancellation.
    pub cancel_grace_secs: u64,
    /// Warm every distinct query before evaluation starts.
    pub prefetch: bool,
    /// Copy the snapshots used into the report.
    pub embed_evidence: bool,
    /// Continuation pages followed per query.
    pub max_pages: u32,
    pub on_duplicate: DuplicatePolicy,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            control_timeout_secs: 30,
            cancel_grace_secs: 5,
            prefetch: false,
            embed_evidence: false,
            max_pages: CollectorOptions::default().max_pages,
            on_duplicate: DuplicatePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VIGIL_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("VIGIL_CONCURRENCY") {
            self.concurrency = parse_env("VIGIL_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("VIGIL_CONTROL_TIMEOUT") {
            self.control_timeout_secs = parse_env("VIGIL_CONTROL_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("VIGIL_MAX_RETRIES") {
            self.retry.max_attempts = parse_env("VIGIL_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("VIGIL_ON_DUPLICATE") {
            self.on_duplicate = v.parse().map_err(|message| ConfigError::Env {
                var: "VIGIL_ON_DUPLICATE",
                value: v.clone(),
                message,
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.control_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "control_timeout_secs must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::Invalid("max_pages must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn collector_options(&self) -> CollectorOptions {
        CollectorOptions {
            retry: self.retry,
            max_pages: self.max_pages,
        }
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        value: value.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.control_timeout(), Duration::from_secs(30));
        assert_eq!(config.cancel_grace(), Duration::from_secs(5));
        assert_eq!(config.on_duplicate, DuplicatePolicy::Reject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.yaml");
        std::fs::write(
            &path,
            "concurrency: 2\non_duplicate: keep_last\nretry:\n  max_attempts: 2\n",
        )
        .unwrap();

        let config = EngineConfig::from_path(&path).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.on_duplicate, DuplicatePolicy::KeepLast);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.control_timeout_secs, 30);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.yaml");
        std::fs::write(&path, "concurency: 2\n").unwrap();
        assert!(matches!(
            EngineConfig::from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default()
            .with_overrides_from(lookup(&[
                ("VIGIL_CONCURRENCY", "3"),
                ("VIGIL_CONTROL_TIMEOUT", "5"),
                ("VIGIL_MAX_RETRIES", "1"),
                ("VIGIL_ON_DUPLICATE", "keep-all"),
            ]))
            .unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.control_timeout_secs, 5);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.on_duplicate, DuplicatePolicy::KeepAll);
    }

    #[test]
    fn test_invalid_env_and_zero_values() {
        let err = EngineConfig::default()
            .with_overrides_from(lookup(&[("VIGIL_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "VIGIL_CONCURRENCY", .. }));

        let err = EngineConfig::default()
            .with_overrides_from(lookup(&[("VIGIL_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
