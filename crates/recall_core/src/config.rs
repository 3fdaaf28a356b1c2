//! Engine configuration values and validation.
//!
//! # Responsibility
//! - Hold scheduling policy constants and timer tuning knobs.
//! - Load optional JSON config files with per-field defaults.
//!
//! # Invariants
//! - A config accepted by `validate()` keeps intervals positive and
//!   non-decreasing across reviews.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * MILLIS_PER_SECOND;

/// Spaced-repetition growth policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval assigned at creation and on the first review.
    pub initial_interval_ms: i64,
    /// Multiplier applied to the current interval on each later review.
    pub growth_factor: f64,
    /// Ceiling for any computed interval.
    pub max_interval_ms: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: MILLIS_PER_DAY,
            growth_factor: 2.0,
            max_interval_ms: 180 * MILLIS_PER_DAY,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_interval_ms <= 0 {
            return Err(ConfigError::Invalid(format!(
                "initial_interval_ms must be positive, got {}",
                self.initial_interval_ms
            )));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "max_interval_ms ({}) must be >= initial_interval_ms ({})",
                self.max_interval_ms, self.initial_interval_ms
            )));
        }
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "growth_factor must be a finite value >= 1.0, got {}",
                self.growth_factor
            )));
        }
        Ok(())
    }
}

/// Notification timer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Minimum gap between two emissions for the same still-due task.
    pub dedup_window_ms: i64,
    /// Delay before retrying a failed delivery.
    pub retry_delay_ms: i64,
    /// Period of the full index-vs-store reconciliation.
    pub reconcile_interval_ms: i64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 60 * MILLIS_PER_SECOND,
            retry_delay_ms: 30 * MILLIS_PER_SECOND,
            reconcile_interval_ms: 5 * 60 * MILLIS_PER_SECOND,
        }
    }
}

impl TimerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dedup_window_ms <= 0 {
            return Err(ConfigError::Invalid(format!(
                "dedup_window_ms must be positive, got {}",
                self.dedup_window_ms
            )));
        }
        if self.retry_delay_ms <= 0 {
            return Err(ConfigError::Invalid(format!(
                "retry_delay_ms must be positive, got {}",
                self.retry_delay_ms
            )));
        }
        if self.reconcile_interval_ms <= 0 {
            return Err(ConfigError::Invalid(format!(
                "reconcile_interval_ms must be positive, got {}",
                self.reconcile_interval_ms
            )));
        }
        Ok(())
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub timer: TimerConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.timer.validate()
    }

    /// Parses and validates a JSON document. Missing keys keep defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.display().to_string(),
            source: err,
        })?;
        Self::from_json_str(&raw)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid(String),
    Parse(serde_json::Error),
    Read {
        path: String,
        source: std::io::Error,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
            Self::Parse(err) => write!(f, "config is not valid JSON: {err}"),
            Self::Read { path, source } => write!(f, "failed to read config `{path}`: {source}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invalid(_) => None,
            Self::Parse(err) => Some(err),
            Self::Read { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, SchedulerConfig, MILLIS_PER_DAY};

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.scheduler.initial_interval_ms, MILLIS_PER_DAY);
        assert_eq!(config.scheduler.max_interval_ms, 180 * MILLIS_PER_DAY);
        assert_eq!(config.timer.dedup_window_ms, 60_000);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{"scheduler": {"growth_factor": 2.5}}"#).unwrap();
        assert_eq!(config.scheduler.growth_factor, 2.5);
        assert_eq!(config.scheduler.initial_interval_ms, MILLIS_PER_DAY);
        assert_eq!(config.timer, EngineConfig::default().timer);
    }

    #[test]
    fn shrinking_growth_factor_is_rejected() {
        let config = SchedulerConfig {
            growth_factor: 0.5,
            ..SchedulerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn max_below_initial_is_rejected() {
        let err = EngineConfig::from_json_str(
            r#"{"scheduler": {"initial_interval_ms": 1000, "max_interval_ms": 10}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_interval_ms"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recall.json");
        std::fs::write(&path, r#"{"timer": {"dedup_window_ms": 5000}}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.timer.dedup_window_ms, 5_000);

        std::fs::write(&path, r#"{"timer": {"dedup_window_ms": 0}}"#).unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));

        let missing = EngineConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
