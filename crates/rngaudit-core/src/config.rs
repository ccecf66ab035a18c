//! Run configuration.
//!
//! Every field is optional in JSON; unset values fall back to the battery's own
//! settings or the engine defaults.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rngaudit_tests::{Strategy, TestParams};
use serde::{Deserialize, Serialize};

use crate::entropy::MAX_MARKOV_ORDER;
use crate::error::ValidationError;
use crate::executor::default_workers;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Overrides the battery's α.
    pub significance_level: Option<f64>,
    /// Overrides the battery's sequence count.
    pub sequences_for_second_order: Option<usize>,
    /// Worker threads; defaults to available parallelism.
    pub worker_count: Option<usize>,
    pub timeout_secs: Option<f64>,
    /// Core tests allowed to lack a usable result before the verdict turns inconclusive.
    pub error_tolerance: usize,
    /// Entry label → parameters merged over the battery's.
    pub overrides: BTreeMap<String, TestParams>,
    pub strategy: Option<Strategy>,
    pub estimate_entropy: bool,
    pub markov_order: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            significance_level: None,
            sequences_for_second_order: None,
            worker_count: None,
            timeout_secs: None,
            error_tolerance: 0,
            overrides: BTreeMap::new(),
            strategy: None,
            estimate_entropy: true,
            markov_order: 1,
        }
    }
}

impl ValidationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(alpha) = self.significance_level {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(ValidationError::InvalidConfig(format!(
                    "significance_level {alpha} not in (0, 1)"
                )));
            }
        }
        if self.sequences_for_second_order == Some(0) {
            return Err(ValidationError::InvalidConfig(
                "sequences_for_second_order must be at least 1".to_string(),
            ));
        }
        if self.worker_count == Some(0) {
            return Err(ValidationError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if let Some(t) = self.timeout_secs {
            if !(t.is_finite() && t > 0.0) {
                return Err(ValidationError::InvalidConfig(format!(
                    "timeout_secs {t} must be positive"
                )));
            }
            if Duration::try_from_secs_f64(t).is_err() {
                return Err(ValidationError::InvalidConfig(format!(
                    "timeout_secs {t} is too large"
                )));
            }
        }
        if !(1..=MAX_MARKOV_ORDER).contains(&self.markov_order) {
            return Err(ValidationError::InvalidConfig(format!(
                "markov_order must be in 1..={MAX_MARKOV_ORDER}"
            )));
        }
        Ok(())
    }

    pub fn workers(&self) -> usize {
        self.worker_count.unwrap_or_else(default_workers)
    }

    /// The execution timeout. Values `validate` rejects yield `None`.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        let config = ValidationConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ValidationConfig::default());
        assert!(config.workers() >= 1);
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_full_json() {
        let config = ValidationConfig::from_json_str(
            r#"{
                "significance_level": 0.001,
                "sequences_for_second_order": 10,
                "worker_count": 2,
                "timeout_secs": 1.5,
                "error_tolerance": 1,
                "overrides": {"block_frequency": {"block_size": 64}},
                "strategy": "scalar",
                "estimate_entropy": false,
                "markov_order": 2
            }"#,
        )
        .unwrap();
        assert_eq!(config.significance_level, Some(0.001));
        assert_eq!(config.workers(), 2);
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.overrides["block_frequency"].get("block_size"), Some(64));
        assert_eq!(config.strategy, Some(Strategy::Scalar));
        assert!(!config.estimate_entropy);
    }

    #[test]
    fn test_invalid_values() {
        for json in [
            r#"{"significance_level": 1.5}"#,
            r#"{"sequences_for_second_order": 0}"#,
            r#"{"worker_count": 0}"#,
            r#"{"timeout_secs": -1}"#,
            r#"{"timeout_secs": 1e19}"#,
            r#"{"timeout_secs": 1e300}"#,
            r#"{"markov_order": 12}"#,
        ] {
            assert!(
                matches!(
                    ValidationConfig::from_json_str(json),
                    Err(ValidationError::InvalidConfig(_))
                ),
                "{json}"
            );
        }
    }

    #[test]
    fn test_unrepresentable_timeout_is_rejected() {
        let config = ValidationConfig {
            timeout_secs: Some(1e19),
            ..ValidationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidConfig(_))
        ));
        assert_eq!(config.timeout(), None);
    }
}
