//! Validation session controller: the single entry point that ties a source,
//! a battery and a configuration into one [`ValidationSession`].
//!
//! Everything that can be rejected is rejected before a single test runs:
//! unknown battery, invalid overrides, and sources that cannot supply
//! `sequences × bits_per_sequence` bits.

use std::sync::Arc;

use crate::aggregate::aggregate;
use crate::battery::{BatteryDefinition, BatteryRegistry};
use crate::config::ValidationConfig;
use crate::entropy::{EntropyReport, estimate_entropy};
use crate::error::ValidationError;
use crate::executor::{CancellationToken, ExecutionPlan, ExecutorConfig, PlannedEntry, execute};
use crate::session::{OpenSession, ValidationSession};
use crate::source::{BitSource, read_bits};

pub struct SessionController {
    registry: BatteryRegistry,
    config: ValidationConfig,
}

impl Default for SessionController {
    fn default() -> Self {
        Self {
            registry: BatteryRegistry::standard(),
            config: ValidationConfig::default(),
        }
    }
}

impl SessionController {
    pub fn new(registry: BatteryRegistry, config: ValidationConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { registry, config })
    }

    pub fn registry(&self) -> &BatteryRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// The named battery with this controller's configuration applied.
    pub fn effective_battery(&self, name: &str) -> Result<BatteryDefinition, ValidationError> {
        let mut battery = (*self.registry.resolve(name)?).clone();
        if let Some(alpha) = self.config.significance_level {
            battery.significance_level = alpha;
        }
        if let Some(sequences) = self.config.sequences_for_second_order {
            battery.sequences = sequences;
        }
        for (label, params) in &self.config.overrides {
            let idx = battery.entry_index(label).ok_or_else(|| {
                ValidationError::InvalidConfig(format!(
                    "override for `{label}`, which is not an entry of `{name}`"
                ))
            })?;
            let entry = &mut battery.entries[idx];
            entry.params = entry.params.merged(params);
        }
        self.registry.validate(&battery)?;
        Ok(battery)
    }

    pub fn run(
        &self,
        source: &mut dyn BitSource,
        battery: &str,
    ) -> Result<ValidationSession, ValidationError> {
        self.run_with_token(source, battery, &CancellationToken::new())
    }

    /// Run `battery` over bits pulled from `source`, blocking until the run
    /// completes, times out, or `token` is cancelled.
    pub fn run_with_token(
        &self,
        source: &mut dyn BitSource,
        battery: &str,
        token: &CancellationToken,
    ) -> Result<ValidationSession, ValidationError> {
        let battery = self.effective_battery(battery)?;
        let required = battery.required_bits();
        if let Some(available) = source.available_bits() {
            if available < required {
                return Err(ValidationError::InsufficientData {
                    required,
                    available,
                });
            }
        }

        let mut session = OpenSession::new(source, &battery);
        log::info!(
            "session {}: battery {} over {} ({} x {} bits, alpha {})",
            session.id(),
            battery.name,
            source.id(),
            battery.sequences,
            battery.bits_per_sequence,
            battery.significance_level
        );

        let sample = read_bits(source, required)?;
        if sample.len() < required {
            return Err(ValidationError::InsufficientData {
                required,
                available: sample.len(),
            });
        }
        if !source.reproducible() {
            log::debug!("source {} is not reproducible", source.id());
        }
        session.record_sample(&sample);

        let plan = self.plan(&battery)?;
        let executor = ExecutorConfig {
            workers: self.config.workers(),
            timeout: self.config.timeout(),
        };
        session.mark_started();
        let report = execute(&plan, Arc::new(sample), &executor, token)?;
        for outcome in report.outcomes {
            session.append(outcome);
        }

        let result = aggregate(
            &battery,
            session.outcomes(),
            report.termination,
            self.config.error_tolerance,
        );
        log::info!(
            "session {}: {} ({})",
            session.id(),
            result.verdict,
            result.rationale.first().map(String::as_str).unwrap_or("")
        );
        Ok(session.finalize(result, report.entropy, report.termination))
    }

    /// Entropy report over up to `max_bits` from `source` (all of it when bounded).
    pub fn estimate_entropy(
        &self,
        source: &mut dyn BitSource,
        max_bits: Option<usize>,
    ) -> Result<EntropyReport, ValidationError> {
        let limit = max_bits.or(source.available_bits()).ok_or_else(|| {
            ValidationError::InvalidConfig("unbounded source needs a bit limit".to_string())
        })?;
        let bits = read_bits(source, limit)?;
        Ok(estimate_entropy(
            &bits.sample(0, bits.len()),
            self.config.markov_order,
        ))
    }

    fn plan(&self, battery: &BatteryDefinition) -> Result<ExecutionPlan, ValidationError> {
        let mut entries = Vec::with_capacity(battery.entries.len());
        for entry in &battery.entries {
            let depends_on = entry
                .depends_on
                .iter()
                .filter_map(|label| battery.entry_index(label))
                .collect();
            entries.push(PlannedEntry {
                label: entry.label.clone(),
                test: self.registry.test(&entry.test)?,
                params: entry.params.clone(),
                depends_on,
            });
        }
        Ok(ExecutionPlan {
            entries,
            sequences: battery.sequences,
            bits_per_sequence: battery.bits_per_sequence,
            significance_level: battery.significance_level,
            dependency_mode: battery.dependency_mode,
            strategy: self.config.strategy,
            entropy_markov_order: self.config.estimate_entropy.then_some(self.config.markov_order),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::{BatteryEntry, DIEHARD, NIST_SP800_22_BASIC};
    use crate::source::{BufferSource, StreamSource};
    use rngaudit_tests::TestParams;
    use std::io::Cursor;

    fn controller(config: ValidationConfig) -> SessionController {
        SessionController::new(BatteryRegistry::standard(), config).unwrap()
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = ValidationConfig {
            significance_level: Some(0.001),
            sequences_for_second_order: Some(4),
            ..Default::default()
        };
        config
            .overrides
            .insert("block_frequency".to_string(), TestParams::new().with("block_size", 256));
        let battery = controller(config).effective_battery(NIST_SP800_22_BASIC).unwrap();
        assert_eq!(battery.significance_level, 0.001);
        assert_eq!(battery.sequences, 4);
        assert_eq!(battery.required_bits(), 4_000_000);
        let idx = battery.entry_index("block_frequency").unwrap();
        assert_eq!(battery.entries[idx].params.get("block_size"), Some(256));
    }

    #[test]
    fn test_override_unknown_label() {
        let mut config = ValidationConfig::default();
        config.overrides.insert("ghost".to_string(), TestParams::new().with("x", 1));
        assert!(matches!(
            controller(config).effective_battery(NIST_SP800_22_BASIC),
            Err(ValidationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_override_revalidated() {
        let mut config = ValidationConfig::default();
        config
            .overrides
            .insert("block_frequency".to_string(), TestParams::new().with("block_size", 0));
        assert!(matches!(
            controller(config).effective_battery(NIST_SP800_22_BASIC),
            Err(ValidationError::InvalidBattery { .. })
        ));
    }

    #[test]
    fn test_override_with_overflowing_dimensions_rejected() {
        let mut config = ValidationConfig::default();
        config.overrides.insert(
            "rank_31x31".to_string(),
            TestParams::new().with("rows", 1 << 32).with("cols", 1 << 32),
        );
        assert!(matches!(
            controller(config).effective_battery(DIEHARD),
            Err(ValidationError::InvalidBattery { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let config = ValidationConfig {
            worker_count: Some(0),
            ..Default::default()
        };
        assert!(SessionController::new(BatteryRegistry::standard(), config).is_err());
    }

    #[test]
    fn test_oversized_timeout_rejected_up_front() {
        let config = ValidationConfig {
            timeout_secs: Some(1e19),
            ..Default::default()
        };
        assert!(matches!(
            SessionController::new(BatteryRegistry::standard(), config),
            Err(ValidationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_declared_capacity_checked() {
        let mut source = BufferSource::new("small", vec![0u8; 1000]);
        let err = controller(ValidationConfig::default())
            .run(&mut source, NIST_SP800_22_BASIC)
            .unwrap_err();
        match err {
            ValidationError::InsufficientData { required, available } => {
                assert_eq!(required, 1_000_000);
                assert_eq!(available, 8_000);
            }
            other => panic!("unexpected {other:?}"),
        }
        // nothing was pulled
        assert_eq!(source.available_bits(), Some(8_000));
    }

    #[test]
    fn test_unbounded_source_short() {
        let mut source = StreamSource::new("pipe", Cursor::new(vec![0u8; 500]));
        assert!(matches!(
            controller(ValidationConfig::default()).run(&mut source, NIST_SP800_22_BASIC),
            Err(ValidationError::InsufficientData { available: 4_000, .. })
        ));
    }

    #[test]
    fn test_unknown_battery() {
        let mut source = BufferSource::new("b", vec![0u8; 10]);
        assert!(matches!(
            controller(ValidationConfig::default()).run(&mut source, "nope"),
            Err(ValidationError::UnknownBattery(_))
        ));
    }

    #[test]
    fn test_small_custom_battery_runs() {
        let mut registry = BatteryRegistry::standard();
        registry
            .register(
                BatteryDefinition::new("tiny", 1_000)
                    .entry(BatteryEntry::new("monobit"))
                    .entry(BatteryEntry::new("runs").depends_on("monobit")),
            )
            .unwrap();
        let controller = SessionController::new(registry, ValidationConfig::default()).unwrap();
        let mut source = BufferSource::new("zeros", vec![0u8; 125]);
        let session = controller.run(&mut source, "tiny").unwrap();
        assert_eq!(session.outcomes().len(), 2);
        assert_eq!(session.sample_bits(), 1_000);
        assert!(session.entropy_report().is_some());
    }

    #[test]
    fn test_entropy_needs_limit_for_unbounded() {
        let mut source = StreamSource::new("pipe", Cursor::new(vec![0u8; 500]));
        let c = controller(ValidationConfig::default());
        assert!(matches!(
            c.estimate_entropy(&mut source, None),
            Err(ValidationError::InvalidConfig(_))
        ));
        let report = c.estimate_entropy(&mut source, Some(4_000)).unwrap();
        assert_eq!(report.sample_bits, 4_000);
    }
}
