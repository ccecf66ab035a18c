//! Test batteries and the caller-owned registry that validates them.
//!
//! A battery is an ordered list of entries, each binding a test from the
//! registry's catalog to parameters under a label unique within the battery.
//! Entries may depend on other entries (e.g. `runs` on `monobit`); whether a
//! failed dependency blocks the dependent is the battery's [`DependencyMode`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use rngaudit_tests::{StatisticalTest, TestParams, standard_tests};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const NIST_SP800_22: &str = "nist-sp800-22";
pub const NIST_SP800_22_BASIC: &str = "nist-sp800-22-basic";
pub const DIEHARD: &str = "diehard";

/// How declared dependencies affect scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyMode {
    /// A dependent runs only after every dependency passed; otherwise it is skipped.
    Blocking,
    /// Dependencies are recorded but do not gate scheduling.
    #[default]
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryEntry {
    pub label: String,
    /// Test id in the registry catalog.
    pub test: String,
    #[serde(default)]
    pub params: TestParams,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Whether a missing result counts against the error tolerance.
    #[serde(default = "default_core")]
    pub core: bool,
}

fn default_core() -> bool {
    true
}

impl BatteryEntry {
    /// Entry labelled after its test.
    pub fn new(test: &str) -> Self {
        Self::labelled(test, test)
    }

    pub fn labelled(label: &str, test: &str) -> Self {
        Self {
            label: label.to_string(),
            test: test.to_string(),
            params: TestParams::new(),
            depends_on: Vec::new(),
            core: true,
        }
    }

    pub fn param(mut self, name: &str, value: u64) -> Self {
        self.params.set(name, value);
        self
    }

    pub fn depends_on(mut self, label: &str) -> Self {
        self.depends_on.push(label.to_string());
        self
    }

    pub fn non_core(mut self) -> Self {
        self.core = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub entries: Vec<BatteryEntry>,
    #[serde(default = "default_significance")]
    pub significance_level: f64,
    /// Independent sequences for second-order testing.
    #[serde(default = "default_sequences")]
    pub sequences: usize,
    pub bits_per_sequence: usize,
    #[serde(default)]
    pub dependency_mode: DependencyMode,
    #[serde(default = "default_uniformity_threshold")]
    pub uniformity_threshold: f64,
    /// Single-sequence runs judge each entry at the Šidák share of
    /// `significance_level` across all entries, so a random source fails the
    /// battery as a whole with that probability.
    #[serde(default)]
    pub family_wise: bool,
}

fn default_significance() -> f64 {
    0.01
}

fn default_sequences() -> usize {
    1
}

fn default_uniformity_threshold() -> f64 {
    0.0001
}

impl BatteryDefinition {
    pub fn new(name: &str, bits_per_sequence: usize) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            entries: Vec::new(),
            significance_level: default_significance(),
            sequences: default_sequences(),
            bits_per_sequence,
            dependency_mode: DependencyMode::default(),
            uniformity_threshold: default_uniformity_threshold(),
            family_wise: false,
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn entry(mut self, entry: BatteryEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = alpha;
        self
    }

    pub fn sequences(mut self, sequences: usize) -> Self {
        self.sequences = sequences;
        self
    }

    pub fn dependency_mode(mut self, mode: DependencyMode) -> Self {
        self.dependency_mode = mode;
        self
    }

    pub fn uniformity_threshold(mut self, threshold: f64) -> Self {
        self.uniformity_threshold = threshold;
        self
    }

    pub fn family_wise(mut self, family_wise: bool) -> Self {
        self.family_wise = family_wise;
        self
    }

    /// Total bits a run needs from the source.
    pub fn required_bits(&self) -> usize {
        self.sequences.saturating_mul(self.bits_per_sequence)
    }

    pub fn entry_index(&self, label: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.label == label)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Test catalog plus named batteries. Owned by the caller.
#[derive(Clone)]
pub struct BatteryRegistry {
    tests: BTreeMap<String, Arc<dyn StatisticalTest>>,
    batteries: BTreeMap<String, Arc<BatteryDefinition>>,
}

impl Default for BatteryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BatteryRegistry {
    /// Catalog with every built-in test and no batteries.
    pub fn new() -> Self {
        let tests = standard_tests()
            .into_iter()
            .map(|t| (t.id().to_string(), Arc::new(t) as Arc<dyn StatisticalTest>))
            .collect();
        Self {
            tests,
            batteries: BTreeMap::new(),
        }
    }

    /// Built-in tests plus the `nist-sp800-22`, `nist-sp800-22-basic` and `diehard` batteries.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for battery in standard_batteries() {
            // built-in definitions are covered by tests; skip rather than panic
            if let Err(e) = registry.register(battery) {
                log::error!("built-in battery rejected: {e}");
            }
        }
        registry
    }

    pub fn register_test(&mut self, test: Arc<dyn StatisticalTest>) -> Result<(), ValidationError> {
        let id = test.id().to_string();
        if self.tests.contains_key(&id) {
            return Err(ValidationError::DuplicateTest(id));
        }
        self.tests.insert(id, test);
        Ok(())
    }

    pub fn register(&mut self, battery: BatteryDefinition) -> Result<(), ValidationError> {
        if self.batteries.contains_key(&battery.name) {
            return Err(ValidationError::DuplicateBattery(battery.name));
        }
        self.validate(&battery)?;
        log::debug!(
            "registered battery {} ({} entries)",
            battery.name,
            battery.entries.len()
        );
        self.batteries
            .insert(battery.name.clone(), Arc::new(battery));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<BatteryDefinition>, ValidationError> {
        self.batteries
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownBattery(name.to_string()))
    }

    pub fn test(&self, id: &str) -> Result<Arc<dyn StatisticalTest>, ValidationError> {
        self.tests
            .get(id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownTest(id.to_string()))
    }

    pub fn batteries(&self) -> impl Iterator<Item = &BatteryDefinition> {
        self.batteries.values().map(|b| b.as_ref())
    }

    pub fn tests(&self) -> impl Iterator<Item = &dyn StatisticalTest> {
        self.tests.values().map(|t| t.as_ref())
    }

    /// Parse a battery from JSON and register it. Returns its name.
    pub fn load_json(&mut self, json: &str) -> Result<String, ValidationError> {
        let battery: BatteryDefinition = serde_json::from_str(json)?;
        let name = battery.name.clone();
        self.register(battery)?;
        Ok(name)
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<String, ValidationError> {
        let json = std::fs::read_to_string(path)?;
        self.load_json(&json)
    }

    /// Check a definition against this registry's catalog.
    pub fn validate(&self, battery: &BatteryDefinition) -> Result<(), ValidationError> {
        let name = battery.name.as_str();
        let invalid = |reason: String| ValidationError::invalid_battery(name, reason);

        if name.is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if battery.entries.is_empty() {
            return Err(invalid("no entries".to_string()));
        }
        let alpha = battery.significance_level;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(invalid(format!(
                "significance level {alpha} not in (0, 1)"
            )));
        }
        if battery.sequences == 0 {
            return Err(invalid("sequences must be at least 1".to_string()));
        }
        if battery.bits_per_sequence == 0 {
            return Err(invalid("bits_per_sequence must be positive".to_string()));
        }
        let threshold = battery.uniformity_threshold;
        if !(0.0..1.0).contains(&threshold) {
            return Err(invalid(format!(
                "uniformity threshold {threshold} not in [0, 1)"
            )));
        }

        let mut labels = BTreeSet::new();
        for entry in &battery.entries {
            if !labels.insert(entry.label.as_str()) {
                return Err(invalid(format!("duplicate entry label `{}`", entry.label)));
            }
        }

        for entry in &battery.entries {
            let test = self
                .tests
                .get(&entry.test)
                .ok_or_else(|| invalid(format!("entry `{}`: unknown test `{}`", entry.label, entry.test)))?;
            let needed = test
                .min_bits(&entry.params)
                .map_err(|e| invalid(format!("entry `{}`: {e}", entry.label)))?;
            if needed > battery.bits_per_sequence {
                return Err(invalid(format!(
                    "entry `{}` needs {needed} bits per sequence, battery provides {}",
                    entry.label, battery.bits_per_sequence
                )));
            }
            for dep in &entry.depends_on {
                if dep == &entry.label {
                    return Err(invalid(format!("entry `{}` depends on itself", entry.label)));
                }
                if !labels.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "entry `{}` depends on missing entry `{dep}`",
                        entry.label
                    )));
                }
            }
        }

        if let Some(label) = dependency_cycle(battery) {
            return Err(invalid(format!("dependency cycle through `{label}`")));
        }
        Ok(())
    }
}

/// Kahn's algorithm over the entry graph; returns a label on a cycle, if any.
fn dependency_cycle(battery: &BatteryDefinition) -> Option<&str> {
    let n = battery.entries.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, entry) in battery.entries.iter().enumerate() {
        for dep in &entry.depends_on {
            if let Some(d) = battery.entry_index(dep) {
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }
    }
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut visited = 0;
    while let Some(i) = queue.pop_front() {
        visited += 1;
        for &j in &dependents[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                queue.push_back(j);
            }
        }
    }
    if visited == n {
        return None;
    }
    (0..n)
        .find(|&i| indegree[i] > 0)
        .map(|i| battery.entries[i].label.as_str())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Built-in batteries
// ═══════════════════════════════════════════════════════════════════════════════

const MEGABIT: usize = 1_000_000;

pub fn standard_batteries() -> Vec<BatteryDefinition> {
    vec![nist_sp800_22(), nist_sp800_22_basic(), diehard()]
}

/// All fifteen SP 800-22 tests in the document's order.
fn nist_sp800_22() -> BatteryDefinition {
    BatteryDefinition::new(NIST_SP800_22, MEGABIT)
        .description("NIST SP 800-22 rev1a statistical test suite")
        .family_wise(true)
        .entry(BatteryEntry::new("monobit"))
        .entry(BatteryEntry::new("block_frequency").param("block_size", 128))
        .entry(BatteryEntry::new("cumulative_sums"))
        .entry(BatteryEntry::new("runs").depends_on("monobit"))
        .entry(BatteryEntry::new("longest_run"))
        .entry(BatteryEntry::new("binary_matrix_rank"))
        .entry(BatteryEntry::new("dft_spectral"))
        .entry(BatteryEntry::new("non_overlapping_template"))
        .entry(BatteryEntry::new("overlapping_template"))
        .entry(BatteryEntry::new("maurers_universal"))
        .entry(BatteryEntry::new("approximate_entropy").param("pattern_len", 10))
        .entry(BatteryEntry::new("random_excursions").non_core())
        .entry(BatteryEntry::new("random_excursions_variant").non_core())
        .entry(BatteryEntry::new("serial").param("pattern_len", 16))
        .entry(BatteryEntry::new("linear_complexity").param("block_size", 500))
}

fn nist_sp800_22_basic() -> BatteryDefinition {
    BatteryDefinition::new(NIST_SP800_22_BASIC, MEGABIT)
        .description("Frequency, runs and block frequency")
        .dependency_mode(DependencyMode::Blocking)
        .entry(BatteryEntry::new("monobit"))
        .entry(BatteryEntry::new("runs").depends_on("monobit"))
        .entry(BatteryEntry::new("block_frequency").param("block_size", 128))
}

fn diehard() -> BatteryDefinition {
    BatteryDefinition::new(DIEHARD, MEGABIT)
        .description("Diehard-style tests")
        .entry(BatteryEntry::new("birthday_spacings"))
        .entry(
            BatteryEntry::labelled("rank_31x31", "binary_matrix_rank")
                .param("rows", 31)
                .param("cols", 31)
                .param("classes", 4),
        )
        .entry(
            BatteryEntry::labelled("rank_6x8", "binary_matrix_rank")
                .param("rows", 6)
                .param("cols", 8)
                .param("classes", 3),
        )
        .entry(BatteryEntry::new("count_the_ones"))
        .entry(BatteryEntry::new("craps"))
        .entry(BatteryEntry::new("byte_frequency"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(name: &str) -> BatteryDefinition {
        BatteryDefinition::new(name, 10_000)
            .entry(BatteryEntry::new("monobit"))
            .entry(BatteryEntry::new("runs").depends_on("monobit"))
    }

    fn reason(err: ValidationError) -> String {
        match err {
            ValidationError::InvalidBattery { reason, .. } => reason,
            other => panic!("expected InvalidBattery, got {other:?}"),
        }
    }

    #[test]
    fn test_standard_batteries_register() {
        let registry = BatteryRegistry::standard();
        let names: Vec<&str> = registry.batteries().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec![DIEHARD, NIST_SP800_22, NIST_SP800_22_BASIC]);
        let full = registry.resolve(NIST_SP800_22).unwrap();
        assert_eq!(full.entries.len(), 15);
        assert!(full.family_wise);
        let basic = registry.resolve(NIST_SP800_22_BASIC).unwrap();
        assert_eq!(basic.dependency_mode, DependencyMode::Blocking);
        assert!(!basic.family_wise);
        assert_eq!(basic.required_bits(), 1_000_000);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = BatteryRegistry::standard();
        assert!(matches!(
            registry.resolve("fips-140"),
            Err(ValidationError::UnknownBattery(_))
        ));
    }

    #[test]
    fn test_duplicate_battery() {
        let mut registry = BatteryRegistry::new();
        registry.register(basic("b")).unwrap();
        assert!(matches!(
            registry.register(basic("b")),
            Err(ValidationError::DuplicateBattery(_))
        ));
    }

    #[test]
    fn test_unknown_test_rejected() {
        let registry = BatteryRegistry::new();
        let battery = basic("b").entry(BatteryEntry::new("no_such_test"));
        assert!(reason(registry.validate(&battery).unwrap_err()).contains("unknown test"));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let registry = BatteryRegistry::new();
        let battery = basic("b").entry(BatteryEntry::new("monobit"));
        assert!(reason(registry.validate(&battery).unwrap_err()).contains("duplicate"));
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let registry = BatteryRegistry::new();
        let battery = basic("b").entry(BatteryEntry::new("longest_run").depends_on("ghost"));
        assert!(reason(registry.validate(&battery).unwrap_err()).contains("missing entry"));
    }

    #[test]
    fn test_cycle_rejected() {
        let registry = BatteryRegistry::new();
        let battery = BatteryDefinition::new("cyclic", 10_000)
            .entry(BatteryEntry::new("monobit").depends_on("runs"))
            .entry(BatteryEntry::new("runs").depends_on("block_frequency"))
            .entry(BatteryEntry::new("block_frequency").depends_on("monobit"));
        assert!(reason(registry.validate(&battery).unwrap_err()).contains("cycle"));
    }

    #[test]
    fn test_zero_parameter_rejected() {
        let registry = BatteryRegistry::new();
        let battery = basic("b").entry(BatteryEntry::new("block_frequency").param("block_size", 0));
        assert!(reason(registry.validate(&battery).unwrap_err()).contains("block_size"));
    }

    #[test]
    fn test_min_bits_checked_against_sequence_length() {
        let registry = BatteryRegistry::new();
        let battery = basic("b").entry(BatteryEntry::new("maurers_universal"));
        assert!(reason(registry.validate(&battery).unwrap_err()).contains("bits per sequence"));
    }

    #[test]
    fn test_significance_range() {
        let registry = BatteryRegistry::new();
        for alpha in [0.0, 1.0, -0.5] {
            let battery = basic("b").significance_level(alpha);
            assert!(registry.validate(&battery).is_err(), "alpha={alpha}");
        }
    }

    #[test]
    fn test_load_json_applies_defaults() {
        let mut registry = BatteryRegistry::new();
        let name = registry
            .load_json(
                r#"{
                    "name": "custom",
                    "bits_per_sequence": 20000,
                    "entries": [
                        {"label": "freq", "test": "monobit"},
                        {"label": "blocks", "test": "block_frequency", "params": {"block_size": 64}, "depends_on": ["freq"], "core": false}
                    ]
                }"#,
            )
            .unwrap();
        assert_eq!(name, "custom");
        let battery = registry.resolve("custom").unwrap();
        assert_eq!(battery.significance_level, 0.01);
        assert_eq!(battery.sequences, 1);
        assert_eq!(battery.dependency_mode, DependencyMode::Advisory);
        assert!(battery.entries[0].core);
        assert!(!battery.entries[1].core);
        assert_eq!(battery.entries[1].params.get("block_size"), Some(64));
    }

    #[test]
    fn test_load_json_malformed() {
        let mut registry = BatteryRegistry::new();
        assert!(matches!(
            registry.load_json("{\"name\": 3}"),
            Err(ValidationError::Json(_))
        ));
    }

    #[test]
    fn test_register_custom_test() {
        let mut registry = BatteryRegistry::new();
        assert!(matches!(
            registry.register_test(Arc::new(rngaudit_tests::frequency::MONOBIT)),
            Err(ValidationError::DuplicateTest(_))
        ));
        assert!(registry.test("monobit").is_ok());
        assert!(matches!(
            registry.test("nope"),
            Err(ValidationError::UnknownTest(_))
        ));
    }
}
