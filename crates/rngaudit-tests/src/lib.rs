//! NIST SP 800-22 and Diehard-style randomness test library.
//!
//! Every test is a pure function over a [`Sample`] and a set of named
//! [`TestParams`]. A test either produces an [`Evaluation`] (one or more
//! p-values plus the raw statistic) or a tagged [`TestError`]. Pass/fail is not
//! decided here: that belongs to whoever knows the significance level.
//!
//! Tests are exposed as [`TestDefinition`] values implementing
//! [`StatisticalTest`], so callers can put them in their own catalog next to
//! custom tests. [`standard_tests`] returns every built-in definition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use thiserror::Error;

pub mod complexity;
pub mod diehard;
pub mod excursions;
pub mod frequency;
pub mod matrix;
pub mod runs;
pub mod second_order;
pub mod serial;
pub mod spectral;
pub mod strategy;
pub mod template;
pub mod universal;

pub use strategy::Strategy;

// ═══════════════════════════════════════════════════════════════════════════════
// Core types
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a test could not produce a p-value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TestError {
    /// The sample is shorter than the test requires.
    #[error("insufficient data: need {needed} bits, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// A bound parameter is out of range for this test.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The test is not applicable to this sample (e.g. the runs pre-test).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Numerically degenerate statistic (zero variance, non-finite value).
    #[error("degenerate statistic: {0}")]
    Degenerate(String),
}

impl TestError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Output of a test that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// One p-value per statistic, each in `[0, 1]`.
    pub p_values: Vec<f64>,
    /// Primary raw statistic (chi-square, z-score, ...).
    pub statistic: f64,
    pub details: String,
}

impl Evaluation {
    /// Build an evaluation, rejecting non-finite values.
    ///
    /// p-values are clamped into `[0, 1]` to absorb rounding in the special
    /// functions; NaN or infinite values are reported as [`TestError::Degenerate`].
    pub fn new(
        p_values: Vec<f64>,
        statistic: f64,
        details: impl Into<String>,
    ) -> Result<Self, TestError> {
        if p_values.is_empty() {
            return Err(TestError::Degenerate("no p-values produced".to_string()));
        }
        if !statistic.is_finite() {
            return Err(TestError::Degenerate(format!(
                "non-finite statistic {statistic}"
            )));
        }
        let mut clamped = Vec::with_capacity(p_values.len());
        for p in p_values {
            if !p.is_finite() {
                return Err(TestError::Degenerate(format!("non-finite p-value {p}")));
            }
            clamped.push(p.clamp(0.0, 1.0));
        }
        Ok(Self {
            p_values: clamped,
            statistic,
            details: details.into(),
        })
    }

    /// Single p-value shorthand.
    pub fn single(p: f64, statistic: f64, details: impl Into<String>) -> Result<Self, TestError> {
        Self::new(vec![p], statistic, details)
    }

    /// Smallest p-value (the one that decides pass/fail).
    pub fn min_p(&self) -> f64 {
        self.p_values.iter().copied().fold(1.0, f64::min)
    }
}

/// Named unsigned integer parameters bound to a test.
///
/// Missing names fall back to the test's own default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestParams(BTreeMap<String, u64>);

impl TestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: u64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn set(&mut self, name: &str, value: u64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    /// Parameter as `usize`, or `default` when absent. Zero is rejected.
    pub fn positive_or(&self, name: &str, default: usize) -> Result<usize, TestError> {
        match self.get(name) {
            None => Ok(default),
            Some(0) => Err(TestError::invalid(name, "must be positive")),
            Some(v) => usize::try_from(v).map_err(|_| TestError::invalid(name, "too large")),
        }
    }

    /// Optional positive parameter.
    pub fn positive(&self, name: &str) -> Result<Option<usize>, TestError> {
        match self.get(name) {
            None => Ok(None),
            Some(_) => self.positive_or(name, 0).map(Some),
        }
    }

    /// Copy of `self` with every entry of `overrides` applied on top.
    pub fn merged(&self, overrides: &TestParams) -> TestParams {
        let mut out = self.clone();
        for (k, v) in &overrides.0 {
            out.0.insert(k.clone(), *v);
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A test's private copy of the bits under analysis.
///
/// Holds the bits unpacked (one `0`/`1` per byte) for the positional tests and
/// packed MSB-first for the word-parallel strategy and byte-oriented tests.
#[derive(Debug, Clone)]
pub struct Sample {
    bits: Vec<u8>,
    packed: Vec<u8>,
    strategy: Strategy,
}

impl Sample {
    /// Build from unpacked bits. Any non-zero value counts as a one.
    pub fn from_bits(mut bits: Vec<u8>) -> Self {
        for b in bits.iter_mut() {
            *b = u8::from(*b != 0);
        }
        let packed = pack_bits(&bits);
        let strategy = Strategy::for_len(bits.len());
        Self {
            bits,
            packed,
            strategy,
        }
    }

    /// Build from bytes, MSB first.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            bits: to_bits(data),
            packed: data.to_vec(),
            strategy: Strategy::for_len(data.len() * 8),
        }
    }

    /// Force a specific execution strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Unpacked bits.
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    /// Packed bits; the final byte is zero-padded when `len` is not a multiple of 8.
    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    /// Whole bytes only.
    pub fn bytes(&self) -> &[u8] {
        &self.packed[..self.bits.len() / 8]
    }

    /// Number of ones in `start..end`.
    pub fn ones_in(&self, start: usize, end: usize) -> usize {
        match self.strategy {
            Strategy::Scalar => self.bits[start..end].iter().map(|&b| b as usize).sum(),
            Strategy::WordParallel => strategy::count_ones_packed(&self.packed, start, end),
        }
    }

    /// Number of ones in the whole sample.
    pub fn ones(&self) -> usize {
        self.ones_in(0, self.len())
    }
}

/// A registered statistical test.
pub trait StatisticalTest: Send + Sync {
    /// Stable identifier used in battery definitions.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Minimum sample length in bits for the given parameters.
    fn min_bits(&self, params: &TestParams) -> Result<usize, TestError>;

    /// Run the test. Must be pure: same sample and params, same result.
    fn evaluate(&self, sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError>;
}

type MinBitsFn = fn(&TestParams) -> Result<usize, TestError>;
type EvaluateFn = fn(&Sample, &TestParams) -> Result<Evaluation, TestError>;

/// A built-in test: id, name and two plain functions.
#[derive(Clone, Copy)]
pub struct TestDefinition {
    id: &'static str,
    name: &'static str,
    min_bits: MinBitsFn,
    evaluate: EvaluateFn,
}

impl TestDefinition {
    pub const fn new(
        id: &'static str,
        name: &'static str,
        min_bits: MinBitsFn,
        evaluate: EvaluateFn,
    ) -> Self {
        Self {
            id,
            name,
            min_bits,
            evaluate,
        }
    }
}

impl std::fmt::Debug for TestDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl StatisticalTest for TestDefinition {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn min_bits(&self, params: &TestParams) -> Result<usize, TestError> {
        (self.min_bits)(params)
    }

    fn evaluate(&self, sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
        let needed = (self.min_bits)(params)?;
        if sample.len() < needed {
            return Err(insufficient(needed, sample.len()));
        }
        (self.evaluate)(sample, params)
    }
}

/// Every built-in test, NIST first, then the Diehard-style tests.
pub fn standard_tests() -> Vec<TestDefinition> {
    vec![
        // Frequency
        frequency::MONOBIT,
        frequency::BLOCK_FREQUENCY,
        // Runs
        runs::RUNS,
        runs::LONGEST_RUN,
        // Rank
        matrix::BINARY_MATRIX_RANK,
        // Spectral
        spectral::DFT_SPECTRAL,
        // Templates
        template::NON_OVERLAPPING_TEMPLATE,
        template::OVERLAPPING_TEMPLATE,
        // Compression / complexity
        universal::MAURERS_UNIVERSAL,
        complexity::LINEAR_COMPLEXITY,
        // Serial / entropy
        serial::SERIAL,
        serial::APPROXIMATE_ENTROPY,
        // Random walk
        excursions::CUMULATIVE_SUMS,
        excursions::RANDOM_EXCURSIONS,
        excursions::RANDOM_EXCURSIONS_VARIANT,
        // Diehard-style
        diehard::BIRTHDAY_SPACINGS,
        frequency::COUNT_THE_ONES,
        diehard::CRAPS,
        frequency::BYTE_FREQUENCY,
    ]
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Unpack a byte slice into individual bits (MSB first per byte).
pub fn to_bits(data: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(data.len() * 8);
    for &byte in data {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

/// Pack `0`/`1` bits MSB first; the last byte is zero-padded.
pub fn pack_bits(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &b)| acc | ((b & 1) << (7 - i)))
        })
        .collect()
}

pub(crate) fn insufficient(needed: usize, got: usize) -> TestError {
    TestError::InsufficientData { needed, got }
}

/// Upper tail of the chi-square distribution: `igamc(df/2, x/2)`.
pub(crate) fn chi2_sf(df: f64, x: f64) -> Result<f64, TestError> {
    let dist = ChiSquared::new(df)
        .map_err(|e| TestError::Degenerate(format!("chi-square df={df}: {e}")))?;
    if x <= 0.0 {
        return Ok(1.0);
    }
    Ok(dist.sf(x))
}

/// Pearson chi-square of observed counts against expected probabilities.
pub(crate) fn pearson_chi2(observed: &[u64], probs: &[f64], total: f64) -> f64 {
    observed
        .iter()
        .zip(probs)
        .map(|(&o, &p)| {
            let expected = p * total;
            let diff = o as f64 - expected;
            diff * diff / expected
        })
        .sum()
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Sample;

    /// Deterministic pseudo-random bytes for tests (64-bit LCG, high bits).
    pub fn pseudo_random(n: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(n);
        let mut state: u64 = 0xDEAD_BEEF_CAFE_BABE;
        for _ in 0..n {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            data.push((state >> 33) as u8);
        }
        data
    }

    pub fn random_sample(n_bytes: usize) -> Sample {
        Sample::from_bytes(&pseudo_random(n_bytes))
    }

    pub fn constant_sample(n_bits: usize) -> Sample {
        Sample::from_bits(vec![0; n_bits])
    }

    pub fn alternating_sample(n_bits: usize) -> Sample {
        Sample::from_bits((0..n_bits).map(|i| (i % 2) as u8).collect())
    }
}
