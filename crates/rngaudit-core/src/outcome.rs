//! Per-test, per-sequence outcomes.

use std::time::Duration;

use rngaudit_tests::{Evaluation, TestError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Every p-value reached the per-value level from [`per_value_alpha`].
    Passed,
    Failed,
    /// No statistical evidence: test error, panic, timeout or cancellation.
    Error,
    /// Not applicable to this sample, or a blocking dependency did not pass.
    Skipped,
}

impl TestStatus {
    /// Whether the outcome counts towards the statistical verdict.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASS"),
            Self::Failed => write!(f, "FAIL"),
            Self::Error => write!(f, "ERROR"),
            Self::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Result of one battery entry on one sequence.
///
/// Equality ignores `duration_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Entry label within the battery.
    #[serde(rename = "test_id")]
    pub entry: String,
    /// Test definition id.
    pub test: String,
    pub sequence: usize,
    pub p_values: Vec<f64>,
    pub statistic: Option<f64>,
    pub status: TestStatus,
    pub message: String,
    pub sample_bits: usize,
    pub duration_ms: f64,
}

/// Šidák level for each of `count` p-values of one test, so that the test as
/// a whole rejects a random sequence with probability `alpha`.
///
/// A single p-value is compared against `alpha` itself.
pub fn per_value_alpha(alpha: f64, count: usize) -> f64 {
    if count <= 1 {
        return alpha;
    }
    -((-alpha).ln_1p() / count as f64).exp_m1()
}

impl TestOutcome {
    /// Classify a test result at significance level `alpha`.
    ///
    /// Tests reporting several p-values are corrected with [`per_value_alpha`].
    pub fn from_result(
        entry: &str,
        test: &str,
        sequence: usize,
        result: Result<Evaluation, TestError>,
        alpha: f64,
        sample_bits: usize,
        duration: Duration,
    ) -> Self {
        let mut outcome = Self::unresolved(entry, test, sequence, sample_bits);
        outcome.duration_ms = duration.as_secs_f64() * 1000.0;
        match result {
            Ok(eval) => {
                let level = per_value_alpha(alpha, eval.p_values.len());
                outcome.status = if eval.p_values.iter().all(|&p| p >= level) {
                    TestStatus::Passed
                } else {
                    TestStatus::Failed
                };
                outcome.statistic = Some(eval.statistic);
                outcome.p_values = eval.p_values;
                outcome.message = eval.details;
            }
            Err(TestError::PreconditionFailed(reason)) => {
                outcome.status = TestStatus::Skipped;
                outcome.message = format!("not applicable: {reason}");
            }
            Err(e) => {
                outcome.status = TestStatus::Error;
                outcome.message = e.to_string();
            }
        }
        outcome
    }

    /// An outcome for a task that produced no evaluation.
    pub fn without_result(
        entry: &str,
        test: &str,
        sequence: usize,
        status: TestStatus,
        message: impl Into<String>,
    ) -> Self {
        let mut outcome = Self::unresolved(entry, test, sequence, 0);
        outcome.status = status;
        outcome.message = message.into();
        outcome
    }

    fn unresolved(entry: &str, test: &str, sequence: usize, sample_bits: usize) -> Self {
        Self {
            entry: entry.to_string(),
            test: test.to_string(),
            sequence,
            p_values: Vec::new(),
            statistic: None,
            status: TestStatus::Error,
            message: String::new(),
            sample_bits,
            duration_ms: 0.0,
        }
    }

    pub fn min_p(&self) -> Option<f64> {
        self.p_values.iter().copied().reduce(f64::min)
    }
}

impl PartialEq for TestOutcome {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry
            && self.test == other.test
            && self.sequence == other.sequence
            && self.p_values == other.p_values
            && self.statistic == other.statistic
            && self.status == other.status
            && self.message == other.message
            && self.sample_bits == other.sample_bits
    }
}
