//! Result aggregation and the compliance verdict.
//!
//! Outcomes with status `Error` or `Skipped` stay in the record but carry no
//! statistical weight. With one sequence a test passes iff its outcome passed,
//! or, for a family-wise battery, iff its p-values clear the entry's share of α.
//! With several, the proportion of passing sequences must reach
//! [`min_pass_proportion`] and the pooled p-values must look uniform.

use rngaudit_tests::second_order::{Uniformity, min_pass_proportion, uniformity};
use serde::{Deserialize, Serialize};

use crate::battery::BatteryDefinition;
use crate::executor::Termination;
use crate::outcome::{TestOutcome, TestStatus, per_value_alpha};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Compliant,
    NonCompliant,
    Inconclusive,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compliant => write!(f, "COMPLIANT"),
            Self::NonCompliant => write!(f, "NON-COMPLIANT"),
            Self::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// First-order assessment of one battery entry across its sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestAssessment {
    #[serde(rename = "test_id")]
    pub entry: String,
    pub test: String,
    pub core: bool,
    /// Outcomes with status `Passed` or `Failed`.
    pub usable: usize,
    pub passed: usize,
    /// Proportion of usable sequences that passed.
    pub proportion: Option<f64>,
    /// Acceptance bound on `proportion`, when more than one sequence ran.
    pub min_proportion: Option<f64>,
    /// `None` when no usable outcome exists.
    pub first_order_pass: Option<bool>,
}

/// Uniformity of one entry's p-values across sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondOrderCheck {
    #[serde(rename = "test_id")]
    pub entry: String,
    pub uniformity: Uniformity,
    pub threshold: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub assessments: Vec<TestAssessment>,
    pub second_order: Vec<SecondOrderCheck>,
    pub verdict: Verdict,
    pub rationale: Vec<String>,
}

/// Per-entry level of a family-wise single-sequence run.
fn entry_alpha(battery: &BatteryDefinition) -> f64 {
    per_value_alpha(battery.significance_level, battery.entries.len())
}

fn assess(
    battery: &BatteryDefinition,
    label: &str,
    test: &str,
    core: bool,
    outcomes: &[&TestOutcome],
) -> (TestAssessment, Option<SecondOrderCheck>) {
    let usable: Vec<&TestOutcome> = outcomes
        .iter()
        .copied()
        .filter(|o| o.status.is_usable())
        .collect();
    let passed = usable
        .iter()
        .filter(|o| o.status == TestStatus::Passed)
        .count();
    let mut assessment = TestAssessment {
        entry: label.to_string(),
        test: test.to_string(),
        core,
        usable: usable.len(),
        passed,
        proportion: None,
        min_proportion: None,
        first_order_pass: None,
    };
    if usable.is_empty() {
        return (assessment, None);
    }
    let proportion = passed as f64 / usable.len() as f64;
    assessment.proportion = Some(proportion);

    if battery.sequences <= 1 {
        let pass = if battery.family_wise {
            let level = entry_alpha(battery);
            usable.iter().all(|o| {
                let cut = per_value_alpha(level, o.p_values.len());
                o.p_values.iter().all(|&p| p >= cut)
            })
        } else {
            passed == usable.len()
        };
        assessment.first_order_pass = Some(pass);
        return (assessment, None);
    }

    let bound = min_pass_proportion(battery.significance_level, usable.len());
    assessment.min_proportion = Some(bound);
    assessment.first_order_pass = Some(proportion >= bound);

    let pooled: Vec<f64> = usable
        .iter()
        .flat_map(|o| o.p_values.iter().copied())
        .collect();
    let check = match uniformity(&pooled) {
        Ok(u) => Some(SecondOrderCheck {
            entry: label.to_string(),
            passed: u.p_value >= battery.uniformity_threshold,
            threshold: battery.uniformity_threshold,
            uniformity: u,
        }),
        Err(e) => {
            log::warn!("{label}: no second-order check: {e}");
            None
        }
    };
    (assessment, check)
}

/// Assess every entry of `battery` and decide the verdict.
///
/// Precedence: an interrupted run is inconclusive; any first-order failure is
/// non-compliant; missing core results beyond `error_tolerance` are
/// inconclusive; a second-order failure is non-compliant.
pub fn aggregate(
    battery: &BatteryDefinition,
    outcomes: &[TestOutcome],
    termination: Termination,
    error_tolerance: usize,
) -> Aggregate {
    let mut assessments = Vec::with_capacity(battery.entries.len());
    let mut second_order = Vec::new();
    for entry in &battery.entries {
        let mine: Vec<&TestOutcome> = outcomes.iter().filter(|o| o.entry == entry.label).collect();
        let (assessment, check) = assess(battery, &entry.label, &entry.test, entry.core, &mine);
        assessments.push(assessment);
        second_order.extend(check);
    }

    let alpha = battery.significance_level;
    let evaluated = assessments.iter().filter(|a| a.first_order_pass.is_some()).count();
    let passed = assessments
        .iter()
        .filter(|a| a.first_order_pass == Some(true))
        .count();
    let mut rationale = vec![format!(
        "{passed}/{evaluated} evaluated tests passed at significance level {alpha}"
    )];
    if battery.family_wise && battery.sequences <= 1 {
        rationale.push(format!(
            "family-wise over {} tests: each judged at {:.6}",
            battery.entries.len(),
            entry_alpha(battery)
        ));
    }

    let failed: Vec<&TestAssessment> = assessments
        .iter()
        .filter(|a| a.first_order_pass == Some(false))
        .collect();
    let missing_core: Vec<&TestAssessment> = assessments
        .iter()
        .filter(|a| a.core && a.first_order_pass.is_none())
        .collect();
    let second_failed: Vec<&SecondOrderCheck> =
        second_order.iter().filter(|c| !c.passed).collect();

    for a in assessments.iter().filter(|a| !a.core && a.first_order_pass.is_none()) {
        rationale.push(format!("{}: no usable result (not core)", a.entry));
    }

    let verdict = if termination != Termination::Completed {
        rationale.push(match termination {
            Termination::TimedOut => "run timed out before every test finished".to_string(),
            _ => "run was cancelled before every test finished".to_string(),
        });
        Verdict::Inconclusive
    } else if !failed.is_empty() {
        for a in &failed {
            rationale.push(match (a.proportion, a.min_proportion) {
                (Some(p), Some(min)) => format!(
                    "{}: pass proportion {p:.4} below {min:.4}",
                    a.entry
                ),
                _ => format!("{}: failed at significance level {alpha}", a.entry),
            });
        }
        Verdict::NonCompliant
    } else if missing_core.len() > error_tolerance {
        for a in &missing_core {
            rationale.push(format!("{}: no usable result", a.entry));
        }
        rationale.push(format!(
            "{} core tests missing, tolerance is {error_tolerance}",
            missing_core.len()
        ));
        Verdict::Inconclusive
    } else if !second_failed.is_empty() {
        for c in &second_failed {
            rationale.push(format!(
                "{}: p-value uniformity {:.6} below {}",
                c.entry, c.uniformity.p_value, c.threshold
            ));
        }
        Verdict::NonCompliant
    } else {
        if !missing_core.is_empty() {
            rationale.push(format!(
                "{} core tests missing, within tolerance {error_tolerance}",
                missing_core.len()
            ));
        }
        rationale.push("all evaluated tests passed".to_string());
        Verdict::Compliant
    };

    Aggregate {
        assessments,
        second_order,
        verdict,
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::BatteryEntry;

    fn battery(sequences: usize) -> BatteryDefinition {
        BatteryDefinition::new("t", 1_000)
            .sequences(sequences)
            .entry(BatteryEntry::new("monobit"))
            .entry(BatteryEntry::new("runs"))
            .entry(BatteryEntry::new("random_excursions").non_core())
    }

    fn outcome(label: &str, seq: usize, p: f64) -> TestOutcome {
        let status = if p >= 0.01 {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        let mut o = TestOutcome::without_result(label, label, seq, status, "");
        o.p_values = vec![p];
        o.statistic = Some(0.0);
        o
    }

    fn missing(label: &str, seq: usize, status: TestStatus) -> TestOutcome {
        TestOutcome::without_result(label, label, seq, status, "n/a")
    }

    #[test]
    fn test_all_pass_compliant() {
        let outcomes = vec![
            outcome("monobit", 0, 0.4),
            outcome("runs", 0, 0.2),
            outcome("random_excursions", 0, 0.7),
        ];
        let agg = aggregate(&battery(1), &outcomes, Termination::Completed, 0);
        assert_eq!(agg.verdict, Verdict::Compliant);
        assert!(agg.second_order.is_empty());
        assert!(!agg.rationale.is_empty());
    }

    #[test]
    fn test_single_failure_non_compliant() {
        let outcomes = vec![
            outcome("monobit", 0, 0.001),
            outcome("runs", 0, 0.2),
            outcome("random_excursions", 0, 0.7),
        ];
        let agg = aggregate(&battery(1), &outcomes, Termination::Completed, 0);
        assert_eq!(agg.verdict, Verdict::NonCompliant);
        assert!(agg.rationale.iter().any(|r| r.starts_with("monobit")));
    }

    #[test]
    fn test_family_wise_level_spreads_alpha() {
        let family = battery(1).family_wise(true);
        // three entries: each judged near 0.00334
        let outcomes = vec![
            outcome("monobit", 0, 0.005),
            outcome("runs", 0, 0.2),
            outcome("random_excursions", 0, 0.7),
        ];
        assert_eq!(outcomes[0].status, TestStatus::Failed);
        let agg = aggregate(&family, &outcomes, Termination::Completed, 0);
        assert_eq!(agg.verdict, Verdict::Compliant);
        assert_eq!(agg.assessments[0].first_order_pass, Some(true));
        assert!(agg.rationale.iter().any(|r| r.starts_with("family-wise over 3 tests")));
        let agg = aggregate(&battery(1), &outcomes, Termination::Completed, 0);
        assert_eq!(agg.verdict, Verdict::NonCompliant);

        let outcomes = vec![
            outcome("monobit", 0, 0.003),
            outcome("runs", 0, 0.2),
            outcome("random_excursions", 0, 0.7),
        ];
        let agg = aggregate(&family, &outcomes, Termination::Completed, 0);
        assert_eq!(agg.verdict, Verdict::NonCompliant);
    }

    #[test]
    fn test_family_wise_ignored_with_several_sequences() {
        let spread = |i: usize| (i as f64 + 0.5) / 100.0;
        let mut outcomes: Vec<TestOutcome> = (0..100).map(|i| outcome("monobit", i, spread(i))).collect();
        outcomes.extend((0..100).map(|i| outcome("runs", i, spread(i))));
        let plain = aggregate(&battery(100), &outcomes, Termination::Completed, 1);
        let family = aggregate(&battery(100).family_wise(true), &outcomes, Termination::Completed, 1);
        assert_eq!(plain.assessments, family.assessments);
        assert_eq!(plain.verdict, family.verdict);
    }

    #[test]
    fn test_missing_non_core_ignored() {
        let outcomes = vec![
            outcome("monobit", 0, 0.4),
            outcome("runs", 0, 0.2),
            missing("random_excursions", 0, TestStatus::Skipped),
        ];
        let agg = aggregate(&battery(1), &outcomes, Termination::Completed, 0);
        assert_eq!(agg.verdict, Verdict::Compliant);
    }

    #[test]
    fn test_missing_core_respects_tolerance() {
        let outcomes = vec![
            outcome("monobit", 0, 0.4),
            missing("runs", 0, TestStatus::Error),
            outcome("random_excursions", 0, 0.7),
        ];
        let agg = aggregate(&battery(1), &outcomes, Termination::Completed, 0);
        assert_eq!(agg.verdict, Verdict::Inconclusive);
        let agg = aggregate(&battery(1), &outcomes, Termination::Completed, 1);
        assert_eq!(agg.verdict, Verdict::Compliant);
    }

    #[test]
    fn test_failure_outranks_missing() {
        let outcomes = vec![
            outcome("monobit", 0, 0.0),
            missing("runs", 0, TestStatus::Error),
        ];
        let agg = aggregate(&battery(1), &outcomes, Termination::Completed, 0);
        assert_eq!(agg.verdict, Verdict::NonCompliant);
    }

    #[test]
    fn test_interrupted_is_inconclusive() {
        let outcomes = vec![outcome("monobit", 0, 0.0), missing("runs", 0, TestStatus::Error)];
        let agg = aggregate(&battery(1), &outcomes, Termination::TimedOut, 0);
        assert_eq!(agg.verdict, Verdict::Inconclusive);
        let agg = aggregate(&battery(1), &outcomes, Termination::Cancelled, 5);
        assert_eq!(agg.verdict, Verdict::Inconclusive);
    }

    #[test]
    fn test_proportion_across_sequences() {
        // 100 sequences, bound ≈ 0.9602: 97 passing is fine, 95 is not
        let spread = |i: usize| (i as f64 + 0.5) / 100.0;
        let mut outcomes: Vec<TestOutcome> = (0..100).map(|i| outcome("monobit", i, spread(i))).collect();
        outcomes.extend((0..100).map(|i| outcome("runs", i, spread(i))));
        let agg = aggregate(&battery(100), &outcomes, Termination::Completed, 1);
        assert_eq!(agg.assessments[0].passed, 99);
        assert_eq!(agg.verdict, Verdict::Compliant);
        assert_eq!(agg.second_order.len(), 2);

        for o in outcomes.iter_mut().filter(|o| o.entry == "runs").take(5) {
            o.p_values = vec![0.001];
            o.status = TestStatus::Failed;
        }
        let agg = aggregate(&battery(100), &outcomes, Termination::Completed, 1);
        assert_eq!(agg.assessments[1].first_order_pass, Some(false));
        assert_eq!(agg.verdict, Verdict::NonCompliant);
    }

    #[test]
    fn test_second_order_failure() {
        // every sequence passes, but the p-values all sit in one bin
        let outcomes: Vec<TestOutcome> = (0..100)
            .flat_map(|i| {
                let p = 0.50 + 0.0001 * i as f64;
                [outcome("monobit", i, p), outcome("runs", i, 0.3 + 0.005 * i as f64)]
            })
            .collect();
        let agg = aggregate(&battery(100), &outcomes, Termination::Completed, 1);
        assert!(agg.assessments.iter().all(|a| a.first_order_pass == Some(true)));
        assert!(!agg.second_order[0].passed);
        assert_eq!(agg.verdict, Verdict::NonCompliant);
        assert!(agg.rationale.iter().any(|r| r.contains("uniformity")));
    }
}
