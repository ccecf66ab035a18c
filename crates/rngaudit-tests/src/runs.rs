//! Run-length tests.

use statrs::function::erf::erfc;

use crate::{
    Evaluation, Sample, TestDefinition, TestError, TestParams, chi2_sf, pearson_chi2,
};

pub const RUNS: TestDefinition = TestDefinition::new("runs", "Runs", runs_min_bits, runs);

pub const LONGEST_RUN: TestDefinition = TestDefinition::new(
    "longest_run",
    "Longest Run of Ones in a Block",
    longest_run_min_bits,
    longest_run,
);

fn runs_min_bits(_: &TestParams) -> Result<usize, TestError> {
    Ok(100)
}

/// Runs: total number of uninterrupted runs of identical bits.
///
/// Only meaningful when the monobit proportion is close to 1/2. When the
/// pre-test fails the test is not applicable and returns
/// [`TestError::PreconditionFailed`]; batteries usually encode this as a
/// dependency on `monobit`.
pub fn runs(sample: &Sample, _: &TestParams) -> Result<Evaluation, TestError> {
    let bits = sample.bits();
    let n = bits.len();
    let prop = sample.ones() as f64 / n as f64;
    let tau = 2.0 / (n as f64).sqrt();
    if (prop - 0.5).abs() >= tau {
        return Err(TestError::PreconditionFailed(format!(
            "frequency pre-test failed: proportion={prop:.4}, tau={tau:.4}"
        )));
    }
    let runs = 1 + bits.windows(2).filter(|w| w[0] != w[1]).count();
    let expected = 2.0 * n as f64 * prop * (1.0 - prop);
    let denom = 2.0 * (2.0 * n as f64).sqrt() * prop * (1.0 - prop);
    if denom < 1e-12 {
        return Err(TestError::Degenerate("zero variance".to_string()));
    }
    let z = (runs as f64 - expected).abs() / denom;
    let p = erfc(z);
    Evaluation::single(p, runs as f64, format!("runs={runs}, expected={expected:.0}"))
}

/// Block length, class boundaries and class probabilities for a sample length.
struct LongestRunTable {
    block: usize,
    min_class: usize,
    probs: &'static [f64],
}

fn longest_run_table(n: usize) -> LongestRunTable {
    if n < 6272 {
        LongestRunTable {
            block: 8,
            min_class: 1,
            probs: &[0.2148, 0.3672, 0.2305, 0.1875],
        }
    } else if n < 750_000 {
        LongestRunTable {
            block: 128,
            min_class: 4,
            probs: &[0.1174, 0.2430, 0.2493, 0.1752, 0.1027, 0.1124],
        }
    } else {
        LongestRunTable {
            block: 10_000,
            min_class: 10,
            probs: &[0.0882, 0.2092, 0.2483, 0.1933, 0.1208, 0.0675, 0.0727],
        }
    }
}

fn longest_run_min_bits(_: &TestParams) -> Result<usize, TestError> {
    Ok(128)
}

/// Longest run of ones within M-bit blocks, chi-square against the SP 800-22 tables.
pub fn longest_run(sample: &Sample, _: &TestParams) -> Result<Evaluation, TestError> {
    let bits = sample.bits();
    let table = longest_run_table(bits.len());
    let k = table.probs.len() - 1;
    let mut observed = vec![0u64; table.probs.len()];
    let mut num_blocks = 0usize;
    for block in bits.chunks_exact(table.block) {
        let mut max_run = 0usize;
        let mut current = 0usize;
        for &bit in block {
            if bit == 1 {
                current += 1;
                max_run = max_run.max(current);
            } else {
                current = 0;
            }
        }
        let class = max_run.clamp(table.min_class, table.min_class + k) - table.min_class;
        observed[class] += 1;
        num_blocks += 1;
    }
    let chi2 = pearson_chi2(&observed, table.probs, num_blocks as f64);
    let p = chi2_sf(k as f64, chi2)?;
    Evaluation::single(
        p,
        chi2,
        format!("blocks={num_blocks}, M={}, classes={observed:?}", table.block),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatisticalTest;
    use crate::testutil::*;

    fn parse(s: &str) -> Sample {
        Sample::from_bits(s.bytes().map(|c| c - b'0').collect())
    }

    #[test]
    fn test_runs_nist_example() {
        // SP 800-22 2.3.8: V=52, P-value = 0.500798
        let sample = parse(
            "11001001000011111101101010100010001000010110100011\
             00001000110100110001001100011001100010100010111000",
        );
        let eval = runs(&sample, &TestParams::new()).unwrap();
        assert_eq!(eval.statistic, 52.0);
        assert!((eval.p_values[0] - 0.500798).abs() < 1e-5);
    }

    #[test]
    fn test_runs_alternating_fails() {
        let eval = runs(&alternating_sample(10_000), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] < 1e-10);
    }

    #[test]
    fn test_runs_constant_is_not_applicable() {
        let result = RUNS.evaluate(&constant_sample(1000), &TestParams::new());
        assert!(matches!(result, Err(TestError::PreconditionFailed(_))));
    }

    #[test]
    fn test_longest_run_nist_example() {
        // SP 800-22 2.4.8: n=128, M=8, chi2=4.882457, P-value = 0.180609
        let sample = parse(
            "11001100000101010110110001001100111000000000001001\
             00110101010001000100111101011010000000110101111100\
             1100111001101101100010110010",
        );
        let eval = longest_run(&sample, &TestParams::new()).unwrap();
        assert!((eval.statistic - 4.882457).abs() < 1e-3);
        assert!((eval.p_values[0] - 0.180609).abs() < 1e-3);
    }

    #[test]
    fn test_longest_run_table_selection() {
        assert_eq!(longest_run_table(128).block, 8);
        assert_eq!(longest_run_table(6272).block, 128);
        assert_eq!(longest_run_table(1_000_000).block, 10_000);
    }

    #[test]
    fn test_longest_run_random_passes() {
        let eval = longest_run(&random_sample(10_000), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] > 0.001);
    }
}
