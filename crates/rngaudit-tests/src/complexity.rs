//! Linear complexity (LFSR length) test.

use crate::{
    Evaluation, Sample, TestDefinition, TestError, TestParams, chi2_sf, pearson_chi2,
};

pub const LINEAR_COMPLEXITY: TestDefinition = TestDefinition::new(
    "linear_complexity",
    "Linear Complexity",
    linear_complexity_min_bits,
    linear_complexity,
);

const MIN_BLOCKS: usize = 200;

/// Class probabilities for T ≤ -2.5, ..., T > 2.5 (K = 6).
const PI: [f64; 7] = [0.010417, 0.03125, 0.125, 0.5, 0.25, 0.0625, 0.020833];

/// Berlekamp-Massey algorithm for binary sequences. Returns the LFSR complexity.
pub fn berlekamp_massey(seq: &[u8]) -> usize {
    let n = seq.len();
    if n == 0 {
        return 0;
    }
    let mut c = vec![0u8; n + 1];
    let mut b = vec![0u8; n + 1];
    c[0] = 1;
    b[0] = 1;
    let mut l = 0usize;
    let mut m: isize = -1;

    for ni in 0..n {
        let mut d = seq[ni];
        for i in 1..=l {
            d ^= c[i] & seq[ni - i];
        }
        if d == 1 {
            let t = c.clone();
            let shift = (ni as isize - m) as usize;
            for i in shift..=n {
                c[i] ^= b[i - shift];
            }
            if l <= ni / 2 {
                l = ni + 1 - l;
                m = ni as isize;
                b = t;
            }
        }
    }
    l
}

fn block_size(params: &TestParams) -> Result<usize, TestError> {
    let m = params.positive_or("block_size", 500)?;
    if m < 2 {
        return Err(TestError::invalid("block_size", "must be at least 2"));
    }
    Ok(m)
}

fn linear_complexity_min_bits(params: &TestParams) -> Result<usize, TestError> {
    MIN_BLOCKS
        .checked_mul(block_size(params)?)
        .ok_or_else(|| TestError::invalid("block_size", "too large"))
}

/// Linear complexity: Berlekamp-Massey per M-bit block, chi-square over 7 classes.
pub fn linear_complexity(sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
    let m = block_size(params)?;
    let mf = m as f64;
    let parity = if m % 2 == 0 { 1.0 } else { -1.0 }; // (-1)^M
    let mu = mf / 2.0 + (9.0 - parity) / 36.0 - (mf / 3.0 + 2.0 / 9.0) / 2.0_f64.powf(mf);

    let mut observed = [0u64; 7];
    let mut num_blocks = 0usize;
    let mut total_complexity = 0usize;
    for block in sample.bits().chunks_exact(m) {
        let complexity = berlekamp_massey(block);
        total_complexity += complexity;
        let t = parity * (complexity as f64 - mu) + 2.0 / 9.0;
        let class = if t <= -2.5 {
            0
        } else if t <= -1.5 {
            1
        } else if t <= -0.5 {
            2
        } else if t <= 0.5 {
            3
        } else if t <= 1.5 {
            4
        } else if t <= 2.5 {
            5
        } else {
            6
        };
        observed[class] += 1;
        num_blocks += 1;
    }

    let chi2 = pearson_chi2(&observed, &PI, num_blocks as f64);
    let p = chi2_sf(6.0, chi2)?;
    let mean_c = total_complexity as f64 / num_blocks as f64;
    Evaluation::single(
        p,
        chi2,
        format!("N={num_blocks}, M={m}, mean_complexity={mean_c:.1}, classes={observed:?}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatisticalTest;
    use crate::testutil::*;

    fn parse(s: &str) -> Vec<u8> {
        s.bytes().map(|c| c - b'0').collect()
    }

    #[test]
    fn test_berlekamp_massey_known_sequences() {
        // SP 800-22 2.10.4 example
        assert_eq!(berlekamp_massey(&parse("1101011110001")), 4);
        assert_eq!(berlekamp_massey(&parse("0000000000")), 0);
        assert_eq!(berlekamp_massey(&parse("0101010101")), 2);
        assert_eq!(berlekamp_massey(&parse("0000000001")), 10);
    }

    #[test]
    fn test_random_passes() {
        let eval = linear_complexity(&random_sample(12_500), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] > 0.001, "p={}", eval.p_values[0]);
    }

    #[test]
    fn test_periodic_fails() {
        let bits: Vec<u8> = (0..100_000).map(|i| u8::from(i % 7 < 3)).collect();
        let eval = linear_complexity(&Sample::from_bits(bits), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] < 1e-10);
    }

    #[test]
    fn test_min_bits() {
        assert_eq!(
            LINEAR_COMPLEXITY.min_bits(&TestParams::new()).unwrap(),
            100_000
        );
        let huge = TestParams::new().with("block_size", u64::MAX / 2);
        assert!(matches!(
            LINEAR_COMPLEXITY.min_bits(&huge),
            Err(TestError::InvalidParameter { .. })
        ));
    }
}
