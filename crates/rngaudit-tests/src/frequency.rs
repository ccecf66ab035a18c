//! Frequency tests: proportion of ones overall, per block, and per byte.

use statrs::function::erf::erfc;

use crate::{
    Evaluation, Sample, TestDefinition, TestError, TestParams, chi2_sf, pearson_chi2,
};

pub const MONOBIT: TestDefinition =
    TestDefinition::new("monobit", "Frequency (Monobit)", monobit_min_bits, monobit);

pub const BLOCK_FREQUENCY: TestDefinition = TestDefinition::new(
    "block_frequency",
    "Frequency within a Block",
    block_frequency_min_bits,
    block_frequency,
);

pub const BYTE_FREQUENCY: TestDefinition = TestDefinition::new(
    "byte_frequency",
    "Byte Frequency",
    byte_frequency_min_bits,
    byte_frequency,
);

pub const COUNT_THE_ONES: TestDefinition = TestDefinition::new(
    "count_the_ones",
    "Count-the-1s (bytes)",
    count_the_ones_min_bits,
    count_the_ones,
);

fn monobit_min_bits(_: &TestParams) -> Result<usize, TestError> {
    Ok(100)
}

/// Monobit frequency: proportion of 1s vs 0s should be ~50%.
pub fn monobit(sample: &Sample, _: &TestParams) -> Result<Evaluation, TestError> {
    let n = sample.len();
    let ones = sample.ones() as i64;
    let s = 2 * ones - n as i64;
    let s_obs = (s as f64).abs() / (n as f64).sqrt();
    let p = erfc(s_obs / 2.0_f64.sqrt());
    Evaluation::single(p, s_obs, format!("S={s}, n={n}"))
}

fn block_frequency_min_bits(params: &TestParams) -> Result<usize, TestError> {
    let m = params.positive_or("block_size", 128)?;
    Ok(m.max(100))
}

/// Block frequency: chi-square over the proportion of ones in M-bit blocks.
pub fn block_frequency(sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
    let m = params.positive_or("block_size", 128)?;
    let num_blocks = sample.len() / m;
    let mut chi2 = 0.0;
    for i in 0..num_blocks {
        let ones = sample.ones_in(i * m, (i + 1) * m);
        let proportion = ones as f64 / m as f64;
        chi2 += (proportion - 0.5) * (proportion - 0.5);
    }
    chi2 *= 4.0 * m as f64;
    let p = chi2_sf(num_blocks as f64, chi2)?;
    Evaluation::single(p, chi2, format!("blocks={num_blocks}, M={m}"))
}

fn byte_frequency_min_bits(_: &TestParams) -> Result<usize, TestError> {
    // five expected observations per bin
    Ok(256 * 5 * 8)
}

/// Byte frequency: chi-square on the byte value distribution (256 bins).
pub fn byte_frequency(sample: &Sample, _: &TestParams) -> Result<Evaluation, TestError> {
    let data = sample.bytes();
    let n = data.len();
    let mut hist = [0u64; 256];
    for &b in data {
        hist[b as usize] += 1;
    }
    let probs = [1.0 / 256.0; 256];
    let chi2 = pearson_chi2(&hist, &probs, n as f64);
    let p = chi2_sf(255.0, chi2)?;
    Evaluation::single(
        p,
        chi2,
        format!("n={n}, expected_per_bin={:.1}", n as f64 / 256.0),
    )
}

/// Popcount classes A..E: {0,1,2}, 3, 4, 5, {6,7,8} ones per byte.
const COUNT_CLASS_PROBS: [f64; 5] = [
    37.0 / 256.0,
    56.0 / 256.0,
    70.0 / 256.0,
    56.0 / 256.0,
    37.0 / 256.0,
];

fn count_the_ones_min_bits(_: &TestParams) -> Result<usize, TestError> {
    Ok(256 * 8)
}

/// Count-the-1s over non-overlapping bytes, chi-square with 4 degrees of freedom.
pub fn count_the_ones(sample: &Sample, _: &TestParams) -> Result<Evaluation, TestError> {
    let data = sample.bytes();
    let mut observed = [0u64; 5];
    for &b in data {
        let class = match b.count_ones() {
            0..=2 => 0,
            3 => 1,
            4 => 2,
            5 => 3,
            _ => 4,
        };
        observed[class] += 1;
    }
    let chi2 = pearson_chi2(&observed, &COUNT_CLASS_PROBS, data.len() as f64);
    let p = chi2_sf(4.0, chi2)?;
    Evaluation::single(
        p,
        chi2,
        format!("bytes={}, classes={observed:?}", data.len()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::{StatisticalTest, Strategy};

    #[test]
    fn test_monobit_nist_example() {
        // SP 800-22 2.1.8: n=100 example, P-value = 0.109599
        let eps = "11001001000011111101101010100010001000010110100011\
                   00001000110100110001001100011001100010100010111000";
        let bits: Vec<u8> = eps.bytes().map(|c| c - b'0').collect();
        let eval = monobit(&Sample::from_bits(bits), &TestParams::new()).unwrap();
        assert!((eval.p_values[0] - 0.109599).abs() < 1e-5);
    }

    #[test]
    fn test_monobit_constant_near_zero() {
        let eval = monobit(&constant_sample(10_000), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] < 1e-10);
    }

    #[test]
    fn test_monobit_alternating_passes() {
        let eval = monobit(&alternating_sample(10_000), &TestParams::new()).unwrap();
        assert_eq!(eval.p_values[0], 1.0);
    }

    #[test]
    fn test_block_frequency_nist_example() {
        // SP 800-22 2.2.8: same 100-bit sequence, M=10, P-value = 0.706438
        let eps = "11001001000011111101101010100010001000010110100011\
                   00001000110100110001001100011001100010100010111000";
        let bits: Vec<u8> = eps.bytes().map(|c| c - b'0').collect();
        let params = TestParams::new().with("block_size", 10);
        let eval = block_frequency(&Sample::from_bits(bits), &params).unwrap();
        assert!((eval.p_values[0] - 0.706438).abs() < 1e-5);
    }

    #[test]
    fn test_block_frequency_strategies_agree() {
        let data = pseudo_random(20_000);
        let params = TestParams::new();
        let scalar = block_frequency(
            &Sample::from_bytes(&data).with_strategy(Strategy::Scalar),
            &params,
        )
        .unwrap();
        let packed = block_frequency(
            &Sample::from_bytes(&data).with_strategy(Strategy::WordParallel),
            &params,
        )
        .unwrap();
        assert_eq!(scalar, packed);
    }

    #[test]
    fn test_block_frequency_rejects_zero_block() {
        let params = TestParams::new().with("block_size", 0);
        assert!(matches!(
            BLOCK_FREQUENCY.evaluate(&random_sample(1000), &params),
            Err(TestError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_byte_frequency_random_passes() {
        let eval = byte_frequency(&random_sample(20_000), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] > 0.001);
    }

    #[test]
    fn test_count_the_ones_constant_fails() {
        let eval = count_the_ones(&constant_sample(8 * 4096), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] < 1e-10);
    }
}
