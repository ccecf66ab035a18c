//! Maurer's universal statistical test.

use statrs::function::erf::erfc;

use crate::{Evaluation, Sample, TestDefinition, TestError, TestParams};

pub const MAURERS_UNIVERSAL: TestDefinition = TestDefinition::new(
    "maurers_universal",
    "Maurer's Universal Statistical",
    universal_min_bits,
    maurers_universal,
);

const MIN_L: usize = 6;
const MAX_L: usize = 16;

/// (expected value, variance) of f_n for L = 6..=16.
const EXPECTED: [(f64, f64); 11] = [
    (5.2177052, 2.954),
    (6.1962507, 3.125),
    (7.1836656, 3.238),
    (8.1764248, 3.311),
    (9.1723243, 3.356),
    (10.170032, 3.384),
    (11.168765, 3.401),
    (12.168070, 3.410),
    (13.167693, 3.416),
    (14.167488, 3.419),
    (15.167379, 3.421),
];

/// Bits needed for block length `l`: (Q + K)·L with Q = 10·2^L and K = 1000·2^L.
fn bits_for(l: usize) -> usize {
    1010 * (1usize << l) * l
}

/// Largest L whose recommended length fits in `n`, clamped to 6..=16.
fn block_len_for(n: usize) -> usize {
    (MIN_L..=MAX_L)
        .rev()
        .find(|&l| bits_for(l) <= n)
        .unwrap_or(MIN_L)
}

fn explicit_block_len(params: &TestParams) -> Result<Option<usize>, TestError> {
    match params.positive("block_len")? {
        Some(l) if !(MIN_L..=MAX_L).contains(&l) => Err(TestError::invalid(
            "block_len",
            format!("must be in {MIN_L}..={MAX_L}"),
        )),
        other => Ok(other),
    }
}

fn universal_min_bits(params: &TestParams) -> Result<usize, TestError> {
    Ok(bits_for(explicit_block_len(params)?.unwrap_or(MIN_L)))
}

/// Maurer's universal: mean log2 distance between repeated L-bit blocks.
pub fn maurers_universal(sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
    let bits = sample.bits();
    let l = explicit_block_len(params)?.unwrap_or_else(|| block_len_for(bits.len()));
    let q = 10usize << l;
    let total_blocks = bits.len() / l;
    if total_blocks <= q {
        return Err(TestError::InsufficientData {
            needed: bits_for(l),
            got: bits.len(),
        });
    }
    let k = total_blocks - q;

    let mut table = vec![0usize; 1 << l];
    let mut total = 0.0f64;
    for (i, block) in bits.chunks_exact(l).enumerate() {
        let value = block.iter().fold(0usize, |acc, &b| (acc << 1) | b as usize);
        if i >= q {
            // the init phase fills most slots; an unseen block counts from the start
            total += ((i + 1 - table[value]) as f64).log2();
        }
        table[value] = i + 1;
    }

    let fn_val = total / k as f64;
    let (expected, variance) = EXPECTED[l - MIN_L];
    let lf = l as f64;
    let c = 0.7 - 0.8 / lf + (4.0 + 32.0 / lf) * (k as f64).powf(-3.0 / lf) / 15.0;
    let sigma = c * (variance / k as f64).sqrt();
    let p = erfc((fn_val - expected).abs() / (2.0_f64.sqrt() * sigma));
    Evaluation::single(
        p,
        fn_val,
        format!("fn={fn_val:.4}, expected={expected:.4}, L={l}, K={k}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatisticalTest;
    use crate::testutil::*;

    #[test]
    fn test_block_len_selection() {
        assert_eq!(block_len_for(387_840), 6);
        assert_eq!(block_len_for(904_959), 6);
        assert_eq!(block_len_for(904_960), 7);
        assert_eq!(block_len_for(1_000_000), 7);
        assert_eq!(block_len_for(100), 6);
    }

    #[test]
    fn test_random_passes() {
        let eval = maurers_universal(&random_sample(50_000), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] > 0.001, "p={}", eval.p_values[0]);
        assert!((eval.statistic - 5.2177).abs() < 0.1);
    }

    #[test]
    fn test_constant_fails() {
        let eval = maurers_universal(&constant_sample(400_000), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] < 1e-10);
    }

    #[test]
    fn test_rejects_out_of_range_block_len() {
        let params = TestParams::new().with("block_len", 4);
        assert!(matches!(
            MAURERS_UNIVERSAL.min_bits(&params),
            Err(TestError::InvalidParameter { .. })
        ));
        assert_eq!(
            MAURERS_UNIVERSAL.min_bits(&TestParams::new()).unwrap(),
            387_840
        );
    }
}
