//! Overlapping m-bit pattern tests: serial and approximate entropy.

use crate::{Evaluation, Sample, TestDefinition, TestError, TestParams, chi2_sf};

pub const SERIAL: TestDefinition =
    TestDefinition::new("serial", "Serial", serial_min_bits, serial);

pub const APPROXIMATE_ENTROPY: TestDefinition = TestDefinition::new(
    "approximate_entropy",
    "Approximate Entropy",
    approximate_entropy_min_bits,
    approximate_entropy,
);

const MAX_PATTERN_LEN: usize = 24;

/// Counts of every overlapping m-bit pattern, wrapping around the end.
fn pattern_counts(bits: &[u8], m: usize) -> Vec<u64> {
    let mut counts = vec![0u64; 1 << m];
    let n = bits.len();
    if m == 0 || n == 0 {
        return counts;
    }
    let mask = (1usize << m) - 1;
    let mut value = 0usize;
    for i in 0..m - 1 {
        value = (value << 1) | bits[i % n] as usize;
    }
    for i in 0..n {
        value = ((value << 1) | bits[(i + m - 1) % n] as usize) & mask;
        counts[value] += 1;
    }
    counts
}

fn floor_log2(n: usize) -> usize {
    if n == 0 { 0 } else { n.ilog2() as usize }
}

fn explicit_pattern_len(params: &TestParams) -> Result<Option<usize>, TestError> {
    match params.positive("pattern_len")? {
        Some(m) if !(2..=MAX_PATTERN_LEN).contains(&m) => Err(TestError::invalid(
            "pattern_len",
            format!("must be in 2..={MAX_PATTERN_LEN}"),
        )),
        other => Ok(other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Serial
// ═══════════════════════════════════════════════════════════════════════════════

/// ψ²_m = (2^m / n) Σ ν² − n, with ψ²_0 = 0.
fn psi_sq(bits: &[u8], m: usize) -> f64 {
    if m == 0 {
        return 0.0;
    }
    let n = bits.len() as f64;
    let sum_sq: f64 = pattern_counts(bits, m)
        .iter()
        .map(|&c| (c as f64) * (c as f64))
        .sum();
    sum_sq * (1u64 << m) as f64 / n - n
}

fn serial_min_bits(params: &TestParams) -> Result<usize, TestError> {
    Ok(match explicit_pattern_len(params)? {
        Some(m) => 1 << (m + 3),
        None => 128,
    })
}

/// Serial: first and second differences of ψ² over m, m-1, m-2 bit patterns.
pub fn serial(sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
    let bits = sample.bits();
    let m = match explicit_pattern_len(params)? {
        Some(m) => m,
        None => (floor_log2(bits.len()).saturating_sub(3)).clamp(2, 16),
    };
    let psi_m = psi_sq(bits, m);
    let psi_m1 = psi_sq(bits, m - 1);
    let psi_m2 = psi_sq(bits, m - 2);
    let del1 = psi_m - psi_m1;
    let del2 = psi_m - 2.0 * psi_m1 + psi_m2;
    let p1 = chi2_sf((1u64 << (m - 1)) as f64, del1)?;
    let p2 = chi2_sf((1u64 << (m - 2)) as f64, del2)?;
    Evaluation::new(
        vec![p1, p2],
        del1,
        format!("m={m}, del1={del1:.4}, del2={del2:.4}"),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Approximate entropy
// ═══════════════════════════════════════════════════════════════════════════════

/// φ_m = Σ π_i ln π_i over the m-bit pattern frequencies.
fn phi(bits: &[u8], m: usize) -> f64 {
    let n = bits.len() as f64;
    pattern_counts(bits, m)
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            p * p.ln()
        })
        .sum()
}

fn approximate_entropy_min_bits(params: &TestParams) -> Result<usize, TestError> {
    Ok(match explicit_pattern_len(params)? {
        Some(m) => 1 << (m + 6),
        None => 256,
    })
}

/// Approximate entropy: compare m and m+1 bit pattern frequencies.
pub fn approximate_entropy(sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
    let bits = sample.bits();
    let n = bits.len();
    let m = match explicit_pattern_len(params)? {
        Some(m) => m,
        None => (floor_log2(n).saturating_sub(6)).clamp(2, 10),
    };
    let apen = phi(bits, m) - phi(bits, m + 1);
    let chi2 = 2.0 * n as f64 * (std::f64::consts::LN_2 - apen);
    let p = chi2_sf((1u64 << m) as f64, chi2)?;
    Evaluation::single(p, chi2, format!("ApEn={apen:.6}, m={m}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn parse(s: &str) -> Sample {
        Sample::from_bits(s.bytes().map(|c| c - b'0').collect())
    }

    #[test]
    fn test_pattern_counts_wrap() {
        let bits = [0u8, 0, 1, 1, 0, 1, 1, 1, 0, 1];
        let counts = pattern_counts(&bits, 3);
        assert_eq!(counts.iter().sum::<u64>(), 10);
        assert_eq!(counts[0b011], 2);
        // only reachable by wrapping around the end
        assert_eq!(counts[0b100], 1);
        assert_eq!(counts[0b010], 1);
    }

    #[test]
    fn test_serial_nist_example() {
        // SP 800-22 2.11.8: m=3, P-value1 = 0.808792, P-value2 = 0.670320
        let params = TestParams::new().with("pattern_len", 3);
        let eval = serial(&parse("0011011101"), &params).unwrap();
        assert!((eval.statistic - 1.6).abs() < 1e-9);
        assert!((eval.p_values[0] - 0.808792).abs() < 1e-5);
        assert!((eval.p_values[1] - 0.670320).abs() < 1e-5);
    }

    #[test]
    fn test_approximate_entropy_nist_example() {
        // SP 800-22 2.12.8: m=3, ApEn = 0.190954, P-value = 0.261961
        let params = TestParams::new().with("pattern_len", 3);
        let eval = approximate_entropy(&parse("0100110101"), &params).unwrap();
        assert!((eval.statistic - 10.043859).abs() < 1e-5);
        assert!((eval.p_values[0] - 0.261961).abs() < 1e-5);
    }

    #[test]
    fn test_serial_random_passes() {
        let eval = serial(&random_sample(10_000), &TestParams::new()).unwrap();
        assert_eq!(eval.p_values.len(), 2);
        assert!(eval.min_p() > 0.001, "p={:?}", eval.p_values);
    }

    #[test]
    fn test_approximate_entropy_alternating_fails() {
        let eval = approximate_entropy(&alternating_sample(10_000), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] < 1e-10);
    }

    #[test]
    fn test_rejects_pattern_len_one() {
        let params = TestParams::new().with("pattern_len", 1);
        assert!(matches!(
            serial(&random_sample(100), &params),
            Err(TestError::InvalidParameter { .. })
        ));
    }
}
