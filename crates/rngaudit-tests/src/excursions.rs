//! Random-walk tests over the ±1 partial sums: cumulative sums and the two
//! random excursions tests.
//!
//! Both excursions tests need at least [`MIN_CYCLES`] zero-crossing cycles to
//! be meaningful. Shorter walks report [`TestError::PreconditionFailed`],
//! which batteries record as skipped rather than failed.

use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::erf::erfc;

use crate::{
    Evaluation, Sample, TestDefinition, TestError, TestParams, chi2_sf, pearson_chi2,
};

pub const CUMULATIVE_SUMS: TestDefinition = TestDefinition::new(
    "cumulative_sums",
    "Cumulative Sums (Cusum)",
    cusum_min_bits,
    cumulative_sums,
);

pub const RANDOM_EXCURSIONS: TestDefinition = TestDefinition::new(
    "random_excursions",
    "Random Excursions",
    excursions_min_bits,
    random_excursions,
);

pub const RANDOM_EXCURSIONS_VARIANT: TestDefinition = TestDefinition::new(
    "random_excursions_variant",
    "Random Excursions Variant",
    excursions_min_bits,
    random_excursions_variant,
);

/// Minimum number of cycles for the excursions tests.
pub const MIN_CYCLES: usize = 500;

const EXCURSION_STATES: [i64; 8] = [-4, -3, -2, -1, 1, 2, 3, 4];
const VARIANT_STATES: [i64; 18] = [
    -9, -8, -7, -6, -5, -4, -3, -2, -1, 1, 2, 3, 4, 5, 6, 7, 8, 9,
];

// ═══════════════════════════════════════════════════════════════════════════════
// Cumulative sums
// ═══════════════════════════════════════════════════════════════════════════════

fn cusum_min_bits(_: &TestParams) -> Result<usize, TestError> {
    Ok(100)
}

fn max_excursion<'a>(bits: impl Iterator<Item = &'a u8>) -> u64 {
    let mut s: i64 = 0;
    let mut z = 0u64;
    for &bit in bits {
        s += if bit == 1 { 1 } else { -1 };
        z = z.max(s.unsigned_abs());
    }
    z
}

fn cusum_p_value(n: usize, z: u64) -> f64 {
    let norm = Normal::standard();
    let nf = n as f64;
    let zf = z as f64;
    let sqrt_n = nf.sqrt();
    let ratio = nf / zf;

    let mut sum1 = 0.0;
    let mut k = ((-ratio + 1.0) / 4.0) as i64;
    while k as f64 <= (ratio - 1.0) / 4.0 {
        let kf = k as f64;
        sum1 += norm.cdf((4.0 * kf + 1.0) * zf / sqrt_n) - norm.cdf((4.0 * kf - 1.0) * zf / sqrt_n);
        k += 1;
    }
    let mut sum2 = 0.0;
    let mut k = ((-ratio - 3.0) / 4.0) as i64;
    while k as f64 <= (ratio - 1.0) / 4.0 {
        let kf = k as f64;
        sum2 += norm.cdf((4.0 * kf + 3.0) * zf / sqrt_n) - norm.cdf((4.0 * kf + 1.0) * zf / sqrt_n);
        k += 1;
    }
    1.0 - sum1 + sum2
}

/// Cumulative sums: maximal excursion of the walk, forward and backward.
pub fn cumulative_sums(sample: &Sample, _: &TestParams) -> Result<Evaluation, TestError> {
    let bits = sample.bits();
    let n = bits.len();
    let forward = max_excursion(bits.iter());
    let backward = max_excursion(bits.iter().rev());
    let p_fwd = cusum_p_value(n, forward);
    let p_bwd = cusum_p_value(n, backward);
    Evaluation::new(
        vec![p_fwd, p_bwd],
        forward as f64,
        format!("max|S| forward={forward}, backward={backward}, n={n}"),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Random excursions
// ═══════════════════════════════════════════════════════════════════════════════

fn excursions_min_bits(_: &TestParams) -> Result<usize, TestError> {
    Ok(1000)
}

/// Cycle statistics of the walk `0, S_1, ..., S_n, 0`.
struct Walk {
    cycles: usize,
    /// `visits[state][k]`: cycles visiting the state exactly k times (k = 5 means ≥ 5).
    visits: [[u64; 6]; 8],
    /// Total visits over the whole walk, per variant state.
    totals: [u64; 18],
}

impl Walk {
    fn new(bits: &[u8]) -> Self {
        let mut walk = Self {
            cycles: 0,
            visits: [[0; 6]; 8],
            totals: [0; 18],
        };
        let mut in_cycle = [0u64; 8];
        let mut s: i64 = 0;
        for &bit in bits {
            s += if bit == 1 { 1 } else { -1 };
            if s == 0 {
                walk.close_cycle(&mut in_cycle);
                continue;
            }
            if s.abs() <= 4 {
                in_cycle[excursion_index(s)] += 1;
            }
            if s.abs() <= 9 {
                walk.totals[variant_index(s)] += 1;
            }
        }
        if s != 0 {
            walk.close_cycle(&mut in_cycle);
        }
        walk
    }

    fn close_cycle(&mut self, in_cycle: &mut [u64; 8]) {
        self.cycles += 1;
        for (state, count) in in_cycle.iter_mut().enumerate() {
            self.visits[state][(*count).min(5) as usize] += 1;
            *count = 0;
        }
    }

    fn check_cycles(&self) -> Result<(), TestError> {
        if self.cycles < MIN_CYCLES {
            return Err(TestError::PreconditionFailed(format!(
                "only {} cycles, need {MIN_CYCLES}",
                self.cycles
            )));
        }
        Ok(())
    }
}

fn excursion_index(s: i64) -> usize {
    (if s < 0 { s + 4 } else { s + 3 }) as usize
}

fn variant_index(s: i64) -> usize {
    (if s < 0 { s + 9 } else { s + 8 }) as usize
}

/// Probability that a cycle visits state `x` exactly k times (k = 5 lumps ≥ 5).
fn visit_probabilities(x: i64) -> [f64; 6] {
    let a = 1.0 / (2.0 * x.unsigned_abs() as f64);
    let q = 1.0 - a;
    let mut probs = [0.0; 6];
    probs[0] = q;
    for (k, p) in probs.iter_mut().enumerate().take(5).skip(1) {
        *p = a * a * q.powi(k as i32 - 1);
    }
    probs[5] = a * q.powi(4);
    probs
}

fn excursion_chi2(observed: &[u64; 6], x: i64, cycles: usize) -> f64 {
    pearson_chi2(observed, &visit_probabilities(x), cycles as f64)
}

/// Random excursions: visits per cycle to states ±1..±4, one p-value per state.
pub fn random_excursions(sample: &Sample, _: &TestParams) -> Result<Evaluation, TestError> {
    let walk = Walk::new(sample.bits());
    walk.check_cycles()?;
    let mut p_values = Vec::with_capacity(EXCURSION_STATES.len());
    for (i, &x) in EXCURSION_STATES.iter().enumerate() {
        let chi2 = excursion_chi2(&walk.visits[i], x, walk.cycles);
        p_values.push(chi2_sf(5.0, chi2)?);
    }
    Evaluation::new(
        p_values,
        walk.cycles as f64,
        format!("cycles={}", walk.cycles),
    )
}

fn variant_p_value(total: u64, x: i64, cycles: usize) -> f64 {
    let j = cycles as f64;
    let denom = (2.0 * j * (4.0 * x.unsigned_abs() as f64 - 2.0)).sqrt();
    erfc((total as f64 - j).abs() / denom)
}

/// Random excursions variant: total visits to states ±1..±9, one p-value per state.
pub fn random_excursions_variant(
    sample: &Sample,
    _: &TestParams,
) -> Result<Evaluation, TestError> {
    let walk = Walk::new(sample.bits());
    walk.check_cycles()?;
    let p_values = VARIANT_STATES
        .iter()
        .zip(walk.totals.iter())
        .map(|(&x, &total)| variant_p_value(total, x, walk.cycles))
        .collect();
    Evaluation::new(
        p_values,
        walk.cycles as f64,
        format!("cycles={}", walk.cycles),
    )
}
