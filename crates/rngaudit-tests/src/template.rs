//! Template matching tests.

use crate::{
    Evaluation, Sample, TestDefinition, TestError, TestParams, chi2_sf, pearson_chi2,
};

pub const NON_OVERLAPPING_TEMPLATE: TestDefinition = TestDefinition::new(
    "non_overlapping_template",
    "Non-overlapping Template Matching",
    non_overlapping_min_bits,
    non_overlapping_template,
);

pub const OVERLAPPING_TEMPLATE: TestDefinition = TestDefinition::new(
    "overlapping_template",
    "Overlapping Template Matching",
    overlapping_min_bits,
    overlapping_template,
);

const MAX_TEMPLATE_LEN: usize = 24;

// ═══════════════════════════════════════════════════════════════════════════════
// Non-overlapping
// ═══════════════════════════════════════════════════════════════════════════════

struct NonOverlappingParams {
    template: usize,
    m: usize,
    blocks: usize,
}

impl NonOverlappingParams {
    fn from(params: &TestParams) -> Result<Self, TestError> {
        let m = params.positive_or("template_len", 9)?;
        if m > MAX_TEMPLATE_LEN {
            return Err(TestError::invalid(
                "template_len",
                format!("at most {MAX_TEMPLATE_LEN}"),
            ));
        }
        // zero is the all-zeros template
        let template = params.get("template").unwrap_or(1) as usize;
        if template >> m != 0 {
            return Err(TestError::invalid(
                "template",
                format!("does not fit in {m} bits"),
            ));
        }
        let blocks = params.positive_or("blocks", 8)?;
        Ok(Self {
            template,
            m,
            blocks,
        })
    }
}

fn non_overlapping_min_bits(params: &TestParams) -> Result<usize, TestError> {
    let p = NonOverlappingParams::from(params)?;
    p.blocks
        .checked_mul(1 << p.m)
        .ok_or_else(|| TestError::invalid("blocks", "too large"))
}

fn window_value(bits: &[u8]) -> usize {
    bits.iter().fold(0usize, |acc, &b| (acc << 1) | b as usize)
}

/// Non-overlapping template: occurrences of an m-bit template per block,
/// skipping past each match.
pub fn non_overlapping_template(
    sample: &Sample,
    params: &TestParams,
) -> Result<Evaluation, TestError> {
    let p = NonOverlappingParams::from(params)?;
    let bits = sample.bits();
    let block_len = bits.len() / p.blocks;
    if block_len < p.m {
        return Err(TestError::InsufficientData {
            needed: p.blocks * p.m,
            got: bits.len(),
        });
    }

    let mut counts = Vec::with_capacity(p.blocks);
    for block in bits.chunks_exact(block_len).take(p.blocks) {
        let mut count = 0u64;
        let mut i = 0;
        while i + p.m <= block_len {
            if window_value(&block[i..i + p.m]) == p.template {
                count += 1;
                i += p.m;
            } else {
                i += 1;
            }
        }
        counts.push(count);
    }

    let pow = (1u64 << p.m) as f64;
    let mu = (block_len - p.m + 1) as f64 / pow;
    let var =
        block_len as f64 * (1.0 / pow - (2.0 * p.m as f64 - 1.0) / (pow * pow));
    if var <= 0.0 {
        return Err(TestError::Degenerate(format!("variance {var}")));
    }
    let chi2: f64 = counts
        .iter()
        .map(|&w| (w as f64 - mu) * (w as f64 - mu) / var)
        .sum();
    let pv = chi2_sf(p.blocks as f64, chi2)?;
    Evaluation::single(
        pv,
        chi2,
        format!(
            "template={:0width$b}, M={block_len}, counts={counts:?}",
            p.template,
            width = p.m
        ),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Overlapping
// ═══════════════════════════════════════════════════════════════════════════════

/// SP 800-22 class probabilities for m=9, M=1032 (K=5).
const NIST_OVERLAPPING_PI: [f64; 6] = [
    0.364091, 0.185659, 0.139381, 0.100571, 0.070432, 0.139865,
];

struct OverlappingParams {
    m: usize,
    block_size: usize,
}

impl OverlappingParams {
    fn from(params: &TestParams) -> Result<Self, TestError> {
        let m = params.positive_or("template_len", 9)?;
        let block_size = params.positive_or("block_size", 1032)?;
        if m > MAX_TEMPLATE_LEN {
            return Err(TestError::invalid(
                "template_len",
                format!("at most {MAX_TEMPLATE_LEN}"),
            ));
        }
        if block_size <= m {
            return Err(TestError::invalid(
                "block_size",
                "must exceed template_len",
            ));
        }
        Ok(Self { m, block_size })
    }

    fn probabilities(&self) -> Vec<f64> {
        if self.m == 9 && self.block_size == 1032 {
            return NIST_OVERLAPPING_PI.to_vec();
        }
        let lambda = (self.block_size - self.m + 1) as f64 / (1u64 << self.m) as f64;
        compound_poisson_probs(lambda / 2.0, 5)
    }
}

/// P(U = u) for u < k under the compound Poisson model, last class lumps `u >= k`.
fn compound_poisson_probs(eta: f64, k: usize) -> Vec<f64> {
    let mut probs = Vec::with_capacity(k + 1);
    probs.push((-eta).exp());
    for u in 1..k {
        let mut sum = 0.0;
        let mut binom = 1.0; // C(u-1, l-1)
        let mut eta_pow_over_fact = 1.0; // eta^l / l!
        for l in 1..=u {
            eta_pow_over_fact *= eta / l as f64;
            sum += binom * eta_pow_over_fact;
            binom *= (u - l) as f64 / l as f64;
        }
        probs.push((-eta).exp() * sum / 2f64.powi(u as i32));
    }
    let head: f64 = probs.iter().sum();
    probs.push((1.0 - head).max(0.0));
    probs
}

fn overlapping_min_bits(params: &TestParams) -> Result<usize, TestError> {
    let p = OverlappingParams::from(params)?;
    p.block_size
        .checked_mul(50)
        .ok_or_else(|| TestError::invalid("block_size", "too large"))
}

/// Overlapping template: runs of m ones counted with overlap in M-bit blocks.
pub fn overlapping_template(sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
    let p = OverlappingParams::from(params)?;
    let probs = p.probabilities();
    let k = probs.len() - 1;

    let mut observed = vec![0u64; probs.len()];
    let mut num_blocks = 0usize;
    for block in sample.bits().chunks_exact(p.block_size) {
        let mut run = 0usize;
        let mut matches = 0usize;
        for &bit in block {
            if bit == 1 {
                run += 1;
                if run >= p.m {
                    matches += 1;
                }
            } else {
                run = 0;
            }
        }
        observed[matches.min(k)] += 1;
        num_blocks += 1;
    }

    let chi2 = pearson_chi2(&observed, &probs, num_blocks as f64);
    let pv = chi2_sf(k as f64, chi2)?;
    Evaluation::single(
        pv,
        chi2,
        format!("N={num_blocks}, m={}, classes={observed:?}", p.m),
    )
}
