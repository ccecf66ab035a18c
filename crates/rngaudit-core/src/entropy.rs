//! Entropy estimation.
//!
//! Four estimators run over the same sample and each reports entropy per bit:
//!
//! - **Shannon** over 8-bit symbols, normalised by 8.
//! - **Most common value**: min-entropy from the 99% upper confidence bound on
//!   the most frequent byte.
//! - **Collision** over the binary sequence (SP 800-90B 6.3.2).
//! - **Markov** of order k over the binary sequence: probability of the most
//!   likely 128-bit path, with upper-bounded initial and transition probabilities.
//!
//! The report's selected value is the minimum over the estimators that had
//! enough data. Estimators that could not run are listed with a reason and
//! never count as zero.

use rngaudit_tests::Sample;
use serde::{Deserialize, Serialize};

/// z for a 99% one-sided confidence bound.
const Z_99: f64 = 2.576;

/// Path length for the Markov estimate.
const MARKOV_PATH_BITS: usize = 128;

pub const MAX_MARKOV_ORDER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    Shannon,
    MostCommonValue,
    Collision,
    Markov,
}

impl Estimator {
    pub const ALL: [Estimator; 4] = [
        Estimator::Shannon,
        Estimator::MostCommonValue,
        Estimator::Collision,
        Estimator::Markov,
    ];

    /// Minimum sample size in bits.
    pub fn min_bits(self, markov_order: usize) -> usize {
        match self {
            Self::Shannon | Self::MostCommonValue => 2048,
            Self::Collision => 1000,
            Self::Markov => 1000usize.max(100 << markov_order),
        }
    }
}

impl std::fmt::Display for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shannon => write!(f, "shannon"),
            Self::MostCommonValue => write!(f, "most_common_value"),
            Self::Collision => write!(f, "collision"),
            Self::Markov => write!(f, "markov"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyEstimate {
    pub estimator: Estimator,
    /// Entropy per bit in `[0, 1]`.
    pub entropy_per_bit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmittedEstimator {
    pub estimator: Estimator,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyReport {
    pub estimates: Vec<EntropyEstimate>,
    pub omitted: Vec<OmittedEstimator>,
    /// Estimator that produced the conservative value, if any ran.
    pub selected: Option<Estimator>,
    /// Minimum over `estimates`.
    pub min_entropy_per_bit: Option<f64>,
    pub sample_bits: usize,
}

impl EntropyReport {
    /// Build a report from already-computed estimates, selecting the minimum.
    pub fn from_estimates(
        estimates: Vec<EntropyEstimate>,
        omitted: Vec<OmittedEstimator>,
        sample_bits: usize,
    ) -> Self {
        let conservative = estimates
            .iter()
            .min_by(|a, b| a.entropy_per_bit.total_cmp(&b.entropy_per_bit));
        let selected = conservative.map(|e| e.estimator);
        let min_entropy_per_bit = conservative.map(|e| e.entropy_per_bit);
        Self {
            estimates,
            omitted,
            selected,
            min_entropy_per_bit,
            sample_bits,
        }
    }

    pub fn get(&self, estimator: Estimator) -> Option<f64> {
        self.estimates
            .iter()
            .find(|e| e.estimator == estimator)
            .map(|e| e.entropy_per_bit)
    }
}

/// Run every estimator over `sample`.
pub fn estimate_entropy(sample: &Sample, markov_order: usize) -> EntropyReport {
    let order = markov_order.clamp(1, MAX_MARKOV_ORDER);
    let mut estimates = Vec::new();
    let mut omitted = Vec::new();
    for estimator in Estimator::ALL {
        let needed = estimator.min_bits(order);
        if sample.len() < needed {
            omitted.push(OmittedEstimator {
                estimator,
                reason: format!("needs {needed} bits, sample has {}", sample.len()),
            });
            continue;
        }
        let value = match estimator {
            Estimator::Shannon => shannon(sample.bytes()),
            Estimator::MostCommonValue => most_common_value(sample.bytes()),
            Estimator::Collision => collision(sample.bits()),
            Estimator::Markov => markov(sample.bits(), order),
        };
        match value {
            Some(h) => estimates.push(EntropyEstimate {
                estimator,
                entropy_per_bit: if h > 0.0 { h.min(1.0) } else { 0.0 },
            }),
            None => omitted.push(OmittedEstimator {
                estimator,
                reason: "no usable statistic for this sample".to_string(),
            }),
        }
    }
    EntropyReport::from_estimates(estimates, omitted, sample.len())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Byte estimators
// ═══════════════════════════════════════════════════════════════════════════════

fn byte_counts(data: &[u8]) -> [u64; 256] {
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    counts
}

/// Shannon entropy of the byte distribution, per bit.
fn shannon(data: &[u8]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    let n = data.len() as f64;
    let h: f64 = byte_counts(data)
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum();
    Some(h / 8.0)
}

/// Most-common-value min-entropy with a 99% upper bound on the mode, per bit.
fn most_common_value(data: &[u8]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let n = data.len() as f64;
    let max = byte_counts(data).into_iter().max().unwrap_or(0) as f64;
    let p_hat = max / n;
    let p_upper = (p_hat + Z_99 * (p_hat * (1.0 - p_hat) / (n - 1.0)).sqrt()).min(1.0);
    Some(-p_upper.log2() / 8.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Binary estimators
// ═══════════════════════════════════════════════════════════════════════════════

/// Collision estimate for a binary alphabet.
///
/// With two symbols a collision happens after two or three bits, and the mean
/// collision time is `2 + 2pq`. The lower confidence bound on that mean is
/// inverted for the most likely symbol's probability.
fn collision(bits: &[u8]) -> Option<f64> {
    let mut times: Vec<f64> = Vec::with_capacity(bits.len() / 2);
    let mut i = 0;
    while i + 1 < bits.len() {
        if bits[i] == bits[i + 1] {
            times.push(2.0);
            i += 2;
        } else if i + 2 < bits.len() {
            times.push(3.0);
            i += 3;
        } else {
            break;
        }
    }
    if times.len() < 2 {
        return None;
    }
    let v = times.len() as f64;
    let mean = times.iter().sum::<f64>() / v;
    let var = times.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / (v - 1.0);
    let lower = mean - Z_99 * var.sqrt() / v.sqrt();
    let p = (0.5 + (1.25 - 0.5 * lower).max(0.0).sqrt()).min(1.0);
    Some(-p.log2())
}

/// Upper confidence margin for a probability estimated from `count` observations.
fn markov_margin(count: u64) -> f64 {
    if count == 0 {
        return 1.0;
    }
    (100f64.ln() / (2.0 * count as f64)).sqrt()
}

/// Order-k Markov min-entropy per bit.
fn markov(bits: &[u8], order: usize) -> Option<f64> {
    if bits.len() <= order {
        return None;
    }
    let states = 1usize << order;
    let mask = states - 1;

    let mut initial = vec![0u64; states];
    let mut from = vec![0u64; states];
    let mut transitions = vec![[0u64; 2]; states];

    let mut state = bits[..order]
        .iter()
        .fold(0usize, |acc, &b| (acc << 1) | b as usize);
    initial[state] += 1;
    for &bit in &bits[order..] {
        from[state] += 1;
        transitions[state][bit as usize] += 1;
        state = ((state << 1) | bit as usize) & mask;
        initial[state] += 1;
    }

    let windows: u64 = initial.iter().sum();
    let init_margin = markov_margin(windows);
    let log_init: Vec<f64> = initial
        .iter()
        .map(|&c| (c as f64 / windows as f64 + init_margin).min(1.0).log2())
        .collect();
    let log_trans: Vec<[f64; 2]> = (0..states)
        .map(|s| {
            let margin = markov_margin(from[s]);
            let total = from[s].max(1) as f64;
            [0, 1].map(|b| (transitions[s][b] as f64 / total + margin).min(1.0).log2())
        })
        .collect();

    // Most likely path: best log-probability of ending in each state.
    let mut best = log_init;
    for _ in order..MARKOV_PATH_BITS {
        let mut next = vec![f64::NEG_INFINITY; states];
        for (s, &lp) in best.iter().enumerate() {
            for b in 0..2 {
                let t = ((s << 1) | b) & mask;
                next[t] = next[t].max(lp + log_trans[s][b]);
            }
        }
        best = next;
    }
    let max_log = best.into_iter().fold(f64::NEG_INFINITY, f64::max);
    if !max_log.is_finite() {
        return None;
    }
    Some(-max_log / MARKOV_PATH_BITS as f64)
}
