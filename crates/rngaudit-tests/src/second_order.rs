//! Second-order checks over p-values collected from many sequences.
//!
//! A generator can pass every first-order test on each sequence and still be
//! wrong in aggregate: too many sequences failing, or p-values bunched in one
//! part of `[0, 1]`. [`min_pass_proportion`] gives the acceptable range for the
//! former and [`uniformity`] tests the latter.

use serde::{Deserialize, Serialize};

use crate::{TestError, chi2_sf};

/// Below this many p-values the 10-bin chi-square is replaced by Kolmogorov-Smirnov.
pub const CHI_SQUARE_MIN_SAMPLES: usize = 55;

const BINS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformityMethod {
    ChiSquare,
    KolmogorovSmirnov,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uniformity {
    pub method: UniformityMethod,
    pub statistic: f64,
    pub p_value: f64,
    pub samples: usize,
}

/// Uniformity of p-values on `[0, 1]`, picking the method from the count.
pub fn uniformity(p_values: &[f64]) -> Result<Uniformity, TestError> {
    if p_values.len() >= CHI_SQUARE_MIN_SAMPLES {
        chi_square_uniformity(p_values)
    } else {
        ks_uniformity(p_values)
    }
}

/// 10-bin chi-square of p-values against the uniform distribution (9 df).
pub fn chi_square_uniformity(p_values: &[f64]) -> Result<Uniformity, TestError> {
    if p_values.is_empty() {
        return Err(TestError::InsufficientData { needed: 1, got: 0 });
    }
    let mut bins = [0u64; BINS];
    for &p in p_values {
        let idx = ((p.clamp(0.0, 1.0) * BINS as f64) as usize).min(BINS - 1);
        bins[idx] += 1;
    }
    let expected = p_values.len() as f64 / BINS as f64;
    let chi2: f64 = bins
        .iter()
        .map(|&f| (f as f64 - expected) * (f as f64 - expected) / expected)
        .sum();
    Ok(Uniformity {
        method: UniformityMethod::ChiSquare,
        statistic: chi2,
        p_value: chi2_sf((BINS - 1) as f64, chi2)?,
        samples: p_values.len(),
    })
}

/// One-sample Kolmogorov-Smirnov test against the uniform distribution.
pub fn ks_uniformity(values: &[f64]) -> Result<Uniformity, TestError> {
    if values.is_empty() {
        return Err(TestError::InsufficientData { needed: 1, got: 0 });
    }
    let mut sorted: Vec<f64> = values.iter().map(|v| v.clamp(0.0, 1.0)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let nf = sorted.len() as f64;
    let mut d_max = 0.0f64;
    for (i, &x) in sorted.iter().enumerate() {
        let above = (i + 1) as f64 / nf - x;
        let below = x - i as f64 / nf;
        d_max = d_max.max(above).max(below);
    }

    let sqrt_n = nf.sqrt();
    let lambda = (sqrt_n + 0.12 + 0.11 / sqrt_n) * d_max;
    Ok(Uniformity {
        method: UniformityMethod::KolmogorovSmirnov,
        statistic: d_max,
        p_value: kolmogorov_sf(lambda),
        samples: values.len(),
    })
}

/// Asymptotic Kolmogorov distribution tail Q(λ) = 2 Σ (-1)^(k-1) exp(-2k²λ²).
fn kolmogorov_sf(lambda: f64) -> f64 {
    let mut sum = 0.0;
    let mut sign = 2.0;
    let mut prev_term = 0.0f64;
    for k in 1..=100i32 {
        let term = sign * (-2.0 * (k as f64 * lambda).powi(2)).exp();
        sum += term;
        if term.abs() <= 1e-3 * prev_term.abs() || term.abs() <= 1e-10 * sum.abs() {
            return sum.clamp(0.0, 1.0);
        }
        sign = -sign;
        prev_term = term;
    }
    // no convergence: λ is tiny and the tail is 1
    1.0
}

/// Lower bound of the acceptable proportion of passing sequences:
/// `(1 − α) − 3·sqrt(α(1 − α)/s)`.
pub fn min_pass_proportion(alpha: f64, sequences: usize) -> f64 {
    let p_hat = 1.0 - alpha;
    p_hat - 3.0 * (p_hat * alpha / sequences.max(1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread(n: usize) -> Vec<f64> {
        (0..n).map(|i| (i as f64 + 0.5) / n as f64).collect()
    }

    #[test]
    fn test_method_selection() {
        assert_eq!(
            uniformity(&spread(54)).unwrap().method,
            UniformityMethod::KolmogorovSmirnov
        );
        assert_eq!(
            uniformity(&spread(55)).unwrap().method,
            UniformityMethod::ChiSquare
        );
    }

    #[test]
    fn test_chi_square_even_spread_passes() {
        let u = chi_square_uniformity(&spread(100)).unwrap();
        assert_eq!(u.statistic, 0.0);
        assert_eq!(u.p_value, 1.0);
    }

    #[test]
    fn test_chi_square_clustered_fails() {
        let values: Vec<f64> = (0..100).map(|i| 0.001 * (i % 50) as f64).collect();
        let u = chi_square_uniformity(&values).unwrap();
        assert!(u.p_value < 1e-10);
    }

    #[test]
    fn test_p_value_one_lands_in_last_bin() {
        let u = chi_square_uniformity(&[1.0; 60]).unwrap();
        assert!(u.p_value < 1e-10);
    }

    #[test]
    fn test_ks_even_spread_passes() {
        let u = ks_uniformity(&spread(20)).unwrap();
        assert!((u.statistic - 0.025).abs() < 1e-12);
        assert!(u.p_value > 0.99);
    }

    #[test]
    fn test_ks_clustered_fails() {
        let u = ks_uniformity(&[0.9, 0.91, 0.92, 0.95, 0.97, 0.99, 0.93, 0.94, 0.96, 0.98]).unwrap();
        assert!(u.p_value < 1e-4);
    }

    #[test]
    fn test_kolmogorov_known_values() {
        // 5% and 1% critical values
        assert!((kolmogorov_sf(1.36) - 0.049486).abs() < 1e-5);
        assert!((kolmogorov_sf(1.63) - 0.009846).abs() < 1e-5);
        assert_eq!(kolmogorov_sf(0.01), 1.0);
    }

    #[test]
    fn test_empty_is_insufficient() {
        assert!(matches!(
            uniformity(&[]),
            Err(TestError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_min_pass_proportion() {
        assert!((min_pass_proportion(0.01, 100) - 0.960150).abs() < 1e-5);
        assert!((min_pass_proportion(0.01, 1000) - 0.980561).abs() < 1e-6);
    }
}
