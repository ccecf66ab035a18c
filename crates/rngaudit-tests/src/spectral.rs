//! Discrete Fourier transform (spectral) test.

use rustfft::{FftPlanner, num_complex::Complex};
use statrs::function::erf::erfc;

use crate::{Evaluation, Sample, TestDefinition, TestError, TestParams};

pub const DFT_SPECTRAL: TestDefinition = TestDefinition::new(
    "dft_spectral",
    "Discrete Fourier Transform (Spectral)",
    dft_min_bits,
    dft_spectral,
);

fn dft_min_bits(_: &TestParams) -> Result<usize, TestError> {
    Ok(1000)
}

/// DFT spectral: detect periodic features via FFT.
///
/// Counts the peaks of the first n/2 magnitudes below the 95% threshold
/// `sqrt(ln(1/0.05) * n)` and compares against the expected 0.95·n/2.
pub fn dft_spectral(sample: &Sample, _: &TestParams) -> Result<Evaluation, TestError> {
    let bits = sample.bits();
    let n = bits.len();

    let mut buffer: Vec<Complex<f64>> = bits
        .iter()
        .map(|&b| Complex {
            re: if b == 1 { 1.0 } else { -1.0 },
            im: 0.0,
        })
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    let half = n / 2;
    let threshold = ((1.0f64 / 0.05).ln() * n as f64).sqrt();
    let n0 = 0.95 * half as f64;
    let n1 = buffer[..half].iter().filter(|c| c.norm() < threshold).count() as f64;
    let d = (n1 - n0) / (n as f64 * 0.95 * 0.05 / 4.0).sqrt();
    let p = erfc(d.abs() / 2.0_f64.sqrt());
    Evaluation::single(
        p,
        d,
        format!("peaks_below_threshold={}/{half}", n1 as u64),
    )
}
