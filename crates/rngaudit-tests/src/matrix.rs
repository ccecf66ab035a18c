//! Binary matrix rank over GF(2).
//!
//! One parametrised test covers the SP 800-22 32×32 rank test and the Diehard
//! 31×31 and 6×8 variants. Class probabilities come from the exact rank
//! distribution of a random binary matrix instead of hard-coded constants.

use crate::{
    Evaluation, Sample, Strategy, TestDefinition, TestError, TestParams, chi2_sf, pearson_chi2,
};

pub const BINARY_MATRIX_RANK: TestDefinition = TestDefinition::new(
    "binary_matrix_rank",
    "Binary Matrix Rank",
    rank_min_bits,
    binary_matrix_rank,
);

/// Largest accepted row or column count.
const MAX_DIM: usize = 1 << 16;

#[derive(Debug, Clone, Copy)]
struct RankParams {
    rows: usize,
    cols: usize,
    classes: usize,
    /// Bits per matrix, `rows * cols`.
    per_matrix: usize,
}

impl RankParams {
    fn from(params: &TestParams) -> Result<Self, TestError> {
        let rows = params.positive_or("rows", 32)?;
        let cols = params.positive_or("cols", 32)?;
        let classes = params.positive_or("classes", 3)?;
        for (name, dim) in [("rows", rows), ("cols", cols)] {
            if dim > MAX_DIM {
                return Err(TestError::invalid(name, format!("at most {MAX_DIM}")));
            }
        }
        let per_matrix = rows
            .checked_mul(cols)
            .ok_or_else(|| TestError::invalid("rows", "rows * cols overflows"))?;
        let max_classes = rows.min(cols) + 1;
        if classes < 2 || classes > max_classes {
            return Err(TestError::invalid(
                "classes",
                format!("must be in 2..={max_classes}"),
            ));
        }
        Ok(Self {
            rows,
            cols,
            classes,
            per_matrix,
        })
    }

    fn min_dim(&self) -> usize {
        self.rows.min(self.cols)
    }
}

/// Probability that a random `rows × cols` binary matrix has rank `r`.
pub fn rank_probability(rows: usize, cols: usize, r: usize) -> Result<f64, TestError> {
    let dim = |name: &str, v: usize| {
        i32::try_from(v).map_err(|_| TestError::invalid(name, "does not fit in i32"))
    };
    let (m, q, r_i) = (dim("rows", rows)?, dim("cols", cols)?, dim("rank", r)?);
    let (mf, qf, rf) = (f64::from(m), f64::from(q), f64::from(r_i));
    let mut log2p = rf * (qf + mf - rf) - mf * qf;
    for i in 0..r_i {
        let a = 1.0 - 2f64.powi(i - q);
        let b = 1.0 - 2f64.powi(i - m);
        let c = 1.0 - 2f64.powi(i - r_i);
        log2p += (a * b / c).log2();
    }
    Ok(2f64.powf(log2p))
}

/// Class probabilities: full rank, full-1, ..., and a final lumped tail class.
fn class_probabilities(p: &RankParams) -> Result<Vec<f64>, TestError> {
    let full = p.min_dim();
    let mut probs = (0..p.classes - 1)
        .map(|k| rank_probability(p.rows, p.cols, full - k))
        .collect::<Result<Vec<f64>, _>>()?;
    let head: f64 = probs.iter().sum();
    probs.push((1.0 - head).max(0.0));
    Ok(probs)
}

fn rank_min_bits(params: &TestParams) -> Result<usize, TestError> {
    let p = RankParams::from(params)?;
    let min_prob = class_probabilities(&p)?
        .into_iter()
        .fold(1.0, f64::min)
        .max(1e-9);
    // enough matrices for five expected hits in the rarest class, and at least 38
    let matrices = ((5.0 / min_prob).ceil() as usize).max(38);
    matrices
        .checked_mul(p.per_matrix)
        .ok_or_else(|| TestError::invalid("rows", "required sample size overflows"))
}

/// GF(2) Gaussian elimination to compute binary matrix rank.
fn gf2_rank(matrix: &[u8], rows: usize, cols: usize) -> usize {
    let mut m: Vec<Vec<u8>> = (0..rows)
        .map(|r| matrix[r * cols..(r + 1) * cols].to_vec())
        .collect();
    let mut rank = 0;
    for col in 0..cols {
        let Some(pivot) = (rank..rows).find(|&row| m[row][col] == 1) else {
            continue;
        };
        m.swap(rank, pivot);
        for row in 0..rows {
            if row != rank && m[row][col] == 1 {
                let rank_row = m[rank].clone();
                for (m_c, r_c) in m[row].iter_mut().zip(rank_row.iter()) {
                    *m_c ^= r_c;
                }
            }
        }
        rank += 1;
        if rank == rows {
            break;
        }
    }
    rank
}

/// Same elimination with each row packed into a `u64` (requires `cols <= 64`).
fn gf2_rank_packed(matrix: &[u8], rows: usize, cols: usize) -> usize {
    let mut m: Vec<u64> = (0..rows)
        .map(|r| {
            matrix[r * cols..(r + 1) * cols]
                .iter()
                .fold(0u64, |acc, &b| (acc << 1) | b as u64)
        })
        .collect();
    let mut rank = 0;
    for col in 0..cols {
        let mask = 1u64 << (cols - 1 - col);
        let Some(pivot) = (rank..rows).find(|&row| m[row] & mask != 0) else {
            continue;
        };
        m.swap(rank, pivot);
        let pivot_row = m[rank];
        for (row, value) in m.iter_mut().enumerate() {
            if row != rank && *value & mask != 0 {
                *value ^= pivot_row;
            }
        }
        rank += 1;
        if rank == rows {
            break;
        }
    }
    rank
}

/// Binary matrix rank: distribution of ranks of consecutive `rows × cols` matrices.
pub fn binary_matrix_rank(sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
    let p = RankParams::from(params)?;
    let probs = class_probabilities(&p)?;
    let per_matrix = p.per_matrix;
    let packed = sample.strategy() == Strategy::WordParallel && p.cols <= 64;
    let full = p.min_dim();

    let mut observed = vec![0u64; p.classes];
    let mut num_matrices = 0usize;
    for matrix in sample.bits().chunks_exact(per_matrix) {
        let rank = if packed {
            gf2_rank_packed(matrix, p.rows, p.cols)
        } else {
            gf2_rank(matrix, p.rows, p.cols)
        };
        let class = (full - rank).min(p.classes - 1);
        observed[class] += 1;
        num_matrices += 1;
    }

    let chi2 = pearson_chi2(&observed, &probs, num_matrices as f64);
    let p_value = chi2_sf((p.classes - 1) as f64, chi2)?;
    Evaluation::single(
        p_value,
        chi2,
        format!(
            "N={num_matrices}, {}x{}, rank classes={observed:?}",
            p.rows, p.cols
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatisticalTest;
    use crate::testutil::*;

    fn probs(rows: u64, cols: u64, classes: u64) -> Vec<f64> {
        let params = TestParams::new()
            .with("rows", rows)
            .with("cols", cols)
            .with("classes", classes);
        class_probabilities(&RankParams::from(&params).unwrap()).unwrap()
    }

    #[test]
    fn test_nist_32x32_probabilities() {
        let p = probs(32, 32, 3);
        assert!((p[0] - 0.2888).abs() < 1e-4);
        assert!((p[1] - 0.5776).abs() < 1e-4);
        assert!((p[2] - 0.1336).abs() < 1e-4);
    }

    #[test]
    fn test_diehard_probabilities() {
        let p = probs(31, 31, 4);
        assert!((p[0] - 0.2887880952).abs() < 1e-6);
        assert!((p[1] - 0.5775761902).abs() < 1e-6);
        assert!((p[2] - 0.1283502644).abs() < 1e-6);
        assert!((p[3] - 0.0052854502).abs() < 1e-6);

        let p = probs(6, 8, 3);
        assert!((p[0] - 0.773118).abs() < 1e-5);
        assert!((p[1] - 0.217439).abs() < 1e-5);
        assert!((p[2] - 0.009443).abs() < 1e-5);
    }

    #[test]
    fn test_gf2_rank_identity_and_duplicate_rows() {
        let identity: Vec<u8> = (0..16).map(|i| u8::from(i % 5 == 0)).collect();
        assert_eq!(gf2_rank(&identity, 4, 4), 4);
        assert_eq!(gf2_rank_packed(&identity, 4, 4), 4);

        let dup = [1, 0, 1, 1, 0, 1, 1, 0, 1];
        assert_eq!(gf2_rank(&dup, 3, 3), 2);
        assert_eq!(gf2_rank_packed(&dup, 3, 3), 2);
    }

    #[test]
    fn test_strategies_agree() {
        let data = pseudo_random(6000);
        let params = TestParams::new();
        let scalar = binary_matrix_rank(
            &Sample::from_bytes(&data).with_strategy(Strategy::Scalar),
            &params,
        )
        .unwrap();
        let packed = binary_matrix_rank(
            &Sample::from_bytes(&data).with_strategy(Strategy::WordParallel),
            &params,
        )
        .unwrap();
        assert_eq!(scalar, packed);
    }

    #[test]
    fn test_constant_fails() {
        let eval = binary_matrix_rank(&constant_sample(40 * 1024), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] < 1e-6);
    }

    #[test]
    fn test_min_bits_rejects_bad_classes() {
        let params = TestParams::new().with("rows", 4).with("cols", 4).with("classes", 6);
        assert!(matches!(
            BINARY_MATRIX_RANK.min_bits(&params),
            Err(TestError::InvalidParameter { .. })
        ));
        assert_eq!(BINARY_MATRIX_RANK.min_bits(&TestParams::new()).unwrap(), 38 * 1024);
    }

    #[test]
    fn test_min_bits_rejects_huge_dimensions() {
        for (rows, cols) in [(1u64 << 32, 1u64 << 32), (1 << 32, 31), (31, 1 << 40)] {
            let params = TestParams::new()
                .with("rows", rows)
                .with("cols", cols)
                .with("classes", 4);
            assert!(
                matches!(
                    BINARY_MATRIX_RANK.min_bits(&params),
                    Err(TestError::InvalidParameter { .. })
                ),
                "{rows}x{cols}"
            );
        }
    }

    #[test]
    fn test_rank_probability_rejects_out_of_range() {
        assert!(rank_probability(1 << 40, 4, 2).is_err());
        assert!(rank_probability(4, 4, 1 << 33).is_err());
        let p = rank_probability(32, 32, 32).unwrap();
        assert!((p - 0.2888).abs() < 1e-4);
    }
}
