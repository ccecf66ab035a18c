//! Diehard-style tests: birthday spacings and craps.
//!
//! The Diehard rank tests are covered by [`crate::matrix::BINARY_MATRIX_RANK`]
//! with `rows`/`cols`/`classes` parameters, and count-the-1s lives in
//! [`crate::frequency`].

use statrs::distribution::{DiscreteCDF, Poisson};
use statrs::function::erf::erfc;

use crate::{
    Evaluation, Sample, TestDefinition, TestError, TestParams, chi2_sf, pearson_chi2,
};

pub const BIRTHDAY_SPACINGS: TestDefinition = TestDefinition::new(
    "birthday_spacings",
    "Birthday Spacings",
    birthday_min_bits,
    birthday_spacings,
);

pub const CRAPS: TestDefinition = TestDefinition::new("craps", "Craps", craps_min_bits, craps);

// ═══════════════════════════════════════════════════════════════════════════════
// Birthday spacings
// ═══════════════════════════════════════════════════════════════════════════════

struct BirthdayParams {
    birthdays: usize,
    day_bits: usize,
    repeats: usize,
    /// Bits per year of birthdays.
    per_repeat: usize,
}

impl BirthdayParams {
    fn from(params: &TestParams) -> Result<Self, TestError> {
        let birthdays = params.positive_or("birthdays", 512)?;
        let day_bits = params.positive_or("day_bits", 24)?;
        let repeats = params.positive_or("repeats", 20)?;
        if birthdays < 3 {
            return Err(TestError::invalid("birthdays", "must be at least 3"));
        }
        if day_bits > 48 {
            return Err(TestError::invalid("day_bits", "at most 48"));
        }
        let per_repeat = birthdays
            .checked_mul(day_bits)
            .ok_or_else(|| TestError::invalid("birthdays", "too large"))?;
        Ok(Self {
            birthdays,
            day_bits,
            repeats,
            per_repeat,
        })
    }

    /// Expected duplicate spacings per repeat: m³ / 4n.
    fn lambda(&self) -> f64 {
        let m = self.birthdays as f64;
        m * m * m / (4.0 * 2f64.powi(self.day_bits as i32))
    }
}

fn birthday_min_bits(params: &TestParams) -> Result<usize, TestError> {
    let p = BirthdayParams::from(params)?;
    p.repeats
        .checked_mul(p.per_repeat)
        .ok_or_else(|| TestError::invalid("repeats", "too large"))
}

/// Number of spacings that repeat an earlier spacing, for one year of birthdays.
fn duplicate_spacings(mut days: Vec<u64>) -> u64 {
    days.sort_unstable();
    let mut spacings: Vec<u64> = days.windows(2).map(|w| w[1] - w[0]).collect();
    spacings.sort_unstable();
    spacings.windows(2).filter(|w| w[0] == w[1]).count() as u64
}

/// Birthday spacings: duplicate spacings totalled over repeats vs Poisson, two-sided.
pub fn birthday_spacings(sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
    let p = BirthdayParams::from(params)?;
    let per_repeat = p.per_repeat;
    let mut total = 0u64;
    for year in sample.bits().chunks_exact(per_repeat).take(p.repeats) {
        let days: Vec<u64> = year
            .chunks_exact(p.day_bits)
            .map(|day| day.iter().fold(0u64, |acc, &b| (acc << 1) | b as u64))
            .collect();
        total += duplicate_spacings(days);
    }

    let lambda = p.lambda() * p.repeats as f64;
    let poisson = Poisson::new(lambda)
        .map_err(|e| TestError::Degenerate(format!("poisson lambda={lambda}: {e}")))?;
    let p_lower = poisson.cdf(total);
    let p_upper = if total > 0 { poisson.sf(total - 1) } else { 1.0 };
    let pv = (2.0 * p_lower.min(p_upper)).min(1.0);
    Evaluation::single(
        pv,
        total as f64,
        format!(
            "duplicates={total}, lambda={lambda:.2}, m={}, repeats={}",
            p.birthdays, p.repeats
        ),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Craps
// ═══════════════════════════════════════════════════════════════════════════════

const MIN_GAMES: usize = 300;

/// Last throw-count class lumps games lasting this many throws or more.
const THROW_CLASSES: usize = 13;

/// Probability of winning a game of craps.
pub const WIN_PROBABILITY: f64 = 244.0 / 495.0;

/// Number of ways to roll each sum with two dice, indexed by sum.
const WAYS: [u32; 13] = [0, 0, 1, 2, 3, 4, 5, 6, 5, 4, 3, 2, 1];

/// P(game lasts t throws) for t = 1..12, then P(t ≥ 13).
fn throw_probabilities() -> [f64; THROW_CLASSES] {
    let mut probs = [0.0; THROW_CLASSES];
    probs[0] = 12.0 / 36.0;
    for point in [4usize, 5, 6, 8, 9, 10] {
        let pi = WAYS[point] as f64 / 36.0;
        let resolve = (WAYS[point] + 6) as f64 / 36.0;
        for t in 2..THROW_CLASSES {
            probs[t - 1] += pi * (1.0 - resolve).powi(t as i32 - 2) * resolve;
        }
        probs[THROW_CLASSES - 1] += pi * (1.0 - resolve).powi(THROW_CLASSES as i32 - 2);
    }
    probs
}

fn craps_min_bits(_: &TestParams) -> Result<usize, TestError> {
    // about seven dice per game on average
    Ok(MIN_GAMES * 8 * 32)
}

/// One game's outcome: (won, throws).
fn play<I: Iterator<Item = u32>>(dice: &mut I) -> Option<(bool, usize)> {
    let mut roll = || Some(dice.next()? + dice.next()?);
    let first = roll()?;
    match first {
        7 | 11 => return Some((true, 1)),
        2 | 3 | 12 => return Some((false, 1)),
        _ => {}
    }
    let mut throws = 1;
    loop {
        let sum = roll()?;
        throws += 1;
        if sum == first {
            return Some((true, throws));
        }
        if sum == 7 {
            return Some((false, throws));
        }
    }
}

/// Craps: wins (normal approximation) and throws per game (chi-square).
pub fn craps(sample: &Sample, params: &TestParams) -> Result<Evaluation, TestError> {
    let cap = params.positive("games")?.unwrap_or(usize::MAX);
    let mut dice = sample
        .bytes()
        .chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .map(|w| ((w as u64 * 6) >> 32) as u32 + 1);

    let mut games = 0usize;
    let mut wins = 0u64;
    let mut observed = [0u64; THROW_CLASSES];
    while games < cap {
        let Some((won, throws)) = play(&mut dice) else {
            break;
        };
        games += 1;
        wins += u64::from(won);
        observed[throws.min(THROW_CLASSES) - 1] += 1;
    }
    if games < MIN_GAMES {
        return Err(TestError::InsufficientData {
            needed: craps_min_bits(params)?,
            got: sample.len(),
        });
    }

    let g = games as f64;
    let mean = g * WIN_PROBABILITY;
    let sd = (g * WIN_PROBABILITY * (1.0 - WIN_PROBABILITY)).sqrt();
    let z = (wins as f64 - mean) / sd;
    let p_wins = erfc(z.abs() / 2.0_f64.sqrt());

    let chi2 = pearson_chi2(&observed, &throw_probabilities(), g);
    let p_throws = chi2_sf((THROW_CLASSES - 1) as f64, chi2)?;
    Evaluation::new(
        vec![p_wins, p_throws],
        z,
        format!("games={games}, wins={wins}, throws_chi2={chi2:.3}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatisticalTest;
    use crate::testutil::*;

    #[test]
    fn test_duplicate_spacings() {
        // spacings 2, 3, 2, 3 → two repeats
        assert_eq!(duplicate_spacings(vec![0, 2, 5, 7, 10]), 2);
        assert_eq!(duplicate_spacings(vec![10, 0, 1]), 0);
    }

    #[test]
    fn test_birthday_lambda() {
        let p = BirthdayParams::from(&TestParams::new()).unwrap();
        assert!((p.lambda() - 2.0).abs() < 1e-12);
        assert_eq!(BIRTHDAY_SPACINGS.min_bits(&TestParams::new()).unwrap(), 245_760);
    }

    #[test]
    fn test_birthday_min_bits_overflow_rejected() {
        for params in [
            TestParams::new().with("birthdays", u64::MAX / 2),
            TestParams::new().with("repeats", u64::MAX / 4),
        ] {
            assert!(matches!(
                BIRTHDAY_SPACINGS.min_bits(&params),
                Err(TestError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_birthday_random_passes() {
        let eval = birthday_spacings(&random_sample(40_000), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] > 0.001, "{}", eval.details);
    }

    #[test]
    fn test_birthday_constant_fails() {
        let eval = birthday_spacings(&constant_sample(245_760), &TestParams::new()).unwrap();
        assert!(eval.p_values[0] < 1e-10);
    }

    #[test]
    fn test_throw_probabilities_sum_to_one() {
        let probs = throw_probabilities();
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((probs[0] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_win_probability() {
        let mut p_win = 8.0 / 36.0;
        for point in [4usize, 5, 6, 8, 9, 10] {
            let w = WAYS[point] as f64;
            p_win += w / 36.0 * w / (w + 6.0);
        }
        assert!((p_win - WIN_PROBABILITY).abs() < 1e-12);
    }

    #[test]
    fn test_play_fixed_rolls() {
        let mut dice = [3u32, 4].into_iter();
        assert_eq!(play(&mut dice), Some((true, 1)));
        let mut dice = [2u32, 2, 1, 1, 6, 1].into_iter();
        assert_eq!(play(&mut dice), Some((false, 3)));
        let mut dice = [2u32, 2].into_iter();
        assert_eq!(play(&mut dice), None);
    }

    #[test]
    fn test_craps_random_passes() {
        let eval = craps(&random_sample(120_000), &TestParams::new()).unwrap();
        assert_eq!(eval.p_values.len(), 2);
        assert!(eval.min_p() > 0.001, "{}", eval.details);
    }

    #[test]
    fn test_craps_constant_fails() {
        // every die shows 1: snake eyes, always lost on the first throw
        let eval = craps(&constant_sample(100_000), &TestParams::new()).unwrap();
        assert!(eval.min_p() < 1e-10);
    }

    #[test]
    fn test_craps_game_cap_too_small() {
        let params = TestParams::new().with("games", 10);
        assert!(matches!(
            craps(&random_sample(20_000), &params),
            Err(TestError::InsufficientData { .. })
        ));
    }
}
