//! Execution strategies for the hot loops.
//!
//! Both strategies compute exactly the same integers; the word-parallel one
//! works on packed 64-bit words and is picked for large samples.

use serde::{Deserialize, Serialize};

/// Samples at least this long (in bits) default to [`Strategy::WordParallel`].
pub const WORD_PARALLEL_THRESHOLD: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One bit at a time over the unpacked representation.
    #[default]
    Scalar,
    /// Packed 64-bit words with hardware popcount / XOR row reduction.
    WordParallel,
}

impl Strategy {
    /// Pick a strategy from the sample size.
    pub fn for_len(n_bits: usize) -> Self {
        if n_bits >= WORD_PARALLEL_THRESHOLD {
            Self::WordParallel
        } else {
            Self::Scalar
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::WordParallel => write!(f, "word_parallel"),
        }
    }
}

#[inline]
fn bit_at(packed: &[u8], i: usize) -> usize {
    ((packed[i / 8] >> (7 - i % 8)) & 1) as usize
}

/// Count ones in bit range `start..end` of an MSB-first packed buffer.
pub fn count_ones_packed(packed: &[u8], start: usize, end: usize) -> usize {
    let mut count = 0usize;
    let mut i = start;
    while i < end && i % 8 != 0 {
        count += bit_at(packed, i);
        i += 1;
    }
    let aligned_end = end - (end - i) % 8;
    let mut words = packed[i / 8..aligned_end / 8].chunks_exact(8);
    for word in &mut words {
        let w = word.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        count += w.count_ones() as usize;
    }
    count += words
        .remainder()
        .iter()
        .map(|b| b.count_ones() as usize)
        .sum::<usize>();
    i = aligned_end;
    while i < end {
        count += bit_at(packed, i);
        i += 1;
    }
    count
}
