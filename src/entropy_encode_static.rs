//! Static prefix codes for fast-mode meta-blocks.
//!
//! These are the fixed command and distance code depths the fast writer uses
//! so that short meta-blocks need only a literal tree description. The
//! canonical code words are derived from the depths on first use.

use once_cell::sync::Lazy;

use crate::constants::NUM_COMMAND_SYMBOLS;
use crate::entropy_encode::convert_bit_depths_to_symbols;

/// Depths of the static insert-and-copy command code.
#[rustfmt::skip]
pub const STATIC_COMMAND_CODE_DEPTH: [u8; NUM_COMMAND_SYMBOLS] = [
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11, 11,
    11, 11, 11, 11,
];

/// Depths of the static distance code (64-symbol alphabet).
#[rustfmt::skip]
pub const STATIC_DISTANCE_CODE_DEPTH: [u8; 64] = [
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    6, 6, 6, 6,
];

/// Canonical code words matching [`STATIC_COMMAND_CODE_DEPTH`].
pub static STATIC_COMMAND_CODE_BITS: Lazy<Vec<u16>> = Lazy::new(|| {
    let mut bits = vec![0u16; NUM_COMMAND_SYMBOLS];
    convert_bit_depths_to_symbols(&STATIC_COMMAND_CODE_DEPTH, NUM_COMMAND_SYMBOLS, &mut bits);
    bits
});

/// Canonical code words matching [`STATIC_DISTANCE_CODE_DEPTH`].
pub static STATIC_DISTANCE_CODE_BITS: Lazy<Vec<u16>> = Lazy::new(|| {
    let mut bits = vec![0u16; 64];
    convert_bit_depths_to_symbols(&STATIC_DISTANCE_CODE_DEPTH, 64, &mut bits);
    bits
});

#[cfg(test)]
mod tests {
    use super::*;

    fn kraft_sum(depths: &[u8]) -> u64 {
        depths
            .iter()
            .filter(|&&d| d > 0)
            .map(|&d| 1u64 << (15 - u32::from(d)))
            .sum()
    }

    #[test]
    fn static_codes_are_complete() {
        assert_eq!(kraft_sum(&STATIC_COMMAND_CODE_DEPTH), 1 << 15);
        assert_eq!(kraft_sum(&STATIC_DISTANCE_CODE_DEPTH), 1 << 15);
    }

    #[test]
    fn code_words_fit_their_depths() {
        for (i, &d) in STATIC_COMMAND_CODE_DEPTH.iter().enumerate() {
            assert!(u32::from(STATIC_COMMAND_CODE_BITS[i]) < (1 << d), "symbol {}", i);
        }
        for (i, &d) in STATIC_DISTANCE_CODE_DEPTH.iter().enumerate() {
            assert!(u32::from(STATIC_DISTANCE_CODE_BITS[i]) < (1 << d), "symbol {}", i);
        }
    }
}
