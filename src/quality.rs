//! Quality-level policy: thresholds, block sizing and hasher selection.

use crate::constants::{
    MAX_INPUT_BLOCK_BITS, MAX_QUALITY, MAX_WINDOW_BITS, MIN_INPUT_BLOCK_BITS, MIN_QUALITY,
    MIN_WINDOW_BITS,
};
use crate::params::{EncoderParams, HasherParams};

pub const FAST_ONE_PASS_COMPRESSION_QUALITY: i32 = 0;
pub const FAST_TWO_PASS_COMPRESSION_QUALITY: i32 = 1;
pub const ZOPFLIFICATION_QUALITY: i32 = 10;
pub const HQ_ZOPFLIFICATION_QUALITY: i32 = 11;

pub const MAX_QUALITY_FOR_STATIC_ENTROPY_CODES: i32 = 2;
pub const MIN_QUALITY_FOR_BLOCK_SPLIT: i32 = 4;
pub const MIN_QUALITY_FOR_OPTIMIZE_HISTOGRAMS: i32 = 4;
pub const MIN_QUALITY_FOR_EXTENSIVE_REFERENCE_SEARCH: i32 = 5;
pub const MIN_QUALITY_FOR_CONTEXT_MODELING: i32 = 5;
pub const MIN_QUALITY_FOR_HQ_CONTEXT_MODELING: i32 = 7;
pub const MIN_QUALITY_FOR_HQ_BLOCK_SPLITTING: i32 = 10;

/// Without block splitting, buffer at most this many literals and commands.
pub const MAX_NUM_DELAYED_SYMBOLS: usize = 0x2FFF;

/// The maximum copy length for which zopflification emits distinct
/// distances; longer matches are taken whole.
pub const MAX_ZOPFLI_LEN_QUALITY_10: usize = 150;
pub const MAX_ZOPFLI_LEN_QUALITY_11: usize = 325;

/// When a copy at least this long is found, stop searching thoroughly.
pub const LONG_COPY_QUICK_STEP: usize = 16384;

pub fn max_zopfli_len(params: &EncoderParams) -> usize {
    if params.quality <= 10 {
        MAX_ZOPFLI_LEN_QUALITY_10
    } else {
        MAX_ZOPFLI_LEN_QUALITY_11
    }
}

/// Number of best start-position candidates the zopfli chain expands.
pub fn max_zopfli_candidates(params: &EncoderParams) -> usize {
    if params.quality <= 10 {
        1
    } else {
        5
    }
}

pub fn sanitize_params(params: &mut EncoderParams) {
    params.quality = params.quality.clamp(MIN_QUALITY, MAX_QUALITY);
    if params.quality <= MAX_QUALITY_FOR_STATIC_ENTROPY_CODES {
        params.large_window = false;
    }
    if params.lgwin < MIN_WINDOW_BITS {
        params.lgwin = MIN_WINDOW_BITS;
    } else {
        let max_lgwin = if params.large_window {
            crate::constants::LARGE_MAX_WBITS
        } else {
            MAX_WINDOW_BITS
        };
        if params.lgwin > max_lgwin {
            params.lgwin = max_lgwin;
        }
    }
}

/// Input block size: fast modes take whole windows, low qualities small
/// blocks, the rest grows with quality and window.
pub fn compute_lg_block(params: &EncoderParams) -> i32 {
    let mut lgblock = params.lgblock;
    if params.quality == FAST_ONE_PASS_COMPRESSION_QUALITY
        || params.quality == FAST_TWO_PASS_COMPRESSION_QUALITY
    {
        lgblock = params.lgwin as i32;
    } else if params.quality < MIN_QUALITY_FOR_BLOCK_SPLIT {
        lgblock = 14;
    } else if lgblock == 0 {
        lgblock = 16;
        if params.quality >= 9 && params.lgwin > lgblock as u32 {
            lgblock = 18.min(params.lgwin as i32);
        }
    } else {
        lgblock = lgblock.clamp(MIN_INPUT_BLOCK_BITS, MAX_INPUT_BLOCK_BITS);
    }
    lgblock
}

/// log2 of the encoder ring buffer: one bit over the larger of window and
/// block so a fresh block always fits behind the full window.
pub fn compute_rb_bits(params: &EncoderParams) -> u32 {
    1 + (params.lgwin as i32).max(params.lgblock) as u32
}

pub fn max_metablock_size(params: &EncoderParams) -> usize {
    let bits = (compute_rb_bits(params) as i32).min(MAX_INPUT_BLOCK_BITS);
    1usize << bits
}

/// After this many literals without a match, the greedy loop starts
/// skipping positions (incompressible-data heuristic).
pub fn literal_spree_length_for_sparse_search(params: &EncoderParams) -> usize {
    if params.quality < 9 {
        64
    } else {
        512
    }
}

/// Picks the hasher variant (and its shape parameters) for the quality and
/// window configuration.
pub fn choose_hasher(params: &EncoderParams) -> HasherParams {
    let mut h = HasherParams::default();
    if params.quality > 9 {
        h.hasher_type = 10;
    } else if params.quality == 4 && params.size_hint >= 1 << 20 {
        h.hasher_type = 54;
    } else if params.quality < 5 {
        h.hasher_type = match params.quality {
            0 => 2,
            1 => 3,
            2 => 2,
            3 => 3,
            _ => 4,
        };
    } else if params.lgwin <= 16 {
        h.hasher_type = if params.quality < 7 {
            40
        } else if params.quality < 9 {
            41
        } else {
            42
        };
    } else if params.size_hint >= 1 << 20 && params.lgwin >= 19 {
        h.hasher_type = 6;
        h.block_bits = (params.quality - 1) as u32;
        h.bucket_bits = 15;
        h.hash_len = 5;
        h.num_last_distances_to_check = if params.quality < 7 {
            4
        } else if params.quality < 9 {
            10
        } else {
            16
        };
    } else {
        h.hasher_type = 5;
        h.block_bits = (params.quality - 1) as u32;
        h.bucket_bits = if params.quality < 7 { 14 } else { 15 };
        h.num_last_distances_to_check = if params.quality < 7 {
            4
        } else if params.quality < 9 {
            10
        } else {
            16
        };
    }

    if params.lgwin > 24 {
        // Large-window swaps: the quick and sweep hashers get a rolling
        // companion; the fast qualities stay as they are and the tree
        // hasher handles large windows natively.
        if h.hasher_type == 3 {
            h.hasher_type = 35;
        }
        if h.hasher_type == 54 {
            h.hasher_type = 55;
        }
        if h.hasher_type == 6 {
            h.hasher_type = 65;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EncoderParams;

    #[test]
    fn quality_breakpoints_select_expected_hashers() {
        for (q, expected) in [(0, 2), (1, 3), (2, 2), (3, 3), (4, 4), (10, 10), (11, 10)] {
            let p = EncoderParams::new(q, 22);
            assert_eq!(p.hasher.hasher_type, expected, "quality {}", q);
        }
        // Mid qualities on small windows use the chained hashers.
        let p = EncoderParams::new(5, 16);
        assert_eq!(p.hasher.hasher_type, 40);
        let p = EncoderParams::new(8, 16);
        assert_eq!(p.hasher.hasher_type, 41);
        let p = EncoderParams::new(9, 16);
        assert_eq!(p.hasher.hasher_type, 42);
        // Bigger windows use the sweep hasher.
        let p = EncoderParams::new(9, 22);
        assert_eq!(p.hasher.hasher_type, 5);
    }

    #[test]
    fn lgblock_policy() {
        let p = EncoderParams::new(1, 18);
        assert_eq!(p.lgblock, 18); // fast modes use whole windows
        let p = EncoderParams::new(3, 22);
        assert_eq!(p.lgblock, 14);
        let p = EncoderParams::new(9, 22);
        assert_eq!(p.lgblock, 18);
        let p = EncoderParams::new(5, 22);
        assert_eq!(p.lgblock, 16);
    }

    #[test]
    fn window_bits_are_clamped() {
        let p = EncoderParams::new(5, 40);
        assert_eq!(p.lgwin, 24);
        let p = EncoderParams::new(5, 3);
        assert_eq!(p.lgwin, 10);
    }
}
