//! Match finders ("hashers").
//!
//! A family of hash-table structures mapping short byte prefixes to earlier
//! positions in the input. Variants trade search effort for match quality;
//! the encoder picks one per quality/window configuration and the greedy
//! loop is monomorphized over it. All variants share one capability set
//! (the [`Hasher`] trait) and one match scoring rule.

mod composite;
mod forgetful;
mod long;
mod quick;
mod rolling;
mod tree;

pub use composite::{H35, H55, H65};
pub use forgetful::{H40, H41, H42};
pub use long::{H5, H6};
pub use quick::{H2, H3, H4, H54};
pub use rolling::{Rolling, RollingFast};
pub use tree::{BackwardMatch, H10, MAX_NUM_MATCHES_H10, MAX_TREE_COMP_LENGTH};

use crate::constants::log2_floor_non_zero;
use crate::dictionary::static_dict::{hash14, hash_table_item};
use crate::dictionary::{OFFSETS_BY_LENGTH, SIZE_BITS_BY_LENGTH};
use crate::params::EncoderParams;

/// Number of bytes two positions have in common, up to `limit`.
#[inline]
pub fn find_match_length(a: &[u8], b: &[u8], limit: usize) -> usize {
    let limit = limit.min(a.len()).min(b.len());
    let mut matched = 0;
    // Word-at-a-time comparison, byte tail.
    while matched + 8 <= limit {
        let x = u64::from_le_bytes(a[matched..matched + 8].try_into().unwrap());
        let y = u64::from_le_bytes(b[matched..matched + 8].try_into().unwrap());
        let diff = x ^ y;
        if diff != 0 {
            return matched + (diff.trailing_zeros() >> 3) as usize;
        }
        matched += 8;
    }
    while matched < limit && a[matched] == b[matched] {
        matched += 1;
    }
    matched
}

#[inline]
pub fn load32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[..4].try_into().unwrap())
}

#[inline]
pub fn load64_le(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[..8].try_into().unwrap())
}

pub const HASH_MUL32: u32 = 0x1E35_A7BD;
pub const HASH_MUL64: u64 = 0x1E35_A7BD_1E35_A7BD;
pub const HASH_MUL64_LONG: u64 = 0x1FE3_5A7B_D357_9BD3;

// ─────────────────────────────────────────────────────────────────────────────
// Match scoring
// ─────────────────────────────────────────────────────────────────────────────

pub const LITERAL_BYTE_SCORE: u64 = 135;
pub const DISTANCE_BIT_PENALTY: u64 = 30;
/// Score must stay positive after the maximal distance penalty.
pub const SCORE_BASE: u64 = DISTANCE_BIT_PENALTY * 8 * 8;

/// Discriminator between candidate matches: longer is better, nearer is
/// better (approximating the extra bits a far distance costs).
#[inline]
pub fn backward_reference_score(copy_length: usize, backward_reference_offset: usize) -> u64 {
    SCORE_BASE + LITERAL_BYTE_SCORE * copy_length as u64
        - DISTANCE_BIT_PENALTY * u64::from(log2_floor_non_zero(backward_reference_offset))
}

/// A distance-cache hit is coded in very few bits; give it a flat bonus.
#[inline]
pub fn backward_reference_score_using_last_distance(copy_length: usize) -> u64 {
    LITERAL_BYTE_SCORE * copy_length as u64 + SCORE_BASE + 15
}

/// Deeper cache slots cost more bits; penalty grows with the slot index.
#[inline]
pub fn backward_reference_penalty_using_last_distance(distance_short_code: usize) -> u64 {
    39 + ((0x1CA10u64 >> (distance_short_code & 0xE)) & 0xE)
}

/// Result slot for a match search; `score` is only improved, never reset,
/// so chained finders refine each other's answers.
#[derive(Clone, Copy, Debug)]
pub struct HasherSearchResult {
    pub len: usize,
    pub distance: usize,
    pub score: u64,
    /// Nonzero for dictionary matches whose emitted length code differs
    /// from the produced length.
    pub len_code_delta: i32,
}

impl HasherSearchResult {
    pub fn new(min_score: u64) -> Self {
        HasherSearchResult {
            len: 0,
            distance: 0,
            score: min_score,
            len_code_delta: 0,
        }
    }
}

/// Extends the 4-entry distance cache with the ±1..±3 neighborhoods of the
/// two most recent distances, for hashers probing 10 or 16 cache slots.
pub fn prepare_distance_cache(distance_cache: &mut [i32; 16], num_distances: usize) {
    if num_distances > 4 {
        let last_distance = distance_cache[0];
        distance_cache[4] = last_distance - 1;
        distance_cache[5] = last_distance + 1;
        distance_cache[6] = last_distance - 2;
        distance_cache[7] = last_distance + 2;
        distance_cache[8] = last_distance - 3;
        distance_cache[9] = last_distance + 3;
        if num_distances > 10 {
            let next_last_distance = distance_cache[1];
            distance_cache[10] = next_last_distance - 1;
            distance_cache[11] = next_last_distance + 1;
            distance_cache[12] = next_last_distance - 2;
            distance_cache[13] = next_last_distance + 2;
            distance_cache[14] = next_last_distance - 3;
            distance_cache[15] = next_last_distance + 3;
        }
    }
}

/// Probe statistics shared by all hashers: the dictionary probe turns
/// itself off when its hit rate collapses.
#[derive(Clone, Copy, Default)]
pub struct DictionarySearchStats {
    pub num_lookups: usize,
    pub num_matches: usize,
}

fn test_static_dictionary_item(
    item: usize,
    data: &[u8],
    max_length: usize,
    max_backward: usize,
    max_distance: usize,
    out: &mut HasherSearchResult,
) -> bool {
    let len = item & 0x1F;
    let word_idx = item >> 5;
    if len > max_length {
        return false;
    }
    let offset = OFFSETS_BY_LENGTH[len] as usize + len * word_idx;
    let word = &crate::dictionary::DICTIONARY_DATA[offset..offset + len];
    let matchlen = find_match_length(data, word, len);
    if matchlen + crate::dictionary::transform::CUTOFF_TRANSFORMS_COUNT as usize <= len
        || matchlen == 0
    {
        return false;
    }
    let cut = len - matchlen;
    let transform_id = (cut << 2)
        + ((crate::dictionary::transform::CUTOFF_TRANSFORMS >> (cut as u64 * 6)) & 0x3F) as usize;
    let backward = max_backward + 1 + word_idx + (transform_id << SIZE_BITS_BY_LENGTH[len]);
    if backward > max_distance {
        return false;
    }
    let score = backward_reference_score(matchlen, backward);
    if score < out.score {
        return false;
    }
    out.len = matchlen;
    out.len_code_delta = len as i32 - matchlen as i32;
    out.distance = backward;
    out.score = score;
    true
}

/// Probes the static dictionary for a match at `data`. `shallow` probes one
/// table slot instead of two. Gives up permanently (per stream) when fewer
/// than one lookup in 128 produces a match.
pub fn search_in_static_dictionary(
    stats: &mut DictionarySearchStats,
    data: &[u8],
    max_length: usize,
    max_backward: usize,
    max_distance: usize,
    out: &mut HasherSearchResult,
    shallow: bool,
) {
    if stats.num_matches < stats.num_lookups >> 7 {
        return;
    }
    if data.len() < 4 {
        return;
    }
    let mut key = hash14(data) << 1;
    let probes = if shallow { 1 } else { 2 };
    for _ in 0..probes {
        let item = hash_table_item(key);
        stats.num_lookups += 1;
        if item != 0
            && test_static_dictionary_item(item, data, max_length, max_backward, max_distance, out)
        {
            stats.num_matches += 1;
        }
        key += 1;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// The hasher capability set
// ─────────────────────────────────────────────────────────────────────────────

/// Shared contract of all match finders. `data` is the encoder ring buffer
/// and `mask` its position mask; positions are absolute and monotonically
/// increasing within a prepared span.
pub trait Hasher {
    /// Bytes the hash key reads at a stored position.
    fn hash_type_length(&self) -> usize;
    /// Bytes of lookahead `store` needs beyond the stored position.
    fn store_lookahead(&self) -> usize;

    fn prepare(&mut self, one_shot: bool, input_size: usize, data: &[u8]);

    fn store(&mut self, data: &[u8], mask: usize, ix: usize);

    fn store_range(&mut self, data: &[u8], mask: usize, ix_start: usize, ix_end: usize) {
        for i in ix_start..ix_end {
            self.store(data, mask, i);
        }
    }

    /// Inserts the three positions straddling a block boundary so keys that
    /// span it are present.
    fn stitch_to_previous_block(
        &mut self,
        num_bytes: usize,
        position: usize,
        ringbuffer: &[u8],
        ringbuffer_mask: usize,
    ) {
        if num_bytes >= self.hash_type_length() - 1 && position >= 3 {
            self.store(ringbuffer, ringbuffer_mask, position - 3);
            self.store(ringbuffer, ringbuffer_mask, position - 2);
            self.store(ringbuffer, ringbuffer_mask, position - 1);
        }
    }

    /// Extends the distance cache if this variant probes more than 4 slots.
    fn prepare_distance_cache(&self, _distance_cache: &mut [i32; 16]) {}

    /// Updates `out` only when a better-scoring match is found.
    #[allow(clippy::too_many_arguments)]
    fn find_longest_match(
        &mut self,
        data: &[u8],
        ring_buffer_mask: usize,
        distance_cache: &[i32; 16],
        cur_ix: usize,
        max_length: usize,
        max_backward: usize,
        gap: usize,
        max_distance: usize,
        out: &mut HasherSearchResult,
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Closed sum of variants
// ─────────────────────────────────────────────────────────────────────────────

/// All hasher variants, selected once at encoder creation. The numbering
/// follows the reference configuration names.
pub enum AnyHasher {
    H2(Box<H2>),
    H3(Box<H3>),
    H4(Box<H4>),
    H5(Box<H5>),
    H6(Box<H6>),
    H40(Box<H40>),
    H41(Box<H41>),
    H42(Box<H42>),
    H54(Box<H54>),
    H35(Box<H35>),
    H55(Box<H55>),
    H65(Box<H65>),
    H10(Box<H10>),
}

impl AnyHasher {
    /// Instantiates the variant selected by `params.hasher.hasher_type`.
    pub fn new(params: &EncoderParams) -> AnyHasher {
        let h = &params.hasher;
        match h.hasher_type {
            2 => AnyHasher::H2(Box::new(H2::new())),
            3 => AnyHasher::H3(Box::new(H3::new())),
            4 => AnyHasher::H4(Box::new(H4::new())),
            5 => AnyHasher::H5(Box::new(H5::new(
                h.bucket_bits,
                h.block_bits,
                h.num_last_distances_to_check,
            ))),
            6 => AnyHasher::H6(Box::new(H6::new(
                h.bucket_bits,
                h.block_bits,
                h.hash_len,
                h.num_last_distances_to_check,
            ))),
            40 => AnyHasher::H40(Box::new(H40::new(params.quality))),
            41 => AnyHasher::H41(Box::new(H41::new(params.quality))),
            42 => AnyHasher::H42(Box::new(H42::new(params.quality))),
            54 => AnyHasher::H54(Box::new(H54::new())),
            35 => AnyHasher::H35(Box::new(H35::new())),
            55 => AnyHasher::H55(Box::new(H55::new())),
            65 => AnyHasher::H65(Box::new(H65::new(
                h.bucket_bits,
                h.block_bits,
                h.hash_len,
                h.num_last_distances_to_check,
            ))),
            10 => AnyHasher::H10(Box::new(H10::new(params.lgwin))),
            t => unreachable!("no hasher variant {}", t),
        }
    }

    pub fn as_tree_hasher(&mut self) -> Option<&mut H10> {
        match self {
            AnyHasher::H10(h) => Some(h),
            _ => None,
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $h:ident, $body:expr) => {
        match $self {
            AnyHasher::H2($h) => $body,
            AnyHasher::H3($h) => $body,
            AnyHasher::H4($h) => $body,
            AnyHasher::H5($h) => $body,
            AnyHasher::H6($h) => $body,
            AnyHasher::H40($h) => $body,
            AnyHasher::H41($h) => $body,
            AnyHasher::H42($h) => $body,
            AnyHasher::H54($h) => $body,
            AnyHasher::H35($h) => $body,
            AnyHasher::H55($h) => $body,
            AnyHasher::H65($h) => $body,
            AnyHasher::H10($h) => $body,
        }
    };
}

impl AnyHasher {
    pub fn prepare(&mut self, one_shot: bool, input_size: usize, data: &[u8]) {
        dispatch!(self, h, h.prepare(one_shot, input_size, data))
    }

    pub fn stitch_to_previous_block(
        &mut self,
        num_bytes: usize,
        position: usize,
        ringbuffer: &[u8],
        ringbuffer_mask: usize,
    ) {
        dispatch!(
            self,
            h,
            h.stitch_to_previous_block(num_bytes, position, ringbuffer, ringbuffer_mask)
        )
    }
}

pub(crate) use dispatch;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_length_counts_common_prefix() {
        assert_eq!(find_match_length(b"abcdef", b"abcxef", 6), 3);
        assert_eq!(find_match_length(b"same", b"same", 4), 4);
        assert_eq!(find_match_length(b"", b"x", 1), 0);
        // Long inputs exercise the word-at-a-time loop.
        let a = vec![7u8; 100];
        let mut b = a.clone();
        b[83] = 9;
        assert_eq!(find_match_length(&a, &b, 100), 83);
    }

    #[test]
    fn score_prefers_longer_then_nearer() {
        assert!(backward_reference_score(10, 100) > backward_reference_score(9, 100));
        assert!(backward_reference_score(10, 100) > backward_reference_score(10, 1000));
        // A cache hit beats a fresh distance of equal length at range.
        assert!(
            backward_reference_score_using_last_distance(8) > backward_reference_score(8, 1 << 20)
        );
    }

    #[test]
    fn slot_penalties_grow() {
        let penalties: Vec<u64> = (0..16)
            .map(backward_reference_penalty_using_last_distance)
            .collect();
        // Slot 0 has the smallest penalty; pairs share values.
        assert!(penalties[0] <= penalties[2]);
        assert!(penalties[2] <= penalties[4]);
    }

    #[test]
    fn extended_cache_layout() {
        let mut cache = [100, 200, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        prepare_distance_cache(&mut cache, 16);
        assert_eq!(&cache[4..10], &[99, 101, 98, 102, 97, 103]);
        assert_eq!(&cache[10..16], &[199, 201, 198, 202, 197, 203]);
    }

    #[test]
    fn dictionary_probe_finds_common_words() {
        let mut stats = DictionarySearchStats::default();
        let mut out = HasherSearchResult::new(0);
        search_in_static_dictionary(
            &mut stats,
            b"information about the world",
            27,
            1 << 20,
            (1 << 20) + (1 << 18),
            &mut out,
            false,
        );
        // Whether this exact word is in the probe table is data-dependent,
        // but the probe must never fabricate an invalid result.
        if out.len > 0 {
            assert!(out.distance > 1 << 20);
            assert!(out.score > 0);
        }
    }
}
