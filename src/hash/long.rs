//! Bucketed sweep hashers (variants 5 and 6).
//!
//! Each bucket holds `1 << block_bits` recent positions with a round-robin
//! insertion pointer; the search walks the bucket from most recent to
//! oldest. Variant 5 keys on 4 bytes, variant 6 on up to 8, for the larger
//! windows. Both probe the extended distance cache and fall back to the
//! static dictionary when nothing in the window scores.

use super::{
    backward_reference_penalty_using_last_distance, backward_reference_score,
    backward_reference_score_using_last_distance, find_match_length, load32_le, load64_le,
    prepare_distance_cache, search_in_static_dictionary, DictionarySearchStats, Hasher,
    HasherSearchResult, HASH_MUL32, HASH_MUL64_LONG,
};

pub struct LongHasher<const HASH_64: bool> {
    bucket_bits: u32,
    block_bits: u32,
    block_mask: u32,
    hash_mask: u64,
    hash_shift: u32,
    num_last_distances_to_check: usize,
    /// Entries used per bucket (saturating at the block size via masking).
    num: Vec<u16>,
    buckets: Vec<u32>,
    dict_stats: DictionarySearchStats,
}

/// 4-byte-keyed sweep hasher for windows up to 16 bits. Qualities 5..9.
pub type H5 = LongHasher<false>;
/// 5..8-byte-keyed sweep hasher for bigger windows. Qualities 5..9.
pub type H6 = LongHasher<true>;

impl H5 {
    pub fn new(bucket_bits: u32, block_bits: u32, num_last_distances_to_check: usize) -> H5 {
        LongHasher::with_params(bucket_bits, block_bits, 4, num_last_distances_to_check)
    }
}

impl H6 {
    pub fn new(
        bucket_bits: u32,
        block_bits: u32,
        hash_len: u32,
        num_last_distances_to_check: usize,
    ) -> H6 {
        LongHasher::with_params(bucket_bits, block_bits, hash_len, num_last_distances_to_check)
    }
}

impl<const HASH_64: bool> LongHasher<HASH_64> {
    fn with_params(
        bucket_bits: u32,
        block_bits: u32,
        hash_len: u32,
        num_last_distances_to_check: usize,
    ) -> Self {
        let bucket_size = 1usize << bucket_bits;
        LongHasher {
            bucket_bits,
            block_bits,
            block_mask: (1u32 << block_bits) - 1,
            hash_mask: if HASH_64 {
                u64::MAX >> (64 - 8 * hash_len)
            } else {
                u64::MAX
            },
            hash_shift: if HASH_64 {
                64 - bucket_bits
            } else {
                32 - bucket_bits
            },
            num_last_distances_to_check,
            num: vec![0; bucket_size],
            buckets: vec![0; bucket_size << block_bits],
            dict_stats: DictionarySearchStats::default(),
        }
    }

    #[inline]
    fn hash_bytes(&self, data: &[u8]) -> usize {
        if HASH_64 {
            let h = (load64_le(data) & self.hash_mask).wrapping_mul(HASH_MUL64_LONG);
            (h >> self.hash_shift) as usize
        } else {
            let h = load32_le(data).wrapping_mul(HASH_MUL32);
            (h >> self.hash_shift) as usize
        }
    }
}

impl<const HASH_64: bool> Hasher for LongHasher<HASH_64> {
    fn hash_type_length(&self) -> usize {
        if HASH_64 {
            8
        } else {
            4
        }
    }

    fn store_lookahead(&self) -> usize {
        self.hash_type_length()
    }

    fn prepare(&mut self, one_shot: bool, input_size: usize, data: &[u8]) {
        let partial_prepare_threshold = self.num.len() >> 6;
        if one_shot && input_size <= partial_prepare_threshold {
            for i in 0..input_size {
                if data.len() >= i + self.hash_type_length() {
                    let key = self.hash_bytes(&data[i..]);
                    self.num[key] = 0;
                }
            }
        } else {
            self.num.fill(0);
        }
        self.dict_stats = DictionarySearchStats::default();
    }

    fn store(&mut self, data: &[u8], mask: usize, ix: usize) {
        let key = self.hash_bytes(&data[ix & mask..]);
        let minor_ix = (u32::from(self.num[key]) & self.block_mask) as usize;
        self.buckets[minor_ix + (key << self.block_bits)] = ix as u32;
        self.num[key] = self.num[key].wrapping_add(1);
    }

    fn prepare_distance_cache(&self, distance_cache: &mut [i32; 16]) {
        prepare_distance_cache(distance_cache, self.num_last_distances_to_check);
    }

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
    ) {
        let cur_ix_masked = cur_ix & ring_buffer_mask;
        let min_score = out.score;
        let mut best_score = out.score;
        let mut best_len = out.len;
        out.len = 0;
        out.len_code_delta = 0;

        // Try the (extended) distance cache first.
        for i in 0..self.num_last_distances_to_check {
            let backward = distance_cache[i] as usize;
            let prev_ix = cur_ix.wrapping_sub(backward);
            if prev_ix >= cur_ix || backward > max_backward {
                continue;
            }
            let prev_ix = prev_ix & ring_buffer_mask;
            if cur_ix_masked + best_len > ring_buffer_mask
                || prev_ix + best_len > ring_buffer_mask
                || cur_ix_masked + best_len >= data.len()
                || prev_ix + best_len >= data.len()
                || data[cur_ix_masked + best_len] != data[prev_ix + best_len]
            {
                continue;
            }
            let len = find_match_length(&data[prev_ix..], &data[cur_ix_masked..], max_length);
            // Two-byte matches only pay off from the cheapest cache slots.
            if len >= 3 || (len == 2 && i < 2) {
                let mut score = backward_reference_score_using_last_distance(len);
                if best_score < score {
                    if i != 0 {
                        score = score
                            .saturating_sub(backward_reference_penalty_using_last_distance(i));
                    }
                    if best_score < score {
                        best_score = score;
                        best_len = len;
                        out.len = best_len;
                        out.distance = backward;
                        out.score = best_score;
                    }
                }
            }
        }

        // Bucket sweep, newest entry first.
        {
            let key = self.hash_bytes(&data[cur_ix_masked..]);
            let bucket = &self.buckets[key << self.block_bits..];
            let num_key = u32::from(self.num[key]) as usize;
            let block_size = 1usize << self.block_bits;
            let down = num_key.saturating_sub(block_size);
            let mut i = num_key;
            while i > down {
                i -= 1;
                let prev_ix = bucket[i & self.block_mask as usize] as usize;
                let backward = cur_ix.wrapping_sub(prev_ix);
                if backward > max_backward {
                    break;
                }
                let prev_ix = prev_ix & ring_buffer_mask;
                if cur_ix_masked + best_len > ring_buffer_mask
                    || prev_ix + best_len > ring_buffer_mask
                    || cur_ix_masked + best_len >= data.len()
                    || prev_ix + best_len >= data.len()
                    || data[cur_ix_masked + best_len] != data[prev_ix + best_len]
                {
                    continue;
                }
                let len = find_match_length(&data[prev_ix..], &data[cur_ix_masked..], max_length);
                if len >= 4 {
                    let score = backward_reference_score(len, backward);
                    if best_score < score {
                        best_score = score;
                        best_len = len;
                        out.len = best_len;
                        out.distance = backward;
                        out.score = best_score;
                    }
                }
            }
            let minor_ix = (self.num[key] & self.block_mask as u16) as usize;
            self.buckets[minor_ix + (key << self.block_bits)] = cur_ix as u32;
            self.num[key] = self.num[key].wrapping_add(1);
        }

        if min_score == out.score {
            search_in_static_dictionary(
                &mut self.dict_stats,
                &data[cur_ix_masked..],
                max_length,
                max_backward + gap,
                max_distance,
                out,
                false,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::SCORE_BASE;

    #[test]
    fn finds_matches_across_the_bucket() {
        let data = b"the cat sat -- the cat sat -- the cat sat -- fin....";
        let mut h = H5::new(14, 2, 4);
        h.prepare(true, data.len(), data);
        let mask = usize::MAX >> 1;
        for i in 0..30 {
            h.store(data, mask, i);
        }
        let mut out = HasherSearchResult::new(SCORE_BASE + 100);
        let cache = [4i32, 11, 15, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        h.find_longest_match(data, mask, &cache, 30, data.len() - 30, 30, 0, 1 << 20, &mut out);
        assert!(out.len >= 12, "len = {}", out.len);
        assert_eq!(out.distance % 15, 0); // phrase repeats every 15 bytes
    }

    #[test]
    fn distance_cache_hit_wins_when_short() {
        // Repetition at exactly the cached distance 4.
        let data = b"abcdabcdabcdabcdabcdabcdabcd tail pad tail pad";
        let mut h = H6::new(15, 2, 8, 10);
        h.prepare(true, data.len(), data);
        let mask = usize::MAX >> 1;
        for i in 0..12 {
            h.store(data, mask, i);
        }
        let mut out = HasherSearchResult::new(SCORE_BASE + 100);
        let mut cache = [4i32, 11, 15, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        h.prepare_distance_cache(&mut cache);
        h.find_longest_match(data, mask, &cache, 12, data.len() - 12, 12, 0, 1 << 20, &mut out);
        assert!(out.len >= 4);
        assert_eq!(out.distance, 4);
    }
}
