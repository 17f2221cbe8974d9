//! Quick single-probe hashers (variants 2, 3, 4 and 54).
//!
//! One bucket row per hash of the first `HASH_LEN` bytes, `SWEEP` slots per
//! row with a position-derived rotation. Fast and forgetful; used at the low
//! qualities and (with a 7-byte key) for large inputs at quality 4.

use super::{
    backward_reference_score, backward_reference_score_using_last_distance, find_match_length,
    load64_le, search_in_static_dictionary, DictionarySearchStats, Hasher, HasherSearchResult,
    HASH_MUL64, HASH_MUL64_LONG,
};

pub struct QuickHasher<
    const BUCKET_BITS: u32,
    const SWEEP: usize,
    const HASH_LEN: usize,
    const USE_DICT: bool,
> {
    buckets: Vec<u32>,
    dict_stats: DictionarySearchStats,
}

/// 16-bit hash, single slot, with dictionary probe. Quality 2.
pub type H2 = QuickHasher<16, 1, 5, true>;
/// 16-bit hash, 2-way sweep. Quality 3.
pub type H3 = QuickHasher<16, 2, 5, false>;
/// 17-bit hash, 4-way sweep, dictionary probe. Quality 4.
pub type H4 = QuickHasher<17, 4, 5, true>;
/// 20-bit 7-byte hash, 4-way sweep. Quality 4 on large inputs.
pub type H54 = QuickHasher<20, 4, 7, false>;

impl<const BUCKET_BITS: u32, const SWEEP: usize, const HASH_LEN: usize, const USE_DICT: bool>
    QuickHasher<BUCKET_BITS, SWEEP, HASH_LEN, USE_DICT>
{
    pub fn new() -> Self {
        QuickHasher {
            buckets: vec![0; (1usize << BUCKET_BITS) + SWEEP],
            dict_stats: DictionarySearchStats::default(),
        }
    }

    #[inline]
    fn hash_bytes(data: &[u8]) -> usize {
        // The multiplication mixes into the high bits; shifting the loaded
        // word first limits the key to HASH_LEN bytes.
        let mul = if HASH_LEN == 7 {
            HASH_MUL64_LONG
        } else {
            HASH_MUL64
        };
        let h = (load64_le(data) << (64 - 8 * HASH_LEN as u32)).wrapping_mul(mul);
        (h >> (64 - BUCKET_BITS)) as usize
    }
}

impl<const BUCKET_BITS: u32, const SWEEP: usize, const HASH_LEN: usize, const USE_DICT: bool> Default
    for QuickHasher<BUCKET_BITS, SWEEP, HASH_LEN, USE_DICT>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const BUCKET_BITS: u32, const SWEEP: usize, const HASH_LEN: usize, const USE_DICT: bool> Hasher
    for QuickHasher<BUCKET_BITS, SWEEP, HASH_LEN, USE_DICT>
{
    fn hash_type_length(&self) -> usize {
        8
    }

    fn store_lookahead(&self) -> usize {
        8
    }

    fn prepare(&mut self, one_shot: bool, input_size: usize, data: &[u8]) {
        let partial_prepare_threshold = (4usize << BUCKET_BITS) >> 7;
        if one_shot && input_size <= partial_prepare_threshold {
            // Clearing only the touched keys is much cheaper for tiny
            // inputs than wiping the full table.
            for i in 0..input_size {
                if data.len() >= i + 8 {
                    let key = Self::hash_bytes(&data[i..]);
                    self.buckets[key..key + SWEEP].fill(0);
                }
            }
        } else {
            self.buckets.fill(0);
        }
        self.dict_stats = DictionarySearchStats::default();
    }

    fn store(&mut self, data: &[u8], mask: usize, ix: usize) {
        let key = Self::hash_bytes(&data[ix & mask..]);
        let off = (ix >> 3) % SWEEP;
        self.buckets[key + off] = ix as u32;
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
        let best_len_in = out.len;
        let cur_ix_masked = cur_ix & ring_buffer_mask;
        let key = Self::hash_bytes(&data[cur_ix_masked..]);
        let mut compare_char = data[cur_ix_masked + best_len_in] as i32;
        let min_score = out.score;
        let mut best_score = out.score;
        let mut best_len = best_len_in;
        let cached_backward = distance_cache[0] as usize;
        let mut prev_ix = cur_ix.wrapping_sub(cached_backward);
        out.len_code_delta = 0;

        // Distance code 0: free to encode, so try it first.
        if prev_ix < cur_ix {
            prev_ix &= ring_buffer_mask;
            if prev_ix + best_len < data.len()
                && compare_char == data[prev_ix + best_len] as i32
            {
                let len =
                    find_match_length(&data[prev_ix..], &data[cur_ix_masked..], max_length);
                if len >= 4 {
                    let score = backward_reference_score_using_last_distance(len);
                    if best_score < score {
                        best_score = score;
                        best_len = len;
                        out.len = len;
                        out.distance = cached_backward;
                        out.score = best_score;
                        compare_char = data[cur_ix_masked + best_len] as i32;
                        if SWEEP == 1 {
                            self.buckets[key] = cur_ix as u32;
                            return;
                        }
                    }
                }
            }
        }

        if SWEEP == 1 {
            // Only one slot: no loop needed.
            let prev = self.buckets[key] as usize;
            self.buckets[key] = cur_ix as u32;
            let backward = cur_ix.wrapping_sub(prev);
            let prev = prev & ring_buffer_mask;
            if prev + best_len_in >= data.len()
                || compare_char != data[prev + best_len_in] as i32
            {
                return;
            }
            if backward == 0 || backward > max_backward {
                return;
            }
            let len = find_match_length(&data[prev..], &data[cur_ix_masked..], max_length);
            if len >= 4 {
                let score = backward_reference_score(len, backward);
                if best_score < score {
                    out.len = len;
                    out.distance = backward;
                    out.score = score;
                    return;
                }
            }
        } else {
            for i in 0..SWEEP {
                let prev = self.buckets[key + i] as usize;
                let backward = cur_ix.wrapping_sub(prev);
                let prev = prev & ring_buffer_mask;
                if prev + best_len >= data.len()
                    || compare_char != data[prev + best_len] as i32
                {
                    continue;
                }
                if backward == 0 || backward > max_backward {
                    continue;
                }
                let len = find_match_length(&data[prev..], &data[cur_ix_masked..], max_length);
                if len >= 4 {
                    let score = backward_reference_score(len, backward);
                    if best_score < score {
                        best_score = score;
                        best_len = len;
                        out.len = best_len;
                        out.distance = backward;
                        out.score = score;
                        compare_char = data[cur_ix_masked + best_len] as i32;
                    }
                }
            }
        }

        if USE_DICT && min_score == out.score {
            search_in_static_dictionary(
                &mut self.dict_stats,
                &data[cur_ix_masked..],
                max_length,
                max_backward + gap,
                max_distance,
                out,
                true,
            );
        }
        self.buckets[key + ((cur_ix >> 3) % SWEEP)] = cur_ix as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::SCORE_BASE;

    fn search<H: Hasher>(h: &mut H, data: &[u8], cur_ix: usize) -> HasherSearchResult {
        let mask = usize::MAX >> 1;
        let mut out = HasherSearchResult::new(SCORE_BASE + 100);
        let cache = [4i32, 11, 15, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        h.find_longest_match(
            data,
            mask,
            &cache,
            cur_ix,
            data.len() - cur_ix,
            cur_ix,
            0,
            1 << 20,
            &mut out,
        );
        out
    }

    #[test]
    fn finds_a_repeated_phrase() {
        let data = b"abcdefgh XYZ abcdefgh XYZ trailing bytes here....";
        let mut h = H2::new();
        h.prepare(true, data.len(), data);
        for i in 0..13 {
            h.store(data, usize::MAX >> 1, i);
        }
        let r = search(&mut h, data, 13);
        assert!(r.len >= 8, "len = {}", r.len);
        assert_eq!(r.distance, 13);
    }

    #[test]
    fn sweep_variant_finds_matches_too() {
        let data = b"0123456789 repeat 0123456789 repeat tail padding";
        let mut h = H4::new();
        h.prepare(true, data.len(), data);
        for i in 0..18 {
            h.store(data, usize::MAX >> 1, i);
        }
        let r = search(&mut h, data, 18);
        assert!(r.len >= 10);
        assert_eq!(r.distance, 18);
    }
}
